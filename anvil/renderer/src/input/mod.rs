use std::time::{Duration, Instant};

use common::OverlayChannel;

pub mod hooks;
pub mod hotkeys;
pub mod keyboard;
pub mod mouse;

use hooks::{CursorHandle, HookHost, InputHookState};
use hotkeys::{HotkeyAction, HotkeyDispatcher, HotkeyEdge, HotkeyRole, HotkeyTable};
use keyboard::{KeyEventType, KeyInputContext, KeyboardState};
use mouse::{MouseDisposition, QuickSelect, wm};

pub const PM_REMOVE: u32 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMessage {
    pub hwnd: u64,
    pub message: u32,
    pub wparam: u64,
    pub lparam: i64,
}

/// Decisions the input layer hands back to the overlay runtime, which owns
/// the event pipe and the overlay visibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    ToggleOverlay(OverlayChannel),
    FireHotkey(HotkeyRole),
    ForwardKeyEvent {
        msg: u32,
        wparam: u64,
        lparam: i64,
    },
    ForwardMouseEvent {
        msg: u32,
        wparam: u64,
        lparam: i64,
    },
    SaveQuickClip {
        tutorial_active: bool,
    },
    BeginQuickSelect,
    EndQuickSelect {
        cancelled: bool,
    },
    QuickSelectTimeoutExpired,
}

/// Ties the keyboard mirror, hotkey table/dispatcher, quick-select gesture
/// and hook-state machine together. Runs on the game's message thread.
pub struct InputLayer {
    pub keyboard: KeyboardState,
    pub table: HotkeyTable,
    pub dispatcher: HotkeyDispatcher,
    pub quick_select: QuickSelect,
    pub hooks: InputHookState,
    tutorial_locked: bool,
}

impl InputLayer {
    pub fn new() -> Self {
        Self {
            keyboard: KeyboardState::new(),
            table: HotkeyTable::new(),
            dispatcher: HotkeyDispatcher::new(),
            quick_select: QuickSelect::new(),
            hooks: InputHookState::new(),
            tutorial_locked: false,
        }
    }

    pub fn set_tutorial_lock(&mut self, locked: bool) {
        self.tutorial_locked = locked;
    }

    pub fn tutorial_locked(&self) -> bool {
        self.tutorial_locked
    }

    pub fn start_quick_select_timeout(&mut self, timeout_ms: u32) {
        let cancel_bound = self.table.virtual_key(HotkeyRole::Cancel) != 0;
        self.quick_select
            .start_timeout(Duration::from_millis(timeout_ms as u64), cancel_bound);
    }

    /// `GetKeyboardState` entry: observes transitions and strips pressed
    /// bits the game must not see.
    pub fn handle_keyboard_state(
        &mut self,
        raw: &mut [u8; 256],
        browser_showing: bool,
        actions: &mut Vec<InputAction>,
    ) {
        let mut ctx = KeyInputContext::new(
            &self.table,
            &mut self.dispatcher,
            browser_showing,
            self.quick_select.selecting(),
        );

        self.keyboard.update_keyboard_state(raw, &mut ctx);

        for action in ctx.actions.drain(..) {
            actions.push(hotkey_action(action));
        }
    }

    /// `GetAsyncKeyState` entry: returns the state the game observes.
    pub fn handle_async_key_state(
        &mut self,
        key: usize,
        state: u16,
        browser_showing: bool,
    ) -> u16 {
        let ctx = KeyInputContext::new(
            &self.table,
            &mut self.dispatcher,
            browser_showing,
            self.quick_select.selecting(),
        );

        self.keyboard.update_single_key_state(key, state, &ctx)
    }

    /// `GetRawInputData` keyboard path: mirrors the key and reports
    /// whether the packet must be zeroed before the game sees it.
    pub fn handle_raw_key(
        &mut self,
        key: usize,
        event: KeyEventType,
        browser_showing: bool,
        actions: &mut Vec<InputAction>,
    ) -> bool {
        let mut ctx = KeyInputContext::new(
            &self.table,
            &mut self.dispatcher,
            browser_showing,
            self.quick_select.selecting(),
        );

        let eat = self.keyboard.update_wm_key_state(key, event, &mut ctx);

        for action in ctx.actions.drain(..) {
            actions.push(hotkey_action(action));
        }

        eat
    }

    /// Handles one message removed from the game's queue; true means the
    /// message was consumed and must not reach the game.
    pub fn input_wnd_proc(
        &mut self,
        msg: &WindowMessage,
        browser_showing: bool,
        overlay_cursor: CursorHandle,
        host: &mut dyn HookHost,
        actions: &mut Vec<InputAction>,
    ) -> bool {
        match msg.message {
            wm::KEYDOWN | wm::SYSKEYDOWN => {
                self.handle_key(msg, KeyEventType::Down, browser_showing, actions)
            }
            wm::KEYUP | wm::SYSKEYUP => {
                self.handle_key(msg, KeyEventType::Up, browser_showing, actions)
            }
            wm::CHAR => self.handle_key(msg, KeyEventType::Char, browser_showing, actions),
            wm::SETCURSOR => {
                self.hooks
                    .reset_overlay_cursor(browser_showing, overlay_cursor, host);
                browser_showing
            }
            wm::INPUT => browser_showing,
            message if mouse::is_mouse_message(message) => {
                match self
                    .quick_select
                    .route_message(message, browser_showing, Instant::now())
                {
                    MouseDisposition::PassThrough => false,
                    MouseDisposition::Forward => {
                        actions.push(InputAction::ForwardMouseEvent {
                            msg: message,
                            wparam: msg.wparam,
                            lparam: msg.lparam,
                        });
                        true
                    }
                    MouseDisposition::BeginSelection => {
                        actions.push(InputAction::BeginQuickSelect);
                        true
                    }
                }
            }
            _ => false,
        }
    }

    fn handle_key(
        &mut self,
        msg: &WindowMessage,
        event: KeyEventType,
        browser_showing: bool,
        actions: &mut Vec<InputAction>,
    ) -> bool {
        let mut ctx = KeyInputContext::new(
            &self.table,
            &mut self.dispatcher,
            browser_showing,
            self.quick_select.selecting(),
        );

        let eaten = self
            .keyboard
            .update_wm_key_state(msg.wparam as usize, event, &mut ctx);

        for action in ctx.actions.drain(..) {
            actions.push(hotkey_action(action));
        }

        if browser_showing {
            actions.push(InputAction::ForwardKeyEvent {
                msg: msg.message,
                wparam: msg.wparam,
                lparam: msg.lparam,
            });
        }

        eaten
    }

    /// `PeekMessage` re-entry: messages removed with PM_REMOVE run through
    /// the dispatcher; a consumed message makes the hook re-poll.
    pub fn handle_peek_message(
        &mut self,
        msg: &WindowMessage,
        remove_flags: u32,
        browser_showing: bool,
        overlay_cursor: CursorHandle,
        host: &mut dyn HookHost,
        actions: &mut Vec<InputAction>,
    ) -> bool {
        if remove_flags & PM_REMOVE == 0 {
            return false;
        }

        self.input_wnd_proc(msg, browser_showing, overlay_cursor, host, actions)
    }

    /// Per-frame pump: drains queued hotkey events and checks the
    /// quick-select arming window.
    pub fn process_frame(&mut self, now: Instant, actions: &mut Vec<InputAction>) {
        for event in self.dispatcher.drain() {
            if event.edge != HotkeyEdge::Press {
                continue;
            }

            match event.role {
                HotkeyRole::QuickClip => {
                    // Quick clip is the one action the tutorial wants; it
                    // also ends the tutorial.
                    actions.push(InputAction::SaveQuickClip {
                        tutorial_active: self.tutorial_locked,
                    });
                    self.tutorial_locked = false;
                }
                HotkeyRole::Cancel => {
                    self.quick_select.stop();
                    actions.push(InputAction::EndQuickSelect { cancelled: true });
                }
                HotkeyRole::Select => {
                    self.quick_select.stop();
                    actions.push(InputAction::EndQuickSelect { cancelled: false });
                }
                role if self.tutorial_locked => {
                    log::debug!("[Input]: hotkey '{}' ignored during tutorial", role.name());
                }
                role => actions.push(InputAction::FireHotkey(role)),
            }
        }

        if self.quick_select.timeout_expired(now) {
            actions.push(InputAction::QuickSelectTimeoutExpired);
        }
    }
}

fn hotkey_action(action: HotkeyAction) -> InputAction {
    match action {
        HotkeyAction::ToggleOverlay(channel) => InputAction::ToggleOverlay(channel),
        HotkeyAction::Fire(role) => InputAction::FireHotkey(role),
    }
}

impl Default for InputLayer {
    fn default() -> Self {
        Self::new()
    }
}
