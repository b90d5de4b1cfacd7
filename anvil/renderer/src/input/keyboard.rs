use common::KeyModifiers;

use crate::input::hotkeys::{HotkeyAction, HotkeyDispatcher, HotkeyEdge, HotkeyRole, HotkeyTable};

pub mod vk {
    pub const SHIFT: usize = 0x10;
    pub const CONTROL: usize = 0x11;
    pub const MENU: usize = 0x12;
    pub const LSHIFT: usize = 0xA0;
    pub const RSHIFT: usize = 0xA1;
    pub const LCONTROL: usize = 0xA2;
    pub const RCONTROL: usize = 0xA3;
    pub const LMENU: usize = 0xA4;
    pub const RMENU: usize = 0xA5;
}

pub const KEY_DOWN_BIT: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventType {
    Down,
    Up,
    Char,
}

/// Everything a keyboard rewrite needs to decide what the game may see and
/// which hotkeys fire.
pub struct KeyInputContext<'a> {
    pub table: &'a HotkeyTable,
    pub dispatcher: &'a mut HotkeyDispatcher,
    pub browser_showing: bool,
    pub quick_selecting: bool,
    /// Key transitions observed while the overlay is visible, forwarded to
    /// the browser process.
    pub key_events: Vec<(usize, KeyEventType)>,
    pub actions: Vec<HotkeyAction>,
}

impl<'a> KeyInputContext<'a> {
    pub fn new(
        table: &'a HotkeyTable,
        dispatcher: &'a mut HotkeyDispatcher,
        browser_showing: bool,
        quick_selecting: bool,
    ) -> Self {
        Self {
            table,
            dispatcher,
            browser_showing,
            quick_selecting,
            key_events: Vec::new(),
            actions: Vec::new(),
        }
    }

    fn retained_quick_select_key(&self, key: usize) -> bool {
        if !self.quick_selecting || key == 0 {
            return false;
        }

        let key = key as u8;
        self.table.virtual_key(HotkeyRole::Cancel) == key
            || self.table.virtual_key(HotkeyRole::Select) == key
    }
}

fn pressed(keys: &[bool; 256], key: usize) -> bool {
    keys[key]
}

pub fn modifiers_of(keys: &[bool; 256]) -> KeyModifiers {
    let mut modifiers = KeyModifiers::empty();

    if pressed(keys, vk::CONTROL) || pressed(keys, vk::LCONTROL) || pressed(keys, vk::RCONTROL) {
        modifiers |= KeyModifiers::CONTROL;
    }
    if pressed(keys, vk::MENU) || pressed(keys, vk::LMENU) || pressed(keys, vk::RMENU) {
        modifiers |= KeyModifiers::ALT;
    }
    if pressed(keys, vk::SHIFT) || pressed(keys, vk::LSHIFT) || pressed(keys, vk::RSHIFT) {
        modifiers |= KeyModifiers::SHIFT;
    }

    modifiers
}

/// Mirror of the keyboard as the game last saw it, plus the state frozen
/// when the overlay opened so hidden keys release cleanly.
pub struct KeyboardState {
    keys: [bool; 256],
    pre_overlay_keys: [bool; 256],
}

impl KeyboardState {
    pub fn new() -> Self {
        Self {
            keys: [false; 256],
            pre_overlay_keys: [false; 256],
        }
    }

    /// Compares the previous and the new full keyboard state and feeds any
    /// hotkey transitions into the dispatcher.
    fn handle_hotkeys(
        previous: &[bool; 256],
        current: &[bool; 256],
        ctx: &mut KeyInputContext<'_>,
    ) {
        let mods = modifiers_of(current);
        let prev_mods = modifiers_of(previous);

        for role in HotkeyRole::ALL {
            let virtual_key = ctx.table.virtual_key(role);
            if virtual_key == 0 {
                continue;
            }

            let key = virtual_key as usize;
            let is_pressed = pressed(current, key) && ctx.table.modifiers_match(role, mods);
            let was_pressed = pressed(previous, key) && ctx.table.modifiers_match(role, prev_mods);

            let edge = if is_pressed && !was_pressed {
                HotkeyEdge::Press
            } else if !is_pressed && was_pressed {
                HotkeyEdge::Release
            } else {
                continue;
            };

            if let Some(action) = ctx.dispatcher.dispatch(role, edge, ctx.quick_selecting) {
                ctx.actions.push(action);
            }
        }
    }

    /// `GetKeyboardState` rewrite: records transitions, then zeroes every
    /// pressed bit the game must not see while the overlay is up (except
    /// retained quick-select keys).
    pub fn update_keyboard_state(&mut self, raw: &mut [u8; 256], ctx: &mut KeyInputContext<'_>) {
        let mut current = [false; 256];
        for (slot, byte) in current.iter_mut().zip(raw.iter()) {
            *slot = byte & 0x80 == 0x80;
        }

        Self::handle_hotkeys(&self.keys, &current, ctx);

        for key in 0..256 {
            if self.keys[key] != current[key] && ctx.browser_showing {
                ctx.key_events.push((
                    key,
                    if current[key] {
                        KeyEventType::Down
                    } else {
                        KeyEventType::Up
                    },
                ));
            }
            self.keys[key] = current[key];

            if ctx.browser_showing || ctx.retained_quick_select_key(key) {
                raw[key] = 0;
            }
        }
    }

    /// `GetAsyncKeyState` rewrite for a single key. Returns the state the
    /// game should observe.
    pub fn update_single_key_state(
        &mut self,
        key: usize,
        state: u16,
        ctx: &KeyInputContext<'_>,
    ) -> u16 {
        self.keys[key] = state & KEY_DOWN_BIT == KEY_DOWN_BIT;

        if !ctx.browser_showing && !ctx.retained_quick_select_key(key) {
            self.pre_overlay_keys[key] = self.keys[key];
            state
        } else if self.pre_overlay_keys[key] {
            KEY_DOWN_BIT
        } else {
            0
        }
    }

    /// Single key transition from a window message or raw input packet.
    /// Returns true when the message must be hidden from the game.
    pub fn update_wm_key_state(
        &mut self,
        key: usize,
        event: KeyEventType,
        ctx: &mut KeyInputContext<'_>,
    ) -> bool {
        let previous = self.keys;

        match event {
            KeyEventType::Down => {
                self.keys[key] = true;
                Self::handle_hotkeys(&previous, &self.keys, ctx);
            }
            KeyEventType::Up => {
                self.keys[key] = false;
                Self::handle_hotkeys(&previous, &self.keys, ctx);
            }
            KeyEventType::Char => {
                if ctx.browser_showing {
                    ctx.key_events.push((key, KeyEventType::Char));
                }
            }
        }

        ctx.browser_showing || ctx.retained_quick_select_key(key)
    }
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self::new()
    }
}
