use log::{info, warn};

pub const RIDEV_REMOVE: u32 = 0x0000_0001;

/// Opaque OS cursor handle value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorHandle(pub u64);

/// IDC_ARROW resource id.
pub const DEFAULT_ARROW: CursorHandle = CursorHandle(32512);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDevice {
    pub usage_page: u16,
    pub usage: u16,
    pub flags: u32,
    pub target: u64,
}

/// The closed set of intercepted entry points. Hooking any one of these can
/// fail independently; a failed hook stays disabled while the rest work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookedFunction {
    GetKeyboardState,
    GetAsyncKeyState,
    GetCursorPos,
    SetCursorPos,
    GetRawInputData,
    GetRawInputBuffer,
    GetRegisteredRawInputDevices,
    RegisterRawInputDevices,
    SetCursor,
    GetCursor,
    ShowCursor,
    SetPhysicalCursorPos,
    GetPhysicalCursorPos,
    ClipCursor,
    GetClipCursor,
    PeekMessageA,
    PeekMessageW,
}

impl HookedFunction {
    pub const ALL: [Self; 17] = [
        Self::GetKeyboardState,
        Self::GetAsyncKeyState,
        Self::GetCursorPos,
        Self::SetCursorPos,
        Self::GetRawInputData,
        Self::GetRawInputBuffer,
        Self::GetRegisteredRawInputDevices,
        Self::RegisterRawInputDevices,
        Self::SetCursor,
        Self::GetCursor,
        Self::ShowCursor,
        Self::SetPhysicalCursorPos,
        Self::GetPhysicalCursorPos,
        Self::ClipCursor,
        Self::GetClipCursor,
        Self::PeekMessageA,
        Self::PeekMessageW,
    ];
}

/// Seam over the jump-trampoline package and the pass-through originals the
/// overlay itself needs. Install/remove are idempotent; `install` failing
/// for one function leaves the others working.
pub trait HookHost {
    fn install(&mut self, function: HookedFunction) -> bool;
    fn remove(&mut self, function: HookedFunction);

    /// `GetCursorInfo` visibility flag; None when the call fails.
    fn cursor_visible(&mut self) -> Option<bool>;
    /// Original `ShowCursor`; returns the display counter.
    fn show_cursor(&mut self, show: bool) -> i32;
    /// Original `SetCursor`; returns the previous cursor.
    fn set_cursor(&mut self, cursor: Option<CursorHandle>) -> Option<CursorHandle>;
    /// Original `GetCursor`.
    fn get_cursor(&mut self) -> Option<CursorHandle>;
    /// Original `ClipCursor`; None unclips.
    fn clip_cursor(&mut self, rect: Option<Rect>) -> bool;
    /// Original `GetClipCursor`; None when the cursor is not clipped.
    fn clip_rect(&mut self) -> Option<Rect>;
    fn primary_monitor_rect(&mut self) -> Rect;
    fn registered_raw_devices(&mut self) -> Vec<RawDevice>;
    fn register_raw_devices(&mut self, devices: &[RawDevice]) -> bool;
    /// Original `SetCursorPos`.
    fn set_cursor_pos(&mut self, x: i32, y: i32) -> bool;
}

/// Everything the input rewrites save while the overlay is visible, plus
/// the hook installation bookkeeping. Captured on show, restored on hide;
/// nested toggles must not drift (the hide path always restores the state
/// captured at the first show).
pub struct InputHookState {
    hooks_installed: bool,
    enabled: [bool; HookedFunction::ALL.len()],

    saved_mouse_pos: Option<(i32, i32)>,

    // ShowCursor calls the game makes while the overlay is visible are
    // consumed internally.
    internal_cursor_showing: bool,
    shows_applied: u32,

    saved_clip_rect: Option<Rect>,
    clip_saved: bool,
    overlay_clip_record: Option<Rect>,

    saved_raw_devices: Vec<RawDevice>,
    raw_input_disabled: bool,

    saved_game_cursor: Option<CursorHandle>,
}

impl InputHookState {
    pub fn new() -> Self {
        Self {
            hooks_installed: false,
            enabled: [false; HookedFunction::ALL.len()],
            saved_mouse_pos: None,
            internal_cursor_showing: false,
            shows_applied: 0,
            saved_clip_rect: None,
            clip_saved: false,
            overlay_clip_record: None,
            saved_raw_devices: Vec::new(),
            raw_input_disabled: false,
            saved_game_cursor: None,
        }
    }

    /// Installs the whole table. A single failure only disables that hook.
    pub fn install_hooks(&mut self, host: &mut dyn HookHost) -> bool {
        if self.hooks_installed {
            return true;
        }

        let mut any = false;
        for (index, function) in HookedFunction::ALL.into_iter().enumerate() {
            if host.install(function) {
                self.enabled[index] = true;
                any = true;
            } else {
                warn!("[InputHooks]: unable to hook function {function:?}");
            }
        }

        self.hooks_installed = any;
        if any {
            info!("[InputHooks]: hooks installed");
        }
        any
    }

    pub fn remove_hooks(&mut self, host: &mut dyn HookHost) {
        if !self.hooks_installed {
            return;
        }

        for (index, function) in HookedFunction::ALL.into_iter().enumerate() {
            if self.enabled[index] {
                host.remove(function);
                self.enabled[index] = false;
            }
        }

        self.hooks_installed = false;
    }

    pub fn hooks_installed(&self) -> bool {
        self.hooks_installed
    }

    // -- Cursor position

    /// `GetCursorPos` rewrite. `real` is what the original call returned.
    pub fn hook_get_cursor_pos(
        &mut self,
        visible: bool,
        real: (i32, i32),
        host: &mut dyn HookHost,
    ) -> (i32, i32) {
        if visible {
            if self.saved_mouse_pos.is_none() {
                self.saved_mouse_pos = Some(real);
            }

            self.saved_mouse_pos.unwrap_or(real)
        } else {
            match self.saved_mouse_pos.take() {
                Some(saved) => {
                    host.set_cursor_pos(saved.0, saved.1);
                    saved
                }
                None => real,
            }
        }
    }

    /// `SetCursorPos` rewrite. Reports success even when the overlay
    /// swallowed the move.
    pub fn hook_set_cursor_pos(
        &mut self,
        visible: bool,
        x: i32,
        y: i32,
        host: &mut dyn HookHost,
    ) -> bool {
        if visible {
            self.saved_mouse_pos = Some((x, y));
            true
        } else {
            host.set_cursor_pos(x, y)
        }
    }

    pub fn center_saved_mouse(&mut self, width: i32, height: i32) {
        self.saved_mouse_pos = Some((width / 2, height / 2));
    }

    // -- ShowCursor / ClipCursor

    pub fn hook_show_cursor(
        &mut self,
        visible: bool,
        show: bool,
        host: &mut dyn HookHost,
    ) -> i32 {
        if visible {
            self.internal_cursor_showing = show;
            if show { 0 } else { -1 }
        } else {
            host.show_cursor(show)
        }
    }

    pub fn hook_clip_cursor(
        &mut self,
        visible: bool,
        rect: Option<Rect>,
        host: &mut dyn HookHost,
    ) -> bool {
        if visible {
            self.overlay_clip_record = rect;
            true
        } else {
            host.clip_cursor(rect)
        }
    }

    pub fn hook_get_clip_cursor(&mut self, visible: bool, host: &mut dyn HookHost) -> Rect {
        if visible {
            self.overlay_clip_record
                .or(self.saved_clip_rect)
                .unwrap_or_else(|| host.primary_monitor_rect())
        } else {
            host.clip_rect()
                .unwrap_or_else(|| host.primary_monitor_rect())
        }
    }

    // -- Raw input

    pub fn hook_get_registered_raw_input_devices(
        &mut self,
        visible: bool,
        host: &mut dyn HookHost,
    ) -> Vec<RawDevice> {
        if visible {
            self.saved_raw_devices.clone()
        } else {
            host.registered_raw_devices()
        }
    }

    /// `RegisterRawInputDevices` rewrite: while visible the saved list is
    /// the source of truth and registration requests only edit it.
    pub fn hook_register_raw_input_devices(
        &mut self,
        visible: bool,
        devices: &[RawDevice],
        host: &mut dyn HookHost,
    ) -> bool {
        if !visible {
            return host.register_raw_devices(devices);
        }

        self.saved_raw_devices.retain(|saved| {
            !devices.iter().any(|requested| {
                requested.usage == saved.usage
                    && requested.usage_page == saved.usage_page
                    && requested.flags & RIDEV_REMOVE != 0
                    && requested.target == 0
            })
        });

        for requested in devices {
            if requested.flags & RIDEV_REMOVE != 0 {
                continue;
            }

            self.saved_raw_devices.push(*requested);
        }

        true
    }

    pub fn disable_raw_input(&mut self, host: &mut dyn HookHost) {
        self.saved_raw_devices = host.registered_raw_devices();
        self.raw_input_disabled = true;

        if self.saved_raw_devices.is_empty() {
            return;
        }

        let removals: Vec<RawDevice> = self
            .saved_raw_devices
            .iter()
            .map(|device| RawDevice {
                flags: RIDEV_REMOVE,
                target: 0,
                ..*device
            })
            .collect();

        host.register_raw_devices(&removals);
    }

    pub fn restore_raw_input(&mut self, host: &mut dyn HookHost) {
        if !self.raw_input_disabled {
            return;
        }
        self.raw_input_disabled = false;

        if self.saved_raw_devices.is_empty() {
            return;
        }

        host.register_raw_devices(&self.saved_raw_devices);
        self.saved_raw_devices.clear();
    }

    // -- Cursor handle

    pub fn hook_set_cursor(
        &mut self,
        visible: bool,
        cursor: Option<CursorHandle>,
        host: &mut dyn HookHost,
    ) -> Option<CursorHandle> {
        if visible {
            let previous = self.saved_game_cursor;
            self.saved_game_cursor = cursor;
            previous
        } else {
            host.set_cursor(cursor)
        }
    }

    pub fn hook_get_cursor(
        &mut self,
        visible: bool,
        host: &mut dyn HookHost,
    ) -> Option<CursorHandle> {
        if visible {
            self.saved_game_cursor
        } else {
            host.get_cursor()
        }
    }

    /// Re-asserts the overlay cursor; games keep calling `SetCursor` from
    /// their message loops.
    pub fn reset_overlay_cursor(
        &mut self,
        visible: bool,
        overlay_cursor: CursorHandle,
        host: &mut dyn HookHost,
    ) {
        if !visible {
            return;
        }

        host.set_cursor(Some(overlay_cursor));
    }

    // -- Show / hide sequences

    /// Show sequence: probe visibility and force the cursor on (drivers
    /// cache the display counter, so up to 3 attempts), save the clip rect
    /// and unclip, then swap in the overlay cursor.
    pub fn show_overlay_cursor(&mut self, overlay_cursor: CursorHandle, host: &mut dyn HookHost) {
        self.saved_game_cursor = host.set_cursor(Some(overlay_cursor));

        self.shows_applied = 0;
        for _ in 0..3 {
            match host.cursor_visible() {
                Some(false) => {
                    self.shows_applied += 1;
                    if host.show_cursor(true) >= 0 {
                        break;
                    }
                }
                _ => break,
            }
        }

        self.saved_clip_rect = host.clip_rect();
        self.clip_saved = true;
        host.clip_cursor(None);
    }

    /// Mirror of the show sequence, in reverse order.
    pub fn restore_cursor(&mut self, host: &mut dyn HookHost) {
        if self.clip_saved {
            host.clip_cursor(self.saved_clip_rect);
            self.saved_clip_rect = None;
            self.clip_saved = false;
        }
        self.overlay_clip_record = None;

        for _ in 0..self.shows_applied {
            host.show_cursor(false);
        }
        self.shows_applied = 0;
        self.internal_cursor_showing = false;

        host.set_cursor(self.saved_game_cursor.take());
    }
}

impl Default for InputHookState {
    fn default() -> Self {
        Self::new()
    }
}
