use std::time::{Duration, Instant};

/// Window message ids the input layer cares about.
pub mod wm {
    pub const SETCURSOR: u32 = 0x0020;
    pub const INPUT: u32 = 0x00FF;
    pub const KEYDOWN: u32 = 0x0100;
    pub const KEYUP: u32 = 0x0101;
    pub const CHAR: u32 = 0x0102;
    pub const SYSKEYDOWN: u32 = 0x0104;
    pub const SYSKEYUP: u32 = 0x0105;
    pub const MOUSEMOVE: u32 = 0x0200;
    pub const LBUTTONDOWN: u32 = 0x0201;
    pub const LBUTTONUP: u32 = 0x0202;
    pub const LBUTTONDBLCLK: u32 = 0x0203;
    pub const RBUTTONDOWN: u32 = 0x0204;
    pub const RBUTTONUP: u32 = 0x0205;
    pub const RBUTTONDBLCLK: u32 = 0x0206;
    pub const MBUTTONDOWN: u32 = 0x0207;
    pub const MBUTTONUP: u32 = 0x0208;
    pub const MBUTTONDBLCLK: u32 = 0x0209;
    pub const MOUSEWHEEL: u32 = 0x020A;
    pub const XBUTTONDOWN: u32 = 0x020B;
    pub const XBUTTONUP: u32 = 0x020C;
    pub const XBUTTONDBLCLK: u32 = 0x020D;
}

pub fn is_mouse_message(msg: u32) -> bool {
    (wm::MOUSEMOVE..=wm::XBUTTONDBLCLK).contains(&msg)
}

/// What to do with a mouse message after the quick-select filter looked at
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseDisposition {
    /// Let the game have it.
    PassThrough,
    /// Forward to Forge and hide from the game.
    Forward,
    /// Middle click armed quick-select; selection mode begins now.
    BeginSelection,
}

/// Middle-mouse gesture mode, gated by a time-boxed arming window. While
/// selecting, mouse input belongs to Forge and the cursor position is not
/// forwarded to the game.
pub struct QuickSelect {
    deadline: Option<Instant>,
    selecting: bool,
}

impl QuickSelect {
    pub fn new() -> Self {
        Self {
            deadline: None,
            selecting: false,
        }
    }

    /// Arms the window. Ignored when no cancel hotkey is bound, since the
    /// user would have no way out of selection mode.
    pub fn start_timeout(&mut self, timeout: Duration, cancel_bound: bool) {
        self.start_timeout_at(Instant::now(), timeout, cancel_bound);
    }

    pub fn start_timeout_at(&mut self, now: Instant, timeout: Duration, cancel_bound: bool) {
        if !cancel_bound {
            return;
        }

        self.deadline = Some(now + timeout);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
        self.selecting = false;
    }

    pub fn selecting(&self) -> bool {
        self.selecting
    }

    /// True exactly once, when the arming window lapses without a click.
    pub fn timeout_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if !self.selecting && now > deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn route_message(
        &mut self,
        msg: u32,
        browser_showing: bool,
        now: Instant,
    ) -> MouseDisposition {
        if !self.selecting
            && msg == wm::MBUTTONDOWN
            && self.deadline.is_some_and(|deadline| deadline >= now)
        {
            self.selecting = true;
            return MouseDisposition::BeginSelection;
        }

        if !browser_showing && !self.selecting {
            return MouseDisposition::PassThrough;
        }

        match msg {
            wm::MBUTTONDOWN | wm::MBUTTONUP | wm::MBUTTONDBLCLK | wm::MOUSEWHEEL => {
                MouseDisposition::Forward
            }
            _ if is_mouse_message(msg) && browser_showing => MouseDisposition::Forward,
            _ if is_mouse_message(msg) && self.selecting => MouseDisposition::Forward,
            _ => MouseDisposition::PassThrough,
        }
    }
}

impl Default for QuickSelect {
    fn default() -> Self {
        Self::new()
    }
}
