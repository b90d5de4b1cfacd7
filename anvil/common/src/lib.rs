use log::warn;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

pub mod buffer;
pub mod config;
pub mod ipc;
pub mod protocol;

/// The three logical overlay streams. Each one owns its own framebuffer
/// server and texture rotation on the renderer side.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum OverlayChannel {
    Highlighter = 0,
    Streaming,
    Notifications,
}

impl OverlayChannel {
    pub const COUNT: usize = 3;
    pub const ALL: [Self; Self::COUNT] = [Self::Highlighter, Self::Streaming, Self::Notifications];

    pub fn name(self) -> &'static str {
        match self {
            Self::Highlighter => "highlighter",
            Self::Streaming => "streaming",
            Self::Notifications => "notifications",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.name() == name)
    }
}

bitflags::bitflags! {
    /// Modifier mask used by hotkey whitelists/blacklists and the push to
    /// talk key combination.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyModifiers: u8 {
        const SHIFT   = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT     = 1 << 2;
    }
}

impl KeyModifiers {
    pub fn from_binding(ctrl: bool, alt: bool, shift: bool) -> Self {
        let mut mods = Self::empty();
        if shift {
            mods |= Self::SHIFT;
        }
        if ctrl {
            mods |= Self::CONTROL;
        }
        if alt {
            mods |= Self::ALT;
        }
        mods
    }
}

pub fn serialize_json<T>(message: &T) -> Option<String>
where
    T: Serialize,
{
    let Ok(json) = serde_json::to_string(&message) else {
        warn!("[Protocol]: failed to serialize to json");
        return None;
    };

    Some(json)
}

/// Milliseconds for the `timestamp` field of event envelopes.
pub fn event_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}
