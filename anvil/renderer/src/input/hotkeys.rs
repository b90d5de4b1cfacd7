use std::sync::Mutex;

use common::{
    KeyModifiers, OverlayChannel,
    protocol::{HotkeySettingsUpdate, KeyBinding},
};
use log::info;

#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HotkeyRole {
    Bookmark = 0,
    Overlay,
    Screenshot,
    Stream,
    StartStopStream,
    Ptt,
    QuickClip,
    QuickForwardClip,
    Cancel,
    Select,
}

impl HotkeyRole {
    pub const COUNT: usize = 10;
    pub const ALL: [Self; Self::COUNT] = [
        Self::Bookmark,
        Self::Overlay,
        Self::Screenshot,
        Self::Stream,
        Self::StartStopStream,
        Self::Ptt,
        Self::QuickClip,
        Self::QuickForwardClip,
        Self::Cancel,
        Self::Select,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Bookmark => "bookmark",
            Self::Overlay => "overlay",
            Self::Screenshot => "screenshot",
            Self::Stream => "stream",
            Self::StartStopStream => "start_stop_stream",
            Self::Ptt => "ptt",
            Self::QuickClip => "quick_clip",
            Self::QuickForwardClip => "quick_forward_clip",
            Self::Cancel => "cancel",
            Self::Select => "select",
        }
    }

    fn binding(self, settings: &HotkeySettingsUpdate) -> Option<KeyBinding> {
        match self {
            Self::Bookmark => settings.bookmark_key,
            Self::Overlay => settings.highlight_key,
            Self::Screenshot => settings.screenshot_key,
            Self::Stream => settings.stream_key,
            Self::StartStopStream => settings.start_stop_stream_key,
            Self::Ptt => settings.ptt_key,
            Self::QuickClip => settings.quick_clip_key,
            Self::QuickForwardClip => settings.quick_clip_forward_key,
            Self::Cancel => settings.cancel_key,
            Self::Select => settings.select_key,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HotkeySlot {
    /// 0 means the role is disabled.
    pub virtual_key: u8,
    pub whitelist: KeyModifiers,
    pub blacklist: KeyModifiers,
}

/// Fixed-size hotkey table behind its own mutex; readers hold it for
/// microseconds. The blacklist keeps two roles that share a virtual key
/// from matching on the same modifier mask.
pub struct HotkeyTable {
    slots: Mutex<[HotkeySlot; HotkeyRole::COUNT]>,
}

impl HotkeyTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([HotkeySlot::default(); HotkeyRole::COUNT]),
        }
    }

    pub fn clear(&self) {
        *self.lock() = [HotkeySlot::default(); HotkeyRole::COUNT];
    }

    /// Replaces every binding atomically and recomputes blacklists.
    pub fn update(&self, settings: &HotkeySettingsUpdate) {
        let mut slots = self.lock();

        for role in HotkeyRole::ALL {
            let slot = &mut slots[role as usize];

            let Some(binding) = role.binding(settings) else {
                *slot = HotkeySlot::default();
                info!("[Hotkeys]: hotkey '{}' disabled", role.name());
                continue;
            };

            let Some(keycode) = binding.keycode.filter(|keycode| *keycode != 0) else {
                *slot = HotkeySlot::default();
                info!("[Hotkeys]: hotkey '{}' disabled", role.name());
                continue;
            };

            if binding.meta {
                info!(
                    "[Hotkeys]: meta modifier not supported for hotkey '{}'",
                    role.name()
                );
            }

            *slot = HotkeySlot {
                virtual_key: keycode as u8,
                whitelist: binding.modifiers(),
                blacklist: KeyModifiers::empty(),
            };

            info!("[Hotkeys]: hotkey '{}' updated", role.name());
        }

        for i in 0..HotkeyRole::COUNT {
            if slots[i].virtual_key == 0 {
                continue;
            }

            let mut blacklist = KeyModifiers::empty();
            for j in 0..HotkeyRole::COUNT {
                let other = slots[j];
                if i == j || other.virtual_key == 0 || slots[i].virtual_key != other.virtual_key {
                    continue;
                }

                blacklist |= other.whitelist & !slots[i].whitelist;
            }

            slots[i].blacklist = blacklist;
        }
    }

    pub fn get(&self, role: HotkeyRole) -> HotkeySlot {
        self.lock()[role as usize]
    }

    pub fn virtual_key(&self, role: HotkeyRole) -> u8 {
        self.lock()[role as usize].virtual_key
    }

    pub fn modifiers_match(&self, role: HotkeyRole, modifiers: KeyModifiers) -> bool {
        let slot = self.lock()[role as usize];
        modifiers.contains(slot.whitelist) && (modifiers & slot.blacklist).is_empty()
    }

    /// One-line summary of the bound keys, rendered into the welcome
    /// indicator bitmap.
    pub fn describe(&self) -> String {
        let slots = self.lock();

        let mut parts = Vec::new();
        for role in HotkeyRole::ALL {
            let slot = slots[role as usize];
            if slot.virtual_key == 0 {
                continue;
            }

            parts.push(format!(
                "{}={}",
                role.name(),
                format_combination(slot.whitelist, slot.virtual_key)
            ));
        }

        parts.join(" ")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, [HotkeySlot; HotkeyRole::COUNT]> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for HotkeyTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_combination(modifiers: KeyModifiers, virtual_key: u8) -> String {
    let mut text = String::new();
    if modifiers.contains(KeyModifiers::CONTROL) {
        text.push_str("CTRL+");
    }
    if modifiers.contains(KeyModifiers::ALT) {
        text.push_str("ALT+");
    }
    if modifiers.contains(KeyModifiers::SHIFT) {
        text.push_str("SHIFT+");
    }
    text.push_str(&format!("{virtual_key:#04X}"));
    text
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEdge {
    Press,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyEvent {
    pub role: HotkeyRole,
    pub edge: HotkeyEdge,
}

/// What the dispatcher wants done with a hotkey edge. Overlay toggles are
/// immediate; everything else waits for the message-pump drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    ToggleOverlay(OverlayChannel),
    Fire(HotkeyRole),
}

/// Converts raw role edges into actions. Pressed state is latched per role
/// (not per virtual key) so two roles sharing a key but differing in
/// modifiers stay independent; holding a key does not re-fire.
pub struct HotkeyDispatcher {
    pressed: [bool; HotkeyRole::COUNT],
    queued: Vec<HotkeyEvent>,
}

impl HotkeyDispatcher {
    pub fn new() -> Self {
        Self {
            pressed: [false; HotkeyRole::COUNT],
            queued: Vec::with_capacity(30),
        }
    }

    /// Feeds one role edge. Returns the immediate action, if any; queued
    /// roles come back out of [`Self::drain`] on the pump.
    pub fn dispatch(
        &mut self,
        role: HotkeyRole,
        edge: HotkeyEdge,
        quick_selecting: bool,
    ) -> Option<HotkeyAction> {
        match role {
            // Only live during quick-select.
            HotkeyRole::Cancel | HotkeyRole::Select if !quick_selecting => return None,
            // Everything else is suppressed during quick-select.
            _ if quick_selecting && !matches!(role, HotkeyRole::Cancel | HotkeyRole::Select) => {
                return None;
            }
            _ => {}
        }

        let activated = !self.pressed[role as usize] && edge == HotkeyEdge::Press;
        self.pressed[role as usize] = edge == HotkeyEdge::Press;

        match role {
            HotkeyRole::Overlay => {
                activated.then_some(HotkeyAction::ToggleOverlay(OverlayChannel::Highlighter))
            }
            HotkeyRole::Stream => {
                activated.then_some(HotkeyAction::ToggleOverlay(OverlayChannel::Streaming))
            }
            _ => {
                if activated || edge == HotkeyEdge::Release {
                    self.queued.push(HotkeyEvent { role, edge });
                }
                None
            }
        }
    }

    /// Drains queued events on the game's message pump; press edges become
    /// fire actions.
    pub fn drain(&mut self) -> Vec<HotkeyEvent> {
        std::mem::take(&mut self.queued)
    }

    pub fn clear(&mut self) {
        self.pressed = [false; HotkeyRole::COUNT];
        self.queued.clear();
    }
}

impl Default for HotkeyDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn binding(keycode: u32, ctrl: bool, alt: bool, shift: bool) -> Option<KeyBinding> {
        Some(KeyBinding {
            keycode: Some(keycode),
            ctrl,
            alt,
            shift,
            meta: false,
        })
    }

    #[test]
    fn update_replaces_and_disables() {
        let table = HotkeyTable::new();
        table.update(&HotkeySettingsUpdate {
            bookmark_key: binding(0x42, true, false, false),
            ..Default::default()
        });

        assert_eq!(table.virtual_key(HotkeyRole::Bookmark), 0x42);
        assert_eq!(table.virtual_key(HotkeyRole::Screenshot), 0);

        table.update(&HotkeySettingsUpdate::default());
        assert_eq!(table.virtual_key(HotkeyRole::Bookmark), 0);
    }

    #[test]
    fn shared_vk_roles_never_match_together() {
        let table = HotkeyTable::new();
        // Same key, one with ctrl, one bare.
        table.update(&HotkeySettingsUpdate {
            bookmark_key: binding(0x42, true, false, false),
            screenshot_key: binding(0x42, false, false, false),
            ..Default::default()
        });

        for bits in 0..8u8 {
            let modifiers = KeyModifiers::from_bits_truncate(bits);
            let both = table.modifiers_match(HotkeyRole::Bookmark, modifiers)
                && table.modifiers_match(HotkeyRole::Screenshot, modifiers);
            assert!(!both, "both roles matched with modifiers {modifiers:?}");
        }

        // Ctrl picks the bookmark role; bare picks the screenshot role.
        assert!(table.modifiers_match(HotkeyRole::Bookmark, KeyModifiers::CONTROL));
        assert!(table.modifiers_match(HotkeyRole::Screenshot, KeyModifiers::empty()));
        assert!(!table.modifiers_match(HotkeyRole::Screenshot, KeyModifiers::CONTROL));
    }

    #[test]
    fn whitelist_requires_all_modifiers() {
        let table = HotkeyTable::new();
        table.update(&HotkeySettingsUpdate {
            bookmark_key: binding(0x42, true, true, false),
            ..Default::default()
        });

        assert!(!table.modifiers_match(HotkeyRole::Bookmark, KeyModifiers::CONTROL));
        assert!(table.modifiers_match(
            HotkeyRole::Bookmark,
            KeyModifiers::CONTROL | KeyModifiers::ALT
        ));
        // Extra modifiers outside the blacklist are allowed.
        assert!(table.modifiers_match(
            HotkeyRole::Bookmark,
            KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SHIFT
        ));
    }

    #[test]
    fn dispatcher_fires_on_press_edge_only() {
        let mut dispatcher = HotkeyDispatcher::new();

        assert_eq!(
            dispatcher.dispatch(HotkeyRole::Overlay, HotkeyEdge::Press, false),
            Some(HotkeyAction::ToggleOverlay(OverlayChannel::Highlighter))
        );
        // Held key: no refire.
        assert_eq!(
            dispatcher.dispatch(HotkeyRole::Overlay, HotkeyEdge::Press, false),
            None
        );
        assert_eq!(
            dispatcher.dispatch(HotkeyRole::Overlay, HotkeyEdge::Release, false),
            None
        );
        assert_eq!(
            dispatcher.dispatch(HotkeyRole::Overlay, HotkeyEdge::Press, false),
            Some(HotkeyAction::ToggleOverlay(OverlayChannel::Highlighter))
        );
    }

    #[test]
    fn queued_roles_come_out_of_drain() {
        let mut dispatcher = HotkeyDispatcher::new();

        assert_eq!(
            dispatcher.dispatch(HotkeyRole::Bookmark, HotkeyEdge::Press, false),
            None
        );
        let events = dispatcher.drain();
        assert_eq!(
            events,
            vec![HotkeyEvent {
                role: HotkeyRole::Bookmark,
                edge: HotkeyEdge::Press
            }]
        );
        assert!(dispatcher.drain().is_empty());
    }

    #[test]
    fn quick_select_scopes_roles() {
        let mut dispatcher = HotkeyDispatcher::new();

        // Outside quick-select, Cancel/Select are inert.
        assert_eq!(
            dispatcher.dispatch(HotkeyRole::Cancel, HotkeyEdge::Press, false),
            None
        );
        assert!(dispatcher.drain().is_empty());

        // During quick-select, only Cancel/Select are live.
        assert_eq!(
            dispatcher.dispatch(HotkeyRole::Bookmark, HotkeyEdge::Press, true),
            None
        );
        assert_eq!(
            dispatcher.dispatch(HotkeyRole::Overlay, HotkeyEdge::Press, true),
            None
        );
        dispatcher.dispatch(HotkeyRole::Cancel, HotkeyEdge::Press, true);
        dispatcher.dispatch(HotkeyRole::Select, HotkeyEdge::Press, true);

        let events = dispatcher.drain();
        let roles: Vec<_> = events.iter().map(|event| event.role).collect();
        assert_eq!(roles, vec![HotkeyRole::Cancel, HotkeyRole::Select]);
    }
}
