use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use common::{OverlayChannel, Size};
use log::{error, info, warn};
use tokio::runtime::Handle;

use crate::{
    command::CommandConnection,
    events::{BrowserConnectionDescription, ForgeEventClient},
    framebuffer::FramebufferServer,
    indicator::{CaptionRenderer, IndicatorDisplay, IndicatorManager},
    input::{
        InputAction, InputLayer, WindowMessage,
        hooks::{CursorHandle, DEFAULT_ARROW, HookHost},
        hotkeys::HotkeyRole,
    },
};

/// The renderer-in-game runtime: one per injected process. Owns every
/// subsystem of the overlay and the glue between them.
pub struct Overlay {
    inner: Arc<OverlayInner>,
}

pub struct OverlayInner {
    pid: u32,
    runtime: Handle,
    pub indicators: IndicatorManager,
    pub display: Mutex<IndicatorDisplay>,
    pub input: Mutex<InputLayer>,
    pub host: Mutex<Box<dyn HookHost + Send>>,
    pub overlay_cursor: Mutex<CursorHandle>,
    pub events: ForgeEventClient,
    pub framebuffers: [FramebufferServer; OverlayChannel::COUNT],
    screen_size: Mutex<Size>,
    active_overlay: Mutex<OverlayChannel>,
    browser_showing: AtomicBool,
    render_enabled: AtomicBool,
    hwnd_sent: AtomicBool,
    pub(crate) command: CommandConnection,
}

impl Overlay {
    /// Brings the overlay up inside the game process: composes indicator
    /// bitmaps, installs hooks, and opens the command pipe. Must be called
    /// within an async runtime.
    pub fn init(
        pid: u32,
        mut host: Box<dyn HookHost + Send>,
        captions: Box<dyn CaptionRenderer>,
    ) -> Result<Self, common::ipc::IpcError> {
        info!("Started overlay");

        let runtime = Handle::try_current().map_err(|_| common::ipc::IpcError::NoRuntime)?;

        let indicators = IndicatorManager::new(captions);
        // A failed composition leaves the renderer dark but the process
        // keeps running and the command channel stays up.
        let render_enabled = match indicators.load_images() {
            Ok(()) => true,
            Err(err) => {
                error!("[Overlay]: {err}; rendering disabled");
                false
            }
        };

        let mut input = InputLayer::new();
        input.hooks.install_hooks(host.as_mut());

        let inner = Arc::new(OverlayInner {
            pid,
            runtime: runtime.clone(),
            indicators,
            display: Mutex::new(IndicatorDisplay::new()),
            input: Mutex::new(input),
            host: Mutex::new(host),
            overlay_cursor: Mutex::new(DEFAULT_ARROW),
            events: ForgeEventClient::new(runtime),
            framebuffers: [
                FramebufferServer::new(OverlayChannel::Highlighter),
                FramebufferServer::new(OverlayChannel::Streaming),
                FramebufferServer::new(OverlayChannel::Notifications),
            ],
            screen_size: Mutex::new(Size::new(0, 0)),
            active_overlay: Mutex::new(OverlayChannel::Highlighter),
            browser_showing: AtomicBool::new(false),
            render_enabled: AtomicBool::new(render_enabled),
            hwnd_sent: AtomicBool::new(false),
            command: CommandConnection::new(),
        });

        crate::command::start(&inner)?;

        Ok(Self { inner })
    }

    pub fn inner(&self) -> &Arc<OverlayInner> {
        &self.inner
    }

    /// Swap-chain teardown: back out of the game's input path but keep the
    /// command channel so a later device can pick up again.
    pub fn reset(&self) {
        let mut input = lock(&self.inner.input);
        let mut host = lock(&self.inner.host);
        input.hooks.remove_hooks(host.as_mut());
    }

    pub fn free(&self) {
        self.reset();
        info!("Stopped overlay");
    }
}

impl OverlayInner {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn browser_showing(&self) -> bool {
        self.browser_showing.load(Ordering::Acquire)
    }

    pub fn render_enabled(&self) -> bool {
        self.render_enabled.load(Ordering::Acquire)
    }

    pub fn screen_size(&self) -> Size {
        *lock(&self.screen_size)
    }

    /// Called by the graphics back-end once the presented back buffer is
    /// known.
    pub fn set_screen_size(&self, size: Size) {
        *lock(&self.screen_size) = size;
    }

    pub fn active_overlay(&self) -> OverlayChannel {
        *lock(&self.active_overlay)
    }

    fn frame_buffer_hint(&self) -> Option<usize> {
        let size = self.screen_size();
        let expected = size.width as usize * size.height as usize * 4;
        (expected > 1024).then_some(expected)
    }

    /// Shows, switches, or hides one overlay channel. Callable from the
    /// game's threads: pipe servers spawn onto the overlay runtime.
    pub fn toggle_overlay(&self, channel: OverlayChannel) {
        let _runtime = self.runtime.enter();

        let server = &self.framebuffers[channel as usize];
        let showing = self.browser_showing();

        if showing && server.died() {
            server.start(self.pid, self.frame_buffer_hint());
        }

        let active = self.active_overlay();
        if !showing || active != channel {
            if server.died() && !server.start(self.pid, self.frame_buffer_hint()) {
                warn!(
                    "[Overlay]: browser for '{}' ignored, server could not start",
                    channel.name()
                );
                return;
            }

            if channel != active {
                self.events.hide_browser();
            }

            *lock(&self.active_overlay) = channel;

            let size = self.screen_size();
            self.events.show_browser(
                &BrowserConnectionDescription {
                    name: channel.name().to_owned(),
                    server: server.name(),
                },
                size.width,
                size.height,
            );
            info!("Requesting browser");

            let was_showing = self.browser_showing.swap(true, Ordering::AcqRel);
            if !was_showing {
                let cursor = *lock(&self.overlay_cursor);
                let mut input = lock(&self.input);
                let mut host = lock(&self.host);

                input.hooks.disable_raw_input(host.as_mut());
                input.hooks.show_overlay_cursor(cursor, host.as_mut());
                input
                    .hooks
                    .center_saved_mouse(size.width as i32, size.height as i32);
            }
        } else {
            self.dismiss_overlay();
        }
    }

    pub fn dismiss_overlay(&self) {
        if !self.browser_showing.swap(false, Ordering::AcqRel) {
            return;
        }

        self.events.hide_browser();
        info!("Hiding browser");

        let mut input = lock(&self.input);
        let mut host = lock(&self.host);
        input.hooks.restore_cursor(host.as_mut());
        input.hooks.restore_raw_input(host.as_mut());
    }

    /// Hides the named channel only when it is the active one.
    pub fn dismiss_named_overlay(&self, name: &str) {
        let Some(channel) = OverlayChannel::from_name(name) else {
            return;
        };

        if self.active_overlay() == channel && self.browser_showing() {
            info!("Hiding named overlay '{name}' from remote");
            self.dismiss_overlay();
        }
    }

    /// Ensures every channel has a live server and re-announces them.
    pub fn start_framebuffer_servers(&self) {
        let _runtime = self.runtime.enter();

        let mut browsers: [BrowserConnectionDescription; OverlayChannel::COUNT] =
            Default::default();

        for channel in OverlayChannel::ALL {
            let server = &self.framebuffers[channel as usize];
            if server.died() {
                server.start(self.pid, self.frame_buffer_hint());
            }

            browsers[channel as usize] = BrowserConnectionDescription {
                name: channel.name().to_owned(),
                server: server.name(),
            };
        }

        let size = self.screen_size();
        self.events.init_browser(&browsers, size.width, size.height);
    }

    /// Per-frame work on the game's message thread: announce the window,
    /// pump queued hotkeys, keep the overlay cursor asserted, check the
    /// quick-select window.
    pub fn handle_input_frame(&self, hwnd: u64) {
        if !self.hwnd_sent.swap(true, Ordering::AcqRel) {
            self.events.set_game_hwnd(hwnd);
        }

        let mut actions = Vec::new();
        {
            let mut input = lock(&self.input);
            input.process_frame(std::time::Instant::now(), &mut actions);

            let cursor = *lock(&self.overlay_cursor);
            let mut host = lock(&self.host);
            input
                .hooks
                .reset_overlay_cursor(self.browser_showing(), cursor, host.as_mut());
        }

        self.apply_input_actions(actions);
    }

    /// `PeekMessageA/W` re-entry: feeds a removed message through the
    /// input dispatcher. True means the message was consumed and the hook
    /// must re-poll immediately.
    pub fn handle_peek_message(&self, msg: &WindowMessage, remove_flags: u32) -> bool {
        let mut actions = Vec::new();

        let consumed = {
            let cursor = *lock(&self.overlay_cursor);
            let mut input = lock(&self.input);
            let mut host = lock(&self.host);

            input.handle_peek_message(
                msg,
                remove_flags,
                self.browser_showing(),
                cursor,
                host.as_mut(),
                &mut actions,
            )
        };

        self.apply_input_actions(actions);
        consumed
    }

    pub fn start_quick_select_timeout(&self, timeout_ms: u32) {
        lock(&self.input).start_quick_select_timeout(timeout_ms);
    }

    pub fn stop_quick_select(&self) {
        lock(&self.input).quick_select.stop();
    }

    pub fn apply_input_actions(&self, actions: Vec<InputAction>) {
        for action in actions {
            match action {
                InputAction::ToggleOverlay(channel) => self.toggle_overlay(channel),
                InputAction::FireHotkey(role) => self.fire_hotkey(role),
                InputAction::SaveQuickClip { tutorial_active } => {
                    self.events.hide_tutorial();
                    self.events.save_quick_clip(tutorial_active);
                }
                InputAction::ForwardKeyEvent {
                    msg,
                    wparam,
                    lparam,
                } => self.events.key_event(msg, wparam, lparam),
                InputAction::ForwardMouseEvent {
                    msg,
                    wparam,
                    lparam,
                } => self.events.mouse_event(msg, wparam, lparam),
                InputAction::BeginQuickSelect => self.events.start_quick_select(),
                InputAction::EndQuickSelect { .. } => {}
                InputAction::QuickSelectTimeoutExpired => {
                    self.events.quick_select_timeout_expired()
                }
            }
        }
    }

    fn fire_hotkey(&self, role: HotkeyRole) {
        match role {
            HotkeyRole::Bookmark => self.events.create_bookmark(),
            HotkeyRole::Screenshot => self.events.save_screenshot(),
            HotkeyRole::StartStopStream => self.events.start_stop_stream_hotkey(),
            HotkeyRole::QuickForwardClip => self.events.save_quick_forward_clip(),
            // The capture host owns the microphone gate; the renderer only
            // tracks the PTT slot for blacklist computation.
            HotkeyRole::Ptt => {}
            _ => {}
        }
    }

    /// Runs one frame of overlay work on the render thread: lazy back-end
    /// init, dirty texture re-uploads, framebuffer rotation, and the
    /// composited draw.
    pub fn present_frame<D: crate::render::GraphicsDevice>(
        &self,
        renderer: &mut crate::render::CanonicalRenderer<D>,
    ) {
        if !self.render_enabled() {
            return;
        }

        if !renderer.initialized() {
            match renderer.init(&self.indicators) {
                Ok(size) => self.set_screen_size(size),
                Err(err) => {
                    warn!("[Overlay]: back-end init failed, retrying next frame: {err}");
                    return;
                }
            }
        }

        renderer.update_indicator_textures(&self.indicators);

        for channel in OverlayChannel::ALL {
            if let Some(frame) = self.framebuffers[channel as usize].take_frame() {
                renderer.update_overlay(channel, frame);
            }
        }

        let indicator = if self.indicators.disabled() {
            None
        } else {
            lock(&self.display).tick(std::time::Instant::now())
        };

        renderer.render_frame(&crate::render::FrameContext {
            browser_showing: self.browser_showing(),
            active_channel: self.active_overlay(),
            indicator,
            notifications_under_indicator: false,
        });
    }

    /// The restart protocol: reset indicator, hotkeys, overlay, and cursor
    /// before the command pipe reopens.
    pub(crate) fn reset_for_restart(&self) {
        lock(&self.display).reset();

        {
            let mut input = lock(&self.input);
            input.table.clear();
            input.dispatcher.clear();
        }

        self.dismiss_overlay();

        *lock(&self.overlay_cursor) = DEFAULT_ARROW;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use common::{
        ipc::IpcClient,
        protocol::{
            HotkeySettingsUpdate, IndicatorKind, KeyBinding, RendererCommand, renderer_pipe_name,
        },
    };

    use crate::{
        indicator::BlockCaptionRenderer,
        input::{hooks::tests::MockHost, hotkeys::HotkeyRole},
    };

    use super::*;

    async fn start_overlay(pid: u32) -> Overlay {
        let overlay = Overlay::init(
            pid,
            Box::new(MockHost::new()),
            Box::new(BlockCaptionRenderer),
        )
        .unwrap();
        overlay.inner().set_screen_size(Size::new(1280, 720));
        overlay
    }

    fn settle() -> Duration {
        Duration::from_millis(150)
    }

    #[tokio::test]
    async fn commands_drive_overlay_state() {
        let overlay = start_overlay(910_001).await;
        let inner = overlay.inner();

        let client = IpcClient::open(&renderer_pipe_name(910_001)).await.unwrap();

        let settings = HotkeySettingsUpdate {
            bookmark_key: Some(KeyBinding {
                keycode: Some(0x42),
                ctrl: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(
            client
                .write(&RendererCommand::UpdateSettings(Box::new(settings)).encode())
                .await
        );
        assert!(
            client
                .write(
                    &RendererCommand::Indicator {
                        indicator: "capturing".to_owned()
                    }
                    .encode()
                )
                .await
        );

        tokio::time::sleep(settle()).await;

        assert_eq!(
            lock(&inner.input).table.virtual_key(HotkeyRole::Bookmark),
            0x42
        );
        assert_eq!(lock(&inner.display).current(), IndicatorKind::Capturing);

        // Unknown commands are ignored without touching state.
        assert!(client.write(b"{\"command\":\"warp_drive\"}\0").await);
        assert!(client.write(b"{\"command\":").await);
        tokio::time::sleep(settle()).await;
        assert_eq!(lock(&inner.display).current(), IndicatorKind::Capturing);
    }

    #[tokio::test]
    async fn disconnect_resets_state_before_reconnect() {
        let overlay = start_overlay(910_002).await;
        let inner = overlay.inner();

        let client = IpcClient::open(&renderer_pipe_name(910_002)).await.unwrap();

        let settings = HotkeySettingsUpdate {
            bookmark_key: Some(KeyBinding {
                keycode: Some(0x42),
                ctrl: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        client
            .write(&RendererCommand::UpdateSettings(Box::new(settings)).encode())
            .await;
        client
            .write(
                &RendererCommand::Indicator {
                    indicator: "capturing".to_owned(),
                }
                .encode(),
            )
            .await;
        client
            .write(&RendererCommand::SetCursor { cursor: 5 }.encode())
            .await;
        tokio::time::sleep(settle()).await;

        inner.toggle_overlay(OverlayChannel::Highlighter);
        assert!(inner.browser_showing());
        assert_eq!(
            *lock(&inner.overlay_cursor),
            crate::input::hooks::CursorHandle(5)
        );

        client.close().await;
        tokio::time::sleep(settle()).await;

        // The full restart protocol ran: indicator, hotkeys, overlay, and
        // cursor are all back to defaults.
        assert_eq!(lock(&inner.display).current(), IndicatorKind::None);
        assert_eq!(lock(&inner.input).table.virtual_key(HotkeyRole::Bookmark), 0);
        assert!(!inner.browser_showing());
        assert_eq!(*lock(&inner.overlay_cursor), DEFAULT_ARROW);

        // And the pipe is accepting again under the same name.
        let reconnected = IpcClient::open(&renderer_pipe_name(910_002)).await;
        assert!(reconnected.is_ok());
    }

    #[tokio::test]
    async fn overlay_hotkey_through_peek_message_toggles() {
        use crate::input::{PM_REMOVE, WindowMessage, mouse::wm};

        let overlay = start_overlay(910_004).await;
        let inner = overlay.inner();

        lock(&inner.input).table.update(&HotkeySettingsUpdate {
            highlight_key: Some(KeyBinding {
                keycode: Some(0x70),
                ..Default::default()
            }),
            ..Default::default()
        });

        let down = WindowMessage {
            hwnd: 1,
            message: wm::KEYDOWN,
            wparam: 0x70,
            lparam: 0,
        };
        let up = WindowMessage {
            message: wm::KEYUP,
            ..down
        };

        assert!(!inner.handle_peek_message(&down, PM_REMOVE));
        assert!(inner.browser_showing());

        // While visible, keystrokes are eaten instead of reaching the
        // game.
        let other_key = WindowMessage {
            wparam: 0x41,
            ..down
        };
        assert!(inner.handle_peek_message(&other_key, PM_REMOVE));

        // A second press of the hotkey hides the overlay again.
        inner.handle_peek_message(&up, PM_REMOVE);
        let release_other = WindowMessage {
            wparam: 0x41,
            ..up
        };
        inner.handle_peek_message(&release_other, PM_REMOVE);
        inner.handle_peek_message(&down, PM_REMOVE);
        assert!(!inner.browser_showing());

        // Messages peeked without PM_REMOVE are never touched.
        assert!(!inner.handle_peek_message(&down, 0));
    }

    #[tokio::test]
    async fn toggle_switches_and_dismisses() {
        let overlay = start_overlay(910_003).await;
        let inner = overlay.inner();

        inner.toggle_overlay(OverlayChannel::Highlighter);
        assert!(inner.browser_showing());
        assert_eq!(inner.active_overlay(), OverlayChannel::Highlighter);

        // Switching channels keeps the browser up.
        inner.toggle_overlay(OverlayChannel::Streaming);
        assert!(inner.browser_showing());
        assert_eq!(inner.active_overlay(), OverlayChannel::Streaming);

        // Toggling the active channel hides it.
        inner.toggle_overlay(OverlayChannel::Streaming);
        assert!(!inner.browser_showing());

        // Dismissing by name only hits the active channel.
        inner.toggle_overlay(OverlayChannel::Highlighter);
        inner.dismiss_named_overlay("streaming");
        assert!(inner.browser_showing());
        inner.dismiss_named_overlay("highlighter");
        assert!(!inner.browser_showing());
    }
}

