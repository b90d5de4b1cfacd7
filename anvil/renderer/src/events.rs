use std::sync::{Arc, Mutex};

use common::{OverlayChannel, ipc::IpcClient, protocol::encode_event};
use log::{debug, info};
use serde_json::{Value, json};
use tokio::runtime::Handle;

/// Where a browser for one overlay channel should connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowserConnectionDescription {
    pub name: String,
    pub server: String,
}

/// Fire-and-forget JSON events to Forge. Lossy: while the pipe is not open
/// writes are dropped, never queued.
pub struct ForgeEventClient {
    client: Arc<IpcClient>,
    runtime: Handle,
    current_connection: Mutex<String>,
}

impl ForgeEventClient {
    pub fn new(runtime: Handle) -> Self {
        Self {
            client: Arc::new(IpcClient::disconnected()),
            runtime,
            current_connection: Mutex::new(String::new()),
        }
    }

    /// Opens (or switches) the event pipe named by `forge_info`.
    pub fn connect(&self, pipe_name: &str) {
        {
            let mut current = lock(&self.current_connection);
            if *current == pipe_name {
                return;
            }
            *current = pipe_name.to_owned();
        }

        let client = self.client.clone();
        let pipe_name = pipe_name.to_owned();
        self.runtime.spawn(async move {
            if client.reopen(&pipe_name).await {
                info!("[ForgeEvent]: connected to '{pipe_name}'");
            }
        });
    }

    fn send(&self, name: &'static str, fields: Value) {
        let bytes = encode_event(name, fields);
        let client = self.client.clone();

        self.runtime.spawn(async move {
            if !client.write(&bytes).await {
                debug!("[ForgeEvent]: dropped '{name}' event, pipe not open");
            }
        });
    }

    pub fn key_event(&self, msg: u32, wparam: u64, lparam: i64) {
        self.send(
            "key_event",
            json!({ "msg": msg, "wParam": wparam, "lParam": lparam }),
        );
    }

    pub fn mouse_event(&self, msg: u32, wparam: u64, lparam: i64) {
        self.send(
            "mouse_event",
            json!({ "msg": msg, "wParam": wparam, "lParam": lparam }),
        );
    }

    pub fn init_browser(
        &self,
        browsers: &[BrowserConnectionDescription; OverlayChannel::COUNT],
        width: u32,
        height: u32,
    ) {
        let servers: Vec<Value> = browsers
            .iter()
            .map(|browser| json!({ "server": browser.server, "name": browser.name }))
            .collect();

        self.send(
            "init_browser",
            json!({ "servers": servers, "width": width, "height": height }),
        );
    }

    pub fn show_browser(&self, browser: &BrowserConnectionDescription, width: u32, height: u32) {
        self.send(
            "show_browser",
            json!({
                "framebuffer_server": browser.server,
                "width": width,
                "height": height,
                "name": browser.name,
            }),
        );
    }

    pub fn hide_browser(&self) {
        self.send("hide_browser", json!({}));
    }

    pub fn hide_tutorial(&self) {
        self.send("hide_tutorial", json!({}));
    }

    pub fn set_game_hwnd(&self, hwnd: u64) {
        self.send("set_game_hwnd", json!({ "hwnd": hwnd }));
    }

    pub fn create_bookmark(&self) {
        self.send("create_bookmark", json!({}));
    }

    pub fn save_screenshot(&self) {
        self.send("save_screenshot", json!({}));
    }

    pub fn save_quick_clip(&self, tutorial_active: bool) {
        self.send(
            "save_quick_clip",
            json!({ "tutorial_active": tutorial_active }),
        );
    }

    pub fn save_quick_forward_clip(&self) {
        self.send("save_quick_forward_clip", json!({}));
    }

    pub fn start_stop_stream_hotkey(&self) {
        self.send("start_stop_stream_hotkey", json!({}));
    }

    pub fn start_stream(&self) {
        self.send("start_stream", json!({}));
    }

    pub fn stop_stream(&self) {
        self.send("stop_stream", json!({}));
    }

    pub fn start_quick_select(&self) {
        self.send("start_quick_select", json!({}));
    }

    pub fn quick_select_timeout_expired(&self) {
        self.send("quick_select_timeout_expired", json!({}));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
