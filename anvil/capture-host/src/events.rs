use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use common::{
    ipc::IpcClient,
    protocol::{RendererCommand, encode_event, renderer_pipe_name},
};
use log::{info, warn};
use serde_json::{Value, json};

/// Events to Forge. Unlike the renderer's lossy channel, this side queues
/// while the pipe is down and drains the queue in order on reconnect.
pub struct ForgeEvents {
    client: IpcClient,
    queue: tokio::sync::Mutex<Vec<Vec<u8>>>,
}

impl ForgeEvents {
    pub fn new() -> Self {
        Self {
            client: IpcClient::disconnected(),
            queue: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn connect(&self, pipe_name: &str) {
        if !self.client.reopen(pipe_name).await {
            return;
        }

        info!("Connected event to '{pipe_name}'");
        self.send_queued_events().await;
    }

    async fn send(&self, name: &str, fields: Value) {
        let bytes = encode_event(name, fields);

        // The queue lock brackets the write so queued order matches send
        // order.
        let mut queue = self.queue.lock().await;
        if !queue.is_empty() || !self.client.write(&bytes).await {
            info!("event write failed or pending, queueing event");
            queue.push(bytes);
        }
    }

    async fn send_queued_events(&self) {
        let mut queue = self.queue.lock().await;

        let mut sent = 0;
        for event in queue.iter() {
            if !self.client.write(event).await {
                break;
            }
            sent += 1;
        }

        queue.drain(..sent);
    }

    pub async fn send_recording_start(&self, filename: &str, output_size: common::Size) {
        self.send(
            "started_recording",
            json!({
                "filename": filename,
                "width": output_size.width,
                "height": output_size.height,
            }),
        )
        .await;
    }

    pub async fn send_recording_stop(&self, filename: &str, total_frames: u32) {
        self.send(
            "stopped_recording",
            json!({ "filename": filename, "total_frames": total_frames }),
        )
        .await;
    }

    pub async fn send_buffer_ready(&self, filename: &str) {
        self.send("buffer_ready", json!({ "filename": filename }))
            .await;
    }

    pub async fn send_query_mics_response(&self, devices: Vec<Value>) {
        self.send("query_mics_response", json!({ "devices": devices }))
            .await;
    }
}

impl Default for ForgeEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Indicator feedback and overlay plumbing to the renderer inside the game.
pub struct AnvilCommands {
    client: IpcClient,
    recording: AtomicBool,
    using_mic: AtomicBool,
    using_ptt: AtomicBool,
    mic_muted: AtomicBool,
    forge_overlay_channel: Mutex<String>,
}

impl AnvilCommands {
    pub fn new() -> Self {
        Self {
            client: IpcClient::disconnected(),
            recording: AtomicBool::new(false),
            using_mic: AtomicBool::new(false),
            using_ptt: AtomicBool::new(false),
            mic_muted: AtomicBool::new(false),
            forge_overlay_channel: Mutex::new(String::new()),
        }
    }

    pub async fn connect(&self, pid: u32) {
        if !self.client.reopen(&renderer_pipe_name(pid)).await {
            return;
        }

        self.send_forge_info(None).await;
    }

    async fn send_command(&self, command: &RendererCommand) {
        if !self.client.write(&command.encode()).await {
            warn!("anvil command write failed");
        }
    }

    /// Current indicator, in priority order of the capture state.
    fn indicator_name(&self) -> &'static str {
        let recording = self.recording.load(Ordering::Acquire);
        let using_mic = self.using_mic.load(Ordering::Acquire);

        if recording && using_mic {
            if self.mic_muted.load(Ordering::Acquire) {
                if self.using_ptt.load(Ordering::Acquire) {
                    "mic_idle"
                } else {
                    "mic_muted"
                }
            } else {
                "mic_active"
            }
        } else if recording {
            "capturing"
        } else {
            "idle"
        }
    }

    pub async fn send_indicator(&self) {
        self.send_command(&RendererCommand::Indicator {
            indicator: self.indicator_name().to_owned(),
        })
        .await;
    }

    pub async fn show_recording(&self) {
        if self.recording.swap(true, Ordering::AcqRel) {
            return;
        }

        self.send_indicator().await;
    }

    pub async fn show_idle(&self) {
        if !self.recording.swap(false, Ordering::AcqRel) {
            return;
        }

        self.send_indicator().await;
    }

    /// Tristate update: `None` keeps the current value.
    pub async fn mic_updated(
        &self,
        muted: Option<bool>,
        active: Option<bool>,
        ptt: Option<bool>,
    ) {
        let mut changed = false;
        if let Some(active) = active {
            changed |= self.using_mic.swap(active, Ordering::AcqRel) != active;
        }
        if let Some(muted) = muted {
            changed |= self.mic_muted.swap(muted, Ordering::AcqRel) != muted;
        }
        if let Some(ptt) = ptt {
            changed |= self.using_ptt.swap(ptt, Ordering::AcqRel) != ptt;
        }

        if !changed {
            return;
        }

        self.send_indicator().await;
    }

    pub async fn send_forge_info(&self, channel: Option<&str>) {
        let anvil_event = {
            let mut saved = lock(&self.forge_overlay_channel);
            if let Some(channel) = channel
                && !channel.is_empty()
            {
                *saved = channel.to_owned();
            }
            saved.clone()
        };

        self.send_command(&RendererCommand::ForgeInfo { anvil_event })
            .await;
    }
}

impl Default for AnvilCommands {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
