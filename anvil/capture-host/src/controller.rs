use std::sync::{Arc, Mutex};

use common::{
    Size,
    config::Config,
    protocol::CaptureCommand,
};
use log::{info, warn};
use serde_json::json;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use crate::{
    events::{AnvilCommands, ForgeEvents},
    graph::{CaptureGraph, GraphSignal, KeyCombination, RecordingOutput, ReplayOutput, SignalSender},
    log_pipe::LogPipe,
    thread_tools::JoiningThread,
};

struct Outputs<G: CaptureGraph> {
    output: G::Output,
    replay: G::Replay,
}

/// Everything the update path mutates, behind one mutex so command
/// handling and the restart worker stay serialized.
struct VideoState<G: CaptureGraph> {
    graph: G,
    base: Size,
    output_size: Size,
    fps: u32,
    target: Size,
    filename: String,
    muxer_settings: String,
    outputs: Option<Outputs<G>>,
    stopping: bool,
}

impl<G: CaptureGraph> VideoState<G> {
    fn stop_video(&mut self) {
        if self.stopping {
            return;
        }
        self.stopping = true;

        if let Some(outputs) = &mut self.outputs {
            if outputs.output.active() {
                outputs.output.stop();
            }
            if outputs.replay.active() {
                outputs.replay.stop();
            }
        }
        self.outputs = None;

        // fps 0 releases the pipeline.
        if let Err(err) = self.graph.reset_video(self.base, self.output_size, 0) {
            warn!("[Controller]: video teardown failed: {err}");
        }

        self.stopping = false;
    }

    fn start_video(&mut self) {
        if let Err(err) = self.graph.reset_video(self.base, self.output_size, self.fps) {
            warn!("[Controller]: video reset failed: {err}");
            return;
        }

        match self
            .graph
            .create_outputs(&self.filename, &self.muxer_settings)
        {
            Ok((output, replay)) => self.outputs = Some(Outputs { output, replay }),
            Err(err) => warn!("[Controller]: creating outputs failed: {err}"),
        }
    }

    fn start_outputs(&mut self) {
        if let Some(outputs) = &mut self.outputs {
            outputs.output.start();
            outputs.replay.start();
        }
    }

    fn stop_outputs(&mut self) {
        if let Some(outputs) = &mut self.outputs {
            if outputs.output.active() {
                outputs.output.stop();
            }
            if outputs.replay.active() {
                outputs.replay.stop();
            }
        }
    }

    /// Recomputes base/output dimensions when the game changes size.
    /// Output downscales to the target width, preserving aspect; smaller
    /// games pass through untouched.
    fn update_size(&mut self, width: u32, height: u32) -> bool {
        if width == self.base.width && height == self.base.height {
            return false;
        }

        self.base = Size::new(width, height);
        if width > self.target.width {
            let scale = width as f32 / self.target.width as f32;
            self.output_size = Size::new(self.target.width, (height as f32 / scale) as u32);
        } else {
            self.output_size = Size::new(width, height);
        }

        true
    }
}

/// Command-driven owner of the capture graph. Commands and graph signals
/// both land on the controller task; the restart worker is the only other
/// writer and shares the state mutex.
pub struct RecordingController<G: CaptureGraph> {
    shared: Arc<Mutex<VideoState<G>>>,
    events: Arc<ForgeEvents>,
    anvil: Arc<AnvilCommands>,
    log_pipe: LogPipe,
    signals: Option<UnboundedReceiver<GraphSignal>>,
    restart_thread: JoiningThread,
    game_pid: u32,
}

pub fn signal_channel() -> (SignalSender, UnboundedReceiver<GraphSignal>) {
    unbounded_channel()
}

impl<G: CaptureGraph + 'static> RecordingController<G> {
    pub fn new(
        mut graph: G,
        config: &Config,
        events: Arc<ForgeEvents>,
        anvil: Arc<AnvilCommands>,
        log_pipe: LogPipe,
        signals: UnboundedReceiver<GraphSignal>,
    ) -> Self {
        let target = Size::new(config.video.target_width, config.video.target_height);

        if let Err(err) = graph.reset_audio(&config.audio) {
            warn!("[Controller]: audio init failed: {err}");
        }

        Self {
            shared: Arc::new(Mutex::new(VideoState {
                graph,
                base: target,
                output_size: target,
                fps: config.video.fps,
                target,
                filename: String::new(),
                muxer_settings: String::new(),
                outputs: None,
                stopping: false,
            })),
            events,
            anvil,
            log_pipe,
            signals: Some(signals),
            restart_thread: JoiningThread::new(),
            game_pid: 0,
        }
    }

    pub async fn run(mut self, mut commands: UnboundedReceiver<CaptureCommand>) {
        let Some(mut signals) = self.signals.take() else {
            return;
        };

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => break,
                },
            }
        }
    }

    pub async fn handle_command(&mut self, command: CaptureCommand) {
        match command {
            CaptureCommand::Connect {
                log,
                event,
                anvil_event,
            } => {
                if let Some(log) = log {
                    self.log_pipe.connect(&log);
                    info!("Connected log to '{log}'");
                }
                if let Some(event) = event {
                    self.events.connect(&event).await;
                }
                if let Some(anvil_event) = anvil_event {
                    self.anvil.send_forge_info(Some(&anvil_event)).await;
                }
            }
            CaptureCommand::CaptureNewProcess(setup) => {
                let mut state = lock(&self.shared);

                state.stop_video();

                self.game_pid = setup.game_capture.process_id;
                state.graph.update_game_capture(&setup.game_capture);
                state.graph.update_video_encoder(&setup.encoder);
                state.filename = setup.filename.clone();
                state.muxer_settings = setup.muxer_settings.clone();

                info!("Starting new capture");
                state.start_video();
            }
            CaptureCommand::QueryMics => {
                let devices = lock(&self.shared).graph.enumerate_microphones();

                let devices = devices
                    .into_iter()
                    .map(|device| json!({ "name": device.name, "device": device.device }))
                    .collect();

                self.events.send_query_mics_response(devices).await;
            }
            CaptureCommand::UpdateSettings(settings) => {
                let Some(microphone) = settings.microphone else {
                    warn!("no microphone data in settings");
                    return;
                };

                let enabled = microphone.enabled;
                let continuous = enabled && !microphone.ptt_mode;
                let ptt = enabled && microphone.ptt_mode;

                let combination = settings.ptt_key.map(|key| KeyCombination {
                    shift: key.shift,
                    ctrl: key.ctrl,
                    alt: key.alt,
                    meta: key.meta,
                    keycode: key.keycode.unwrap_or(0),
                });

                if let Some(combination) = &combination {
                    info!("mic hotkey uses '{combination}'");
                }

                {
                    let mut state = lock(&self.shared);
                    state.graph.update_microphone(&microphone.source_settings);
                    state
                        .graph
                        .bind_microphone_hotkeys(combination, ptt, continuous);
                    state.graph.route_microphone(enabled);
                }

                self.anvil
                    .mic_updated(Some(ptt), Some(enabled), Some(ptt))
                    .await;
            }
            CaptureCommand::SaveRecordingBuffer { filename } => {
                let mut state = lock(&self.shared);
                if let Some(outputs) = &mut state.outputs {
                    outputs.replay.save(&filename);
                }
            }
        }
    }

    pub async fn handle_signal(&mut self, signal: GraphSignal) {
        match signal {
            GraphSignal::CaptureStarted { width, height } => {
                self.anvil.connect(self.game_pid).await;

                if self.update_size(width, height) {
                    return;
                }

                lock(&self.shared).start_outputs();
            }
            GraphSignal::CaptureStopped => {
                lock(&self.shared).stop_outputs();
            }
            GraphSignal::OutputStarted => {
                let (filename, output_size) = {
                    let state = lock(&self.shared);
                    (state.filename.clone(), state.output_size)
                };

                self.events
                    .send_recording_start(&filename, output_size)
                    .await;
                self.anvil.show_recording().await;
            }
            GraphSignal::OutputStopped { total_frames } => {
                let filename = lock(&self.shared).filename.clone();

                self.events
                    .send_recording_stop(&filename, total_frames)
                    .await;
                self.anvil.show_idle().await;

                lock(&self.shared).stop_video();
            }
            GraphSignal::BufferSaved { filename } => {
                self.events.send_buffer_ready(&filename).await;
            }
            GraphSignal::MicMuteChanged { muted } => {
                self.anvil.mic_updated(Some(muted), None, None).await;
            }
            GraphSignal::PttActiveChanged { active } => {
                self.anvil.mic_updated(Some(!active), None, None).await;
            }
        }
    }

    /// Restart-on-resize coordinator: recompute sizes, join any previous
    /// restart, then stop/start video and restart the output off-task.
    fn update_size(&mut self, width: u32, height: u32) -> bool {
        {
            let mut state = lock(&self.shared);
            if !state.update_size(width, height) {
                return false;
            }
        }

        let shared = self.shared.clone();
        self.restart_thread.run(move || {
            let mut state = lock(&shared);
            state.stop_video();
            state.start_video();

            if let Some(outputs) = &mut state.outputs {
                outputs.output.start();
            }
        });

        true
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
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use common::{
        config::Config,
        ipc::{IpcServer, ServerEvent},
        protocol::{CaptureCommand, parse_event},
    };
    use serde_json::Value;

    use crate::{graph::*, log_pipe::pipe_logger};

    use super::*;

    #[derive(Default)]
    struct MockGraphState {
        resets: Vec<(Size, Size, u32)>,
        output_starts: u32,
        outputs_created: u32,
        game_pids: Vec<u32>,
        encoder_bitrates: Vec<u32>,
        mic_routed: Option<bool>,
        mic_hotkeys: Option<(Option<KeyCombination>, bool, bool)>,
    }

    struct MockGraph {
        state: Arc<Mutex<MockGraphState>>,
        signals: SignalSender,
    }

    struct MockOutput {
        state: Arc<Mutex<MockGraphState>>,
        active: Arc<AtomicBool>,
        total_frames: u32,
    }

    impl RecordingOutput for MockOutput {
        fn start(&mut self) -> bool {
            self.state.lock().unwrap().output_starts += 1;
            self.active.store(true, Ordering::Release);
            true
        }

        fn stop(&mut self) {
            self.active.store(false, Ordering::Release);
        }

        fn active(&self) -> bool {
            self.active.load(Ordering::Acquire)
        }

        fn total_frames(&self) -> u32 {
            self.total_frames
        }
    }

    struct MockReplay {
        inner: MockOutput,
        signals: SignalSender,
    }

    impl RecordingOutput for MockReplay {
        fn start(&mut self) -> bool {
            self.inner.active.store(true, Ordering::Release);
            true
        }

        fn stop(&mut self) {
            self.inner.active.store(false, Ordering::Release);
        }

        fn active(&self) -> bool {
            self.inner.active()
        }

        fn total_frames(&self) -> u32 {
            self.inner.total_frames()
        }
    }

    impl ReplayOutput for MockReplay {
        fn save(&mut self, filename: &str) {
            let _ = self.signals.send(GraphSignal::BufferSaved {
                filename: filename.to_owned(),
            });
        }
    }

    impl CaptureGraph for MockGraph {
        type Output = MockOutput;
        type Replay = MockReplay;

        fn reset_video(&mut self, base: Size, output: Size, fps: u32) -> Result<(), GraphError> {
            self.state.lock().unwrap().resets.push((base, output, fps));
            Ok(())
        }

        fn reset_audio(&mut self, _audio: &common::config::AudioConfig) -> Result<(), GraphError> {
            Ok(())
        }

        fn update_game_capture(&mut self, settings: &common::protocol::GameCaptureSettings) {
            self.state
                .lock()
                .unwrap()
                .game_pids
                .push(settings.process_id);
        }

        fn update_video_encoder(&mut self, settings: &common::protocol::EncoderSettings) {
            self.state
                .lock()
                .unwrap()
                .encoder_bitrates
                .push(settings.bitrate);
        }

        fn update_microphone(&mut self, _source_settings: &serde_json::Map<String, Value>) {}

        fn bind_microphone_hotkeys(
            &mut self,
            combination: Option<KeyCombination>,
            ptt: bool,
            continuous: bool,
        ) {
            self.state.lock().unwrap().mic_hotkeys = Some((combination, ptt, continuous));
        }

        fn route_microphone(&mut self, enabled: bool) {
            self.state.lock().unwrap().mic_routed = Some(enabled);
        }

        fn enumerate_microphones(&self) -> Vec<AudioDevice> {
            vec![AudioDevice {
                name: "Default Microphone".to_owned(),
                device: "default".to_owned(),
            }]
        }

        fn create_outputs(
            &mut self,
            _filename: &str,
            _muxer_settings: &str,
        ) -> Result<(MockOutput, MockReplay), GraphError> {
            self.state.lock().unwrap().outputs_created += 1;

            let output = MockOutput {
                state: self.state.clone(),
                active: Arc::new(AtomicBool::new(false)),
                total_frames: 120,
            };
            let replay = MockReplay {
                inner: MockOutput {
                    state: self.state.clone(),
                    active: Arc::new(AtomicBool::new(false)),
                    total_frames: 120,
                },
                signals: self.signals.clone(),
            };

            Ok((output, replay))
        }
    }

    struct Harness {
        controller: RecordingController<MockGraph>,
        state: Arc<Mutex<MockGraphState>>,
        events_received: Arc<Mutex<Vec<(String, Value)>>>,
        _event_server: IpcServer,
    }

    async fn harness(tag: &str) -> Harness {
        let (signals_tx, signals_rx) = signal_channel();
        let state = Arc::new(Mutex::new(MockGraphState::default()));
        let graph = MockGraph {
            state: state.clone(),
            signals: signals_tx.clone(),
        };

        let events = Arc::new(ForgeEvents::new());
        let anvil = Arc::new(AnvilCommands::new());
        let (_, log_pipe) = pipe_logger(log::LevelFilter::Off);

        let events_received = Arc::new(Mutex::new(Vec::new()));
        let pipe_name = format!("ControllerTest-{tag}-{}", std::process::id());
        let event_server = {
            let events_received = events_received.clone();
            IpcServer::start(&pipe_name, None, move |event| {
                if let ServerEvent::Message(message) = event {
                    let (name, value) = parse_event(&message).unwrap();
                    events_received.lock().unwrap().push((name, value));
                }
            })
            .unwrap()
        };
        events.connect(&pipe_name).await;

        let controller = RecordingController::new(
            graph,
            &Config::default(),
            events,
            anvil,
            log_pipe,
            signals_rx,
        );

        Harness {
            controller,
            state,
            events_received,
            _event_server: event_server,
        }
    }

    fn capture_setup(filename: &str) -> CaptureCommand {
        CaptureCommand::parse(
            format!(
                r#"{{
                    "command": "capture_new_process",
                    "game_capture": {{"process_id": 4242}},
                    "encoder": {{"bitrate": 2500}},
                    "filename": "{filename}",
                    "muxer_settings": ""
                }}"#
            )
            .as_bytes(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn capture_start_and_stop_emit_events() {
        let mut harness = harness("start-stop").await;

        harness
            .controller
            .handle_command(capture_setup("a.mp4"))
            .await;

        harness
            .controller
            .handle_signal(GraphSignal::CaptureStarted {
                width: 1280,
                height: 720,
            })
            .await;
        harness.controller.handle_signal(GraphSignal::OutputStarted).await;

        harness.controller.handle_signal(GraphSignal::CaptureStopped).await;
        harness
            .controller
            .handle_signal(GraphSignal::OutputStopped { total_frames: 120 })
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        let events = harness.events_received.lock().unwrap();
        assert_eq!(events[0].0, "started_recording");
        assert_eq!(
            events[0].1.get("filename").and_then(Value::as_str),
            Some("a.mp4")
        );
        assert_eq!(events[1].0, "stopped_recording");
        assert_eq!(
            events[1].1.get("total_frames").and_then(Value::as_u64),
            Some(120)
        );

        // The graph saw the settings from the command.
        let state = harness.state.lock().unwrap();
        assert_eq!(state.game_pids, vec![4242]);
        assert_eq!(state.encoder_bitrates, vec![2500]);
    }

    #[tokio::test]
    async fn replay_save_emits_buffer_ready() {
        let mut harness = harness("replay").await;

        harness
            .controller
            .handle_command(capture_setup("a.mp4"))
            .await;
        harness
            .controller
            .handle_signal(GraphSignal::CaptureStarted {
                width: 1280,
                height: 720,
            })
            .await;

        harness
            .controller
            .handle_command(CaptureCommand::SaveRecordingBuffer {
                filename: "clip.mp4".to_owned(),
            })
            .await;

        // The replay output reports completion through the signal channel.
        let mut signals = harness.controller.signals.take().unwrap();
        let signal = signals.try_recv().unwrap();
        assert_eq!(
            signal,
            GraphSignal::BufferSaved {
                filename: "clip.mp4".to_owned()
            }
        );
        harness.controller.handle_signal(signal).await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        let events = harness.events_received.lock().unwrap();
        let buffer_ready = events
            .iter()
            .find(|(name, _)| name == "buffer_ready")
            .unwrap();
        assert_eq!(
            buffer_ready.1.get("filename").and_then(Value::as_str),
            Some("clip.mp4")
        );
    }

    #[tokio::test]
    async fn resize_restarts_output_once_and_letterboxes() {
        let mut harness = harness("resize").await;

        harness
            .controller
            .handle_command(capture_setup("a.mp4"))
            .await;
        harness
            .controller
            .handle_signal(GraphSignal::CaptureStarted {
                width: 1280,
                height: 720,
            })
            .await;

        let starts_before = harness.state.lock().unwrap().output_starts;

        harness
            .controller
            .handle_signal(GraphSignal::CaptureStarted {
                width: 1920,
                height: 1080,
            })
            .await;

        // The restart runs on its own joined thread.
        harness.controller.restart_thread.join();

        {
            let state = harness.state.lock().unwrap();

            // Output restarted exactly once on top of the initial start.
            assert_eq!(state.output_starts, starts_before + 1);

            // Aspect preserved against the 1280 target width.
            let last_reset = state.resets.last().unwrap();
            assert_eq!(last_reset.0, Size::new(1920, 1080));
            assert_eq!(last_reset.1, Size::new(1280, 720));
            assert!(last_reset.2 > 0);
        }

        // A repeat of the same size is a no-op.
        harness
            .controller
            .handle_signal(GraphSignal::CaptureStarted {
                width: 1920,
                height: 1080,
            })
            .await;
        let state = harness.state.lock().unwrap();
        assert_eq!(state.output_starts, starts_before + 2);
    }

    #[tokio::test]
    async fn started_recording_reflects_new_output_size_after_resize() {
        let mut harness = harness("resize-event").await;

        harness
            .controller
            .handle_command(capture_setup("a.mp4"))
            .await;
        harness
            .controller
            .handle_signal(GraphSignal::CaptureStarted {
                width: 1920,
                height: 1080,
            })
            .await;
        harness.controller.restart_thread.join();

        harness.controller.handle_signal(GraphSignal::OutputStarted).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let events = harness.events_received.lock().unwrap();
        let started = events
            .iter()
            .find(|(name, _)| name == "started_recording")
            .unwrap();
        assert_eq!(started.1.get("width").and_then(Value::as_u64), Some(1280));
        assert_eq!(started.1.get("height").and_then(Value::as_u64), Some(720));
    }

    #[tokio::test]
    async fn query_mics_replies_with_devices() {
        let mut harness = harness("mics").await;

        harness.controller.handle_command(CaptureCommand::QueryMics).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let events = harness.events_received.lock().unwrap();
        let response = events
            .iter()
            .find(|(name, _)| name == "query_mics_response")
            .unwrap();
        let devices = response.1.get("devices").and_then(Value::as_array).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(
            devices[0].get("device").and_then(Value::as_str),
            Some("default")
        );
    }

    #[tokio::test]
    async fn microphone_settings_bind_hotkeys() {
        let mut harness = harness("mic-settings").await;

        let command = CaptureCommand::parse(
            br#"{
                "command": "update_settings",
                "settings": {
                    "ptt_key": {"keycode": 86, "ctrl": true},
                    "microphone": {"enabled": true, "ptt_mode": true, "source_settings": {}}
                }
            }"#,
        )
        .unwrap();

        harness.controller.handle_command(command).await;

        let state = harness.state.lock().unwrap();
        let (combination, ptt, continuous) = state.mic_hotkeys.unwrap();
        let combination = combination.unwrap();
        assert!(combination.ctrl);
        assert_eq!(combination.keycode, 86);
        assert!(ptt);
        assert!(!continuous);
        assert_eq!(state.mic_routed, Some(true));
    }
}
