use common::{Size, config::AudioConfig, protocol::{EncoderSettings, GameCaptureSettings}};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("couldn't initialize video")]
    VideoReset,
    #[error("couldn't initialize audio")]
    AudioReset,
    #[error("couldn't create {0}")]
    CreateFailed(&'static str),
}

/// Asynchronous notifications out of the capture graph: source and output
/// signals land on the controller's loop, which serializes all reactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphSignal {
    /// The game-capture source hooked the game and knows its size.
    CaptureStarted { width: u32, height: u32 },
    CaptureStopped,
    OutputStarted,
    OutputStopped { total_frames: u32 },
    BufferSaved { filename: String },
    MicMuteChanged { muted: bool },
    PttActiveChanged { active: bool },
}

pub type SignalSender = UnboundedSender<GraphSignal>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub name: String,
    pub device: String,
}

/// Platform key combination for the microphone hotkeys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyCombination {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
    pub keycode: u32,
}

impl std::fmt::Display for KeyCombination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ctrl {
            write!(f, "CTRL+")?;
        }
        if self.meta {
            write!(f, "META+")?;
        }
        if self.alt {
            write!(f, "ALT+")?;
        }
        if self.shift {
            write!(f, "SHIFT+")?;
        }
        write!(f, "{:#04X}", self.keycode)
    }
}

/// Recording destination: the muxer output and its replay-buffer sibling
/// share the same encoders underneath.
pub trait RecordingOutput: Send {
    fn start(&mut self) -> bool;
    fn stop(&mut self);
    fn active(&self) -> bool;
    fn total_frames(&self) -> u32;
}

pub trait ReplayOutput: RecordingOutput {
    /// Asks the rolling buffer to flush to `filename`; completion arrives
    /// as [`GraphSignal::BufferSaved`].
    fn save(&mut self, filename: &str);
}

/// The whole libobs-shaped seam the recording controller drives. One live
/// implementation binds the real capture/encode stack; tests use a scripted
/// one.
pub trait CaptureGraph: Send {
    type Output: RecordingOutput;
    type Replay: ReplayOutput;

    /// (Re)configures the video pipeline. `fps == 0` tears the pipeline
    /// down (used by the stop path to release encoders).
    fn reset_video(&mut self, base: Size, output: Size, fps: u32) -> Result<(), GraphError>;
    fn reset_audio(&mut self, audio: &AudioConfig) -> Result<(), GraphError>;

    fn update_game_capture(&mut self, settings: &GameCaptureSettings);
    fn update_video_encoder(&mut self, settings: &EncoderSettings);

    fn update_microphone(&mut self, source_settings: &Map<String, Value>);
    /// Binds push-to-talk (when `ptt`) or mute/unmute (when `continuous`)
    /// to the combination; `None` clears the bindings.
    fn bind_microphone_hotkeys(
        &mut self,
        combination: Option<KeyCombination>,
        ptt: bool,
        continuous: bool,
    );
    /// Routes the microphone into (or out of) the global audio mix.
    fn route_microphone(&mut self, enabled: bool);
    fn enumerate_microphones(&self) -> Vec<AudioDevice>;

    /// Creates the muxer output and the recording-buffer output, both
    /// bound to the shared video/audio encoders.
    fn create_outputs(
        &mut self,
        filename: &str,
        muxer_settings: &str,
    ) -> Result<(Self::Output, Self::Replay), GraphError>;
}

/// The graph the standalone binary runs with until a capture stack is
/// bound at this seam. Outputs acknowledge lifecycle transitions through
/// the signal channel so the command/event protocol can be exercised end
/// to end.
pub mod standalone {
    use log::info;

    use super::*;

    pub struct StandaloneGraph {
        signals: SignalSender,
    }

    impl StandaloneGraph {
        pub fn new(signals: SignalSender) -> Self {
            Self { signals }
        }
    }

    pub struct StandaloneOutput {
        signals: SignalSender,
        active: bool,
        frames: u32,
    }

    impl RecordingOutput for StandaloneOutput {
        fn start(&mut self) -> bool {
            self.active = true;
            let _ = self.signals.send(GraphSignal::OutputStarted);
            true
        }

        fn stop(&mut self) {
            self.active = false;
            let _ = self.signals.send(GraphSignal::OutputStopped {
                total_frames: self.frames,
            });
        }

        fn active(&self) -> bool {
            self.active
        }

        fn total_frames(&self) -> u32 {
            self.frames
        }
    }

    pub struct StandaloneReplay {
        signals: SignalSender,
        active: bool,
    }

    impl RecordingOutput for StandaloneReplay {
        fn start(&mut self) -> bool {
            self.active = true;
            true
        }

        fn stop(&mut self) {
            self.active = false;
        }

        fn active(&self) -> bool {
            self.active
        }

        fn total_frames(&self) -> u32 {
            0
        }
    }

    impl ReplayOutput for StandaloneReplay {
        fn save(&mut self, filename: &str) {
            let _ = self.signals.send(GraphSignal::BufferSaved {
                filename: filename.to_owned(),
            });
        }
    }

    impl CaptureGraph for StandaloneGraph {
        type Output = StandaloneOutput;
        type Replay = StandaloneReplay;

        fn reset_video(
            &mut self,
            base: common::Size,
            output: common::Size,
            fps: u32,
        ) -> Result<(), GraphError> {
            info!(
                "video: {}x{} -> {}x{} at {fps} fps",
                base.width, base.height, output.width, output.height
            );
            Ok(())
        }

        fn reset_audio(
            &mut self,
            audio: &common::config::AudioConfig,
        ) -> Result<(), GraphError> {
            info!(
                "audio: {} Hz, {} speakers, {} ms buffer",
                audio.samples_per_sec, audio.speakers, audio.buffer_ms
            );
            Ok(())
        }

        fn update_game_capture(
            &mut self,
            settings: &common::protocol::GameCaptureSettings,
        ) {
            info!("game capture bound to process {}", settings.process_id);
        }

        fn update_video_encoder(&mut self, settings: &common::protocol::EncoderSettings) {
            info!("video encoder at {} kbps", settings.bitrate);
        }

        fn update_microphone(&mut self, _source_settings: &Map<String, Value>) {}

        fn bind_microphone_hotkeys(
            &mut self,
            combination: Option<KeyCombination>,
            ptt: bool,
            continuous: bool,
        ) {
            if let Some(combination) = combination {
                info!("mic hotkeys bound to {combination} (ptt {ptt}, continuous {continuous})");
            }
        }

        fn route_microphone(&mut self, enabled: bool) {
            info!("microphone routed: {enabled}");
        }

        fn enumerate_microphones(&self) -> Vec<AudioDevice> {
            Vec::new()
        }

        fn create_outputs(
            &mut self,
            filename: &str,
            _muxer_settings: &str,
        ) -> Result<(StandaloneOutput, StandaloneReplay), GraphError> {
            info!("outputs created for '{filename}'");

            Ok((
                StandaloneOutput {
                    signals: self.signals.clone(),
                    active: false,
                    frames: 0,
                },
                StandaloneReplay {
                    signals: self.signals.clone(),
                    active: false,
                },
            ))
        }
    }
}
