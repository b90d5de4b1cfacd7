use bytes::Bytes;
use log::warn;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{KeyModifiers, buffer::ByteBuffer};

pub fn renderer_pipe_name(pid: u32) -> String {
    format!("AnvilRenderer{pid}")
}

pub fn framebuffer_server_name(pid: u32, seq: u32) -> String {
    format!("AnvilFramebufferServer{pid}-{seq}")
}

pub const CAPTURE_PIPE: &str = "ForgeCrucible";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing or empty command field")]
    MissingCommand,
    #[error("unknown command \"{0}\"")]
    UnknownCommand(String),
}

fn trim_nul(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|byte| *byte != 0)
        .map_or(0, |pos| pos + 1);
    &data[..end]
}

fn parse_envelope(data: &[u8], key: &str) -> Result<(String, Value), ProtocolError> {
    let value: Value = serde_json::from_slice(trim_nul(data))?;

    let name = value
        .get(key)
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or(ProtocolError::MissingCommand)?
        .to_owned();

    Ok((name, value))
}

fn encode_envelope(key: &str, name: &str, mut payload: Value) -> Vec<u8> {
    let object = payload.as_object_mut().map(std::mem::take).unwrap_or_default();

    let mut envelope = Map::new();
    envelope.insert(key.to_owned(), Value::String(name.to_owned()));
    envelope.extend(object);

    let mut bytes = serde_json::to_vec(&Value::Object(envelope)).unwrap_or_default();
    bytes.push(0);
    bytes
}

// -- Indicators

/// Closed set of indicator bitmaps the renderer can composite over the game
/// output. `None` is a placeholder that disables drawing.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum IndicatorKind {
    Capturing = 0,
    Enabled,
    Bookmark,
    MicIdle,
    MicActive,
    MicMuted,
    MicDisconnected,
    CacheLimit,
    ClipProcessing,
    ClipProcessed,
    StreamStarted,
    StreamStopped,
    Streaming,
    StreamMicIdle,
    StreamMicActive,
    StreamMicMuted,
    StreamMicDisconnected,
    ScreenshotSaved,
    ScreenshotProcessing,
    Tutorial,
    ForwardBuffer,
    None,
}

impl IndicatorKind {
    /// Every kind that owns a bitmap, in declaration order.
    pub const IMAGE_COUNT: usize = Self::None as usize;

    pub fn all_images() -> impl Iterator<Item = Self> {
        (0..Self::IMAGE_COUNT as u32).filter_map(num_traits::FromPrimitive::from_u32)
    }

    pub fn from_command_name(name: &str) -> Option<Self> {
        Some(match name {
            "idle" => Self::None,
            "capturing" => Self::Capturing,
            "mic_idle" => Self::MicIdle,
            "mic_active" => Self::MicActive,
            "mic_muted" => Self::MicMuted,
            "enabled" => Self::Enabled,
            "bookmark" => Self::Bookmark,
            "cache_limit" => Self::CacheLimit,
            "clip_processing" => Self::ClipProcessing,
            "clip_processed" => Self::ClipProcessed,
            "stream_started" => Self::StreamStarted,
            "stream_stopped" => Self::StreamStopped,
            "streaming" => Self::Streaming,
            "stream_mic_idle" => Self::StreamMicIdle,
            "stream_mic_active" => Self::StreamMicActive,
            "stream_mic_muted" => Self::StreamMicMuted,
            "screenshot_processing" => Self::ScreenshotProcessing,
            "screenshot" => Self::ScreenshotSaved,
            "first_time_tutorial" => Self::Tutorial,
            "forward_buffer_in_progress" => Self::ForwardBuffer,
            _ => return None,
        })
    }
}

// -- Hotkey wire settings

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBinding {
    pub keycode: Option<u32>,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl KeyBinding {
    pub fn modifiers(&self) -> KeyModifiers {
        KeyModifiers::from_binding(self.ctrl, self.alt, self.shift)
    }
}

/// Full hotkey table replacement carried by `update_settings`. A missing
/// slot or missing keycode disables that role.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeySettingsUpdate {
    pub bookmark_key: Option<KeyBinding>,
    pub highlight_key: Option<KeyBinding>,
    pub stream_key: Option<KeyBinding>,
    pub start_stop_stream_key: Option<KeyBinding>,
    pub ptt_key: Option<KeyBinding>,
    pub screenshot_key: Option<KeyBinding>,
    pub quick_clip_key: Option<KeyBinding>,
    pub quick_clip_forward_key: Option<KeyBinding>,
    pub cancel_key: Option<KeyBinding>,
    pub select_key: Option<KeyBinding>,
}

// -- Renderer command channel

#[derive(Debug, Clone, PartialEq)]
pub enum RendererCommand {
    Indicator { indicator: String },
    DisableNativeIndicators { disable: bool },
    ForgeInfo { anvil_event: String },
    UpdateSettings(Box<HotkeySettingsUpdate>),
    SetCursor { cursor: u32 },
    DismissOverlay { name: String },
    StreamStatus,
    UpdateForwardBufferIndicator { text: Option<String> },
}

impl RendererCommand {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let (command, value) = parse_envelope(data, "command")?;

        Ok(match command.as_str() {
            "indicator" => Self::Indicator {
                indicator: value
                    .get("indicator")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            },
            "disable_native_indicators" => Self::DisableNativeIndicators {
                disable: value
                    .get("disable_indicators")
                    .and_then(Value::as_bool)
                    .unwrap_or_default(),
            },
            "forge_info" => Self::ForgeInfo {
                anvil_event: value
                    .get("anvil_event")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            },
            "update_settings" => Self::UpdateSettings(Box::new(serde_json::from_value(value)?)),
            "set_cursor" => Self::SetCursor {
                cursor: value
                    .get("cursor")
                    .and_then(Value::as_u64)
                    .unwrap_or_default() as u32,
            },
            "dismiss_overlay" => Self::DismissOverlay {
                name: value
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            },
            "stream_status" => Self::StreamStatus,
            "update_forward_buffer_indicator" => Self::UpdateForwardBufferIndicator {
                text: value
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            _ => return Err(ProtocolError::UnknownCommand(command)),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let (name, payload) = match self {
            Self::Indicator { indicator } => {
                ("indicator", serde_json::json!({ "indicator": indicator }))
            }
            Self::DisableNativeIndicators { disable } => (
                "disable_native_indicators",
                serde_json::json!({ "disable_indicators": disable }),
            ),
            Self::ForgeInfo { anvil_event } => (
                "forge_info",
                serde_json::json!({ "anvil_event": anvil_event }),
            ),
            Self::UpdateSettings(settings) => (
                "update_settings",
                serde_json::to_value(settings).unwrap_or_default(),
            ),
            Self::SetCursor { cursor } => ("set_cursor", serde_json::json!({ "cursor": cursor })),
            Self::DismissOverlay { name } => {
                ("dismiss_overlay", serde_json::json!({ "name": name }))
            }
            Self::StreamStatus => ("stream_status", Value::Object(Map::new())),
            Self::UpdateForwardBufferIndicator { text } => (
                "update_forward_buffer_indicator",
                serde_json::json!({ "text": text }),
            ),
        };

        encode_envelope("command", name, payload)
    }
}

// -- Capture host command channel

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameCaptureSettings {
    pub process_id: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub bitrate: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            bitrate: 2500,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSetup {
    pub game_capture: GameCaptureSettings,
    pub encoder: EncoderSettings,
    pub filename: String,
    pub muxer_settings: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicrophoneSettings {
    pub enabled: bool,
    pub ptt_mode: bool,
    pub source_settings: Map<String, Value>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettingsUpdate {
    pub ptt_key: Option<KeyBinding>,
    pub microphone: Option<MicrophoneSettings>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureCommand {
    Connect {
        log: Option<String>,
        event: Option<String>,
        anvil_event: Option<String>,
    },
    CaptureNewProcess(Box<CaptureSetup>),
    QueryMics,
    UpdateSettings(Box<CaptureSettingsUpdate>),
    SaveRecordingBuffer {
        filename: String,
    },
}

impl CaptureCommand {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let (command, value) = parse_envelope(data, "command")?;

        let string_field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_owned)
        };

        Ok(match command.as_str() {
            "connect" => Self::Connect {
                log: string_field("log"),
                event: string_field("event"),
                anvil_event: string_field("anvil_event"),
            },
            "capture_new_process" => {
                Self::CaptureNewProcess(Box::new(serde_json::from_value(value)?))
            }
            "query_mics" => Self::QueryMics,
            "update_settings" => {
                let settings = value
                    .get("settings")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                Self::UpdateSettings(Box::new(serde_json::from_value(settings)?))
            }
            "save_recording_buffer" => Self::SaveRecordingBuffer {
                filename: string_field("filename").unwrap_or_default(),
            },
            _ => return Err(ProtocolError::UnknownCommand(command)),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let (name, payload) = match self {
            Self::Connect {
                log,
                event,
                anvil_event,
            } => (
                "connect",
                serde_json::json!({
                    "log": log,
                    "event": event,
                    "anvil_event": anvil_event,
                }),
            ),
            Self::CaptureNewProcess(setup) => (
                "capture_new_process",
                serde_json::to_value(setup).unwrap_or_default(),
            ),
            Self::QueryMics => ("query_mics", Value::Object(Map::new())),
            Self::UpdateSettings(settings) => (
                "update_settings",
                serde_json::json!({
                    "settings": serde_json::to_value(settings).unwrap_or_default()
                }),
            ),
            Self::SaveRecordingBuffer { filename } => (
                "save_recording_buffer",
                serde_json::json!({ "filename": filename }),
            ),
        };

        encode_envelope("command", name, payload)
    }
}

// -- Event envelope

/// `{ "event": name, "timestamp": ms, ...fields }`, NUL terminated.
pub fn encode_event(name: &str, mut fields: Value) -> Vec<u8> {
    if !fields.is_object() {
        fields = Value::Object(Map::new());
    }
    if let Some(object) = fields.as_object_mut() {
        object.insert(
            "timestamp".to_owned(),
            Value::Number(crate::event_timestamp_ms().into()),
        );
    }

    encode_envelope("event", name, fields)
}

pub fn parse_event(data: &[u8]) -> Result<(String, Value), ProtocolError> {
    parse_envelope(data, "event")
}

// -- Framebuffer framing

pub const FRAMEBUFFER_INFO_FRAGMENT: &[u8] = b"FramebufferInfo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramebufferInfo {
    pub width: u32,
    pub height: u32,
    pub line_size: u32,
}

impl FramebufferInfo {
    pub fn payload_len(&self) -> usize {
        self.line_size as usize * self.height as usize
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAMEBUFFER_INFO_FRAGMENT.len() + 2
            || !data.starts_with(FRAMEBUFFER_INFO_FRAGMENT)
        {
            return None;
        }

        serde_json::from_slice(trim_nul(&data[FRAMEBUFFER_INFO_FRAGMENT.len()..])).ok()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = FRAMEBUFFER_INFO_FRAGMENT.to_vec();
        bytes.extend_from_slice(&serde_json::to_vec(self).unwrap_or_default());
        bytes.push(0);
        bytes
    }
}

/// Header/payload pairing state machine shared by the renderer framebuffer
/// servers and the capture host framebuffer source. Reverts to
/// awaiting-header on any mismatch without raising.
#[derive(Debug, Default)]
pub struct FramebufferReceiver {
    pending: Option<FramebufferInfo>,
}

impl FramebufferReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: Bytes) -> Option<(FramebufferInfo, Bytes)> {
        match self.pending.take() {
            None => {
                self.pending = FramebufferInfo::parse(&data);
                None
            }
            Some(info) => {
                if data.len() != info.payload_len() {
                    warn!(
                        "[Framebuffer]: got invalid size: {}, expected {}",
                        data.len(),
                        info.payload_len()
                    );
                    return None;
                }

                Some((info, data))
            }
        }
    }

    pub fn reset(&mut self) {
        self.pending = None;
    }
}

// -- Audio packets

/// Fixed little-endian header in front of every interleaved PCM payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPacketHeader {
    pub stream_id: u64,
    pub sample_rate: u32,
    pub speakers: u32,
    pub format: u32,
    pub frames: u32,
}

impl AudioPacketHeader {
    pub const SIZE: usize = 24;

    pub fn parse(data: &[u8]) -> Option<(Self, &[u8])> {
        if data.len() < Self::SIZE {
            return None;
        }

        let mut buffer = ByteBuffer::new_le(data);
        let header = Self {
            stream_id: buffer.get_u64(),
            sample_rate: buffer.get_u32(),
            speakers: buffer.get_u32(),
            format: buffer.get_u32(),
            frames: buffer.get_u32(),
        };

        Some((header, &data[Self::SIZE..]))
    }

    pub fn encode_packet(&self, pcm: &[u8]) -> Vec<u8> {
        let mut raw = vec![0u8; Self::SIZE + pcm.len()];
        let mut buffer = ByteBuffer::new_le(&mut raw[..Self::SIZE]);
        buffer.put_u64(self.stream_id);
        buffer.put_u32(self.sample_rate);
        buffer.put_u32(self.speakers);
        buffer.put_u32(self.format);
        buffer.put_u32(self.frames);

        raw[Self::SIZE..].copy_from_slice(pcm);
        raw
    }
}
