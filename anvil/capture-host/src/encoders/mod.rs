use std::collections::HashMap;

use thiserror::Error;

pub mod audio;
pub mod nvenc;
pub mod x264;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("encoder is not initialized")]
    Uninitialized,
    #[error("unsupported configuration: {0}")]
    Unsupported(&'static str),
    #[error("codec session failed: {0}")]
    Session(String),
}

/// H.264 packetization mode from the codec parameters. SingleNalUnit
/// forces one slice per frame; NonInterleaved caps slices at the maximum
/// RTP payload so every NAL fits a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketizationMode {
    SingleNalUnit,
    NonInterleaved,
}

impl PacketizationMode {
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        match params.get("packetization-mode").map(String::as_str) {
            Some("1") => Self::NonInterleaved,
            _ => Self::SingleNalUnit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    ConstrainedBaseline,
    Baseline,
    Main,
    ConstrainedHigh,
    High,
}

#[derive(Debug, Clone)]
pub struct CodecSettings {
    pub width: u32,
    pub height: u32,
    pub start_bitrate_kbps: u32,
    pub max_framerate: u32,
    pub profile: H264Profile,
    pub keyframe_interval: Option<u32>,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Key,
    Delta,
}

/// Raw frame handed to an encoder; pixel layout is owned by the capture
/// pipeline feeding it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub timestamp: i64,
    pub data: bytes::Bytes,
}

/// One NAL as produced by a codec session, Annex-B start code included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nal {
    pub data: Vec<u8>,
    pub long_start_code: bool,
}

impl Nal {
    pub fn start_code_len(&self) -> usize {
        if self.long_start_code { 4 } else { 3 }
    }
}

/// Rate-control parameters applied to a codec session as one unit, so a
/// failed reconfigure can leave the previous set untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateParams {
    pub bitrate_kbps: u32,
    pub vbv_max_kbps: u32,
    pub vbv_buffer_kbps: u32,
    pub framerate: u32,
}

/// One encoded access unit out of a codec session.
pub struct SessionOutput {
    pub nals: Vec<Nal>,
    pub keyframe: bool,
    pub qp: u32,
}

/// Offsets point past each NAL's start code; lengths exclude it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FragmentationHeader {
    pub offsets: Vec<usize>,
    pub lengths: Vec<usize>,
}

/// Encoded access unit, borrowed from the adapter's reusable buffer.
#[derive(Debug, Clone, Copy)]
pub struct EncodedImage<'a> {
    pub data: &'a [u8],
    pub timestamp: i64,
    pub keyframe: bool,
    pub qp: Option<u32>,
}

pub trait EncodeCompleteCallback: Send {
    fn encoded(&mut self, image: EncodedImage<'_>, fragmentation: &FragmentationHeader);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeResult {
    Ok,
    /// The codec buffered the frame; more input is needed before output
    /// appears. Not an error.
    NeedMoreInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingSettings {
    pub enabled: bool,
}

/// The encoder contract shared by the x264 and NVENC adapters.
pub trait WebRtcVideoEncoder: Send {
    fn init(
        &mut self,
        settings: &CodecSettings,
        cores: u32,
        max_payload_size: usize,
    ) -> Result<(), EncoderError>;
    fn release(&mut self);
    fn encode(
        &mut self,
        frame: &RawFrame,
        frame_types: &[FrameType],
    ) -> Result<EncodeResult, EncoderError>;
    fn set_rates(&mut self, bitrate_kbps: u32, framerate: u32) -> Result<(), EncoderError>;
    fn register_encode_complete_callback(&mut self, callback: Box<dyn EncodeCompleteCallback>);
    fn get_scaling_settings(&self) -> ScalingSettings;
}

/// Copies every NAL into `buffer` (Annex-B, back to back) and records the
/// fragmentation entries. The buffer grows as needed and keeps its
/// capacity: it never shrinks within a stream.
pub fn fragmentize(nals: &[Nal], buffer: &mut Vec<u8>) -> FragmentationHeader {
    buffer.clear();

    let mut header = FragmentationHeader::default();
    for nal in nals {
        let start_code_len = nal.start_code_len();

        header.offsets.push(buffer.len() + start_code_len);
        header.lengths.push(nal.data.len() - start_code_len);
        buffer.extend_from_slice(&nal.data);
    }

    header
}
