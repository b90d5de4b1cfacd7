use std::collections::VecDeque;

use log::{info, warn};

use super::{
    CodecSettings, EncodeCompleteCallback, EncodeResult, EncodedImage, EncoderError, FrameType,
    PacketizationMode, RateParams, RawFrame, ScalingSettings, SessionOutput, WebRtcVideoEncoder,
    fragmentize,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CudaDeviceInfo {
    pub index: u32,
    pub compute_major: u32,
    pub compute_minor: u32,
}

/// CUDA runtime seam: device discovery and capability probing.
pub trait CudaEnumerator: Send {
    fn devices(&self) -> Vec<CudaDeviceInfo>;
    fn supports_h264(
        &self,
        device: &CudaDeviceInfo,
        width: u32,
        height: u32,
        dynamic_bitrate: bool,
    ) -> bool;
}

#[derive(Debug, Clone)]
pub struct NvencParams {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub rate: RateParams,
    /// Async (event-driven) completion; falls back to sync when opening in
    /// async mode fails.
    pub async_mode: bool,
    pub frame_interval_p: u32,
    pub slice_max_size: Option<usize>,
}

/// Seam over the NVENC session itself. Async sessions may return None for
/// a submitted frame and deliver it on a later call.
pub trait NvencSession: Send {
    fn open(params: &NvencParams) -> Result<Self, EncoderError>
    where
        Self: Sized;

    fn encode(
        &mut self,
        frame: &RawFrame,
        force_keyframe: bool,
    ) -> Result<Option<SessionOutput>, EncoderError>;

    fn reconfigure(&mut self, rate: &RateParams) -> Result<(), EncoderError>;
}

/// Input/output surface pairs cycling through idle → processing → ready.
pub(crate) struct SurfacePool {
    idle: VecDeque<u32>,
    processing: VecDeque<u32>,
    ready: VecDeque<u32>,
}

impl SurfacePool {
    pub(crate) fn new(frame_interval_p: u32) -> Self {
        let size = 4usize.max(2 * frame_interval_p as usize * 2);

        Self {
            idle: (0..size as u32).collect(),
            processing: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.idle.len() + self.processing.len() + self.ready.len()
    }

    fn acquire(&mut self) -> Option<u32> {
        let surface = self.idle.pop_front()?;
        self.processing.push_back(surface);
        Some(surface)
    }

    fn complete_oldest(&mut self) -> Option<u32> {
        let surface = self.processing.pop_front()?;
        self.ready.push_back(surface);
        Some(surface)
    }

    fn recycle(&mut self) {
        if let Some(surface) = self.ready.pop_front() {
            self.idle.push_back(surface);
        }
    }

    /// Failure path: hand the just-submitted surface straight back to
    /// idle.
    fn abort_last(&mut self) {
        if let Some(surface) = self.processing.pop_back() {
            self.idle.push_back(surface);
        }
    }
}

pub struct NvencEncoder<S: NvencSession, E: CudaEnumerator> {
    enumerator: E,
    frame_interval_p: u32,
    session: Option<S>,
    params: Option<NvencParams>,
    pool: Option<SurfacePool>,
    packetization_mode: PacketizationMode,
    callback: Option<Box<dyn EncodeCompleteCallback>>,
    buffer: Vec<u8>,
}

impl<S: NvencSession, E: CudaEnumerator> NvencEncoder<S, E> {
    pub fn new(enumerator: E, frame_interval_p: u32) -> Self {
        Self {
            enumerator,
            frame_interval_p: frame_interval_p.max(1),
            session: None,
            params: None,
            pool: None,
            packetization_mode: PacketizationMode::SingleNalUnit,
            callback: None,
            buffer: Vec::new(),
        }
    }

    pub fn rate(&self) -> Option<RateParams> {
        self.params.as_ref().map(|params| params.rate)
    }

    /// First device with compute capability >= 3.0 that can do H.264 at
    /// the requested size with dynamic bitrate changes.
    fn pick_device(&self, width: u32, height: u32) -> Option<CudaDeviceInfo> {
        self.enumerator.devices().into_iter().find(|device| {
            device.compute_major >= 3 && self.enumerator.supports_h264(device, width, height, true)
        })
    }
}

impl<S: NvencSession, E: CudaEnumerator> WebRtcVideoEncoder for NvencEncoder<S, E> {
    fn init(
        &mut self,
        settings: &CodecSettings,
        _cores: u32,
        max_payload_size: usize,
    ) -> Result<(), EncoderError> {
        self.release();

        let device = self
            .pick_device(settings.width, settings.height)
            .ok_or(EncoderError::Unsupported("no capable CUDA device"))?;

        self.packetization_mode = PacketizationMode::from_params(&settings.params);

        let rate = RateParams {
            bitrate_kbps: settings.start_bitrate_kbps,
            vbv_max_kbps: settings.start_bitrate_kbps,
            vbv_buffer_kbps: settings.start_bitrate_kbps,
            framerate: settings.max_framerate,
        };

        let mut params = NvencParams {
            device_index: device.index,
            width: settings.width,
            height: settings.height,
            rate,
            async_mode: true,
            frame_interval_p: self.frame_interval_p,
            slice_max_size: match self.packetization_mode {
                PacketizationMode::SingleNalUnit => None,
                PacketizationMode::NonInterleaved => Some(max_payload_size),
            },
        };

        // Async first; some driver stacks only come up in sync mode.
        let session = match S::open(&params) {
            Ok(session) => session,
            Err(err) => {
                info!("[WebRTC(NVENC)]: async init failed ({err}), retrying in sync mode");
                params.async_mode = false;
                S::open(&params)?
            }
        };

        info!(
            "[WebRTC(NVENC)]: device {} {}x{} at {} kbps",
            device.index, params.width, params.height, rate.bitrate_kbps
        );

        self.pool = Some(SurfacePool::new(self.frame_interval_p));
        self.session = Some(session);
        self.params = Some(params);
        Ok(())
    }

    fn release(&mut self) {
        self.session = None;
        self.params = None;
        self.pool = None;
    }

    fn encode(
        &mut self,
        frame: &RawFrame,
        frame_types: &[FrameType],
    ) -> Result<EncodeResult, EncoderError> {
        let session = self.session.as_mut().ok_or(EncoderError::Uninitialized)?;
        let pool = self.pool.as_mut().ok_or(EncoderError::Uninitialized)?;

        if pool.acquire().is_none() {
            warn!("[WebRTC(NVENC)]: no idle surface, dropping frame");
            return Err(EncoderError::Session("surface pool exhausted".to_owned()));
        }

        let force_keyframe = frame_types.contains(&FrameType::Key);

        let output = match session.encode(frame, force_keyframe) {
            Ok(output) => output,
            Err(err) => {
                pool.abort_last();
                return Err(err);
            }
        };

        let Some(output) = output else {
            // Async mode: the frame is in flight, its surface stays in the
            // processing queue.
            return Ok(EncodeResult::NeedMoreInput);
        };

        pool.complete_oldest();

        let fragmentation = fragmentize(&output.nals, &mut self.buffer);
        if let Some(callback) = &mut self.callback {
            callback.encoded(
                EncodedImage {
                    data: &self.buffer,
                    timestamp: frame.timestamp,
                    keyframe: output.keyframe,
                    qp: Some(output.qp),
                },
                &fragmentation,
            );
        }

        pool.recycle();

        Ok(EncodeResult::Ok)
    }

    fn set_rates(&mut self, bitrate_kbps: u32, framerate: u32) -> Result<(), EncoderError> {
        let session = self.session.as_mut().ok_or(EncoderError::Uninitialized)?;
        let params = self.params.as_mut().ok_or(EncoderError::Uninitialized)?;

        if bitrate_kbps == params.rate.bitrate_kbps && framerate == params.rate.framerate {
            return Ok(());
        }

        let new_rate = RateParams {
            bitrate_kbps,
            vbv_max_kbps: bitrate_kbps,
            vbv_buffer_kbps: bitrate_kbps,
            framerate,
        };

        if let Err(err) = session.reconfigure(&new_rate) {
            warn!("[WebRTC(NVENC)]: reconfigure failed, keeping previous rates: {err}");
            return Err(err);
        }

        params.rate = new_rate;
        Ok(())
    }

    fn register_encode_complete_callback(&mut self, callback: Box<dyn EncodeCompleteCallback>) {
        self.callback = Some(callback);
    }

    fn get_scaling_settings(&self) -> ScalingSettings {
        ScalingSettings { enabled: false }
    }
}
