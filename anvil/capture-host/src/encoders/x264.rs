use log::{info, warn};

use super::{
    CodecSettings, EncodeCompleteCallback, EncodeResult, EncodedImage, EncoderError, FrameType,
    H264Profile, PacketizationMode, RateParams, RawFrame, ScalingSettings, SessionOutput,
    WebRtcVideoEncoder, fragmentize,
};

#[derive(Debug, Clone)]
pub struct SessionParams {
    pub width: u32,
    pub height: u32,
    pub profile: H264Profile,
    pub rate: RateParams,
    pub threads: u32,
    pub keyframe_interval: Option<u32>,
    /// One slice per frame when None; otherwise the maximum slice size in
    /// bytes.
    pub slice_max_size: Option<usize>,
}

/// Seam over the actual x264 library. The adapter owns everything above
/// the bitstream: packetization policy, fragmentation, rate bookkeeping.
pub trait H264Session: Send {
    fn open(params: &SessionParams) -> Result<Self, EncoderError>
    where
        Self: Sized;

    /// Returns None while the codec is buffering (lookahead).
    fn encode(
        &mut self,
        frame: &RawFrame,
        force_keyframe: bool,
    ) -> Result<Option<SessionOutput>, EncoderError>;

    fn reconfigure(&mut self, rate: &RateParams) -> Result<(), EncoderError>;
}

pub struct X264Encoder<S: H264Session> {
    session: Option<S>,
    params: Option<SessionParams>,
    packetization_mode: PacketizationMode,
    callback: Option<Box<dyn EncodeCompleteCallback>>,
    // Annex-B scratch; reused across frames and never shrunk mid-stream.
    buffer: Vec<u8>,
}

impl<S: H264Session> X264Encoder<S> {
    pub fn new() -> Self {
        Self {
            session: None,
            params: None,
            packetization_mode: PacketizationMode::SingleNalUnit,
            callback: None,
            buffer: Vec::new(),
        }
    }

    pub fn rate(&self) -> Option<RateParams> {
        self.params.as_ref().map(|params| params.rate)
    }
}

impl<S: H264Session> Default for X264Encoder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: H264Session> WebRtcVideoEncoder for X264Encoder<S> {
    fn init(
        &mut self,
        settings: &CodecSettings,
        cores: u32,
        max_payload_size: usize,
    ) -> Result<(), EncoderError> {
        self.release();

        self.packetization_mode = PacketizationMode::from_params(&settings.params);

        let rate = RateParams {
            bitrate_kbps: settings.start_bitrate_kbps,
            vbv_max_kbps: settings.start_bitrate_kbps,
            vbv_buffer_kbps: settings.start_bitrate_kbps,
            framerate: settings.max_framerate,
        };

        let params = SessionParams {
            width: settings.width,
            height: settings.height,
            profile: settings.profile,
            rate,
            threads: cores.max(1),
            keyframe_interval: settings.keyframe_interval,
            slice_max_size: match self.packetization_mode {
                PacketizationMode::SingleNalUnit => None,
                PacketizationMode::NonInterleaved => Some(max_payload_size),
            },
        };

        info!(
            "[WebRTC(x264)]: opening {}x{} at {} kbps",
            params.width, params.height, rate.bitrate_kbps
        );

        self.session = Some(S::open(&params)?);
        self.params = Some(params);
        Ok(())
    }

    fn release(&mut self) {
        self.session = None;
        self.params = None;
    }

    fn encode(
        &mut self,
        frame: &RawFrame,
        frame_types: &[FrameType],
    ) -> Result<EncodeResult, EncoderError> {
        let session = self.session.as_mut().ok_or(EncoderError::Uninitialized)?;

        let force_keyframe = frame_types.contains(&FrameType::Key);

        let Some(output) = session.encode(frame, force_keyframe)? else {
            return Ok(EncodeResult::NeedMoreInput);
        };

        if output.nals.is_empty() {
            return Ok(EncodeResult::NeedMoreInput);
        }

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

        Ok(EncodeResult::Ok)
    }

    /// Reconfigures in place. On failure the observable rate parameters
    /// stay what they were before the call.
    fn set_rates(&mut self, bitrate_kbps: u32, framerate: u32) -> Result<(), EncoderError> {
        let session = self.session.as_mut().ok_or(EncoderError::Uninitialized)?;
        let params = self.params.as_mut().ok_or(EncoderError::Uninitialized)?;

        if bitrate_kbps == params.rate.bitrate_kbps && framerate == params.rate.framerate {
            return Ok(());
        }

        info!(
            "[WebRTC(x264)]: updating bitrate: {} -> {}",
            params.rate.bitrate_kbps, bitrate_kbps
        );

        let new_rate = RateParams {
            bitrate_kbps,
            vbv_max_kbps: bitrate_kbps,
            vbv_buffer_kbps: bitrate_kbps,
            framerate,
        };

        if let Err(err) = session.reconfigure(&new_rate) {
            warn!("[WebRTC(x264)]: reconfigure failed, keeping previous rates: {err}");
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use bytes::Bytes;

    use super::*;

    struct FakeSession {
        params: SessionParams,
        fail_reconfigure: Arc<Mutex<bool>>,
        applied_rates: Arc<Mutex<Vec<RateParams>>>,
    }

    // Test-session knobs travel through thread-locals because `open` is an
    // associated function.
    thread_local! {
        static FAIL_RECONFIGURE: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));
        static APPLIED_RATES: Arc<Mutex<Vec<RateParams>>> = Arc::new(Mutex::new(Vec::new()));
    }

    impl H264Session for FakeSession {
        fn open(params: &SessionParams) -> Result<Self, EncoderError> {
            Ok(Self {
                params: params.clone(),
                fail_reconfigure: FAIL_RECONFIGURE.with(Clone::clone),
                applied_rates: APPLIED_RATES.with(Clone::clone),
            })
        }

        fn encode(
            &mut self,
            frame: &RawFrame,
            force_keyframe: bool,
        ) -> Result<Option<SessionOutput>, EncoderError> {
            if frame.data.is_empty() {
                return Ok(None);
            }

            let mut sps = vec![0, 0, 0, 1, 0x67];
            sps.extend_from_slice(&frame.data);
            Ok(Some(SessionOutput {
                nals: vec![
                    Nal {
                        data: sps,
                        long_start_code: true,
                    },
                    Nal {
                        data: vec![0, 0, 1, 0x41, 0xAA],
                        long_start_code: false,
                    },
                ],
                keyframe: force_keyframe,
                qp: 24,
            }))
        }

        fn reconfigure(&mut self, rate: &RateParams) -> Result<(), EncoderError> {
            if *self.fail_reconfigure.lock().unwrap() {
                return Err(EncoderError::Session("reconfig rejected".to_owned()));
            }

            self.params.rate = *rate;
            self.applied_rates.lock().unwrap().push(*rate);
            Ok(())
        }
    }

    struct CollectingCallback {
        frames: Arc<Mutex<Vec<(Vec<u8>, FragmentationHeader, bool)>>>,
    }

    use super::super::{FragmentationHeader, Nal};

    impl EncodeCompleteCallback for CollectingCallback {
        fn encoded(&mut self, image: EncodedImage<'_>, fragmentation: &FragmentationHeader) {
            self.frames.lock().unwrap().push((
                image.data.to_vec(),
                fragmentation.clone(),
                image.keyframe,
            ));
        }
    }

    fn settings(params: HashMap<String, String>) -> CodecSettings {
        CodecSettings {
            width: 1280,
            height: 720,
            start_bitrate_kbps: 2500,
            max_framerate: 30,
            profile: H264Profile::High,
            keyframe_interval: None,
            params,
        }
    }

    #[test]
    fn encode_emits_annex_b_with_fragmentation() {
        let mut encoder: X264Encoder<FakeSession> = X264Encoder::new();
        encoder.init(&settings(HashMap::new()), 4, 1200).unwrap();

        let frames = Arc::new(Mutex::new(Vec::new()));
        encoder.register_encode_complete_callback(Box::new(CollectingCallback {
            frames: frames.clone(),
        }));

        let frame = RawFrame {
            timestamp: 9000,
            data: Bytes::from_static(&[1, 2, 3]),
        };
        assert!(matches!(
            encoder.encode(&frame, &[FrameType::Key]),
            Ok(EncodeResult::Ok)
        ));

        let frames = frames.lock().unwrap();
        let (data, fragmentation, keyframe) = &frames[0];
        assert!(keyframe);
        assert_eq!(fragmentation.offsets.len(), 2);
        // First NAL payload begins right past the 4-byte start code.
        assert_eq!(data[fragmentation.offsets[0]], 0x67);
        assert_eq!(data[fragmentation.offsets[1]], 0x41);
    }

    #[test]
    fn empty_session_output_is_need_more_input() {
        let mut encoder: X264Encoder<FakeSession> = X264Encoder::new();
        encoder.init(&settings(HashMap::new()), 4, 1200).unwrap();

        let frame = RawFrame {
            timestamp: 0,
            data: Bytes::new(),
        };
        assert!(matches!(
            encoder.encode(&frame, &[]),
            Ok(EncodeResult::NeedMoreInput)
        ));
    }

    #[test]
    fn packetization_mode_controls_slicing() {
        let mut encoder: X264Encoder<FakeSession> = X264Encoder::new();
        encoder.init(&settings(HashMap::new()), 4, 1200).unwrap();
        assert!(encoder.params.as_ref().unwrap().slice_max_size.is_none());

        let mut params = HashMap::new();
        params.insert("packetization-mode".to_owned(), "1".to_owned());
        encoder.init(&settings(params), 4, 1200).unwrap();
        assert_eq!(encoder.params.as_ref().unwrap().slice_max_size, Some(1200));
    }

    #[test]
    fn failed_set_rates_rolls_back() {
        FAIL_RECONFIGURE.with(|flag| *flag.lock().unwrap() = false);
        APPLIED_RATES.with(|rates| rates.lock().unwrap().clear());

        let mut encoder: X264Encoder<FakeSession> = X264Encoder::new();
        encoder.init(&settings(HashMap::new()), 4, 1200).unwrap();

        assert!(encoder.set_rates(4000, 30).is_ok());
        assert_eq!(encoder.rate().unwrap().bitrate_kbps, 4000);

        FAIL_RECONFIGURE.with(|flag| *flag.lock().unwrap() = true);
        assert!(encoder.set_rates(8000, 30).is_err());

        // The observable bitrate is the pre-call one and no further frame
        // uses the rejected rate.
        assert_eq!(encoder.rate().unwrap().bitrate_kbps, 4000);
        APPLIED_RATES.with(|rates| {
            let rates = rates.lock().unwrap();
            assert!(rates.iter().all(|rate| rate.bitrate_kbps != 8000));
        });
    }
}
