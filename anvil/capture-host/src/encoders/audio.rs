use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioEncoderChoice {
    pub id: &'static str,
    pub bitrate: u32,
}

// Ranked best-first; the last entry is the always-available fallback.
const ENCODERS: [AudioEncoderChoice; 4] = [
    AudioEncoderChoice {
        id: "CoreAudio_AAC",
        bitrate: 128,
    },
    AudioEncoderChoice {
        id: "libfdk_aac",
        bitrate: 128,
    },
    AudioEncoderChoice {
        id: "mf_aac",
        bitrate: 128,
    },
    AudioEncoderChoice {
        id: "ffmpeg_aac",
        bitrate: 160,
    },
];

/// Seam over the module registry's encoder factory list.
pub trait EncoderRegistry {
    fn is_registered(&self, id: &str) -> bool;
}

/// Highest-ranked encoder whose factory is registered, with its default
/// bitrate. Falls back to the ffmpeg implementation, which ships with the
/// host.
pub fn select_audio_encoder(registry: &impl EncoderRegistry) -> AudioEncoderChoice {
    let choice = ENCODERS
        .iter()
        .find(|encoder| registry.is_registered(encoder.id))
        .unwrap_or(&ENCODERS[ENCODERS.len() - 1]);

    info!("Using '{}' with bitrate {}", choice.id, choice.bitrate);
    *choice
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FixedRegistry(Vec<&'static str>);

    impl EncoderRegistry for FixedRegistry {
        fn is_registered(&self, id: &str) -> bool {
            self.0.contains(&id)
        }
    }

    #[test]
    fn prefers_platform_native_aac() {
        let registry = FixedRegistry(vec!["ffmpeg_aac", "CoreAudio_AAC", "mf_aac"]);
        assert_eq!(select_audio_encoder(&registry).id, "CoreAudio_AAC");
    }

    #[test]
    fn rank_order_decides_between_registered() {
        let registry = FixedRegistry(vec!["ffmpeg_aac", "mf_aac"]);
        let choice = select_audio_encoder(&registry);
        assert_eq!(choice.id, "mf_aac");
        assert_eq!(choice.bitrate, 128);
    }

    #[test]
    fn falls_back_to_ffmpeg() {
        let registry = FixedRegistry(vec![]);
        let choice = select_audio_encoder(&registry);
        assert_eq!(choice.id, "ffmpeg_aac");
        assert_eq!(choice.bitrate, 160);
    }
}
