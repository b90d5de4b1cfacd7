use log::LevelFilter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_video")]
    pub video: VideoConfig,
    #[serde(default = "default_audio")]
    pub audio: AudioConfig,
    #[serde(default = "default_log")]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Output is scaled down to this width when the game exceeds it,
    /// preserving aspect.
    #[serde(default = "default_target_width")]
    pub target_width: u32,
    #[serde(default = "default_target_height")]
    pub target_height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub samples_per_sec: u32,
    #[serde(default = "default_speakers")]
    pub speakers: u32,
    #[serde(default = "default_audio_buffer_ms")]
    pub buffer_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level_filter: LevelFilter,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            video: default_video(),
            audio: default_audio(),
            log: default_log(),
        }
    }
}

fn default_video() -> VideoConfig {
    VideoConfig {
        target_width: default_target_width(),
        target_height: default_target_height(),
        fps: default_fps(),
    }
}

fn default_audio() -> AudioConfig {
    AudioConfig {
        samples_per_sec: default_sample_rate(),
        speakers: default_speakers(),
        buffer_ms: default_audio_buffer_ms(),
    }
}

fn default_log() -> LogConfig {
    LogConfig {
        level_filter: default_log_level(),
        file_path: None,
    }
}

fn default_target_width() -> u32 {
    1280
}

fn default_target_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    30
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_speakers() -> u32 {
    2
}

fn default_audio_buffer_ms() -> u32 {
    1000
}

fn default_log_level() -> LevelFilter {
    LevelFilter::Info
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.video.target_width, 1280);
        assert_eq!(config.video.target_height, 720);
        assert_eq!(config.audio.samples_per_sec, 44100);
        assert_eq!(config.log.level_filter, LevelFilter::Info);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"video": {"target_width": 1920}}"#).unwrap();
        assert_eq!(config.video.target_width, 1920);
        assert_eq!(config.video.fps, 30);
    }
}
