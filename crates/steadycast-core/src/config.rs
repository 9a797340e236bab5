// crates/steadycast-core/src/config.rs
//
// Runtime configuration: a flat JSON object loaded once at startup and
// borrowed (by clone) by both threads. Unknown keys are ignored so a
// supervisor can carry extra fields in the same file.

use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

/// Output channel count. The AAC track is always stereo.
pub const OUT_CHANNELS: usize = 2;

/// Inbound liveness timeout: a session with no decoded video or audio for
/// this long is dropped and reconnected.
pub const SRT_TIMEOUT_US: i64 = 2_000_000;

/// Backoff between inbound connect attempts.
pub const SRT_RETRY_US: i64 = 500_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inbound URL. Required — an empty value is a startup error.
    pub srt_url: String,
    /// Local loop file played whenever the inbound feed is absent.
    pub bg_file: String,
    /// Opaque label echoed in every status event.
    pub stream_id: String,
    pub out_width: u32,
    pub out_height: u32,
    pub out_fps: u32,
    /// H.264 target bitrate, bits per second.
    pub video_bitrate: usize,
    /// AAC target bitrate, bits per second.
    pub audio_bitrate: usize,
    pub sample_rate: u32,
    /// Seconds of silence between inbound loss and background-audio unmute.
    pub bg_unmute_delay: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            srt_url: String::new(),
            bg_file: "background.mp4".into(),
            stream_id: String::new(),
            out_width: 1280,
            out_height: 720,
            out_fps: 30,
            video_bitrate: 4_000_000,
            audio_bitrate: 128_000,
            sample_rate: 48_000,
            bg_unmute_delay: 5.0,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("config is not a flat JSON object")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open config: {}", path.display()))?;
        Self::from_json(&text)
    }

    /// Grace period before background audio unmutes, in microseconds.
    pub fn grace_us(&self) -> i64 {
        (self.bg_unmute_delay * 1e6) as i64
    }

    /// Duration of one output video frame, in microseconds.
    pub fn frame_duration_us(&self) -> i64 {
        1_000_000 / self.out_fps.max(1) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.srt_url, "");
        assert_eq!(cfg.bg_file, "background.mp4");
        assert_eq!(cfg.out_width, 1280);
        assert_eq!(cfg.out_height, 720);
        assert_eq!(cfg.out_fps, 30);
        assert_eq!(cfg.video_bitrate, 4_000_000);
        assert_eq!(cfg.audio_bitrate, 128_000);
        assert_eq!(cfg.sample_rate, 48_000);
        assert_eq!(cfg.bg_unmute_delay, 5.0);
    }

    #[test]
    fn parses_full_object() {
        let cfg = Config::from_json(
            r#"{
                "srt_url": "srt://0.0.0.0:9000?mode=listener",
                "bg_file": "idle.mp4",
                "stream_id": "ch-7",
                "out_width": 1920,
                "out_height": 1080,
                "out_fps": 60,
                "video_bitrate": 6000000,
                "audio_bitrate": 160000,
                "sample_rate": 44100,
                "bg_unmute_delay": 2.5
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.srt_url, "srt://0.0.0.0:9000?mode=listener");
        assert_eq!(cfg.stream_id, "ch-7");
        assert_eq!(cfg.out_fps, 60);
        assert_eq!(cfg.grace_us(), 2_500_000);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = Config::from_json(r#"{"srt_url":"srt://x","uplink":"rtmp://y"}"#).unwrap();
        assert_eq!(cfg.srt_url, "srt://x");
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(Config::load(Path::new("/nonexistent/steadycast.json")).is_err());
    }

    #[test]
    fn frame_duration_at_30fps_is_one_thirtieth() {
        let cfg = Config::default();
        assert_eq!(cfg.frame_duration_us(), 33_333);
    }
}
