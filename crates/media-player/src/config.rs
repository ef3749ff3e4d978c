//! Engine configuration loading and parsing.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! usable configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable forcing hardware decoders out of autoplugging.
pub const DISABLE_HW_DECODERS_ENV: &str = "MEDIA_PLAYER_DISABLE_HW_DECODERS";

/// Top-level engine configuration loaded from TOML.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on a phase change for local, in-memory and push-buffer sources.
    pub phase_timeout_local_ms: u64,
    /// Bound on a phase change for network sources.
    pub phase_timeout_live_ms: u64,
    /// Delay applied before end-of-stream is surfaced.
    pub eos_delay_ms: u64,
    /// Sink factory for the audio output sub-graph.
    pub audio_sink: String,
    /// Sink factory for the video output sub-graph.
    pub video_sink: String,
    /// Sink factory for the text output sub-graph.
    pub text_sink: String,
    /// Gapless transitions for sessions that do not say otherwise.
    pub gapless: bool,
    pub buffering: BufferingConfig,
    pub autoplug: AutoplugConfig,
}

/// How the runtime buffering target evolves.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BufferingMode {
    Fixed,
    Adaptive,
}

/// Streaming buffering targets.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BufferingConfig {
    pub mode: BufferingMode,
    /// Target before the first entry into playing.
    pub initial_seconds: f64,
    /// Target for rebuffering once playback has started.
    pub runtime_seconds: f64,
    /// Ceiling for the adaptive runtime target.
    pub max_seconds: f64,
    /// Bitrate assumed until the content reports one.
    pub default_bitrate_bps: u64,
    /// Byte capacity of the pre-demux ring buffer.
    pub ring_buffer_bytes: u64,
}

/// Autoplug filtering and ranking knobs.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AutoplugConfig {
    /// Factories whose name contains any of these are never plugged.
    pub excluded_keywords: Vec<String>,
    pub disable_hw_decoders: bool,
    /// Rank bonus for DSP/hardware factories.
    pub hw_rank_boost: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phase_timeout_local_ms: 10_000,
            phase_timeout_live_ms: 30_000,
            eos_delay_ms: 0,
            audio_sink: "autoaudiosink".to_string(),
            video_sink: "autovideosink".to_string(),
            text_sink: "appsink".to_string(),
            gapless: false,
            buffering: BufferingConfig::default(),
            autoplug: AutoplugConfig {
                excluded_keywords: Vec::new(),
                disable_hw_decoders: false,
                hw_rank_boost: 10,
            },
        }
    }
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            mode: BufferingMode::Adaptive,
            initial_seconds: 3.0,
            runtime_seconds: 5.0,
            max_seconds: 15.0,
            default_bitrate_bps: 1_000_000,
            ring_buffer_bytes: 20 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = Self::from_toml_str(&raw).with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<EngineConfig>(raw)?;
        Ok(cfg)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(DISABLE_HW_DECODERS_ENV) {
            let disabled = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
            if disabled {
                tracing::info!(env = DISABLE_HW_DECODERS_ENV, "hardware decoders disabled");
            }
            self.autoplug.disable_hw_decoders = disabled;
        }
        self
    }

    /// Phase-change bound for a source.
    pub fn phase_timeout(&self, network: bool) -> Duration {
        if network {
            Duration::from_millis(self.phase_timeout_live_ms)
        } else {
            Duration::from_millis(self.phase_timeout_local_ms)
        }
    }

    pub fn eos_delay(&self) -> Duration {
        Duration::from_millis(self.eos_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn load_reads_sections_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
phase_timeout_live_ms = 45000
video_sink = "glimagesink"

[buffering]
mode = "fixed"
initial_seconds = 2.5

[autoplug]
excluded_keywords = ["omx"]
"#
        )
        .unwrap();

        let cfg = EngineConfig::load(file.path()).unwrap();
        assert_eq!(cfg.phase_timeout_live_ms, 45_000);
        assert_eq!(cfg.phase_timeout_local_ms, 10_000);
        assert_eq!(cfg.video_sink, "glimagesink");
        assert_eq!(cfg.buffering.mode, BufferingMode::Fixed);
        assert_eq!(cfg.buffering.initial_seconds, 2.5);
        assert_eq!(cfg.buffering.runtime_seconds, 5.0);
        assert_eq!(cfg.autoplug.excluded_keywords, vec!["omx".to_string()]);
    }

    #[test]
    fn load_reports_path_on_parse_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "phase_timeout_local_ms = \"soon\"").unwrap();
        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parse config"));
    }

    #[test]
    fn env_override_disables_hw_decoders() {
        let cfg = EngineConfig::default().with_overrides_from(|key| {
            (key == DISABLE_HW_DECODERS_ENV).then(|| "yes".to_string())
        });
        assert!(cfg.autoplug.disable_hw_decoders);

        let cfg = EngineConfig::default().with_overrides_from(|_| Some("0".to_string()));
        assert!(!cfg.autoplug.disable_hw_decoders);
    }

    #[test]
    fn network_sources_get_the_longer_timeout() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.phase_timeout(true), Duration::from_secs(30));
        assert_eq!(cfg.phase_timeout(false), Duration::from_secs(10));
    }
}
