//! Streaming buffering coordinator.
//!
//! Turns raw buffer-level reports from the pre-demux and post-demux stages into
//! one percentage and decides when playback has to be held or released. It
//! never requests phases on its own; the dispatcher executes the returned
//! [`BufferingAction`].

use media_player_types::Phase;

use crate::config::{BufferingConfig, BufferingMode};
use crate::engine::{BufferStage, BufferingReport, NodeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferingAction {
    None,
    /// Hold playback at the current position.
    Pause,
    /// Release playback; `reposition` asks for a flushing seek to the current position.
    Resume { reposition: bool },
    /// Episode finished while the caller wants to stay paused.
    NotifyOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferingUpdate {
    pub percent: u8,
    pub action: BufferingAction,
    /// Deliver a buffering notification for this report.
    pub notify: bool,
}

/// Running content bitrate: per-stream bitrates summed in arrival order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamBitrates {
    streams: Vec<(Option<NodeId>, u64)>,
}

impl StreamBitrates {
    /// Record a stream's bitrate, replacing an earlier value from the same origin.
    pub fn record(&mut self, origin: Option<NodeId>, bps: u64) {
        match self.streams.iter_mut().find(|(o, _)| origin.is_some() && *o == origin) {
            Some(entry) => entry.1 = bps,
            None => self.streams.push((origin, bps)),
        }
    }

    pub fn total(&self) -> u64 {
        self.streams
            .iter()
            .fold(0u64, |acc, (_, bps)| acc.saturating_add(*bps))
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }
}

#[derive(Clone, Debug)]
pub struct BufferingContext {
    mode: BufferingMode,
    initial_seconds: f64,
    runtime_seconds: f64,
    max_seconds: f64,
    default_bitrate_bps: u64,
    /// Only streaming sources are buffered.
    enabled: bool,
    weak_link: bool,
    stage_percent: [Option<u8>; 2],
    percent: Option<u8>,
    is_buffering: bool,
    played_once: bool,
    episodes: u32,
    pub bitrates: StreamBitrates,
}

impl BufferingContext {
    pub fn new(cfg: &BufferingConfig) -> Self {
        Self {
            mode: cfg.mode,
            initial_seconds: cfg.initial_seconds,
            runtime_seconds: cfg.runtime_seconds,
            max_seconds: cfg.max_seconds.max(cfg.runtime_seconds),
            default_bitrate_bps: cfg.default_bitrate_bps,
            enabled: false,
            weak_link: false,
            stage_percent: [None; 2],
            percent: None,
            is_buffering: false,
            played_once: false,
            episodes: 0,
            bitrates: StreamBitrates::default(),
        }
    }

    /// Arm the coordinator for a new source.
    pub fn configure(&mut self, streaming: bool, weak_link: bool) {
        self.enabled = streaming;
        self.weak_link = weak_link;
        self.reset();
    }

    /// Per-session target overrides in seconds.
    pub fn override_targets(&mut self, initial: Option<f64>, runtime: Option<f64>) {
        if let Some(secs) = initial.filter(|s| s.is_finite() && *s > 0.0) {
            self.initial_seconds = secs;
        }
        if let Some(secs) = runtime.filter(|s| s.is_finite() && *s > 0.0) {
            self.runtime_seconds = secs;
            self.max_seconds = self.max_seconds.max(secs);
        }
    }

    pub fn reset(&mut self) {
        self.stage_percent = [None; 2];
        self.percent = None;
        self.is_buffering = false;
        self.played_once = false;
        self.episodes = 0;
        self.bitrates.clear();
    }

    pub fn is_buffering(&self) -> bool {
        self.is_buffering
    }

    pub fn percent(&self) -> Option<u8> {
        self.percent
    }

    pub fn episodes(&self) -> u32 {
        self.episodes
    }

    /// Buffer duration the current level is measured against.
    pub fn target_seconds(&self) -> f64 {
        if self.played_once {
            self.runtime_seconds
        } else {
            self.initial_seconds
        }
    }

    pub fn mark_playing(&mut self) {
        self.played_once = true;
    }

    /// Normalize a stage report to a percentage of the target duration.
    pub fn stage_level(&self, report: &BufferingReport) -> u8 {
        if report.finished {
            return 100;
        }
        match report.buffered_bytes {
            Some(bytes) => {
                let bitrate = match self.bitrates.total() {
                    0 => self.default_bitrate_bps,
                    bps => bps,
                };
                let needed = (bitrate as f64 / 8.0) * self.target_seconds();
                if needed <= 0.0 {
                    return 100;
                }
                ((bytes as f64 * 100.0 / needed).floor() as u64).min(100) as u8
            }
            None => report.percent.unwrap_or(0).min(100),
        }
    }

    /// Fold one report into the episode state.
    pub fn on_report(
        &mut self,
        report: &BufferingReport,
        current: Phase,
        target: Phase,
    ) -> BufferingUpdate {
        let level = self.stage_level(report);
        let slot = match report.stage {
            BufferStage::PreDemux => 0,
            BufferStage::PostDemux => 1,
        };
        self.stage_percent[slot] = Some(level);
        let percent = self.stage_percent.iter().flatten().copied().min().unwrap_or(level);
        self.percent = Some(percent);

        let idle = BufferingUpdate {
            percent,
            action: BufferingAction::None,
            notify: false,
        };
        if !self.enabled || matches!(target, Phase::None | Phase::Null | Phase::Ready) {
            return idle;
        }

        if percent < 100 {
            if self.is_buffering {
                return BufferingUpdate { notify: true, ..idle };
            }
            self.is_buffering = true;
            self.episodes += 1;
            if self.played_once {
                self.grow_runtime_target();
            }
            tracing::info!(percent, episode = self.episodes, "buffering started");
            let action = if current == Phase::Playing {
                BufferingAction::Pause
            } else {
                BufferingAction::None
            };
            return BufferingUpdate {
                percent,
                action,
                notify: true,
            };
        }

        if !self.is_buffering {
            return idle;
        }
        self.is_buffering = false;
        tracing::info!(?target, "buffering complete");
        let action = match target {
            Phase::Playing => BufferingAction::Resume {
                reposition: self.weak_link,
            },
            _ => BufferingAction::NotifyOnly,
        };
        BufferingUpdate {
            percent,
            action,
            notify: true,
        }
    }

    fn grow_runtime_target(&mut self) {
        if self.mode != BufferingMode::Adaptive {
            return;
        }
        let grown = (self.runtime_seconds * 1.5).min(self.max_seconds);
        if grown > self.runtime_seconds {
            tracing::debug!(from = self.runtime_seconds, to = grown, "rebuffer target grown");
            self.runtime_seconds = grown;
        }
    }
}
