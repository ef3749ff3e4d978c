//! Declarative filter and ranking applied to the engine's factory table.

use media_player_types::MediaKind;

use crate::config::AutoplugConfig;
use crate::engine::{Caps, FactoryClass, FactoryInfo};

/// Which capability gap is being filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlugStage {
    /// Container bytes into elementary streams.
    Demux,
    /// Elementary stream into raw media; parsers allowed.
    Decode,
    /// Parsed elementary stream into raw media; decoders only.
    DecodeParsed,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AutoplugPolicy {
    pub excluded_keywords: Vec<String>,
    pub disable_hw_decoders: bool,
    pub hw_rank_boost: u32,
}

impl AutoplugPolicy {
    pub fn from_config(cfg: &AutoplugConfig) -> Self {
        Self {
            excluded_keywords: cfg
                .excluded_keywords
                .iter()
                .map(|k| k.to_ascii_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            disable_hw_decoders: cfg.disable_hw_decoders,
            hw_rank_boost: cfg.hw_rank_boost,
        }
    }

    pub fn effective_rank(&self, factory: &FactoryInfo) -> u32 {
        if factory.accelerated {
            factory.rank.saturating_add(self.hw_rank_boost)
        } else {
            factory.rank
        }
    }

    /// Factories able to fill the gap for `caps`, best first.
    pub fn candidates<'a>(
        &self,
        factories: &'a [FactoryInfo],
        caps: &Caps,
        stage: PlugStage,
    ) -> Vec<&'a FactoryInfo> {
        let mut out: Vec<&FactoryInfo> = factories
            .iter()
            .filter(|f| self.admits(f, caps, stage))
            .collect();
        out.sort_by(|a, b| {
            self.effective_rank(b)
                .cmp(&self.effective_rank(a))
                .then_with(|| a.name.cmp(&b.name))
        });
        out
    }

    fn admits(&self, factory: &FactoryInfo, caps: &Caps, stage: PlugStage) -> bool {
        if factory.rank == 0 || !factory.can_sink(caps) {
            return false;
        }
        let name = factory.name.to_ascii_lowercase();
        if self.excluded_keywords.iter().any(|k| name.contains(k.as_str())) {
            return false;
        }
        let class_ok = match stage {
            PlugStage::Demux => factory.class == FactoryClass::Demuxer,
            PlugStage::Decode => {
                matches!(factory.class, FactoryClass::Parser | FactoryClass::Decoder)
            }
            PlugStage::DecodeParsed => factory.class == FactoryClass::Decoder,
        };
        if !class_ok {
            return false;
        }
        if self.disable_hw_decoders && factory.accelerated && factory.class == FactoryClass::Decoder {
            return false;
        }
        if stage != PlugStage::Demux {
            return produces_only(factory, caps.kind());
        }
        true
    }
}

/// Media-type mutual exclusion: a decode-stage factory must stay within the
/// media kind of its input.
fn produces_only(factory: &FactoryInfo, kind: Option<MediaKind>) -> bool {
    let Some(kind) = kind else {
        return false;
    };
    factory
        .src_caps
        .iter()
        .all(|c| Caps::new(c.as_str()).kind() == Some(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<FactoryInfo> {
        vec![
            FactoryInfo::new("qtdemux", FactoryClass::Demuxer, 256).accepts("video/quicktime"),
            FactoryInfo::new("avdec_h264", FactoryClass::Decoder, 256)
                .accepts("video/x-h264")
                .produces("video/x-raw"),
            FactoryInfo::new("omxh264dec", FactoryClass::Decoder, 256)
                .accepts("video/x-h264")
                .produces("video/x-raw")
                .accelerated(),
            FactoryInfo::new("h264parse", FactoryClass::Parser, 128)
                .accepts("video/x-h264")
                .produces("video/x-h264"),
            FactoryInfo::new("bogus_thumbnailer", FactoryClass::Decoder, 512)
                .accepts("video/x-h264")
                .produces("audio/x-raw"),
            FactoryInfo::new("debugdec", FactoryClass::Decoder, 300)
                .accepts("video/x-h264")
                .produces("video/x-raw"),
        ]
    }

    fn names(found: Vec<&FactoryInfo>) -> Vec<&str> {
        found.into_iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn hardware_boost_breaks_ties_and_blacklist_applies() {
        let policy = AutoplugPolicy::from_config(&AutoplugConfig {
            excluded_keywords: vec!["Debug".into()],
            disable_hw_decoders: false,
            hw_rank_boost: 10,
        });
        let factories = table();
        let found = policy.candidates(&factories, &Caps::new("video/x-h264"), PlugStage::Decode);
        assert_eq!(names(found), vec!["omxh264dec", "avdec_h264", "h264parse"]);
    }

    #[test]
    fn disabled_hardware_and_parsed_stage_filter() {
        let policy = AutoplugPolicy {
            disable_hw_decoders: true,
            ..Default::default()
        };
        let factories = table();
        let found = policy.candidates(
            &factories,
            &Caps::new("video/x-h264"),
            PlugStage::DecodeParsed,
        );
        assert_eq!(names(found), vec!["debugdec", "avdec_h264"]);
    }

    #[test]
    fn demux_stage_only_offers_demuxers() {
        let policy = AutoplugPolicy::default();
        let factories = table();
        let found = policy.candidates(&factories, &Caps::new("video/quicktime"), PlugStage::Demux);
        assert_eq!(names(found), vec!["qtdemux"]);
        assert!(
            policy
                .candidates(&factories, &Caps::new("application/ogg"), PlugStage::Demux)
                .is_empty()
        );
    }
}
