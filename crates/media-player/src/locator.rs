//! Content locator classification.

use std::path::PathBuf;

use crate::error::{PlayerError, Result};

/// Source category a locator resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LocatorKind {
    LocalFile,
    Http,
    Hls,
    Dash,
    Rtsp,
    /// Elementary stream pushed by the application.
    PushBuffer,
    /// Whole content held in memory by the application.
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    kind: LocatorKind,
}

impl Locator {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PlayerError::InvalidArgument("empty locator".into()));
        }

        let kind = match trimmed.split_once("://") {
            None => LocatorKind::LocalFile,
            Some((scheme, rest)) => {
                if rest.is_empty() {
                    return Err(PlayerError::InvalidArgument(format!(
                        "locator without target: {trimmed}"
                    )));
                }
                match scheme.to_ascii_lowercase().as_str() {
                    "file" => LocatorKind::LocalFile,
                    "http" | "https" => classify_http(rest),
                    "rtsp" | "rtsps" => LocatorKind::Rtsp,
                    "es_buff" => LocatorKind::PushBuffer,
                    "mem" => LocatorKind::Memory,
                    other => {
                        return Err(PlayerError::InvalidArgument(format!(
                            "unsupported locator scheme {other:?}"
                        )));
                    }
                }
            }
        };

        Ok(Self {
            raw: trimmed.to_string(),
            kind,
        })
    }

    pub fn kind(&self) -> LocatorKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Filesystem path for local files.
    pub fn local_path(&self) -> Option<PathBuf> {
        if self.kind != LocatorKind::LocalFile {
            return None;
        }
        let path = self.raw.strip_prefix("file://").unwrap_or(&self.raw);
        Some(PathBuf::from(path))
    }

    /// Value handed to the source node's `location` property.
    pub fn location(&self) -> String {
        match self.local_path() {
            Some(path) => path.to_string_lossy().into_owned(),
            None => self.raw.clone(),
        }
    }

    /// Network sources that are buffered and use the live timeout.
    pub fn is_streaming(&self) -> bool {
        matches!(
            self.kind,
            LocatorKind::Http | LocatorKind::Hls | LocatorKind::Dash | LocatorKind::Rtsp
        )
    }

    pub fn is_live(&self) -> bool {
        self.kind == LocatorKind::Rtsp
    }

    /// Sources that need a flushing reposition when resuming after buffering.
    pub fn is_weak_link(&self) -> bool {
        matches!(self.kind, LocatorKind::Rtsp | LocatorKind::Hls)
    }

    /// Sources a gapless splice may switch to.
    pub fn is_splice_eligible(&self) -> bool {
        matches!(self.kind, LocatorKind::LocalFile | LocatorKind::Http)
    }

    pub fn source_factory(&self) -> &'static str {
        match self.kind {
            LocatorKind::LocalFile => "filesrc",
            LocatorKind::Http | LocatorKind::Hls | LocatorKind::Dash => "souphttpsrc",
            LocatorKind::Rtsp => "rtspsrc",
            LocatorKind::PushBuffer | LocatorKind::Memory => "appsrc",
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn classify_http(rest: &str) -> LocatorKind {
    let path = rest.split(['?', '#']).next().unwrap_or(rest).to_ascii_lowercase();
    if path.ends_with(".m3u8") {
        LocatorKind::Hls
    } else if path.ends_with(".mpd") {
        LocatorKind::Dash
    } else {
        LocatorKind::Http
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_schemes() {
        let cases = [
            ("/media/a.mp4", LocatorKind::LocalFile),
            ("file:///media/a.mp4", LocatorKind::LocalFile),
            ("http://host/a.mp3", LocatorKind::Http),
            ("https://host/live/index.m3u8?token=1", LocatorKind::Hls),
            ("https://host/manifest.MPD", LocatorKind::Dash),
            ("rtsp://cam/stream", LocatorKind::Rtsp),
            ("es_buff://push", LocatorKind::PushBuffer),
            ("mem://0x1234", LocatorKind::Memory),
        ];
        for (raw, kind) in cases {
            assert_eq!(Locator::parse(raw).unwrap().kind(), kind, "{raw}");
        }
    }

    #[test]
    fn rejects_unusable_locators() {
        assert!(Locator::parse("").is_err());
        assert!(Locator::parse("ftp://host/a.mp3").is_err());
        assert!(Locator::parse("http://").is_err());
    }

    #[test]
    fn source_traits_follow_kind() {
        let file = Locator::parse("file:///media/a.flac").unwrap();
        assert_eq!(file.location(), "/media/a.flac");
        assert!(file.is_splice_eligible());
        assert!(!file.is_streaming());

        let hls = Locator::parse("http://host/index.m3u8").unwrap();
        assert!(hls.is_streaming());
        assert!(hls.is_weak_link());
        assert!(!hls.is_splice_eligible());
        assert_eq!(hls.source_factory(), "souphttpsrc");

        let rtsp = Locator::parse("rtsp://cam/stream").unwrap();
        assert!(rtsp.is_live());
        assert_eq!(rtsp.local_path(), None);
    }
}
