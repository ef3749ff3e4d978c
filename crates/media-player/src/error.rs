//! Error taxonomy returned by the public player API.

use media_player_types::{CodecMissingKind, ErrorCode, MediaKind, Phase, StreamingErrorKind};
use thiserror::Error;

/// Failure of a player command or of the session itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlayerError {
    #[error("command not allowed in phase {current:?}")]
    InvalidState { current: Phase },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("session not initialized")]
    NotInitialized,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("no usable {0:?} codec")]
    CodecMissing(CodecMissingKind),
    #[error("a seek is already in progress")]
    SeekBusy,
    #[error("decode path is being reconfigured")]
    Reconfiguring,
    #[error("seek failed: {0}")]
    SeekFailed(String),
    #[error("streaming error {0:?}")]
    Streaming(StreamingErrorKind),
    #[error("resource denied: {0}")]
    ResourceDenied(String),
    #[error("track index {index} out of range for {kind:?} ({total} tracks)")]
    InvalidIndex {
        kind: MediaKind,
        index: usize,
        total: usize,
    },
    #[error("no {0:?} tracks")]
    NoTracks(MediaKind),
    #[error("phase change to {target:?} timed out after {waited_ms} ms")]
    Timeout { target: Phase, waited_ms: u64 },
}

impl PlayerError {
    /// Wire code reported to the application layer.
    pub fn code(&self) -> ErrorCode {
        match self {
            PlayerError::InvalidState { .. } => ErrorCode::InvalidState,
            PlayerError::InvalidArgument(_)
            | PlayerError::InvalidIndex { .. }
            | PlayerError::NoTracks(_) => ErrorCode::InvalidArgument,
            PlayerError::NotInitialized => ErrorCode::NotInitialized,
            PlayerError::Internal(_) | PlayerError::Timeout { .. } => ErrorCode::Internal,
            PlayerError::CodecMissing(kind) => ErrorCode::CodecMissing(*kind),
            PlayerError::SeekBusy | PlayerError::Reconfiguring => ErrorCode::SeekBusy,
            PlayerError::SeekFailed(_) => ErrorCode::SeekFailed,
            PlayerError::Streaming(kind) => ErrorCode::Streaming(*kind),
            PlayerError::ResourceDenied(_) => ErrorCode::ResourceDenied,
        }
    }

    /// Rebuild an error from a code surfaced on the bus.
    pub fn from_code(code: ErrorCode, detail: &str) -> Self {
        match code {
            ErrorCode::InvalidState => PlayerError::InvalidState {
                current: Phase::None,
            },
            ErrorCode::InvalidArgument => PlayerError::InvalidArgument(detail.to_string()),
            ErrorCode::NotInitialized => PlayerError::NotInitialized,
            ErrorCode::Internal => PlayerError::Internal(detail.to_string()),
            ErrorCode::CodecMissing(kind) => PlayerError::CodecMissing(kind),
            ErrorCode::SeekBusy => PlayerError::SeekBusy,
            ErrorCode::SeekFailed => PlayerError::SeekFailed(detail.to_string()),
            ErrorCode::Streaming(kind) => PlayerError::Streaming(kind),
            ErrorCode::ResourceDenied => PlayerError::ResourceDenied(detail.to_string()),
        }
    }
}

impl From<anyhow::Error> for PlayerError {
    fn from(err: anyhow::Error) -> Self {
        PlayerError::Internal(format!("{err:#}"))
    }
}

pub type Result<T, E = PlayerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn track_errors_map_to_invalid_argument() {
        let err = PlayerError::InvalidIndex {
            kind: MediaKind::Audio,
            index: 4,
            total: 2,
        };
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(
            PlayerError::NoTracks(MediaKind::Text).code(),
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn engine_failures_keep_their_context() {
        let failed: anyhow::Result<()> = Err(anyhow::anyhow!("pad mismatch"));
        let err: PlayerError = failed.context("link decoder").unwrap_err().into();
        assert_eq!(err, PlayerError::Internal("link decoder: pad mismatch".into()));
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn codes_round_trip_through_bus_representation() {
        let err = PlayerError::CodecMissing(CodecMissingKind::Video);
        assert_eq!(PlayerError::from_code(err.code(), ""), err);
        let err = PlayerError::Streaming(StreamingErrorKind::Forbidden);
        assert_eq!(PlayerError::from_code(err.code(), ""), err);
    }
}
