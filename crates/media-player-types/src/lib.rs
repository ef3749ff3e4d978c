use serde::{Deserialize, Serialize};

/// Playback phase of a session and of its processing graph.
///
/// `None` is the sentinel a session sits in before `create` and after `destroy`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    None,
    Null,
    Ready,
    Paused,
    Playing,
}

impl Phase {
    /// All phases in transition order.
    pub const ALL: [Phase; 5] = [
        Phase::None,
        Phase::Null,
        Phase::Ready,
        Phase::Paused,
        Phase::Playing,
    ];

    /// Column index used by transition tables.
    pub fn index(self) -> usize {
        match self {
            Phase::None => 0,
            Phase::Null => 1,
            Phase::Ready => 2,
            Phase::Paused => 3,
            Phase::Playing => 4,
        }
    }

    /// Whether a graph in this phase can service seeks and position queries.
    pub fn is_pausable(self) -> bool {
        matches!(self, Phase::Paused | Phase::Playing)
    }
}

/// Leaf media type at which a selector and an output sub-graph attach.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Text,
}

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Audio, MediaKind::Video, MediaKind::Text];

    pub fn index(self) -> usize {
        match self {
            MediaKind::Audio => 0,
            MediaKind::Video => 1,
            MediaKind::Text => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Text => "text",
        }
    }
}

/// Unit of a seek position.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeekFormat {
    /// Position in milliseconds.
    Time,
    /// Position in percent of the content duration (0..=100).
    Percent,
}

/// Sub-kind of a missing-codec failure.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CodecMissingKind {
    Audio,
    Video,
    Demuxer,
    UnsupportedFormat,
}

/// Transport, authentication and format failures reported by streaming sources.
///
/// Discriminants are the wire codes carried by streaming error notifications;
/// status-derived kinds reuse the HTTP/RTSP status number.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum StreamingErrorKind {
    ConnectionFailed = 1,
    DnsFailed = 2,
    ServerDisconnected = 3,
    BadServer = 4,
    InvalidProtocol = 5,
    InvalidUrl = 6,
    UnexpectedMessage = 7,
    OutOfMemory = 8,
    Timeout = 9,
    UnsupportedAudio = 10,
    UnsupportedVideo = 11,
    TlsHandshake = 12,
    BadRequest = 400,
    Unauthorized = 401,
    PaymentRequired = 402,
    Forbidden = 403,
    ContentNotFound = 404,
    MethodNotAllowed = 405,
    NotAcceptable = 406,
    ProxyAuthenticationRequired = 407,
    ServerTimeout = 408,
    Gone = 410,
    LengthRequired = 411,
    PreconditionFailed = 412,
    RequestEntityTooLarge = 413,
    RequestUriTooLarge = 414,
    UnsupportedMediaType = 415,
    ParameterNotUnderstood = 451,
    ConferenceNotFound = 452,
    NotEnoughBandwidth = 453,
    NoSessionId = 454,
    MethodNotValidInThisState = 455,
    HeaderFieldNotValid = 456,
    InvalidRange = 457,
    ParameterIsReadOnly = 458,
    AggregateOpNotAllowed = 459,
    OnlyAggregateOpAllowed = 460,
    UnsupportedTransport = 461,
    DestinationUnreachable = 462,
    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
    VersionNotSupported = 505,
    OptionNotSupported = 551,
}

impl StreamingErrorKind {
    pub const ALL: [StreamingErrorKind; 46] = [
        StreamingErrorKind::ConnectionFailed,
        StreamingErrorKind::DnsFailed,
        StreamingErrorKind::ServerDisconnected,
        StreamingErrorKind::BadServer,
        StreamingErrorKind::InvalidProtocol,
        StreamingErrorKind::InvalidUrl,
        StreamingErrorKind::UnexpectedMessage,
        StreamingErrorKind::OutOfMemory,
        StreamingErrorKind::Timeout,
        StreamingErrorKind::UnsupportedAudio,
        StreamingErrorKind::UnsupportedVideo,
        StreamingErrorKind::TlsHandshake,
        StreamingErrorKind::BadRequest,
        StreamingErrorKind::Unauthorized,
        StreamingErrorKind::PaymentRequired,
        StreamingErrorKind::Forbidden,
        StreamingErrorKind::ContentNotFound,
        StreamingErrorKind::MethodNotAllowed,
        StreamingErrorKind::NotAcceptable,
        StreamingErrorKind::ProxyAuthenticationRequired,
        StreamingErrorKind::ServerTimeout,
        StreamingErrorKind::Gone,
        StreamingErrorKind::LengthRequired,
        StreamingErrorKind::PreconditionFailed,
        StreamingErrorKind::RequestEntityTooLarge,
        StreamingErrorKind::RequestUriTooLarge,
        StreamingErrorKind::UnsupportedMediaType,
        StreamingErrorKind::ParameterNotUnderstood,
        StreamingErrorKind::ConferenceNotFound,
        StreamingErrorKind::NotEnoughBandwidth,
        StreamingErrorKind::NoSessionId,
        StreamingErrorKind::MethodNotValidInThisState,
        StreamingErrorKind::HeaderFieldNotValid,
        StreamingErrorKind::InvalidRange,
        StreamingErrorKind::ParameterIsReadOnly,
        StreamingErrorKind::AggregateOpNotAllowed,
        StreamingErrorKind::OnlyAggregateOpAllowed,
        StreamingErrorKind::UnsupportedTransport,
        StreamingErrorKind::DestinationUnreachable,
        StreamingErrorKind::InternalServerError,
        StreamingErrorKind::NotImplemented,
        StreamingErrorKind::BadGateway,
        StreamingErrorKind::ServiceUnavailable,
        StreamingErrorKind::GatewayTimeout,
        StreamingErrorKind::VersionNotSupported,
        StreamingErrorKind::OptionNotSupported,
    ];

    /// Wire code carried by streaming error notifications.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Map a wire code back to its kind. Unknown codes yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.code() == code)
    }
}

/// Error taxonomy surfaced to the application layer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "code", content = "kind", rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidState,
    InvalidArgument,
    NotInitialized,
    Internal,
    CodecMissing(CodecMissingKind),
    SeekBusy,
    SeekFailed,
    Streaming(StreamingErrorKind),
    ResourceDenied,
}

impl ErrorCode {
    /// Busy and invalid-state verdicts do not need application intervention.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorCode::SeekBusy | ErrorCode::InvalidState)
    }
}

/// Closed set of notifications delivered to the registered message sink.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerMessage {
    /// Externally visible phase change (only fired once the target phase is reached).
    PhaseChanged { previous: Phase, current: Phase },
    /// Buffering progress; `percent == 100` completes a buffering episode.
    Buffering { percent: u8 },
    /// Fatal error; at most one per session.
    Error { code: ErrorCode, detail: String },
    /// Non-fatal diagnostic.
    Warning { code: Option<ErrorCode>, detail: String },
    EndOfStream,
    /// Content metadata was merged into the attribute store.
    TagUpdated,
    SeekCompleted,
    /// First entry into playing for this session.
    BeginOfStream,
}

/// Point-in-time view of a session for API layers.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    /// Locator of the item currently loaded.
    pub locator: Option<String>,
    /// Phase the graph is in.
    pub current: Phase,
    /// Phase the graph is transitioning toward, if any.
    pub pending: Option<Phase>,
    /// Phase the caller last requested.
    pub target: Phase,
    /// `true` while a buffering episode holds playback.
    pub buffering: bool,
    /// Last computed buffering level (streaming sources only).
    pub buffering_percent: Option<u8>,
    /// Presentation position in milliseconds.
    pub position_ms: Option<u64>,
    /// Content duration in milliseconds when known.
    pub duration_ms: Option<u64>,
    /// Track counts per media kind (audio, video, text).
    pub audio_tracks: usize,
    pub video_tracks: usize,
    pub text_tracks: usize,
    /// `true` while a gapless session is active.
    pub gapless: bool,
    /// `true` once an error has been delivered for this session.
    pub error_posted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_codes_round_trip_one_to_one() {
        let mut seen = std::collections::HashSet::new();
        for kind in StreamingErrorKind::ALL {
            assert!(seen.insert(kind.code()), "duplicate code {}", kind.code());
            assert_eq!(StreamingErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(StreamingErrorKind::from_code(999), None);
    }

    #[test]
    fn phase_order_follows_transition_order() {
        assert!(Phase::Null < Phase::Ready);
        assert!(Phase::Ready < Phase::Paused);
        assert!(Phase::Paused < Phase::Playing);
        assert!(Phase::Paused.is_pausable());
        assert!(!Phase::Ready.is_pausable());
    }

    #[test]
    fn error_code_serializes_with_kind() {
        let code = ErrorCode::CodecMissing(CodecMissingKind::Audio);
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#"{"code":"codec_missing","kind":"audio"}"#);
    }

    #[test]
    fn busy_and_invalid_state_are_not_fatal() {
        assert!(!ErrorCode::SeekBusy.is_fatal());
        assert!(!ErrorCode::InvalidState.is_fatal());
        assert!(ErrorCode::Internal.is_fatal());
    }
}
