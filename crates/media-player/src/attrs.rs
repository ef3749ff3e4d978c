//! Attribute/content store shared with the API layer.
//!
//! Per-session inputs (locators, play count, gapless flag, buffering overrides)
//! are read from here, and content metadata discovered during playback is
//! written back.

use std::collections::HashMap;
use std::sync::Mutex;

/// Well-known attribute keys.
pub mod keys {
    pub const PROFILE_URI: &str = "profile_uri";
    pub const SUBTITLE_URI: &str = "subtitle_uri";
    /// Remaining plays; `-1` repeats forever.
    pub const PLAY_COUNT: &str = "profile_play_count";
    pub const GAPLESS: &str = "gapless";
    pub const BUFFER_INITIAL_MS: &str = "streaming_buffering_ms";
    pub const BUFFER_RUNTIME_MS: &str = "streaming_rebuffering_ms";

    pub const DURATION_MS: &str = "content_duration_ms";
    pub const BITRATE: &str = "content_bitrate";
    pub const AUDIO_TRACKS: &str = "content_audio_track_num";
    pub const VIDEO_TRACKS: &str = "content_video_track_num";
    pub const TEXT_TRACKS: &str = "content_text_track_num";
    pub const AUDIO_CODEC: &str = "content_audio_codec";
    pub const VIDEO_CODEC: &str = "content_video_codec";
    pub const TITLE: &str = "tag_title";
    pub const ARTIST: &str = "tag_artist";
    pub const ALBUM: &str = "tag_album";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue {
    Int(i64),
    Str(String),
    Bool(bool),
}

/// Key/value store owned by the API layer.
pub trait AttributeStore: Send + Sync {
    fn get(&self, key: &str) -> Option<AttrValue>;
    fn set(&self, key: &str, value: AttrValue);

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            AttrValue::Int(v) => Some(v),
            AttrValue::Str(s) => s.trim().parse().ok(),
            AttrValue::Bool(b) => Some(b as i64),
        }
    }

    fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            AttrValue::Str(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            AttrValue::Bool(b) => Some(b),
            AttrValue::Int(v) => Some(v != 0),
            AttrValue::Str(s) => match s.trim() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" => Some(false),
                _ => None,
            },
        }
    }
}

/// In-process attribute store.
#[derive(Debug, Default)]
pub struct MemoryAttributes {
    values: Mutex<HashMap<String, AttrValue>>,
}

impl MemoryAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: AttrValue) -> Self {
        self.set(key, value);
        self
    }
}

impl AttributeStore for MemoryAttributes {
    fn get(&self, key: &str) -> Option<AttrValue> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: AttrValue) {
        self.values.lock().unwrap().insert(key.to_string(), value);
    }
}
