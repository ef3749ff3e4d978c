//! Session-oriented playback control plane over a generic media engine.
//!
//! A [`Player`] owns one playback session: it builds a processing graph for a
//! content locator, drives it through the phase machine, routes engine
//! notifications to the application as [`PlayerMessage`]s and coordinates
//! track selection, buffering and gapless transitions.

pub mod attrs;
pub mod autoplug;
pub mod buffering;
pub mod builder;
mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod focus;
pub mod gapless;
pub mod graph;
pub mod locator;
pub mod message;
pub mod selector;
mod session;
pub mod signals;
pub mod sim;
pub mod state;
mod status;
pub mod typefind;
pub mod worker;

pub use attrs::{AttrValue, AttributeStore, MemoryAttributes};
pub use bus::{TagMerge, classify, merge_tags, streaming_code};
pub use config::EngineConfig;
pub use engine::MediaEngine;
pub use error::{PlayerError, Result};
pub use focus::{NoArbiter, ResourceArbiter};
pub use message::{MessageLog, MessageSink};
pub use session::{PendingSeek, Player};

pub use media_player_types::{
    CodecMissingKind, ErrorCode, MediaKind, Phase, PlayerMessage, SeekFormat, SessionStatus,
    StreamingErrorKind,
};
