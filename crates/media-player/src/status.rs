//! Session status snapshots for the API layer.

use media_player_types::{MediaKind, SessionStatus};

use crate::session::Core;

impl Core {
    /// Point-in-time view of the session. Engine queries run after the locks are released.
    pub(crate) fn status(&self) -> SessionStatus {
        let (pipeline, tracks) = {
            let g = self.graph.lock().unwrap();
            match g.as_ref() {
                Some(graph) => (
                    Some(graph.pipeline),
                    MediaKind::ALL.map(|k| graph.track_count(k)),
                ),
                None => (None, [0; 3]),
            }
        };

        let mut status = {
            let s = self.lock_session();
            SessionStatus {
                locator: s.locator.as_ref().map(|l| l.as_str().to_string()),
                current: s.tracker.current,
                pending: s.tracker.pending,
                target: s.tracker.target,
                buffering: s.buffering.is_buffering(),
                buffering_percent: s.buffering.percent(),
                position_ms: None,
                duration_ms: None,
                audio_tracks: tracks[MediaKind::Audio.index()],
                video_tracks: tracks[MediaKind::Video.index()],
                text_tracks: tracks[MediaKind::Text.index()],
                gapless: s.gapless && self.gapless.is_running(),
                error_posted: self.outbox.error_posted(),
            }
        };

        if let Some(pipeline) = pipeline {
            if status.current.is_pausable() {
                status.position_ms = self.engine.position(pipeline).map(|d| d.as_millis() as u64);
            }
            status.duration_ms = self.engine.duration(pipeline).map(|d| d.as_millis() as u64);
        }
        if status.duration_ms.is_none() {
            status.duration_ms = self
                .attrs
                .get_int(crate::attrs::keys::DURATION_MS)
                .filter(|ms| *ms > 0)
                .map(|ms| ms as u64);
        }
        status
    }
}
