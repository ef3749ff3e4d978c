//! Message delivery to the application layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use media_player_types::{ErrorCode, PlayerMessage};

/// Receiver of player notifications.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: PlayerMessage);
}

impl<F> MessageSink for F
where
    F: Fn(PlayerMessage) + Send + Sync,
{
    fn deliver(&self, message: PlayerMessage) {
        self(message)
    }
}

/// Outbound side of a session: forwards messages and gates errors so that at
/// most one reaches the application per session.
pub struct Outbox {
    sink: Arc<dyn MessageSink>,
    error_posted: AtomicBool,
}

impl Outbox {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            error_posted: AtomicBool::new(false),
        }
    }

    pub fn send(&self, message: PlayerMessage) {
        tracing::debug!(?message, "deliver");
        self.sink.deliver(message);
    }

    /// Deliver an error unless one was already delivered. Returns whether it was sent.
    pub fn post_error(&self, code: ErrorCode, detail: impl Into<String>) -> bool {
        if self.error_posted.swap(true, Ordering::SeqCst) {
            tracing::debug!(?code, "error suppressed; one already posted");
            return false;
        }
        let detail = detail.into();
        tracing::error!(?code, detail = %detail, "session error");
        self.sink.deliver(PlayerMessage::Error { code, detail });
        true
    }

    pub fn warn(&self, code: Option<ErrorCode>, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(?code, detail = %detail, "session warning");
        self.sink.deliver(PlayerMessage::Warning { code, detail });
    }

    pub fn error_posted(&self) -> bool {
        self.error_posted.load(Ordering::SeqCst)
    }

    /// Re-arm the error gate for a fresh realize.
    pub fn reset_error_gate(&self) {
        self.error_posted.store(false, Ordering::SeqCst);
    }
}

/// Sink that records every message, with blocking waits for tests and embedders.
#[derive(Default)]
pub struct MessageLog {
    messages: Mutex<Vec<PlayerMessage>>,
    cv: Condvar,
}

impl MessageLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<PlayerMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&PlayerMessage) -> bool) -> usize {
        self.messages.lock().unwrap().iter().filter(|m| pred(m)).count()
    }

    /// Wait until `pred` matches at least `n` recorded messages.
    pub fn wait_for(
        &self,
        n: usize,
        timeout: Duration,
        pred: impl Fn(&PlayerMessage) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.messages.lock().unwrap();
        loop {
            if g.iter().filter(|m| pred(m)).count() >= n {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (ng, _timeout) = self.cv.wait_timeout(g, deadline - now).unwrap();
            g = ng;
        }
    }
}

impl MessageSink for MessageLog {
    fn deliver(&self, message: PlayerMessage) {
        self.messages.lock().unwrap().push(message);
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_error_is_delivered() {
        let log = MessageLog::new();
        let outbox = Outbox::new(log.clone());

        assert!(outbox.post_error(ErrorCode::Internal, "first"));
        assert!(!outbox.post_error(ErrorCode::SeekFailed, "second"));
        assert_eq!(
            log.count(|m| matches!(m, PlayerMessage::Error { .. })),
            1
        );

        outbox.reset_error_gate();
        assert!(outbox.post_error(ErrorCode::Internal, "after reset"));
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        let outbox = Outbox::new(Arc::new(move |m: PlayerMessage| {
            seen_in.lock().unwrap().push(m);
        }));
        outbox.send(PlayerMessage::EndOfStream);
        assert_eq!(seen.lock().unwrap().as_slice(), &[PlayerMessage::EndOfStream]);
    }

    #[test]
    fn wait_for_times_out_without_match() {
        let log = MessageLog::new();
        assert!(!log.wait_for(1, Duration::from_millis(10), |m| {
            matches!(m, PlayerMessage::EndOfStream)
        }));
    }
}
