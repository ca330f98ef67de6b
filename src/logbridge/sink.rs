use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::entry::{LogEntry, LogLevel};

/// Where a sink's entries go. Detaching empties the slot so that clones of a
/// sink held by a lingering task can no longer reach the channel.
pub(crate) struct SinkSlot {
    tx: RwLock<Option<mpsc::Sender<LogEntry>>>,
    dropped: AtomicU64,
}

impl SinkSlot {
    pub(crate) fn attached(tx: mpsc::Sender<LogEntry>) -> Self {
        Self {
            tx: RwLock::new(Some(tx)),
            dropped: AtomicU64::new(0),
        }
    }

    fn detached() -> Self {
        Self {
            tx: RwLock::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn detach(&self) {
        let mut tx = self.tx.write().unwrap_or_else(PoisonError::into_inner);
        *tx = None;
    }
}

/// Structured logger for one session
///
/// Every call is written to the process log through `tracing` and handed to
/// the session's bounded queue. A full queue drops the entry: the chaos path
/// never waits on the client.
#[derive(Clone)]
pub struct LogSink {
    slot: Arc<SinkSlot>,
    session: Arc<str>,
}

impl LogSink {
    pub(crate) fn from_slot(slot: Arc<SinkSlot>, session: Arc<str>) -> Self {
        Self { slot, session }
    }

    /// A sink with no consumer; entries only reach the process log.
    pub fn detached(session: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(SinkSlot::detached()),
            session: Arc::from(session.into()),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Hand an entry to the queue without blocking.
    ///
    /// Returns false when the entry was dropped (queue full or detached).
    pub fn push(&self, entry: LogEntry) -> bool {
        let guard = self.slot.tx.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        match tx.try_send(entry) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.slot.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Entries lost because the queue was full
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(session = %self.session, "{}", message),
            LogLevel::Info => tracing::info!(session = %self.session, "{}", message),
            LogLevel::Warn => tracing::warn!(session = %self.session, "{}", message),
            LogLevel::Error => tracing::error!(session = %self.session, "{}", message),
        }
        self.push(LogEntry::now(level, message));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached_sink(capacity: usize) -> (LogSink, mpsc::Receiver<LogEntry>) {
        let (tx, rx) = mpsc::channel(capacity);
        let slot = Arc::new(SinkSlot::attached(tx));
        (LogSink::from_slot(slot, Arc::from("test")), rx)
    }

    #[test]
    fn test_push_preserves_order() {
        let (sink, mut rx) = attached_sink(10);
        sink.info("first");
        sink.warn("second");
        sink.error("third");

        let messages: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_overflow_drops_without_blocking() {
        let (sink, mut rx) = attached_sink(100);
        for i in 0..150 {
            sink.info(format!("entry {}", i));
        }

        assert_eq!(sink.dropped(), 50);
        let delivered: Vec<LogEntry> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(delivered.len(), 100);
        assert_eq!(delivered[0].message, "entry 0");
        assert_eq!(delivered[99].message, "entry 99");
    }

    #[test]
    fn test_detached_sink_drops_everything() {
        let sink = LogSink::detached("nobody");
        assert!(!sink.push(LogEntry::now(LogLevel::Info, "lost")));
        sink.info("also lost");
        assert_eq!(sink.dropped(), 0);
        assert_eq!(sink.session(), "nobody");
    }

    #[test]
    fn test_detach_cuts_off_clones() {
        let (tx, mut rx) = mpsc::channel(10);
        let slot = Arc::new(SinkSlot::attached(tx));
        let sink = LogSink::from_slot(slot.clone(), Arc::from("s"));
        let clone = sink.clone();

        assert!(clone.push(LogEntry::now(LogLevel::Info, "before")));
        slot.detach();
        assert!(!clone.push(LogEntry::now(LogLevel::Info, "after")));

        assert_eq!(rx.try_recv().unwrap().message, "before");
        assert!(rx.try_recv().is_err());
    }
}
