use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use super::entry::LogEntry;
use super::sink::{LogSink, SinkSlot};

/// Default queue depth of a session's log channel
pub const DEFAULT_LOG_BUFFER: usize = 100;

struct LogChannel {
    tx: mpsc::Sender<LogEntry>,
    rx: mpsc::Receiver<LogEntry>,
}

impl LogChannel {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx }
    }

    /// Discard anything a previous session left behind
    fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

struct PoolInner {
    idle: Mutex<Vec<LogChannel>>,
    capacity: usize,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, Vec<LogChannel>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reusable session log channels, shared by the whole server
#[derive(Clone)]
pub struct LoggerPool {
    inner: Arc<PoolInner>,
}

impl LoggerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Channels waiting to be reused
    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Check out a channel for one session.
    ///
    /// The channel goes back to the pool, empty, when the lease is dropped.
    pub fn acquire(&self, session: impl Into<String>) -> LoggerLease {
        let channel = self
            .inner
            .idle()
            .pop()
            .unwrap_or_else(|| LogChannel::new(self.inner.capacity));

        let slot = Arc::new(SinkSlot::attached(channel.tx.clone()));
        LoggerLease {
            channel: Some(channel),
            slot,
            session: Arc::from(session.into()),
            pool: self.inner.clone(),
        }
    }
}

impl Default for LoggerPool {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_BUFFER)
    }
}

/// A session's hold on a pooled channel: the receiving end plus the sinks
/// that feed it
pub struct LoggerLease {
    channel: Option<LogChannel>,
    slot: Arc<SinkSlot>,
    session: Arc<str>,
    pool: Arc<PoolInner>,
}

impl LoggerLease {
    pub fn session(&self) -> &str {
        &self.session
    }

    /// A producer handle; valid until the lease is dropped
    pub fn sink(&self) -> LogSink {
        LogSink::from_slot(self.slot.clone(), self.session.clone())
    }

    /// Wait for the next entry
    pub async fn recv(&mut self) -> Option<LogEntry> {
        self.channel.as_mut()?.rx.recv().await
    }

    /// Take the next entry if one is queued
    pub fn try_recv(&mut self) -> Option<LogEntry> {
        self.channel.as_mut()?.rx.try_recv().ok()
    }
}

impl Drop for LoggerLease {
    fn drop(&mut self) {
        self.slot.detach();

        if let Some(mut channel) = self.channel.take() {
            let drained = channel.drain();
            if drained > 0 {
                debug!(session = %self.session, "Discarded {} undelivered log entries", drained);
            }
            self.pool.idle().push(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbridge::LogLevel;

    #[test]
    fn test_overflow_keeps_first_hundred() {
        let pool = LoggerPool::default();
        let mut lease = pool.acquire("s1");
        let sink = lease.sink();

        for i in 0..150 {
            sink.info(format!("line {}", i));
        }

        let mut delivered = Vec::new();
        while let Some(entry) = lease.try_recv() {
            delivered.push(entry.message);
        }
        assert_eq!(delivered.len(), 100);
        assert_eq!(delivered.first().map(String::as_str), Some("line 0"));
        assert_eq!(sink.dropped(), 50);
    }

    #[test]
    fn test_released_channel_is_reused_empty() {
        let pool = LoggerPool::new(8);

        let first = pool.acquire("first");
        let stale_sink = first.sink();
        stale_sink.info("from the first session");
        stale_sink.info("still the first session");
        drop(first);
        assert_eq!(pool.idle_count(), 1);

        let mut second = pool.acquire("second");
        assert_eq!(pool.idle_count(), 0);

        // A sink outliving its lease must not reach the next session
        stale_sink.info("late write");
        assert!(second.try_recv().is_none());

        second.sink().warn("fresh");
        let entry = second.try_recv().unwrap();
        assert_eq!(entry.message, "fresh");
        assert_eq!(entry.level, LogLevel::Warn);
    }

    #[test]
    fn test_concurrent_leases_are_isolated() {
        let pool = LoggerPool::new(8);
        let mut a = pool.acquire("a");
        let mut b = pool.acquire("b");

        a.sink().info("for a");
        b.sink().info("for b");

        assert_eq!(a.try_recv().unwrap().message, "for a");
        assert_eq!(b.try_recv().unwrap().message, "for b");
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_recv_waits_for_entry() {
        let pool = LoggerPool::new(4);
        let mut lease = pool.acquire("s");
        let sink = lease.sink();

        let producer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            sink.info("late");
        });

        let entry = lease.recv().await.unwrap();
        assert_eq!(entry.message, "late");
        producer.await.unwrap();
    }
}
