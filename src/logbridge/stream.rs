use std::convert::Infallible;

use futures::stream::{self, Stream};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};

use super::entry::{LogEntry, LogLevel};
use super::pool::LoggerLease;

/// Last line a client sees before the stream closes
pub const DISCONNECT_MESSAGE: &str = "Client disconnected, stopping log stream";

struct Bridge {
    lease: LoggerLease,
    cancel: CancellationToken,
    // Cancel seen; flushing what was queued before it
    draining: bool,
    finished: bool,
    // Cancels the session if the response body is dropped mid-stream
    _guard: DropGuard,
}

/// Drain a session's log channel as `data: <JSON>\n\n` frames.
///
/// Frames come out in production order until `cancel` fires; then the
/// entries already queued are flushed, one final info frame is emitted and
/// the stream ends. Dropping the stream cancels `cancel`, so a client that
/// goes away stops the session too.
pub fn event_stream(
    lease: LoggerLease,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
    let bridge = Bridge {
        _guard: cancel.clone().drop_guard(),
        lease,
        cancel,
        draining: false,
        finished: false,
    };

    stream::unfold(bridge, |mut bridge| async move {
        loop {
            if bridge.finished {
                return None;
            }

            let entry = if bridge.draining {
                match bridge.lease.try_recv() {
                    Some(entry) => entry,
                    None => {
                        bridge.finished = true;
                        info!(session = %bridge.lease.session(), "{}", DISCONNECT_MESSAGE);
                        LogEntry::now(LogLevel::Info, DISCONNECT_MESSAGE)
                    }
                }
            } else {
                tokio::select! {
                    biased;
                    _ = bridge.cancel.cancelled() => {
                        bridge.draining = true;
                        continue;
                    }
                    entry = bridge.lease.recv() => match entry {
                        Some(entry) => entry,
                        None => return None,
                    },
                }
            };

            match entry.to_frame() {
                Ok(frame) => return Some((Ok::<_, Infallible>(frame), bridge)),
                Err(e) => warn!("Dropping log entry that failed to serialize: {}", e),
            }
        }
    })
}

/// A stream carrying exactly one frame, for requests rejected before a
/// session starts
pub fn single_frame(
    entry: LogEntry,
) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
    let frame: Option<Result<String, Infallible>> = match entry.to_frame() {
        Ok(frame) => Some(Ok(frame)),
        Err(e) => {
            warn!("Dropping log entry that failed to serialize: {}", e);
            None
        }
    };
    stream::iter(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbridge::LoggerPool;
    use futures::StreamExt;
    use std::time::Duration;

    fn parse(frame: &str) -> LogEntry {
        let json = frame
            .strip_prefix("data: ")
            .and_then(|f| f.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_frames_in_order_then_final_entry() {
        let pool = LoggerPool::new(16);
        let lease = pool.acquire("s1");
        let sink = lease.sink();
        let cancel = CancellationToken::new();

        sink.info("one");
        sink.warn("two");
        sink.error("three");

        let mut stream = Box::pin(event_stream(lease, cancel.clone()));
        let mut messages = Vec::new();
        for _ in 0..3 {
            let frame = stream.next().await.unwrap().unwrap();
            messages.push(parse(&frame).message);
        }
        assert_eq!(messages, vec!["one", "two", "three"]);

        cancel.cancel();
        let last = parse(&stream.next().await.unwrap().unwrap());
        assert_eq!(last.message, DISCONNECT_MESSAGE);
        assert_eq!(last.level, LogLevel::Info);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_queued_entries_flushed_after_cancel() {
        let pool = LoggerPool::new(16);
        let lease = pool.acquire("s1");
        lease.sink().info("queued");
        lease.sink().error("last words");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let messages: Vec<String> = event_stream(lease, cancel)
            .map(|f| parse(&f.unwrap()).message)
            .collect()
            .await;
        assert_eq!(messages, vec!["queued", "last words", DISCONNECT_MESSAGE]);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_session_and_returns_channel() {
        let pool = LoggerPool::new(16);
        let lease = pool.acquire("s1");
        let sink = lease.sink();
        let cancel = CancellationToken::new();

        let stream = event_stream(lease, cancel.clone());
        drop(stream);

        assert!(cancel.is_cancelled());
        assert_eq!(pool.idle_count(), 1);
        assert!(!sink.push(LogEntry::now(LogLevel::Info, "after close")));
    }

    #[tokio::test]
    async fn test_stream_waits_for_late_entries() {
        let pool = LoggerPool::new(16);
        let lease = pool.acquire("s1");
        let sink = lease.sink();
        let cancel = CancellationToken::new();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sink.info("late");
        });

        let mut stream = Box::pin(event_stream(lease, cancel));
        let frame = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(parse(&frame).message, "late");
    }

    #[tokio::test]
    async fn test_single_frame() {
        let frames: Vec<String> = single_frame(LogEntry::error("invalid ratio"))
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        let entry = parse(&frames[0]);
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.message, "invalid ratio");
    }
}
