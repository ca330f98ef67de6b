use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::registry::SessionRegistry;
use super::store::{SessionStatus, SessionStore};
use crate::chaos::{ChaosError, CycleRunner};
use crate::logbridge::LogSink;

/// Lifecycle of a session's cycle loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    /// Torn down by its owner
    Stopped,
    /// Client went away or the server is shutting down
    Cancelled,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a cycle loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub cycles: u64,
}

/// Run cycles until `cancel` or `stop` fires.
///
/// The first cycle starts immediately, later ones on each interval tick.
/// Cycles never overlap: a slow cycle delays the next tick instead of
/// stacking up. A cycle already running is allowed to finish.
pub async fn run_session(
    runner: &dyn CycleRunner,
    interval: Duration,
    cancel: &CancellationToken,
    stop: &CancellationToken,
    sink: &LogSink,
) -> SessionOutcome {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    let mut state = SessionState::Idle;
    let mut cycles = 0u64;

    loop {
        if stop.is_cancelled() {
            return finish(SessionState::Stopped, cycles, sink);
        }
        if cancel.is_cancelled() {
            return finish(SessionState::Cancelled, cycles, sink);
        }

        if state == SessionState::Idle {
            state = SessionState::Running;
            debug!(session = %sink.session(), "Session running, interval {:?}", interval);
        }

        cycles += 1;
        match runner.run_cycle(cancel, sink).await {
            Ok(report) => debug!(
                session = %sink.session(),
                "Cycle {} finished: {} of {} candidates terminated",
                cycles,
                report.terminated,
                report.candidates
            ),
            Err(ChaosError::NoCandidates) => sink.warn(ChaosError::NoCandidates.to_string()),
            Err(e) => sink.error(e.to_string()),
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => return finish(SessionState::Stopped, cycles, sink),
            _ = cancel.cancelled() => return finish(SessionState::Cancelled, cycles, sink),
            _ = ticker.tick() => {}
        }
    }
}

fn finish(state: SessionState, cycles: u64, sink: &LogSink) -> SessionOutcome {
    info!(session = %sink.session(), "Session {} after {} cycles", state, cycles);
    SessionOutcome { state, cycles }
}

/// Control over a spawned session
pub struct SessionHandle {
    id: Uuid,
    stop: CancellationToken,
    supervisor: JoinHandle<Option<SessionOutcome>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop scheduling new cycles; the log stream closes afterwards.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait until the session has ended and its status was reported.
    ///
    /// `None` means the cycle loop panicked.
    pub async fn wait(self) -> Option<SessionOutcome> {
        match self.supervisor.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Session supervisor for {} failed: {}", self.id, e);
                None
            }
        }
    }
}

/// Spawns cycle loops and reports their end to the store
#[derive(Clone)]
pub struct SessionSupervisor {
    store: Arc<dyn SessionStore>,
    registry: Arc<SessionRegistry>,
}

impl SessionSupervisor {
    pub fn new(store: Arc<dyn SessionStore>, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Start a session whose record lives in the store.
    ///
    /// When the loop ends for any reason the session token is cancelled (so
    /// the log stream closes) and the store is told `completed`, or `failed`
    /// if the loop panicked. Store errors are logged and otherwise ignored.
    pub fn spawn(
        &self,
        id: Uuid,
        runner: Arc<dyn CycleRunner>,
        interval: Duration,
        cancel: CancellationToken,
        sink: LogSink,
    ) -> SessionHandle {
        self.launch(id, Some(self.store.clone()), runner, interval, cancel, sink)
    }

    /// Start an ad-hoc session that has no stored record.
    pub fn spawn_untracked(
        &self,
        id: Uuid,
        runner: Arc<dyn CycleRunner>,
        interval: Duration,
        cancel: CancellationToken,
        sink: LogSink,
    ) -> SessionHandle {
        self.launch(id, None, runner, interval, cancel, sink)
    }

    fn launch(
        &self,
        id: Uuid,
        store: Option<Arc<dyn SessionStore>>,
        runner: Arc<dyn CycleRunner>,
        interval: Duration,
        cancel: CancellationToken,
        sink: LogSink,
    ) -> SessionHandle {
        let stop = CancellationToken::new();
        self.registry.register(id, stop.clone());

        let worker = {
            let cancel = cancel.clone();
            let stop = stop.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                run_session(runner.as_ref(), interval, &cancel, &stop, &sink).await
            })
        };

        let registry = self.registry.clone();
        let supervisor = tokio::spawn(async move {
            if let Some(store) = &store {
                if let Err(e) = store.mark_running(id).await {
                    warn!(session = %id, "Could not mark session running: {}", e);
                }
            }

            let (status, outcome) = match worker.await {
                Ok(outcome) => (SessionStatus::Completed, Some(outcome)),
                Err(e) => {
                    sink.error(format!("session aborted: {}", e));
                    (SessionStatus::Failed, None)
                }
            };

            registry.remove(&id);
            cancel.cancel();

            if let Some(store) = &store {
                if let Err(e) = store.end_session(id, status).await {
                    warn!(session = %id, "Could not record session end: {}", e);
                }
            }
            outcome
        });

        SessionHandle {
            id,
            stop,
            supervisor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::CycleReport;
    use crate::logbridge::{LogLevel, LoggerPool};
    use crate::session::store::{InMemorySessionStore, NewScenario};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic runner: counts cycles, optionally slow or failing
    #[derive(Default)]
    struct FakeRunner {
        started: AtomicUsize,
        finished: AtomicUsize,
        delay: Duration,
        no_candidates: bool,
        panic: bool,
    }

    #[async_trait]
    impl CycleRunner for FakeRunner {
        async fn run_cycle(
            &self,
            _cancel: &CancellationToken,
            sink: &LogSink,
        ) -> Result<CycleReport, ChaosError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("runner blew up");
            }
            sink.info("cycle");
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            if self.no_candidates {
                return Err(ChaosError::NoCandidates);
            }
            Ok(CycleReport::default())
        }
    }

    async fn store_with_session() -> (Arc<InMemorySessionStore>, Uuid) {
        let store = Arc::new(InMemorySessionStore::new());
        store
            .put_scenario(NewScenario {
                id: "web".to_string(),
                ..NewScenario::default()
            })
            .await
            .unwrap();
        let session = store.create_session("web", 0).await.unwrap();
        (store, session.id)
    }

    #[tokio::test]
    async fn test_first_cycle_is_immediate() {
        let runner = Arc::new(FakeRunner::default());
        let cancel = CancellationToken::new();
        let stop = CancellationToken::new();
        let sink = LogSink::detached("s");

        let task = {
            let runner = runner.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_session(runner.as_ref(), Duration::from_secs(3600), &cancel, &stop, &sink)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.started.load(Ordering::SeqCst), 1);

        cancel.cancel();
        let outcome = task.await.unwrap();
        assert_eq!(outcome.state, SessionState::Cancelled);
        assert_eq!(outcome.cycles, 1);
    }

    #[tokio::test]
    async fn test_cycles_repeat_on_interval() {
        let runner = Arc::new(FakeRunner::default());
        let cancel = CancellationToken::new();
        let stop = CancellationToken::new();
        let sink = LogSink::detached("s");

        let task = {
            let runner = runner.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_session(runner.as_ref(), Duration::from_millis(20), &cancel, &stop, &sink)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        let outcome = task.await.unwrap();
        assert!(outcome.cycles >= 3, "only {} cycles ran", outcome.cycles);
    }

    #[tokio::test]
    async fn test_in_flight_cycle_finishes_after_cancel() {
        let runner = Arc::new(FakeRunner {
            delay: Duration::from_millis(100),
            ..FakeRunner::default()
        });
        let cancel = CancellationToken::new();
        let stop = CancellationToken::new();
        let sink = LogSink::detached("s");

        let task = {
            let runner = runner.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_session(runner.as_ref(), Duration::from_millis(10), &cancel, &stop, &sink)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        let outcome = task.await.unwrap();

        assert_eq!(outcome.state, SessionState::Cancelled);
        assert_eq!(runner.started.load(Ordering::SeqCst), 1);
        assert_eq!(runner.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_cycle_after_cancel() {
        let runner = FakeRunner::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_session(
            &runner,
            Duration::from_millis(10),
            &cancel,
            &CancellationToken::new(),
            &LogSink::detached("s"),
        )
        .await;

        assert_eq!(outcome.cycles, 0);
        assert_eq!(runner.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_candidates_is_a_warning() {
        let runner = FakeRunner {
            no_candidates: true,
            ..FakeRunner::default()
        };
        let pool = LoggerPool::new(16);
        let mut lease = pool.acquire("s");
        let cancel = CancellationToken::new();
        let stop = CancellationToken::new();

        let sink = lease.sink();
        let session = run_session(&runner, Duration::from_millis(10), &cancel, &stop, &sink);
        let outcome = tokio::select! {
            outcome = session => outcome,
            _ = async {
                tokio::time::sleep(Duration::from_millis(45)).await;
                cancel.cancel();
                std::future::pending::<()>().await
            } => unreachable!(),
        };

        // The loop kept going past the empty cycles
        assert!(outcome.cycles >= 2);
        let mut levels = Vec::new();
        while let Some(entry) = lease.try_recv() {
            if entry.message == "pod not found" {
                levels.push(entry.level);
            }
        }
        assert!(!levels.is_empty());
        assert!(levels.iter().all(|l| *l == LogLevel::Warn));
    }

    #[tokio::test]
    async fn test_supervisor_records_completion_on_stop() {
        let (store, id) = store_with_session().await;
        let supervisor =
            SessionSupervisor::new(store.clone(), Arc::new(SessionRegistry::default()));
        let cancel = CancellationToken::new();

        let handle = supervisor.spawn(
            id,
            Arc::new(FakeRunner::default()),
            Duration::from_secs(3600),
            cancel.clone(),
            LogSink::detached("s"),
        );
        assert_eq!(supervisor.registry().len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();
        let outcome = handle.wait().await.unwrap();

        assert_eq!(outcome.state, SessionState::Stopped);
        assert!(cancel.is_cancelled());
        assert_eq!(supervisor.registry().len(), 0);
        let record = store.get_session(id).await.unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_supervisor_records_failure_on_panic() {
        let (store, id) = store_with_session().await;
        let supervisor =
            SessionSupervisor::new(store.clone(), Arc::new(SessionRegistry::default()));

        let handle = supervisor.spawn(
            id,
            Arc::new(FakeRunner {
                panic: true,
                ..FakeRunner::default()
            }),
            Duration::from_secs(3600),
            CancellationToken::new(),
            LogSink::detached("s"),
        );

        assert!(handle.wait().await.is_none());
        let record = store.get_session(id).await.unwrap();
        assert_eq!(record.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_panic_reaches_log_stream() {
        use crate::logbridge::{event_stream, LogEntry, DISCONNECT_MESSAGE};
        use futures::StreamExt;

        let supervisor = SessionSupervisor::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(SessionRegistry::default()),
        );
        let pool = LoggerPool::new(16);
        let lease = pool.acquire("s");
        let cancel = CancellationToken::new();

        let handle = supervisor.spawn_untracked(
            Uuid::new_v4(),
            Arc::new(FakeRunner {
                panic: true,
                ..FakeRunner::default()
            }),
            Duration::from_secs(3600),
            cancel.clone(),
            lease.sink(),
        );

        let frames: Vec<String> = tokio::time::timeout(
            Duration::from_secs(5),
            event_stream(lease, cancel)
                .map(|f| f.unwrap())
                .collect::<Vec<String>>(),
        )
        .await
        .unwrap();
        assert!(handle.wait().await.is_none());

        let entries: Vec<LogEntry> = frames
            .iter()
            .map(|f| serde_json::from_str(f.trim_start_matches("data: ").trim_end()).unwrap())
            .collect();
        let aborted = entries
            .iter()
            .position(|e| e.message.starts_with("session aborted"))
            .expect("abort reported to the client");
        assert_eq!(entries[aborted].level, LogLevel::Error);
        assert_eq!(entries.last().unwrap().message, DISCONNECT_MESSAGE);
    }

    #[tokio::test]
    async fn test_untracked_session_skips_store() {
        let store = Arc::new(InMemorySessionStore::new());
        let supervisor =
            SessionSupervisor::new(store.clone(), Arc::new(SessionRegistry::default()));
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4();

        let handle = supervisor.spawn_untracked(
            id,
            Arc::new(FakeRunner::default()),
            Duration::from_secs(3600),
            cancel.clone(),
            LogSink::detached("s"),
        );
        assert_eq!(handle.id(), id);
        cancel.cancel();

        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.state, SessionState::Cancelled);
        assert!(store.get_session(id).await.is_err());
    }

    #[tokio::test]
    async fn test_store_failure_does_not_break_session() {
        // Session id unknown to the store: both status reports fail
        let store = Arc::new(InMemorySessionStore::new());
        let supervisor = SessionSupervisor::new(store, Arc::new(SessionRegistry::default()));
        let cancel = CancellationToken::new();

        let handle = supervisor.spawn(
            Uuid::new_v4(),
            Arc::new(FakeRunner::default()),
            Duration::from_secs(3600),
            cancel.clone(),
            LogSink::detached("s"),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.state, SessionState::Cancelled);
    }
}
