/// Task, progress and cancellation types shared across the installer
use crate::error::FetchError;
use std::path::PathBuf;
use tokio::sync::watch;

/// Identifies one task within one batch. Indices are assigned in FIFO
/// order by the scheduler and are only meaningful for that batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub usize);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Client,
    Library,
    Native,
    AssetIndex,
    AssetObject,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Client => "client",
            TaskKind::Library => "library",
            TaskKind::Native => "native",
            TaskKind::AssetIndex => "asset_index",
            TaskKind::AssetObject => "asset_object",
        }
    }
}

/// One file to materialize. Transient: lives for one batch.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub source_url: String,
    pub dest_path: PathBuf,
    pub expected_sha1: Option<String>,
    pub expected_size: Option<u64>,
    pub kind: TaskKind,
}

/// Outcome of one batch run. Failures do not cancel peers, so both lists
/// can be populated at once.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<TaskId>,
    pub failed: Vec<(TaskId, FetchError)>,
    pub bytes_transferred: u64,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn was_cancelled(&self) -> bool {
        self.failed
            .iter()
            .any(|(_, e)| matches!(e, FetchError::Cancelled))
    }

    /// The failure the whole operation gets attributed to: the first
    /// non-cancellation error if any, else the first cancellation.
    pub fn primary_failure(&self) -> Option<&FetchError> {
        self.failed
            .iter()
            .map(|(_, e)| e)
            .find(|e| !matches!(e, FetchError::Cancelled))
            .or_else(|| self.failed.first().map(|(_, e)| e))
    }
}

/// Funnel for all progress emitted by a batch. Implementations must be
/// safe for concurrent callers; workers report from many tasks at once.
pub trait ProgressSink: Send + Sync {
    /// Called once before dispatch with the declared totals. Tasks without
    /// a declared size contribute zero to `total_bytes`.
    fn on_batch_start(&self, _total_tasks: usize, _total_bytes: u64) {}

    /// Bytes newly written for one task.
    fn on_bytes(&self, task: TaskId, delta: u64);

    /// Terminal state of one task.
    fn on_complete(&self, task: TaskId, result: Result<(), &FetchError>);
}

/// A sink that swallows everything. Useful for verification passes and tests.
pub struct SilentProgressSink;

impl ProgressSink for SilentProgressSink {
    fn on_bytes(&self, _task: TaskId, _delta: u64) {}
    fn on_complete(&self, _task: TaskId, _result: Result<(), &FetchError>) {}
}

/// Cancellation handle held by the operation owner.
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    /// Trip the token. Idempotent; observers settle eventually.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Cooperative cancellation token observed between chunk reads, before
/// dispatch and across retry backoffs.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that can never fire.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive forever so the channel never closes.
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation fires. Pends forever on a dead or
    /// never-firing channel, which makes it safe inside `tokio::select!`.
    pub async fn cancelled_wait(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_source_trips_all_tokens() {
        let (source, token) = CancelSource::new();
        let second = source.token();
        assert!(!token.is_cancelled());
        assert!(!second.is_cancelled());

        source.cancel();
        assert!(token.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[test]
    fn never_token_stays_quiet() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wait_resolves_on_cancel() {
        let (source, token) = CancelSource::new();
        let waiter = tokio::spawn(async move { token.cancelled_wait().await });
        source.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should settle")
            .unwrap();
    }

    #[test]
    fn primary_failure_prefers_real_errors_over_cancellation() {
        let report = BatchReport {
            completed: vec![TaskId(0)],
            failed: vec![
                (TaskId(1), FetchError::Cancelled),
                (
                    TaskId(2),
                    FetchError::HttpStatus {
                        status: 404,
                        url: "https://x/a.jar".into(),
                    },
                ),
            ],
            bytes_transferred: 0,
        };
        assert!(matches!(
            report.primary_failure(),
            Some(FetchError::HttpStatus { status: 404, .. })
        ));
        assert!(report.was_cancelled());
        assert!(!report.is_success());
    }
}
