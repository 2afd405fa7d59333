/// Bounded-parallel execution of a download task batch
use crate::error::FetchError;
use crate::game::installer::fetch::HashedFetcher;
use crate::game::installer::types::{
    BatchReport, CancelToken, DownloadTask, ProgressSink, TaskId,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

pub const DEFAULT_WORKERS: usize = 8;
const MAX_WORKERS: usize = 32;

/// Runs batches of independent download tasks with a bounded worker count.
/// Tasks are dispatched FIFO with no priorities; a failing task never
/// cancels its peers.
pub struct DownloadScheduler {
    fetcher: Arc<HashedFetcher>,
    workers: usize,
}

impl DownloadScheduler {
    pub fn new(fetcher: Arc<HashedFetcher>, workers: usize) -> Self {
        Self {
            fetcher,
            workers: workers.clamp(1, MAX_WORKERS),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Execute `tasks` and report per-task outcomes. Every destination path
    /// in the batch must be unique (the planner deduplicates); that is what
    /// keeps two workers from writing the same file concurrently.
    pub async fn run(
        &self,
        tasks: Vec<DownloadTask>,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancelToken,
    ) -> BatchReport {
        let total_tasks = tasks.len();
        let total_bytes: u64 = tasks.iter().filter_map(|t| t.expected_size).sum();
        sink.on_batch_start(total_tasks, total_bytes);

        if total_tasks == 0 {
            return BatchReport::default();
        }

        log::info!(
            "Running batch: {} tasks, {} declared bytes, {} workers",
            total_tasks,
            total_bytes,
            self.workers
        );

        let results: Vec<(TaskId, Result<u64, FetchError>)> = stream::iter(
            tasks.into_iter().enumerate(),
        )
        .map(|(index, task)| {
            let fetcher = self.fetcher.clone();
            let sink = sink.clone();
            let cancel = cancel.clone();
            let id = TaskId(index);

            async move {
                // Once the token trips, stop dispatching; queued tasks
                // report as cancelled without touching the network.
                if cancel.is_cancelled() {
                    let err = FetchError::Cancelled;
                    sink.on_complete(id, Err(&err));
                    return (id, Err(err));
                }

                let result = fetcher.fetch(&task, id, sink.as_ref(), &cancel).await;
                match result {
                    Ok(outcome) => {
                        sink.on_complete(id, Ok(()));
                        (id, Ok(outcome.bytes_transferred))
                    }
                    Err(err) => {
                        log::warn!(
                            "Task {} ({}) failed: {} -> {}",
                            id,
                            task.kind.as_str(),
                            task.source_url,
                            err
                        );
                        sink.on_complete(id, Err(&err));
                        (id, Err(err))
                    }
                }
            }
        })
        .buffer_unordered(self.workers)
        .collect()
        .await;

        let mut report = BatchReport::default();
        for (id, result) in results {
            match result {
                Ok(bytes) => {
                    report.bytes_transferred += bytes;
                    report.completed.push(id);
                }
                Err(err) => report.failed.push((id, err)),
            }
        }

        log::info!(
            "Batch finished: {} completed, {} failed, {} bytes transferred",
            report.completed.len(),
            report.failed.len(),
            report.bytes_transferred
        );

        report
    }
}
