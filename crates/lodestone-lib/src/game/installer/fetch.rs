/// Single-file HTTP download with resume, SHA-1 verification and retry
use crate::error::FetchError;
use crate::game::installer::types::{CancelToken, DownloadTask, ProgressSink, TaskId};
use crate::utils::hash::{hashes_match, sha1_file};
use anyhow::Result;
use futures::StreamExt;
use rand::Rng;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Tunables for one fetcher. The 60/60/120 s timeout set matches upstream
/// behavior and is kept configurable rather than hard-coded.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Additional attempts after the first, for transient failures.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_factor: f64,
    pub backoff_cap: Duration,
    /// Fractional jitter applied to each backoff (0.25 = +/-25%).
    pub backoff_jitter: f64,
    pub connect_timeout: Duration,
    /// Max silence between two chunks before the read counts as dead.
    pub read_timeout: Duration,
    pub total_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_millis(500),
            backoff_factor: 2.0,
            backoff_cap: Duration::from_secs(30),
            backoff_jitter: 0.25,
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(60),
            total_timeout: Duration::from_secs(120),
        }
    }
}

/// Result of one fetch call.
#[derive(Debug)]
pub struct FetchOutcome {
    /// Bytes that actually crossed the network (0 for verified cache hits).
    pub bytes_transferred: u64,
    pub already_present: bool,
}

/// Downloads one file to one destination with content-integrity guarantees.
/// Many fetches may run in parallel as long as every call owns a distinct
/// destination path; the scheduler enforces that by deduplicating batches.
pub struct HashedFetcher {
    client: Client,
    config: FetchConfig,
}

impl HashedFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()?;
        Ok(Self { client, config })
    }

    /// Use an externally built client (tests, shared pools).
    pub fn with_client(client: Client, config: FetchConfig) -> Self {
        Self { client, config }
    }

    /// Materialize `task.dest_path`. A file already present with a matching
    /// SHA-1 short-circuits without network I/O; a present file with a bad
    /// hash is treated as absent and replaced.
    pub async fn fetch(
        &self,
        task: &DownloadTask,
        id: TaskId,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, FetchError> {
        if task.dest_path.exists() {
            match &task.expected_sha1 {
                Some(expected) => match sha1_file(&task.dest_path).await {
                    Ok(computed) if hashes_match(&computed, expected) => {
                        log::debug!(
                            "Already present and verified, skipping: {}",
                            task.dest_path.display()
                        );
                        return Ok(FetchOutcome {
                            bytes_transferred: 0,
                            already_present: true,
                        });
                    }
                    Ok(computed) => {
                        log::info!(
                            "Hash mismatch on disk ({} != {}), re-downloading: {}",
                            computed,
                            expected,
                            task.dest_path.display()
                        );
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to hash existing file ({}), re-downloading: {}",
                            e,
                            task.dest_path.display()
                        );
                    }
                },
                None => {
                    // No declared hash; presence is the best signal we have.
                    log::debug!(
                        "Already present (no declared hash), skipping: {}",
                        task.dest_path.display()
                    );
                    return Ok(FetchOutcome {
                        bytes_transferred: 0,
                        already_present: true,
                    });
                }
            }
        }

        if let Some(parent) = task.dest_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::from_io(parent, e))?;
        }

        let part_path = part_path(&task.dest_path);
        let mut transferred: u64 = 0;
        let mut attempts: u32 = 0;
        let mut hash_restart_done = false;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            match self
                .attempt(task, id, sink, cancel, &part_path, &mut transferred)
                .await
            {
                Ok(()) => {
                    return Ok(FetchOutcome {
                        bytes_transferred: transferred,
                        already_present: false,
                    });
                }
                Err(e @ FetchError::HashMismatch { .. }) => {
                    // One clean restart: the attempt already deleted the
                    // partial file, so the next pass starts from byte zero.
                    if hash_restart_done {
                        return Err(e);
                    }
                    hash_restart_done = true;
                    log::warn!("{e}; restarting download once from scratch");
                }
                Err(e) if e.is_retryable() && attempts < self.config.max_retries => {
                    attempts += 1;
                    let delay = self.backoff_delay(attempts);
                    log::warn!(
                        "Download failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempts,
                        self.config.max_retries,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled_wait() => return Err(FetchError::Cancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        task: &DownloadTask,
        id: TaskId,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
        part_path: &Path,
        transferred: &mut u64,
    ) -> Result<(), FetchError> {
        let url = task.source_url.as_str();

        // Resume from whatever an earlier attempt left behind.
        let offset = match tokio::fs::metadata(part_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::transport(url, &e))?;
        let status = response.status();

        // A range exactly at EOF is not an error: the partial file already
        // holds the whole body, it just never got verified and renamed.
        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            return self.finalize(task, part_path, offset).await;
        }

        if !status.is_success() {
            return Err(FetchError::from_status(url, status.as_u16()));
        }

        let resumed = status == StatusCode::PARTIAL_CONTENT && offset > 0;

        let mut hasher = Sha1::new();
        let mut written: u64;
        let mut file = if resumed {
            // The digest must cover the prefix we are keeping.
            hash_prefix(part_path, &mut hasher)
                .await
                .map_err(|e| FetchError::from_io(part_path, e))?;
            written = offset;
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(part_path)
                .await
                .map_err(|e| FetchError::from_io(part_path, e))?
        } else {
            if offset > 0 {
                log::debug!(
                    "Server ignored range request, restarting from scratch: {}",
                    url
                );
            }
            written = 0;
            tokio::fs::File::create(part_path)
                .await
                .map_err(|e| FetchError::from_io(part_path, e))?
        };

        let mut stream = response.bytes_stream();

        loop {
            if cancel.is_cancelled() {
                // Keep the partial file for a later resume.
                let _ = file.flush().await;
                return Err(FetchError::Cancelled);
            }

            let next = tokio::time::timeout(self.config.read_timeout, stream.next())
                .await
                .map_err(|_| FetchError::Transport {
                    url: url.to_string(),
                    message: format!(
                        "no data received for {:?}",
                        self.config.read_timeout
                    ),
                })?;

            let chunk = match next {
                Some(chunk) => chunk.map_err(|e| FetchError::transport(url, &e))?,
                None => break,
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::from_io(part_path, e))?;
            hasher.update(&chunk);

            let len = chunk.len() as u64;
            written += len;
            *transferred += len;
            sink.on_bytes(id, len);
        }

        file.flush()
            .await
            .map_err(|e| FetchError::from_io(part_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| FetchError::from_io(part_path, e))?;
        drop(file);

        if let Some(expected_size) = task.expected_size {
            if written != expected_size {
                return Err(FetchError::SizeMismatch {
                    path: task.dest_path.clone(),
                    expected: expected_size,
                    actual: written,
                });
            }
        }

        if let Some(ref expected) = task.expected_sha1 {
            let computed = format!("{:x}", hasher.finalize());
            if !hashes_match(&computed, expected) {
                let _ = tokio::fs::remove_file(part_path).await;
                return Err(FetchError::HashMismatch {
                    path: task.dest_path.clone(),
                    expected: expected.clone(),
                    actual: computed,
                });
            }
        }

        tokio::fs::rename(part_path, &task.dest_path)
            .await
            .map_err(|e| FetchError::from_io(&task.dest_path, e))?;

        Ok(())
    }

    /// Verify and promote a partial file that already spans the full body.
    async fn finalize(
        &self,
        task: &DownloadTask,
        part_path: &Path,
        written: u64,
    ) -> Result<(), FetchError> {
        if let Some(expected_size) = task.expected_size {
            if written != expected_size {
                return Err(FetchError::SizeMismatch {
                    path: task.dest_path.clone(),
                    expected: expected_size,
                    actual: written,
                });
            }
        }

        if let Some(ref expected) = task.expected_sha1 {
            let computed = sha1_file(part_path)
                .await
                .map_err(|e| FetchError::from_io(part_path, e))?;
            if !hashes_match(&computed, expected) {
                let _ = tokio::fs::remove_file(part_path).await;
                return Err(FetchError::HashMismatch {
                    path: task.dest_path.clone(),
                    expected: expected.clone(),
                    actual: computed,
                });
            }
        }

        tokio::fs::rename(part_path, &task.dest_path)
            .await
            .map_err(|e| FetchError::from_io(&task.dest_path, e))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.config.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let base = self.config.backoff_base.as_secs_f64() * exp;
        let capped = base.min(self.config.backoff_cap.as_secs_f64());
        let jitter = rand::rng().random_range(
            (1.0 - self.config.backoff_jitter)..=(1.0 + self.config.backoff_jitter),
        );
        Duration::from_secs_f64(capped * jitter)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let name = format!(
        "{}.part",
        dest.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download")
    );
    dest.with_file_name(name)
}

async fn hash_prefix(path: &Path, hasher: &mut Sha1) -> std::io::Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buf[..n]);
    }
}
