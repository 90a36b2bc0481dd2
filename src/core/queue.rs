use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::assembler::Assembler;
use crate::core::config::QueueConfig;
use crate::core::error::{Error, ErrorKind, Result, TransferError};
use crate::core::events::QueueEvent;
use crate::core::model::DownloadJob;
use crate::core::planner::{plan_ranges, ByteRange};
use crate::core::scratch::ScratchFile;
use crate::transport::http::HttpDriver;
use crate::transport::{DriverContext, RangeBody, TransferDriver};

const MAX_BACKOFF_MS: u64 = 30_000;

/// Downloads artifacts into uniquely named temp files.
///
/// Each `add_*` call blocks until its transfer, including retries, is done.
/// At most `max_workers` calls transfer at once; the rest wait for a slot.
/// Calls never share state, so two requests for one URL download twice.
#[derive(Clone)]
pub struct DownloadQueue {
    driver: Arc<dyn TransferDriver>,
    ctx: DriverContext,
    temp_dir: PathBuf,
    concurrency: usize,
    chunk_size: u64,
    retry_backoff_ms: u64,
    workers: Arc<Semaphore>,
    event_tx: broadcast::Sender<QueueEvent>,
    cancel: CancellationToken,
}

impl DownloadQueue {
    pub fn new(cfg: &QueueConfig) -> Result<Self> {
        let ctx = DriverContext::from(cfg);
        let driver = HttpDriver::new(&ctx)
            .map_err(|e| Error::with_source(ErrorKind::Config, "unable to build http client", e))?;
        Ok(Self::with_driver(Arc::new(driver), cfg))
    }

    pub fn with_driver(driver: Arc<dyn TransferDriver>, cfg: &QueueConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            driver,
            ctx: DriverContext::from(cfg),
            temp_dir: cfg.temp_dir(),
            concurrency: cfg.concurrency.max(1),
            chunk_size: cfg.chunk_size(),
            retry_backoff_ms: cfg.retry_backoff_ms,
            workers: Arc::new(Semaphore::new(cfg.max_workers.max(1))),
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the queue's cancellation token, e.g. with a child of a
    /// process-wide shutdown token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    pub fn driver(&self) -> &dyn TransferDriver {
        self.driver.as_ref()
    }

    pub fn driver_context(&self) -> &DriverContext {
        &self.ctx
    }

    /// One GET into a temp file, no verification and no retry.
    pub async fn add_single(&self, url: &str) -> Result<PathBuf> {
        self.run(DownloadJob::single(url)).await
    }

    /// Downloads `url` with up to `max_retries` attempts. A non-empty
    /// `expected_checksum` (MD5, hex) and a non-zero `expected_size` are
    /// verified after every attempt; a mismatch is retried like any
    /// network error.
    pub async fn add_multiple(
        &self,
        url: &str,
        expected_checksum: &str,
        max_retries: u32,
        expected_size: u64,
    ) -> Result<PathBuf> {
        let job = DownloadJob::verified(url, expected_checksum, max_retries, expected_size, self.concurrency);
        self.run(job).await
    }

    async fn run(&self, job: DownloadJob) -> Result<PathBuf> {
        Url::parse(&job.url)
            .map_err(|e| Error::with_source(ErrorKind::Transfer, format!("malformed download url {:?}", job.url), e))?;

        let _permit = tokio::select! {
            permit = self.workers.acquire() => permit
                .map_err(|e| Error::with_source(ErrorKind::Transfer, "download queue closed", e))?,
            _ = self.cancel.cancelled() => return Err(Error::cancelled()),
        };

        let _ = self.event_tx.send(QueueEvent::Queued { job_id: job.id, uri: job.url.clone() });
        debug!(
            job = %job.id,
            url = %job.url,
            driver = self.driver.name(),
            max_retries = job.max_retries,
            "download started"
        );

        let mut last_err: Option<TransferError> = None;
        for attempt in 1..=job.max_retries {
            if attempt > 1 {
                self.backoff(attempt - 2).await?;
            }
            let _ = self.event_tx.send(QueueEvent::AttemptStarted {
                job_id: job.id,
                attempt,
                max_attempts: job.max_retries,
            });

            let scratch = ScratchFile::unique_in(&self.temp_dir, "gapps");
            let outcome = tokio::select! {
                r = self.attempt(&job, scratch.path()) => r,
                _ = self.cancel.cancelled() => {
                    let _ = self.event_tx.send(QueueEvent::Failed { job_id: job.id, message: "cancelled".into() });
                    return Err(Error::cancelled());
                }
            };

            match outcome {
                Ok(()) => {
                    let path = scratch.keep();
                    info!(job = %job.id, url = %job.url, attempt, path = %path.display(), "download finished");
                    let _ = self.event_tx.send(QueueEvent::Finished { job_id: job.id, path: path.clone() });
                    return Ok(path);
                }
                Err(e) => {
                    warn!(job = %job.id, url = %job.url, attempt, max = job.max_retries, error = %e, "download attempt failed");
                    let _ = self.event_tx.send(QueueEvent::AttemptFailed {
                        job_id: job.id,
                        attempt,
                        message: e.to_string(),
                    });
                    last_err = Some(e);
                }
            }
        }

        let context = format!("unable to download {} after {} attempt(s)", job.url, job.max_retries);
        let _ = self.event_tx.send(QueueEvent::Failed { job_id: job.id, message: context.clone() });
        Err(match last_err {
            Some(e) => Error::with_source(ErrorKind::Transfer, context, e),
            None => Error::new(ErrorKind::Transfer, context),
        })
    }

    /// Exponential backoff before retry number `retry + 1`; a zero base
    /// retries immediately.
    async fn backoff(&self, retry: u32) -> Result<()> {
        if self.retry_backoff_ms == 0 {
            return Ok(());
        }
        let ms = self.retry_backoff_ms.saturating_mul(1u64 << retry.min(16)).min(MAX_BACKOFF_MS);
        tokio::select! {
            _ = sleep(Duration::from_millis(ms)) => Ok(()),
            _ = self.cancel.cancelled() => Err(Error::cancelled()),
        }
    }

    async fn attempt(&self, job: &DownloadJob, path: &Path) -> Result<(), TransferError> {
        let written = match job.expected_size {
            Some(total) if job.concurrency > 1 && total > self.chunk_size => {
                let (_, supports_ranges) = self.driver.probe(&job.url, &self.ctx).await.unwrap_or((None, false));
                debug!(job = %job.id, total, supports_ranges, "probed");
                if supports_ranges {
                    self.fetch_ranges(job, path, total).await?
                } else {
                    self.fetch_full(job, path).await?
                }
            }
            _ => self.fetch_full(job, path).await?,
        };

        if let Some(expected) = job.expected_size {
            if written != expected {
                return Err(TransferError::ShortRead { expected, actual: written });
            }
        }

        if let Some(expected) = &job.expected_md5 {
            let actual = md5_file(path).await?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(TransferError::ChecksumMismatch { expected: expected.clone(), actual });
            }
        }

        Ok(())
    }

    async fn fetch_full(&self, job: &DownloadJob, path: &Path) -> Result<u64, TransferError> {
        let len = self.driver.download_all(&job.url, &self.ctx, path).await?;
        let _ = self.event_tx.send(QueueEvent::Progress {
            job_id: job.id,
            downloaded: len,
            total: job.expected_size,
            speed_bps: 0,
            eta: None,
        });
        Ok(len)
    }

    async fn fetch_ranges(&self, job: &DownloadJob, path: &Path, total: u64) -> Result<u64, TransferError> {
        let mut pending = plan_ranges(total, self.chunk_size);
        let assembler = Assembler::create(path, Some(total)).await?;
        let progress = ChunkProgress {
            downloaded: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            chunks: pending.len() as u64,
            total,
            started: Instant::now(),
        };
        let mut whole: Option<Bytes> = None;

        while !pending.is_empty() && whole.is_none() {
            let batch: Vec<ByteRange> = pending.drain(0..pending.len().min(job.concurrency)).collect();
            let mut futs = FuturesUnordered::new();
            for range in batch {
                futs.push(self.fetch_chunk(job, range, &assembler, &progress));
            }

            while let Some(res) = futs.next().await {
                if let Some(full) = res? {
                    whole = Some(full);
                    break;
                }
            }
        }

        if let Some(full) = whole {
            debug!(job = %job.id, "host ignored range request, keeping full body");
            assembler.replace_all(&full).await?;
        }

        Ok(assembler.finish().await?)
    }

    /// Fetches one range into place. Returns the full body instead when the
    /// host answered with the whole resource.
    async fn fetch_chunk(
        &self,
        job: &DownloadJob,
        range: ByteRange,
        assembler: &Assembler,
        progress: &ChunkProgress,
    ) -> Result<Option<Bytes>, TransferError> {
        let body = self
            .driver
            .download_range(&job.url, &self.ctx, range.offset, range.end_inclusive())
            .await?;
        let bytes = match body {
            RangeBody::Partial(b) => b,
            RangeBody::Whole(b) => return Ok(Some(b)),
        };
        if bytes.len() as u64 != range.len {
            return Err(TransferError::ShortRead { expected: range.len, actual: bytes.len() as u64 });
        }

        assembler.write_at(range.offset, &bytes).await?;

        let len = bytes.len() as u64;
        let dnow = progress.downloaded.fetch_add(len, Ordering::SeqCst) + len;
        let cnow = progress.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.event_tx.send(QueueEvent::ChunkDone {
            job_id: job.id,
            completed: cnow,
            total: progress.chunks,
        });

        let elapsed = progress.started.elapsed().as_secs_f64().max(0.001);
        let speed = (dnow as f64 / elapsed) as u64;
        let eta = if speed > 0 && dnow < progress.total {
            Some(Duration::from_secs_f64((progress.total - dnow) as f64 / speed as f64))
        } else {
            None
        };
        let _ = self.event_tx.send(QueueEvent::Progress {
            job_id: job.id,
            downloaded: dnow,
            total: Some(progress.total),
            speed_bps: speed,
            eta,
        });

        Ok(None)
    }
}

struct ChunkProgress {
    downloaded: AtomicU64,
    completed: AtomicU64,
    chunks: u64,
    total: u64,
    started: Instant,
}

async fn md5_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
