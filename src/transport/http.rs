use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, RANGE, USER_AGENT};
use reqwest::StatusCode;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::io::ReaderStream;

use crate::core::error::TransferError;
use crate::transport::{DriverContext, RangeBody, TransferDriver, UploadReply};

#[derive(thiserror::Error, Debug)]
pub enum HttpDriverError {
    #[error("range not supported by server (verified)")]
    RangeNotSupported,
    #[error("no data for {0}s, giving up")]
    Stalled(u64),
}

/// Tracks the last moment a transfer made progress.
struct IdleWatch {
    origin: Instant,
    last_ms: AtomicU64,
    idle: Duration,
}

impl IdleWatch {
    fn new(idle: Duration) -> Self {
        Self { origin: Instant::now(), last_ms: AtomicU64::new(0), idle }
    }

    fn touch(&self) {
        self.last_ms.store(self.origin.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Resolves once nothing touched the watch for `idle`.
    async fn expired(&self) {
        loop {
            let deadline = self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed)) + self.idle;
            if Instant::now() >= deadline {
                return;
            }
            sleep_until(deadline).await;
        }
    }
}

fn idle_limit(ctx: &DriverContext) -> Duration {
    Duration::from_secs(ctx.timeout_secs.max(1))
}

pub struct HttpDriver {
    client: reqwest::Client,
}

impl HttpDriver {
    pub fn new(ctx: &DriverContext) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(ctx.timeout_secs.max(1)))
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }

    fn build_headers(ctx: &DriverContext, extra: &[(&str, &str)]) -> anyhow::Result<HeaderMap> {
        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, HeaderValue::from_str(&ctx.user_agent)?);
        for (k, v) in extra {
            let name = HeaderName::from_bytes(k.as_bytes())?;
            let value = HeaderValue::from_str(v)?;
            h.insert(name, value);
        }
        Ok(h)
    }
}

#[async_trait]
impl TransferDriver for HttpDriver {
    fn name(&self) -> &'static str {
        "http-driver"
    }

    /// HEAD for the length, then `bytes=0-0`: ranges count as supported only
    /// on `206` with a `Content-Range`.
    async fn probe(&self, uri: &str, ctx: &DriverContext) -> anyhow::Result<(Option<u64>, bool)> {
        let headers = Self::build_headers(ctx, &[])?;
        let timeout = Duration::from_secs(ctx.timeout_secs);

        let head = self.client.head(uri).headers(headers.clone()).timeout(timeout).send().await?;

        let total = head
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let test = self
            .client
            .get(uri)
            .headers(headers)
            .timeout(timeout)
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;

        let supports_ranges =
            test.status() == StatusCode::PARTIAL_CONTENT && test.headers().get(CONTENT_RANGE).is_some();

        Ok((total, supports_ranges))
    }

    async fn download_range(
        &self,
        uri: &str,
        ctx: &DriverContext,
        start: u64,
        end_inclusive: u64,
    ) -> anyhow::Result<RangeBody> {
        let headers = Self::build_headers(ctx, &[])?;
        let range_value = format!("bytes={}-{}", start, end_inclusive);

        let resp = self
            .client
            .get(uri)
            .headers(headers)
            .timeout(Duration::from_secs(ctx.timeout_secs))
            .header(RANGE, range_value)
            .send()
            .await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => Ok(RangeBody::Partial(resp.bytes().await?)),
            StatusCode::OK => Ok(RangeBody::Whole(resp.bytes().await?)),
            StatusCode::RANGE_NOT_SATISFIABLE => Err(HttpDriverError::RangeNotSupported.into()),
            s if s.is_success() => Err(HttpDriverError::RangeNotSupported.into()),
            s => Err(TransferError::Status(s).into()),
        }
    }

    /// No overall deadline, since artifacts run to hundreds of MB; instead
    /// every read must deliver within `timeout_secs`.
    async fn download_all(&self, uri: &str, ctx: &DriverContext, dest: &Path) -> anyhow::Result<u64> {
        let headers = Self::build_headers(ctx, &[])?;
        let idle = idle_limit(ctx);
        let stalled = || HttpDriverError::Stalled(idle.as_secs());

        let mut resp = timeout(idle, self.client.get(uri).headers(headers).send())
            .await
            .map_err(|_| stalled())??;
        if !resp.status().is_success() {
            return Err(TransferError::Status(resp.status()).into());
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("create {}", dest.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = timeout(idle, resp.chunk()).await.map_err(|_| stalled())?? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn upload(
        &self,
        uri: &str,
        ctx: &DriverContext,
        file: &Path,
        headers: &[(&str, &str)],
    ) -> anyhow::Result<UploadReply> {
        let headers = Self::build_headers(ctx, headers)?;
        let f = tokio::fs::File::open(file)
            .await
            .with_context(|| format!("open {}", file.display()))?;
        let len = f.metadata().await?.len();

        // The host must keep draining the body, then answer, each within
        // `timeout_secs`.
        let idle = idle_limit(ctx);
        let watch = Arc::new(IdleWatch::new(idle));
        let body_watch = watch.clone();
        let stream = ReaderStream::new(f).inspect(move |_| body_watch.touch());

        let send = self
            .client
            .put(uri)
            .headers(headers)
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(stream))
            .send();
        let resp = tokio::select! {
            r = send => r?,
            _ = watch.expired() => return Err(HttpDriverError::Stalled(idle.as_secs()).into()),
        };

        let status = resp.status();
        let body = timeout(idle, resp.text())
            .await
            .map_err(|_| HttpDriverError::Stalled(idle.as_secs()))?
            .context("read mirror response body")?;
        Ok(UploadReply { status, body })
    }
}
