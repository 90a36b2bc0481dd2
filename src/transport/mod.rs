pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::path::Path;

use crate::core::config::QueueConfig;

#[derive(Debug, Clone)]
pub struct DriverContext {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl From<&QueueConfig> for DriverContext {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            user_agent: cfg.user_agent.clone(),
            timeout_secs: cfg.timeout_secs,
        }
    }
}

/// Body returned for a ranged request.
#[derive(Debug, Clone)]
pub enum RangeBody {
    /// `206 Partial Content` with exactly the requested bytes.
    Partial(Bytes),
    /// The host ignored `Range` and sent the whole resource.
    Whole(Bytes),
}

#[derive(Debug, Clone)]
pub struct UploadReply {
    pub status: StatusCode,
    pub body: String,
}

/// One network round trip per call; retry policy lives in the queue.
#[async_trait]
pub trait TransferDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Size and range support of a resource. Defaults to "unknown / no".
    async fn probe(&self, _uri: &str, _ctx: &DriverContext) -> anyhow::Result<(Option<u64>, bool)> {
        Ok((None, false))
    }

    async fn download_range(
        &self,
        uri: &str,
        ctx: &DriverContext,
        start: u64,
        end_inclusive: u64,
    ) -> anyhow::Result<RangeBody>;

    /// Streams the whole resource into `dest`, returning the bytes written.
    async fn download_all(&self, uri: &str, ctx: &DriverContext, dest: &Path) -> anyhow::Result<u64>;

    async fn upload(
        &self,
        uri: &str,
        ctx: &DriverContext,
        file: &Path,
        headers: &[(&str, &str)],
    ) -> anyhow::Result<UploadReply>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Accepts connections and holds them open without ever answering.
    pub(crate) async fn silent_host() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}")
    }

    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Body(Bytes),
        Fail(String),
    }

    /// In-memory driver answering full downloads from a script, then
    /// repeating a fixed reply once the script runs dry.
    pub(crate) struct ScriptedDriver {
        script: Mutex<VecDeque<Reply>>,
        then: Reply,
        ranged: Option<Bytes>,
        upload_reply: Option<(StatusCode, String)>,
        downloads: AtomicUsize,
        range_requests: AtomicUsize,
        probes: AtomicUsize,
        pub(crate) uploads: Mutex<Vec<(String, Vec<u8>, Vec<(String, String)>)>>,
    }

    impl ScriptedDriver {
        pub(crate) fn new(script: Vec<Reply>, then: Reply) -> Self {
            Self {
                script: Mutex::new(script.into()),
                then,
                ranged: None,
                upload_reply: None,
                downloads: AtomicUsize::new(0),
                range_requests: AtomicUsize::new(0),
                probes: AtomicUsize::new(0),
                uploads: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn serving(body: &'static [u8]) -> Self {
            Self::new(vec![], Reply::Body(Bytes::from_static(body)))
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self::new(vec![], Reply::Fail(message.to_string()))
        }

        /// Advertises range support and answers ranges from `body`.
        pub(crate) fn with_ranges(mut self, body: Bytes) -> Self {
            self.ranged = Some(body);
            self
        }

        pub(crate) fn with_upload(mut self, status: StatusCode, body: &str) -> Self {
            self.upload_reply = Some((status, body.to_string()));
            self
        }

        pub(crate) fn downloads(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }

        pub(crate) fn range_requests(&self) -> usize {
            self.range_requests.load(Ordering::SeqCst)
        }

        pub(crate) fn network_calls(&self) -> usize {
            self.downloads()
                + self.range_requests()
                + self.probes.load(Ordering::SeqCst)
                + self.uploads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TransferDriver for ScriptedDriver {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn probe(&self, _uri: &str, _ctx: &DriverContext) -> anyhow::Result<(Option<u64>, bool)> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok((self.ranged.as_ref().map(|b| b.len() as u64), self.ranged.is_some()))
        }

        async fn download_range(
            &self,
            _uri: &str,
            _ctx: &DriverContext,
            start: u64,
            end_inclusive: u64,
        ) -> anyhow::Result<RangeBody> {
            self.range_requests.fetch_add(1, Ordering::SeqCst);
            let body = self.ranged.as_ref().ok_or_else(|| anyhow::anyhow!("ranges not scripted"))?;
            let end = (end_inclusive as usize + 1).min(body.len());
            Ok(RangeBody::Partial(body.slice(start as usize..end)))
        }

        async fn download_all(&self, _uri: &str, _ctx: &DriverContext, dest: &Path) -> anyhow::Result<u64> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            let reply = self.script.lock().unwrap().pop_front().unwrap_or_else(|| self.then.clone());
            match reply {
                Reply::Body(b) => {
                    tokio::fs::write(dest, &b).await?;
                    Ok(b.len() as u64)
                }
                Reply::Fail(m) => Err(anyhow::anyhow!(m)),
            }
        }

        async fn upload(
            &self,
            uri: &str,
            _ctx: &DriverContext,
            file: &Path,
            headers: &[(&str, &str)],
        ) -> anyhow::Result<UploadReply> {
            let body = tokio::fs::read(file).await?;
            let headers = headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            self.uploads.lock().unwrap().push((uri.to_string(), body, headers));
            let (status, body) = self
                .upload_reply
                .clone()
                .ok_or_else(|| anyhow::anyhow!("upload not scripted"))?;
            Ok(UploadReply { status, body })
        }
    }
}
