//! One lazily established, reusable remote session per mapping.
//!
//! Every remote primitive goes through [`RemoteSession`], which connects on
//! first use, applies the per-operation timeout, and retries failed calls with
//! exponential backoff. Calls are serialized by `&mut self`: there is never
//! more than one outstanding remote operation per session.

use crate::config::SyncOptions;
use crate::error::{FileOp, Result, SyncError};
use crate::remote::{Connector, RemoteEntry, RemoteFs, RemoteStat};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observable lifecycle of a [`RemoteSession`].
///
/// Connecting and closing happen inside a single `&mut self` call
/// (`ensure_ready` / `close`), so no caller can ever observe a session
/// mid-handshake or mid-teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotConnected,
    Ready,
    Closed,
}

enum Channel {
    Idle,
    Ready(Arc<dyn RemoteFs>),
    Closed,
}

pub struct RemoteSession {
    connector: Arc<dyn Connector>,
    channel: Channel,
    timeout: Duration,
    retry_max: u32,
    retry_backoff: Duration,
}

impl RemoteSession {
    pub fn new(connector: Arc<dyn Connector>, options: &SyncOptions) -> Self {
        Self {
            connector,
            channel: Channel::Idle,
            timeout: Duration::from_secs(options.timeout_secs.max(1)),
            retry_max: options.retry_max,
            retry_backoff: Duration::from_millis(options.retry_backoff_ms),
        }
    }

    pub fn state(&self) -> SessionState {
        match self.channel {
            Channel::Idle => SessionState::NotConnected,
            Channel::Ready(_) => SessionState::Ready,
            Channel::Closed => SessionState::Closed,
        }
    }

    pub fn endpoint(&self) -> String {
        self.connector.describe()
    }

    /// Connects if needed; a no-op once the channel is open and alive.
    pub async fn ensure_ready(&mut self) -> Result<Arc<dyn RemoteFs>> {
        if let Channel::Ready(fs) = &self.channel {
            if fs.is_connected() {
                return Ok(fs.clone());
            }
            warn!("session to {} dropped, reconnecting", self.connector.describe());
            self.channel = Channel::Idle;
        }

        let endpoint = self.connector.describe();
        debug!("connecting to {endpoint}");
        let fs = match tokio::time::timeout(self.timeout, self.connector.connect()).await {
            Ok(Ok(fs)) => Arc::<dyn RemoteFs>::from(fs),
            Ok(Err(e)) => {
                return Err(SyncError::Transport {
                    endpoint,
                    message: format!("{e:#}"),
                })
            }
            Err(_) => {
                return Err(SyncError::Timeout {
                    op: FileOp::Connect,
                    path: endpoint,
                    secs: self.timeout.as_secs(),
                })
            }
        };
        info!("session to {endpoint} ready");
        self.channel = Channel::Ready(fs.clone());
        Ok(fs)
    }

    /// Ends the session. Safe to call in any state.
    pub async fn close(&mut self) -> Result<()> {
        let channel = std::mem::replace(&mut self.channel, Channel::Closed);
        if let Channel::Ready(fs) = channel {
            let endpoint = self.connector.describe();
            match tokio::time::timeout(self.timeout, fs.close()).await {
                Ok(Ok(())) => debug!("session to {endpoint} closed"),
                Ok(Err(e)) => return Err(SyncError::remote(FileOp::Connect, &endpoint, e)),
                Err(_) => {
                    return Err(SyncError::Timeout {
                        op: FileOp::Connect,
                        path: endpoint,
                        secs: self.timeout.as_secs(),
                    })
                }
            }
        }
        Ok(())
    }

    async fn call<T, F, Fut>(&mut self, op: FileOp, path: &str, f: F) -> Result<T>
    where
        F: Fn(Arc<dyn RemoteFs>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt: u32 = 0;
        let mut backoff = self.retry_backoff;
        loop {
            let err = match self.ensure_ready().await {
                Ok(fs) => match tokio::time::timeout(self.timeout, f(fs)).await {
                    Ok(Ok(v)) => return Ok(v),
                    Ok(Err(e)) => SyncError::remote(op, path, e),
                    Err(_) => SyncError::Timeout {
                        op,
                        path: path.to_string(),
                        secs: self.timeout.as_secs(),
                    },
                },
                Err(e) => e,
            };
            if attempt >= self.retry_max || !err.is_transient() {
                return Err(err);
            }
            attempt += 1;
            warn!("{err}; retry {attempt}/{} in {backoff:?}", self.retry_max);
            let stale = match &self.channel {
                Channel::Ready(fs) => !fs.is_connected() || matches!(err, SyncError::Timeout { .. }),
                _ => false,
            };
            if stale {
                self.channel = Channel::Idle;
            }
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    pub async fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let p = path.to_string();
        self.call(FileOp::List, path, move |fs| {
            let p = p.clone();
            async move { fs.read_dir(&p).await }
        })
        .await
    }

    pub async fn stat(&mut self, path: &str) -> Result<Option<RemoteStat>> {
        let p = path.to_string();
        self.call(FileOp::Stat, path, move |fs| {
            let p = p.clone();
            async move { fs.stat(&p).await }
        })
        .await
    }

    pub async fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        let (l, r) = (local.to_path_buf(), remote.to_string());
        self.call(FileOp::Upload, remote, move |fs| {
            let (l, r): (PathBuf, String) = (l.clone(), r.clone());
            async move { fs.upload(&l, &r).await }
        })
        .await
    }

    pub async fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
        let (r, l) = (remote.to_string(), local.to_path_buf());
        self.call(FileOp::Download, remote, move |fs| {
            let (r, l): (String, PathBuf) = (r.clone(), l.clone());
            async move { fs.download(&r, &l).await }
        })
        .await
    }

    pub async fn remove_file(&mut self, path: &str) -> Result<()> {
        let p = path.to_string();
        self.call(FileOp::Unlink, path, move |fs| {
            let p = p.clone();
            async move { fs.remove_file(&p).await }
        })
        .await
    }

    pub async fn create_dir(&mut self, path: &str) -> Result<()> {
        let p = path.to_string();
        self.call(FileOp::MkDir, path, move |fs| {
            let p = p.clone();
            async move { fs.create_dir(&p).await }
        })
        .await
    }

    pub async fn remove_dir(&mut self, path: &str) -> Result<()> {
        let p = path.to_string();
        self.call(FileOp::RmDir, path, move |fs| {
            let p = p.clone();
            async move { fs.remove_dir(&p).await }
        })
        .await
    }

    pub async fn set_mtime(&mut self, path: &str, mtime: i64) -> Result<()> {
        let p = path.to_string();
        self.call(FileOp::SetTimes, path, move |fs| {
            let p = p.clone();
            async move { fs.set_mtime(&p, mtime).await }
        })
        .await
    }
}
