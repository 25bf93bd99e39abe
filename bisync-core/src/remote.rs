use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// Remote metadata as reported by `stat` or a directory listing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteStat {
    pub kind: EntryKind,
    /// Seconds since the epoch.
    pub mtime: Option<f64>,
    pub size: Option<u64>,
}

impl RemoteStat {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub name: String,
    pub stat: RemoteStat,
}

/// Filesystem primitives over one open transfer channel.
///
/// Paths are absolute remote paths. Calls on one instance are issued strictly
/// one at a time.
#[async_trait]
pub trait RemoteFs: Send + Sync + 'static {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>>;
    /// `Ok(None)` when nothing exists at `path`.
    async fn stat(&self, path: &str) -> Result<Option<RemoteStat>>;
    async fn download(&self, remote: &str, local: &Path) -> Result<()>;
    async fn upload(&self, local: &Path, remote: &str) -> Result<()>;
    async fn remove_file(&self, path: &str) -> Result<()>;
    async fn create_dir(&self, path: &str) -> Result<()>;
    async fn remove_dir(&self, path: &str) -> Result<()>;
    async fn set_mtime(&self, path: &str, mtime: i64) -> Result<()>;

    /// False once the underlying transport has gone away.
    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()>;
}

/// Establishes a fresh [`RemoteFs`] for one endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn RemoteFs>>;

    /// Human-readable endpoint, used in logs and transport errors.
    fn describe(&self) -> String;
}
