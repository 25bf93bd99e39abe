use std::fmt;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Remote or local primitive an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Connect,
    List,
    Stat,
    Upload,
    Download,
    Unlink,
    MkDir,
    RmDir,
    SetTimes,
    Walk,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileOp::Connect => "connect",
            FileOp::List => "readdir",
            FileOp::Stat => "stat",
            FileOp::Upload => "put",
            FileOp::Download => "get",
            FileOp::Unlink => "unlink",
            FileOp::MkDir => "mkdir",
            FileOp::RmDir => "rmdir",
            FileOp::SetTimes => "set times",
            FileOp::Walk => "walk",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transport to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("remote {op} '{path}' failed: {source}")]
    Remote {
        op: FileOp,
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("local {op} '{path}' failed: {source}")]
    Local {
        op: FileOp,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote {op} '{path}' timed out after {secs}s")]
    Timeout { op: FileOp, path: String, secs: u64 },

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub(crate) fn remote(op: FileOp, path: &str, source: anyhow::Error) -> Self {
        SyncError::Remote {
            op,
            path: path.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn local(op: FileOp, path: impl fmt::Display, source: std::io::Error) -> Self {
        SyncError::Local {
            op,
            path: path.to_string(),
            source,
        }
    }

    /// Whether retrying the same call on a fresh session may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. } | SyncError::Timeout { .. } | SyncError::Remote { .. }
        )
    }
}
