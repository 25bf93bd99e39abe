use crate::error::{FileOp, Result, SyncError};
use crate::filter::PathFilter;
use crate::maintain::DirOps;
use crate::utils::relative_posix;
use async_trait::async_trait;
use filetime::FileTime;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// A regular local file, relative to the mapping's local root.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub rel: String,
    pub mtime: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalStat {
    pub is_dir: bool,
    pub is_file: bool,
    pub mtime: Option<f64>,
}

fn secs(t: SystemTime) -> Option<f64> {
    t.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs_f64())
}

/// The local half of a mapping: every path argument is root-relative.
#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            return self.root.clone();
        }
        rel.split('/').fold(self.root.clone(), |p, seg| p.join(seg))
    }

    /// Flat recursive listing of regular files passing `filter`.
    ///
    /// A missing root yields an empty listing when `missing_ok`, an error otherwise.
    pub async fn list_files(&self, filter: &PathFilter, missing_ok: bool) -> Result<Vec<LocalFile>> {
        self.list_files_under("", filter, missing_ok).await
    }

    /// Like [`list_files`](Self::list_files), restricted to the subtree at `rel`.
    pub async fn list_files_under(
        &self,
        rel: &str,
        filter: &PathFilter,
        missing_ok: bool,
    ) -> Result<Vec<LocalFile>> {
        let root = self.root.clone();
        let start = self.path(rel);
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || walk(&root, &start, &filter, missing_ok))
            .await
            .map_err(|e| SyncError::local(FileOp::Walk, self.root.display(), std::io::Error::other(e)))?
    }

    pub async fn stat(&self, rel: &str) -> Result<Option<LocalStat>> {
        let path = self.path(rel);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(LocalStat {
                is_dir: meta.is_dir(),
                is_file: meta.is_file(),
                mtime: meta.modified().ok().and_then(secs),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::local(FileOp::Stat, path.display(), e)),
        }
    }

    pub fn set_mtime(&self, rel: &str, mtime: i64) -> Result<()> {
        let path = self.path(rel);
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0))
            .map_err(|e| SyncError::local(FileOp::SetTimes, path.display(), e))
    }

    pub async fn remove_file(&self, rel: &str) -> Result<()> {
        let path = self.path(rel);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| SyncError::local(FileOp::Unlink, path.display(), e))
    }
}

fn entry_mtime(entry: &walkdir::DirEntry) -> std::io::Result<f64> {
    let modified = entry.metadata().map_err(std::io::Error::from)?.modified()?;
    secs(modified).ok_or_else(|| std::io::Error::new(ErrorKind::InvalidData, "modification time before 1970"))
}

fn walk(root: &Path, start: &Path, filter: &PathFilter, missing_ok: bool) -> Result<Vec<LocalFile>> {
    if !start.exists() {
        return if missing_ok {
            Ok(Vec::new())
        } else {
            Err(SyncError::local(
                FileOp::Walk,
                start.display(),
                std::io::Error::new(ErrorKind::NotFound, "local directory does not exist"),
            ))
        };
    }
    let mut files = Vec::new();
    let entries = WalkDir::new(start)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in entries {
        let entry = entry.map_err(|e| {
            let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
            SyncError::local(FileOp::Walk, path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative_posix(root, entry.path()) else {
            continue;
        };
        if !filter.check(&rel) {
            continue;
        }
        let mtime =
            entry_mtime(&entry).map_err(|e| SyncError::local(FileOp::Stat, entry.path().display(), e))?;
        files.push(LocalFile { rel, mtime });
    }
    Ok(files)
}

#[async_trait]
impl DirOps for LocalTree {
    async fn dir_exists(&mut self, rel: &str) -> Result<bool> {
        Ok(self.stat(rel).await?.is_some_and(|s| s.is_dir))
    }

    async fn make_dir(&mut self, rel: &str) -> Result<()> {
        let path = self.path(rel);
        let res = if rel.is_empty() {
            tokio::fs::create_dir_all(&path).await
        } else {
            tokio::fs::create_dir(&path).await
        };
        res.map_err(|e| SyncError::local(FileOp::MkDir, path.display(), e))
    }

    async fn dir_is_empty(&mut self, rel: &str) -> Result<bool> {
        let path = self.path(rel);
        let mut rd = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| SyncError::local(FileOp::List, path.display(), e))?;
        let first = rd
            .next_entry()
            .await
            .map_err(|e| SyncError::local(FileOp::List, path.display(), e))?;
        Ok(first.is_none())
    }

    async fn remove_empty_dir(&mut self, rel: &str) -> Result<()> {
        let path = self.path(rel);
        tokio::fs::remove_dir(&path)
            .await
            .map_err(|e| SyncError::local(FileOp::RmDir, path.display(), e))
    }
}
