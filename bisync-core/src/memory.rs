//! In-memory [`RemoteFs`] used by the test suites and for dry runs.
//!
//! Behaves like a strict SFTP server: writing a file or creating a directory
//! under a missing parent fails, removing a non-empty directory fails. Every
//! call is appended to a log so callers can assert on ordering.

use crate::remote::{Connector, EntryKind, RemoteEntry, RemoteFs, RemoteStat};
use crate::utils::remote_parent;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File { mtime: f64, data: Vec<u8> },
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    calls: Vec<String>,
    failing: HashSet<String>,
    closes: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryRemote {
    tree: Arc<Mutex<Tree>>,
    connected: Arc<AtomicBool>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as f64)
        .unwrap_or(0.0)
}

impl Tree {
    fn is_dir(&self, path: &str) -> bool {
        path == "/" || matches!(self.nodes.get(path), Some(Node::Dir))
    }

    fn children(&self, dir: &str) -> Vec<(String, Node)> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, v)| (k[prefix.len()..].to_string(), v.clone()))
            .collect()
    }

    fn mkdirs(&mut self, path: &str) {
        let mut missing = Vec::new();
        let mut cur = Some(path);
        while let Some(p) = cur {
            if self.is_dir(p) {
                break;
            }
            missing.push(p.to_string());
            cur = remote_parent(p);
        }
        for p in missing.into_iter().rev() {
            self.nodes.insert(p, Node::Dir);
        }
    }

    fn record(&mut self, call: String, path: &str) -> Result<()> {
        self.calls.push(call);
        if self.failing.contains(path) {
            bail!("injected failure on {path}");
        }
        Ok(())
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::default())),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a directory and any missing ancestors.
    pub fn add_dir(&self, path: &str) {
        self.tree().mkdirs(path);
    }

    /// Create a file, creating missing ancestors.
    pub fn add_file(&self, path: &str, mtime: i64, data: &[u8]) {
        let mut tree = self.tree();
        if let Some(p) = remote_parent(path) {
            tree.mkdirs(p);
        }
        tree.nodes.insert(
            path.to_string(),
            Node::File {
                mtime: mtime as f64,
                data: data.to_vec(),
            },
        );
    }

    pub fn exists(&self, path: &str) -> bool {
        self.tree().nodes.contains_key(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.tree().is_dir(path)
    }

    pub fn mtime(&self, path: &str) -> Option<f64> {
        match self.tree().nodes.get(path) {
            Some(Node::File { mtime, .. }) => Some(*mtime),
            _ => None,
        }
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.tree().nodes.get(path) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// All file paths, sorted.
    pub fn files(&self) -> Vec<String> {
        self.tree()
            .nodes
            .iter()
            .filter(|(_, n)| matches!(n, Node::File { .. }))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.tree().calls.clone()
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.tree().calls.iter().filter(|c| c.as_str() == call).count()
    }

    pub fn clear_calls(&self) {
        self.tree().calls.clear();
    }

    /// Make every operation touching `path` fail.
    pub fn fail_on(&self, path: &str) {
        self.tree().failing.insert(path.to_string());
    }

    /// Simulate the transport dropping underneath the session.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn closes(&self) -> usize {
        self.tree().closes
    }
}

#[async_trait]
impl RemoteFs for MemoryRemote {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let mut tree = self.tree();
        tree.record(format!("readdir {path}"), path)?;
        if !tree.is_dir(path) {
            bail!("no such directory: {path}");
        }
        Ok(tree
            .children(path)
            .into_iter()
            .map(|(name, node)| RemoteEntry {
                name,
                stat: node_stat(&node),
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<Option<RemoteStat>> {
        let mut tree = self.tree();
        tree.record(format!("stat {path}"), path)?;
        if path == "/" {
            return Ok(Some(node_stat(&Node::Dir)));
        }
        Ok(tree.nodes.get(path).map(node_stat))
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let data = {
            let mut tree = self.tree();
            tree.record(format!("get {remote}"), remote)?;
            match tree.nodes.get(remote) {
                Some(Node::File { data, .. }) => data.clone(),
                _ => bail!("no such file: {remote}"),
            }
        };
        tokio::fs::write(local, data).await?;
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let data = tokio::fs::read(local).await?;
        let mut tree = self.tree();
        tree.record(format!("put {remote}"), remote)?;
        let dir = remote_parent(remote).ok_or_else(|| anyhow!("invalid path: {remote}"))?;
        if !tree.is_dir(dir) {
            bail!("no such directory: {dir}");
        }
        if tree.is_dir(remote) {
            bail!("is a directory: {remote}");
        }
        tree.nodes.insert(
            remote.to_string(),
            Node::File {
                mtime: now_secs(),
                data,
            },
        );
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let mut tree = self.tree();
        tree.record(format!("unlink {path}"), path)?;
        match tree.nodes.get(path) {
            Some(Node::File { .. }) => {
                tree.nodes.remove(path);
                Ok(())
            }
            _ => bail!("no such file: {path}"),
        }
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let mut tree = self.tree();
        tree.record(format!("mkdir {path}"), path)?;
        if tree.nodes.contains_key(path) || path == "/" {
            bail!("already exists: {path}");
        }
        let dir = remote_parent(path).ok_or_else(|| anyhow!("invalid path: {path}"))?;
        if !tree.is_dir(dir) {
            bail!("no such directory: {dir}");
        }
        tree.nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        let mut tree = self.tree();
        tree.record(format!("rmdir {path}"), path)?;
        if !matches!(tree.nodes.get(path), Some(Node::Dir)) {
            bail!("no such directory: {path}");
        }
        if !tree.children(path).is_empty() {
            bail!("directory not empty: {path}");
        }
        tree.nodes.remove(path);
        Ok(())
    }

    async fn set_mtime(&self, path: &str, mtime: i64) -> Result<()> {
        let mut tree = self.tree();
        tree.record(format!("utimes {path} {mtime}"), path)?;
        match tree.nodes.get_mut(path) {
            Some(Node::File { mtime: m, .. }) => {
                *m = mtime as f64;
                Ok(())
            }
            _ => bail!("no such file: {path}"),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.tree().closes += 1;
        Ok(())
    }
}

fn node_stat(node: &Node) -> RemoteStat {
    match node {
        Node::Dir => RemoteStat {
            kind: EntryKind::Dir,
            mtime: None,
            size: None,
        },
        Node::File { mtime, data } => RemoteStat {
            kind: EntryKind::File,
            mtime: Some(*mtime),
            size: Some(data.len() as u64),
        },
    }
}

/// Hands out clones of one [`MemoryRemote`], counting connections.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    remote: MemoryRemote,
    connects: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub fn new(remote: MemoryRemote) -> Self {
        Self {
            remote,
            connects: Arc::new(AtomicUsize::new(0)),
            refuse: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make subsequent connection attempts fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteFs>> {
        if self.refuse.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.remote.connected.store(true, Ordering::SeqCst);
        Ok(Box::new(self.remote.clone()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strict_directory_semantics() {
        let remote = MemoryRemote::new();
        remote.add_dir("/srv");
        assert!(remote.create_dir("/srv/a/b").await.is_err());
        remote.create_dir("/srv/a").await.unwrap();
        remote.create_dir("/srv/a/b").await.unwrap();
        remote.add_file("/srv/a/b/f", 1, b"x");
        assert!(remote.remove_dir("/srv/a/b").await.is_err());
        remote.remove_file("/srv/a/b/f").await.unwrap();
        remote.remove_dir("/srv/a/b").await.unwrap();

        let names: Vec<_> = remote
            .read_dir("/srv")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a"]);
    }
}
