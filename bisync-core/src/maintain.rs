//! Directory bookkeeping around file creation and deletion.
//!
//! Both sides of a mapping go through [`DirOps`], so parent creation before a
//! write and pruning after a delete behave identically locally and remotely.

use crate::error::Result;
use crate::session::RemoteSession;
use crate::utils::{join_remote, parent_of, remote_parent};
use async_trait::async_trait;
use tracing::debug;

/// Directory primitives on root-relative paths (`""` is the root).
#[async_trait]
pub trait DirOps: Send {
    async fn dir_exists(&mut self, rel: &str) -> Result<bool>;
    async fn make_dir(&mut self, rel: &str) -> Result<()>;
    async fn dir_is_empty(&mut self, rel: &str) -> Result<bool>;
    async fn remove_empty_dir(&mut self, rel: &str) -> Result<()>;
}

/// Make sure every ancestor directory of `file_rel` exists.
///
/// Walks upward from the immediate parent until an existing directory is
/// found, then creates the missing ones top-down. Returns how many were made.
pub async fn ensure_parent_dirs<D: DirOps + ?Sized>(dirs: &mut D, file_rel: &str) -> Result<usize> {
    let mut missing = Vec::new();
    let mut dir = parent_of(file_rel);
    loop {
        if dirs.dir_exists(dir).await? {
            break;
        }
        missing.push(dir);
        if dir.is_empty() {
            break;
        }
        dir = parent_of(dir);
    }
    for dir in missing.iter().rev() {
        debug!("creating directory '{dir}'");
        dirs.make_dir(dir).await?;
    }
    Ok(missing.len())
}

/// Remove the now-empty ancestors of a deleted `file_rel`, stopping at the
/// first non-empty directory. The root itself is never removed.
pub async fn prune_empty_parents<D: DirOps + ?Sized>(dirs: &mut D, file_rel: &str) -> Result<usize> {
    let mut removed = 0;
    let mut dir = parent_of(file_rel);
    while !dir.is_empty() {
        if !dirs.dir_is_empty(dir).await? {
            break;
        }
        debug!("pruning empty directory '{dir}'");
        dirs.remove_empty_dir(dir).await?;
        removed += 1;
        dir = parent_of(dir);
    }
    Ok(removed)
}

/// The remote half of a mapping, borrowed for directory maintenance.
pub struct RemoteTree<'a> {
    pub session: &'a mut RemoteSession,
    pub root: &'a str,
}

impl<'a> RemoteTree<'a> {
    pub fn new(session: &'a mut RemoteSession, root: &'a str) -> Self {
        Self { session, root }
    }

    fn path(&self, rel: &str) -> String {
        join_remote(self.root, rel)
    }

    /// Create the root along with any missing ancestors, like `create_dir_all`.
    async fn make_root(&mut self) -> Result<()> {
        let mut missing = vec![self.root.to_string()];
        let mut cur = remote_parent(self.root);
        while let Some(dir) = cur {
            if self.session.stat(dir).await?.is_some_and(|s| s.is_dir()) {
                break;
            }
            missing.push(dir.to_string());
            cur = remote_parent(dir);
        }
        for dir in missing.iter().rev() {
            debug!("creating directory '{dir}'");
            self.session.create_dir(dir).await?;
        }
        Ok(())
    }

    /// Delete a remote directory and everything under it, post-order.
    pub async fn remove_all(&mut self, rel: &str) -> Result<()> {
        let mut stack: Vec<(String, bool)> = vec![(self.path(rel), false)];
        while let Some((dir, visited)) = stack.pop() {
            if visited {
                self.session.remove_dir(&dir).await?;
                continue;
            }
            stack.push((dir.clone(), true));
            for entry in self.session.read_dir(&dir).await? {
                let child = join_remote(&dir, &entry.name);
                if entry.stat.is_dir() {
                    stack.push((child, false));
                } else {
                    self.session.remove_file(&child).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DirOps for RemoteTree<'_> {
    async fn dir_exists(&mut self, rel: &str) -> Result<bool> {
        let path = self.path(rel);
        Ok(self.session.stat(&path).await?.is_some_and(|s| s.is_dir()))
    }

    async fn make_dir(&mut self, rel: &str) -> Result<()> {
        if rel.is_empty() {
            return self.make_root().await;
        }
        let path = self.path(rel);
        self.session.create_dir(&path).await
    }

    async fn dir_is_empty(&mut self, rel: &str) -> Result<bool> {
        let path = self.path(rel);
        Ok(self.session.read_dir(&path).await?.is_empty())
    }

    async fn remove_empty_dir(&mut self, rel: &str) -> Result<()> {
        let path = self.path(rel);
        self.session.remove_dir(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncOptions;
    use crate::local::LocalTree;
    use crate::memory::{MemoryConnector, MemoryRemote};
    use std::fs;
    use std::sync::Arc;

    fn session(remote: &MemoryRemote) -> RemoteSession {
        let options = SyncOptions {
            retry_max: 0,
            ..SyncOptions::default()
        };
        RemoteSession::new(Arc::new(MemoryConnector::new(remote.clone())), &options)
    }

    #[tokio::test]
    async fn remote_creates_all_missing_ancestors_top_down() {
        let remote = MemoryRemote::new();
        remote.add_dir("/srv");
        let mut session = session(&remote);
        let mut tree = RemoteTree::new(&mut session, "/srv");

        assert_eq!(ensure_parent_dirs(&mut tree, "a/b/c/file.txt").await.unwrap(), 3);
        let mkdirs: Vec<_> = remote
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("mkdir"))
            .collect();
        assert_eq!(mkdirs, vec!["mkdir /srv/a", "mkdir /srv/a/b", "mkdir /srv/a/b/c"]);

        remote.clear_calls();
        let mut tree = RemoteTree::new(&mut session, "/srv");
        assert_eq!(ensure_parent_dirs(&mut tree, "a/b/c/other.txt").await.unwrap(), 0);
        assert_eq!(remote.calls(), vec!["stat /srv/a/b/c"]);
    }

    #[tokio::test]
    async fn remote_root_is_created_with_its_ancestors() {
        let remote = MemoryRemote::new();
        remote.add_dir("/srv");
        let mut session = session(&remote);
        let mut tree = RemoteTree::new(&mut session, "/srv/sites/new");

        assert_eq!(ensure_parent_dirs(&mut tree, "x/y.txt").await.unwrap(), 2);
        let mkdirs: Vec<_> = remote
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("mkdir"))
            .collect();
        assert_eq!(
            mkdirs,
            vec!["mkdir /srv/sites", "mkdir /srv/sites/new", "mkdir /srv/sites/new/x"]
        );
    }

    #[tokio::test]
    async fn remote_prunes_up_to_first_non_empty() {
        let remote = MemoryRemote::new();
        remote.add_file("/srv/a/keep.txt", 1, b"");
        remote.add_dir("/srv/a/b/c");
        let mut session = session(&remote);
        let mut tree = RemoteTree::new(&mut session, "/srv");

        assert_eq!(prune_empty_parents(&mut tree, "a/b/c/gone.txt").await.unwrap(), 2);
        assert!(!remote.exists("/srv/a/b"));
        assert!(remote.is_dir("/srv/a"));
    }

    #[tokio::test]
    async fn pruning_never_touches_root() {
        let remote = MemoryRemote::new();
        remote.add_dir("/srv/only");
        let mut session = session(&remote);
        let mut tree = RemoteTree::new(&mut session, "/srv");
        assert_eq!(prune_empty_parents(&mut tree, "only/x").await.unwrap(), 1);
        assert_eq!(prune_empty_parents(&mut tree, "top.txt").await.unwrap(), 0);
        assert!(remote.is_dir("/srv"));
        assert!(!remote.calls().iter().any(|c| c == "rmdir /srv"));
    }

    #[tokio::test]
    async fn remote_remove_all() {
        let remote = MemoryRemote::new();
        remote.add_file("/srv/d/a", 1, b"");
        remote.add_file("/srv/d/e/b", 1, b"");
        remote.add_file("/srv/keep", 1, b"");
        let mut session = session(&remote);
        RemoteTree::new(&mut session, "/srv").remove_all("d").await.unwrap();
        assert!(!remote.exists("/srv/d"));
        assert_eq!(remote.files(), vec!["/srv/keep"]);
    }

    #[tokio::test]
    async fn local_side_is_symmetric() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("a/keep.txt"), "").unwrap();
        let mut tree = LocalTree::new(root);

        assert_eq!(ensure_parent_dirs(&mut tree, "a/b/c/file.txt").await.unwrap(), 2);
        assert!(root.join("a/b/c").is_dir());
        assert_eq!(ensure_parent_dirs(&mut tree, "a/b/c/file.txt").await.unwrap(), 0);

        assert_eq!(prune_empty_parents(&mut tree, "a/b/c/file.txt").await.unwrap(), 2);
        assert!(!root.join("a/b").exists());
        assert!(root.join("a").is_dir());
    }

    #[tokio::test]
    async fn local_root_is_created_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = LocalTree::new(dir.path().join("mirror"));
        assert_eq!(ensure_parent_dirs(&mut tree, "x/y.txt").await.unwrap(), 2);
        assert!(dir.path().join("mirror/x").is_dir());
    }
}
