use crate::aggregate::ChangeBatch;
use crate::config::Mapping;
use crate::diff::DiffPolicy;
use crate::error::Result;
use crate::filter::PathFilter;
use crate::local::LocalTree;
use crate::maintain::{ensure_parent_dirs, prune_empty_parents, RemoteTree};
use crate::path_set::PathSet;
use crate::remote::Connector;
use crate::session::{RemoteSession, SessionState};
use crate::walker::RemoteWalker;
use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};

/// Outcome counts of one push, pull or watch flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub changed: usize,
    pub deleted: usize,
    /// Files seen but already up to date.
    pub skipped: usize,
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, rhs: Self) {
        self.changed += rhs.changed;
        self.deleted += rhs.deleted;
        self.skipped += rhs.skipped;
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} changed, {} deleted, {} unchanged",
            self.changed, self.deleted, self.skipped
        )
    }
}

/// Reconciles one mapping over its single [`RemoteSession`].
pub struct SyncEngine {
    mapping: Arc<Mapping>,
    session: RemoteSession,
    local: LocalTree,
    filter: PathFilter,
    policy: DiffPolicy,
}

impl SyncEngine {
    /// Fails when the mapping's include or exclude patterns do not compile.
    pub fn new(mapping: Mapping, connector: Arc<dyn Connector>) -> Result<Self> {
        let filter = PathFilter::new(&mapping.options.include, &mapping.options.exclude)?;
        let session = RemoteSession::new(connector, &mapping.options);
        let local = LocalTree::new(mapping.local.clone());
        let policy = DiffPolicy::new(mapping.options.rounding);
        Ok(Self {
            mapping: Arc::new(mapping),
            session,
            local,
            filter,
            policy,
        })
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Full local-to-remote reconciliation; the session is closed afterwards.
    pub async fn push(&mut self) -> Result<SyncReport> {
        let span = info_span!("push", mapping = %self.mapping.name);
        async {
            let outcome = self.push_tree().await;
            let closed = self.session.close().await;
            conclude(outcome, closed)
        }
        .instrument(span)
        .await
    }

    /// Full remote-to-local reconciliation; the session is closed afterwards.
    pub async fn pull(&mut self) -> Result<SyncReport> {
        let span = info_span!("pull", mapping = %self.mapping.name);
        async {
            let outcome = self.pull_tree().await;
            let closed = self.session.close().await;
            conclude(outcome, closed)
        }
        .instrument(span)
        .await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.session.close().await
    }

    /// Push without closing the session.
    pub async fn push_tree(&mut self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut present = PathSet::new();

        let local_files = self.local.list_files(&self.filter, false).await?;
        for file in local_files {
            present.insert(&file.rel);
            let remote = self.mapping.remote_path(&file.rel);
            let target = self.session.stat(&remote).await?;
            let target_mtime = target.filter(|s| s.is_file()).and_then(|s| s.mtime);
            match self.policy.decide(Some(file.mtime), target_mtime) {
                Some(mtime) => {
                    self.upload(&file.rel, mtime).await?;
                    report.changed += 1;
                }
                None => {
                    debug!("{} unchanged", file.rel);
                    report.skipped += 1;
                }
            }
        }

        if self.session.stat(&self.mapping.remote).await?.is_none() {
            debug!("remote root {} absent, nothing to prune", self.mapping.remote);
            return Ok(report);
        }
        let mut walker = RemoteWalker::new(self.mapping.remote.clone());
        while let Some(file) = walker.next(&mut self.session).await? {
            if present.contains(&file.rel) || !self.filter.check(&file.rel) {
                continue;
            }
            self.delete_remote_file(&file.rel).await?;
            report.deleted += 1;
        }
        info!("push finished: {report}");
        Ok(report)
    }

    /// Pull without closing the session.
    pub async fn pull_tree(&mut self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut present = PathSet::new();

        let mut walker = RemoteWalker::new(self.mapping.remote.clone());
        while let Some(file) = walker.next(&mut self.session).await? {
            if !self.filter.check(&file.rel) {
                continue;
            }
            present.insert(&file.rel);
            let target = self.local.stat(&file.rel).await?;
            let target_mtime = target.filter(|s| s.is_file).and_then(|s| s.mtime);
            match self.policy.decide(file.stat.mtime, target_mtime) {
                Some(mtime) => {
                    self.download(&file.rel, mtime).await?;
                    report.changed += 1;
                }
                None => {
                    debug!("{} unchanged", file.rel);
                    report.skipped += 1;
                }
            }
        }

        let local_files = self.local.list_files(&self.filter, true).await?;
        for rel in present.not_in(local_files.into_iter().map(|f| f.rel)) {
            self.delete_local_file(&rel).await?;
            report.deleted += 1;
        }
        info!("pull finished: {report}");
        Ok(report)
    }

    /// Upload one file, creating remote parents first and stamping `mtime` on the copy.
    pub async fn upload(&mut self, rel: &str, mtime: i64) -> Result<()> {
        let remote = self.mapping.remote_path(rel);
        ensure_parent_dirs(&mut RemoteTree::new(&mut self.session, &self.mapping.remote), rel).await?;
        self.session.upload(&self.local.path(rel), &remote).await?;
        self.session.set_mtime(&remote, mtime).await?;
        info!("{rel} uploaded");
        Ok(())
    }

    /// Download one file, creating local parents first and stamping `mtime` on the copy.
    pub async fn download(&mut self, rel: &str, mtime: i64) -> Result<()> {
        let remote = self.mapping.remote_path(rel);
        ensure_parent_dirs(&mut self.local, rel).await?;
        self.session.download(&remote, &self.local.path(rel)).await?;
        self.local.set_mtime(rel, mtime)?;
        info!("{rel} downloaded");
        Ok(())
    }

    pub async fn delete_remote_file(&mut self, rel: &str) -> Result<()> {
        let remote = self.mapping.remote_path(rel);
        self.session.remove_file(&remote).await?;
        info!("{rel} deleted from server");
        prune_empty_parents(&mut RemoteTree::new(&mut self.session, &self.mapping.remote), rel).await?;
        Ok(())
    }

    pub async fn delete_local_file(&mut self, rel: &str) -> Result<()> {
        self.local.remove_file(rel).await?;
        info!("{rel} deleted locally");
        prune_empty_parents(&mut self.local, rel).await?;
        Ok(())
    }

    /// Apply one watch-mode batch: every changed path is uploaded, then every
    /// deleted path is removed remotely.
    ///
    /// Changed paths that are local directories upload every file beneath
    /// them; paths that no longer exist locally are skipped. Deleted paths
    /// that are remote directories are removed with their contents.
    pub async fn apply_batch(&mut self, batch: ChangeBatch) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for rel in batch.changed {
            match self.local.stat(&rel).await? {
                Some(st) if st.is_file => {
                    let mtime = self.policy.rounding.apply(st.mtime.unwrap_or(0.0));
                    self.upload(&rel, mtime).await?;
                    report.changed += 1;
                }
                Some(st) if st.is_dir => {
                    let files = self.local.list_files_under(&rel, &self.filter, true).await?;
                    for file in files {
                        let mtime = self.policy.rounding.apply(file.mtime);
                        self.upload(&file.rel, mtime).await?;
                        report.changed += 1;
                    }
                }
                _ => {
                    debug!("{rel} vanished before upload");
                    report.skipped += 1;
                }
            }
        }
        for rel in batch.deleted {
            let remote = self.mapping.remote_path(&rel);
            match self.session.stat(&remote).await? {
                Some(st) if st.is_dir() => {
                    RemoteTree::new(&mut self.session, &self.mapping.remote)
                        .remove_all(&rel)
                        .await?;
                    info!("{rel}/ deleted from server");
                    prune_empty_parents(&mut RemoteTree::new(&mut self.session, &self.mapping.remote), &rel)
                        .await?;
                    report.deleted += 1;
                }
                Some(_) => {
                    self.delete_remote_file(&rel).await?;
                    report.deleted += 1;
                }
                None => debug!("{rel} already absent remotely"),
            }
        }
        Ok(report)
    }
}

fn conclude(outcome: Result<SyncReport>, closed: Result<()>) -> Result<SyncReport> {
    match (outcome, closed) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                error!("closing session after failure: {close_err}");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, SyncOptions};
    use crate::event::WatchEvent;
    use crate::memory::{MemoryConnector, MemoryRemote};
    use filetime::FileTime;
    use std::fs;
    use std::path::Path;

    fn mapping(local: &Path) -> Mapping {
        Mapping {
            name: "test".into(),
            local: local.to_path_buf(),
            remote: "/srv".into(),
            endpoint: Endpoint {
                host: "localhost".into(),
                port: 22,
                user: "u".into(),
                password: None,
                private_key: None,
                key_path: None,
                passphrase: None,
                fingerprints: None,
            },
            options: SyncOptions {
                retry_max: 0,
                ..SyncOptions::default()
            },
        }
    }

    fn write(root: &Path, rel: &str, mtime: i64) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, rel).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    fn engine(local: &Path, remote: &MemoryRemote) -> SyncEngine {
        SyncEngine::new(mapping(local), Arc::new(MemoryConnector::new(remote.clone()))).unwrap()
    }

    #[tokio::test]
    async fn push_keeps_files_seen_locally() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x", 10);
        write(dir.path(), "y", 10);
        write(dir.path(), "z", 10);
        let remote = MemoryRemote::new();
        remote.add_file("/srv/z", 10, b"z");
        remote.add_file("/srv/w", 10, b"w");

        let report = engine(dir.path(), &remote).push().await.unwrap();
        assert_eq!(report, SyncReport { changed: 2, deleted: 1, skipped: 1 });
        assert_eq!(remote.files(), vec!["/srv/x", "/srv/y", "/srv/z"]);
        assert_eq!(remote.count_calls("put /srv/z"), 0);
    }

    #[tokio::test]
    async fn push_closes_session_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.txt", 10);
        let remote = MemoryRemote::new();
        remote.add_dir("/srv");
        remote.fail_on("/srv/bad.txt");

        let mut engine = engine(dir.path(), &remote);
        assert!(engine.push().await.is_err());
        assert_eq!(engine.session_state(), SessionState::Closed);
        assert_eq!(remote.closes(), 1);
    }

    #[tokio::test]
    async fn push_with_missing_local_root_fails_before_touching_remote() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        remote.add_file("/srv/keep", 1, b"");
        let err = engine(&dir.path().join("absent"), &remote).push().await;
        assert!(err.is_err());
        assert_eq!(remote.files(), vec!["/srv/keep"]);
    }

    #[tokio::test]
    async fn pull_prunes_local_orphans_and_their_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "old/deep/gone.txt", 10);
        write(dir.path(), ".git/HEAD", 10);
        let remote = MemoryRemote::new();
        remote.add_file("/srv/new.txt", 20, b"n");

        let report = engine(dir.path(), &remote).pull().await.unwrap();
        assert_eq!(report, SyncReport { changed: 1, deleted: 1, skipped: 0 });
        assert!(!dir.path().join("old").exists());
        assert!(dir.path().join(".git/HEAD").exists());
        assert_eq!(fs::read(dir.path().join("new.txt")).unwrap(), b"n");
    }

    #[tokio::test]
    async fn excluded_files_are_neither_sent_nor_deleted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.tmp", 10);
        let remote = MemoryRemote::new();
        remote.add_file("/srv/b.tmp", 10, b"");
        let mut m = mapping(dir.path());
        m.options.exclude = vec![crate::config::Pattern("*.tmp".into())];
        let mut engine = SyncEngine::new(m, Arc::new(MemoryConnector::new(remote.clone()))).unwrap();

        assert_eq!(engine.push().await.unwrap(), SyncReport::default());
        assert_eq!(remote.files(), vec!["/srv/b.tmp"]);
    }

    #[tokio::test]
    async fn push_creates_missing_remote_root_and_its_parents() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", 10);
        let remote = MemoryRemote::new();
        remote.add_dir("/srv");
        let mut m = mapping(dir.path());
        m.remote = "/srv/sites/new".into();
        let mut engine = SyncEngine::new(m, Arc::new(MemoryConnector::new(remote.clone()))).unwrap();

        let report = engine.push().await.unwrap();
        assert_eq!(report.changed, 1);
        assert!(remote.is_dir("/srv/sites"));
        assert_eq!(remote.files(), vec!["/srv/sites/new/index.html"]);
    }

    #[tokio::test]
    async fn invalid_exclude_is_refused_before_any_sync() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        remote.add_file("/srv/uploads/photo.jpg", 1, b"");
        let mut m = mapping(dir.path());
        m.options.exclude = vec![crate::config::Pattern("uploads/[**".into())];

        let res = SyncEngine::new(m, Arc::new(MemoryConnector::new(remote.clone())));
        assert!(matches!(res, Err(crate::error::SyncError::Config(_))));
        assert_eq!(remote.files(), vec!["/srv/uploads/photo.jpg"]);
    }

    #[tokio::test]
    async fn batch_uploads_before_deleting() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "new/name.txt", 30);
        let remote = MemoryRemote::new();
        remote.add_file("/srv/old/name.txt", 10, b"");

        let mut batch = ChangeBatch::new();
        batch.record(&WatchEvent::Removed("old/name.txt".into()));
        batch.record(&WatchEvent::Added("new/name.txt".into()));
        batch.record(&WatchEvent::Added("vanished.txt".into()));

        let mut engine = engine(dir.path(), &remote);
        let report = engine.apply_batch(batch).await.unwrap();
        assert_eq!(report, SyncReport { changed: 1, deleted: 1, skipped: 1 });
        assert_eq!(remote.files(), vec!["/srv/new/name.txt"]);
        assert!(!remote.exists("/srv/old"));
        assert_eq!(remote.mtime("/srv/new/name.txt"), Some(30.0));

        let calls = remote.calls();
        let put = calls.iter().position(|c| c == "put /srv/new/name.txt").unwrap();
        let unlink = calls.iter().position(|c| c == "unlink /srv/old/name.txt").unwrap();
        assert!(put < unlink);
    }

    #[tokio::test]
    async fn batch_handles_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "moved/a.txt", 5);
        write(dir.path(), "moved/in/b.txt", 5);
        let remote = MemoryRemote::new();
        remote.add_file("/srv/gone/x", 1, b"");
        remote.add_file("/srv/gone/y/z", 1, b"");
        remote.add_file("/srv/keep", 1, b"");

        let mut batch = ChangeBatch::new();
        batch.record(&WatchEvent::Added("moved".into()));
        batch.record(&WatchEvent::RemovedDir("gone".into()));
        batch.record(&WatchEvent::Removed("never-existed".into()));

        let report = engine(dir.path(), &remote).apply_batch(batch).await.unwrap();
        assert_eq!(report.changed, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(
            remote.files(),
            vec!["/srv/keep", "/srv/moved/a.txt", "/srv/moved/in/b.txt"]
        );
    }
}
