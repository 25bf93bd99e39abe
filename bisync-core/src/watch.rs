use crate::aggregate::ChangeBatch;
use crate::config::NotifyLevel;
use crate::engine::{SyncEngine, SyncReport};
use crate::error::{Result, SyncError};
use crate::event::{from_notify, WatchEvent};
use crate::filter::PathFilter;
use crate::notifier::{summary, Notifier};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Public handle returned to callers for controlling a running watch.
#[derive(Debug)]
pub struct WatchHandle {
    name: String,
    ctrl_tx: mpsc::Sender<WatchCommand>,
    state_rx: watch::Receiver<WatchState>,
    join: JoinHandle<Result<SyncReport>>,
}

impl WatchHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the watch to flush what it has and shut down.
    pub fn stop(&self) {
        let _ = self.ctrl_tx.try_send(WatchCommand::Stop);
    }

    /// Flush the pending batch now instead of waiting for the debounce window.
    pub async fn flush(&self) {
        let _ = self.ctrl_tx.send(WatchCommand::Flush).await;
    }

    pub fn state(&self) -> WatchState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.state_rx.clone()
    }

    /// Wait for the watch to end; returns the totals over all flushes.
    pub async fn join(self) -> Result<SyncReport> {
        match self.join.await {
            Ok(res) => res,
            Err(e) => Err(SyncError::Transport {
                endpoint: self.name,
                message: format!("watch task aborted: {e}"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WatchCommand {
    Flush,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Running,
    Flushing,
    Stopped,
    Failed(String),
}

/// Start watching `engine`'s local root, uploading changes as they settle.
///
/// With `push_first`, a full push runs over the same session once the watcher
/// is armed, so edits made during that push are still picked up.
pub fn spawn_watch(engine: SyncEngine, notifier: Arc<dyn Notifier>, push_first: bool) -> WatchHandle {
    let (ctrl_tx, ctrl_rx) = mpsc::channel(4);
    let (state_tx, state_rx) = watch::channel(WatchState::Idle);
    let name = engine.mapping().name.clone();
    let span = info_span!("watch", mapping = %name);
    let task = WatchTask {
        engine,
        notifier,
        push_first,
    };
    let join = tokio::spawn(task.run(ctrl_rx, state_tx).instrument(span));
    WatchHandle {
        name,
        ctrl_tx,
        state_rx,
        join,
    }
}

struct WatchTask {
    engine: SyncEngine,
    notifier: Arc<dyn Notifier>,
    push_first: bool,
}

impl WatchTask {
    async fn run(
        mut self,
        mut ctrl_rx: mpsc::Receiver<WatchCommand>,
        state_tx: watch::Sender<WatchState>,
    ) -> Result<SyncReport> {
        let outcome = self.watch_loop(&mut ctrl_rx, &state_tx).await;
        let closed = self.engine.close().await;
        let outcome = match (outcome, closed) {
            (Ok(total), Ok(())) => Ok(total),
            (Ok(_), Err(e)) | (Err(e), _) => Err(e),
        };
        if outcome.is_err() {
            self.announce("watch", &outcome);
        }
        match &outcome {
            Ok(total) => {
                info!("watch stopped: {total}");
                let _ = state_tx.send(WatchState::Stopped);
            }
            Err(e) => {
                error!("watch aborted: {e}");
                let _ = state_tx.send(WatchState::Failed(e.to_string()));
            }
        }
        outcome
    }

    async fn watch_loop(
        &mut self,
        ctrl_rx: &mut mpsc::Receiver<WatchCommand>,
        state_tx: &watch::Sender<WatchState>,
    ) -> Result<SyncReport> {
        let (ev_tx, mut ev_rx) = mpsc::channel::<WatchEvent>(1024);
        let root = self.engine.mapping().local.clone();
        let root = tokio::fs::canonicalize(&root).await.unwrap_or(root);
        // dropped on every exit path, which tears the OS watch down
        let _watcher = spawn_watcher(root.clone(), self.engine.filter().clone(), ev_tx)?;
        info!("watching {}", root.display());

        let mut total = SyncReport::default();
        if self.push_first {
            let _ = state_tx.send(WatchState::Flushing);
            let pushed = self.engine.push_tree().await;
            self.announce("push", &pushed);
            total += pushed?;
        }
        let _ = state_tx.send(WatchState::Running);

        let debounce = Duration::from_millis(self.engine.mapping().options.debounce_ms);
        let mut batch = ChangeBatch::new();
        let mut sleeper: Option<std::pin::Pin<Box<Sleep>>> = None;
        loop {
            tokio::select! {
                cmd = ctrl_rx.recv() => {
                    match cmd {
                        Some(WatchCommand::Flush) => {
                            sleeper = None;
                            total += self.flush(&mut batch, state_tx).await?;
                        }
                        Some(WatchCommand::Stop) | None => break,
                    }
                }
                Some(ev) = ev_rx.recv() => {
                    debug!("{ev:?}");
                    batch.record(&ev);
                    sleeper = Some(Box::pin(sleep(debounce)));
                }
                _ = async { if let Some(ref mut s) = sleeper { s.as_mut().await } }, if sleeper.is_some() => {
                    sleeper = None;
                    total += self.flush(&mut batch, state_tx).await?;
                }
            }
        }
        // events already queued belong to the final batch
        while let Ok(ev) = ev_rx.try_recv() {
            batch.record(&ev);
        }
        total += self.flush(&mut batch, state_tx).await?;
        Ok(total)
    }

    async fn flush(&mut self, batch: &mut ChangeBatch, state_tx: &watch::Sender<WatchState>) -> Result<SyncReport> {
        if batch.is_empty() {
            return Ok(SyncReport::default());
        }
        let pending = batch.take();
        debug!("flushing {} pending paths", pending.len());
        let _ = state_tx.send(WatchState::Flushing);
        let report = self.engine.apply_batch(pending).await?;
        let _ = state_tx.send(WatchState::Running);
        self.announce("watch", &Ok(report));
        Ok(report)
    }

    fn announce(&self, verb: &str, outcome: &Result<SyncReport>) {
        let level: NotifyLevel = self.engine.mapping().options.notify;
        if let Some(line) = summary(level, verb, &self.engine.mapping().name, outcome) {
            self.notifier.notify(&line);
        }
    }
}

fn spawn_watcher(
    root: PathBuf,
    filter: PathFilter,
    ev_tx: mpsc::Sender<WatchEvent>,
) -> Result<RecommendedWatcher> {
    let event_root = root.clone();
    let armed = Arc::new(AtomicBool::new(false));
    let armed_cb = armed.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for ev in from_notify(event, &event_root, &filter) {
                    let _ = ev_tx.blocking_send(ev);
                }
            }
            Err(e) if ignorable(&e, armed_cb.load(Ordering::SeqCst)) => debug!("ignoring watch error: {e}"),
            Err(e) => warn!("watch error: {e}"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    armed.store(true, Ordering::SeqCst);
    Ok(watcher)
}

/// Transient paths vanishing while the recursive watch is being set up
/// surface as EPERM on some platforms. Once armed, EPERM is reported like
/// any other watcher error.
fn ignorable(e: &notify::Error, armed: bool) -> bool {
    !armed && is_permission_denied(e)
}

fn is_permission_denied(e: &notify::Error) -> bool {
    matches!(&e.kind, notify::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, Mapping, SyncOptions};
    use crate::memory::{MemoryConnector, MemoryRemote};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl Notifier for Collect {
        fn notify(&self, summary: &str) {
            self.0.lock().unwrap().push(summary.to_string());
        }
    }

    fn mapping(local: PathBuf) -> Mapping {
        Mapping {
            name: "w".into(),
            local,
            remote: "/srv".into(),
            endpoint: Endpoint {
                host: "h".into(),
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
                debounce_ms: 50,
                notify: NotifyLevel::All,
                ..SyncOptions::default()
            },
        }
    }

    #[test]
    fn eperm_is_only_ignored_during_setup() {
        let e = notify::Error::io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(ignorable(&e, false));
        assert!(!ignorable(&e, true));
        assert!(!ignorable(&notify::Error::generic("other"), false));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_flushes_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        remote.add_dir("/srv");
        let connector = MemoryConnector::new(remote.clone());
        let engine = SyncEngine::new(mapping(dir.path().to_path_buf()), Arc::new(connector)).unwrap();
        let notes = Arc::new(Collect::default());
        let handle = spawn_watch(engine, notes.clone(), false);

        let mut state = handle.subscribe();
        state.wait_for(|s| *s == WatchState::Running).await.unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();

        // wait for the debounced flush to land
        for _ in 0..100 {
            if remote.exists("/srv/hello.txt") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.stop();
        let total = handle.join().await.unwrap();
        assert!(total.changed >= 1);
        assert_eq!(remote.read("/srv/hello.txt").unwrap(), b"hi");
        assert_eq!(remote.closes(), 1);
        assert!(notes.0.lock().unwrap().iter().any(|n| n.starts_with("watch w:")));
    }

    #[tokio::test]
    async fn missing_root_fails_the_watch() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SyncEngine::new(
            mapping(dir.path().join("absent")),
            Arc::new(MemoryConnector::new(MemoryRemote::new())),
        )
        .unwrap();
        let handle = spawn_watch(engine, Arc::new(Collect::default()), false);
        let mut state = handle.subscribe();
        assert!(handle.join().await.is_err());
        assert!(matches!(*state.borrow_and_update(), WatchState::Failed(_)));
    }

    #[tokio::test]
    async fn push_first_reuses_the_watch_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("seed.txt"), "s").unwrap();
        let remote = MemoryRemote::new();
        remote.add_file("/srv/orphan", 1, b"");
        let connector = MemoryConnector::new(remote.clone());
        let engine = SyncEngine::new(mapping(dir.path().to_path_buf()), Arc::new(connector.clone())).unwrap();
        let notes = Arc::new(Collect::default());
        let handle = spawn_watch(engine, notes.clone(), true);

        let mut state = handle.subscribe();
        state.wait_for(|s| *s == WatchState::Running).await.unwrap();
        handle.stop();
        let total = handle.join().await.unwrap();

        assert_eq!(total.changed, 1);
        assert_eq!(total.deleted, 1);
        assert_eq!(remote.files(), vec!["/srv/seed.txt"]);
        assert_eq!(connector.connects(), 1);
        assert!(notes.0.lock().unwrap().iter().any(|n| n.starts_with("push w:")));
    }
}
