use crate::{
    engine::{SyncEngine, SyncReport},
    error::{Result, SyncError},
    notifier::{summary, Notifier},
    watch::{spawn_watch, WatchHandle},
};
use futures::future::join_all;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Push,
    Pull,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Push => "push",
            Verb::Pull => "pull",
        })
    }
}

/// Drives many mappings at once. Each mapping keeps its own session.
pub struct SyncManager {
    notifier: Arc<dyn Notifier>,
    watches: IndexMap<String, WatchHandle>, // keyed by mapping name
}

impl SyncManager {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            watches: IndexMap::new(),
        }
    }

    /// Run `verb` on every engine concurrently; one result per engine, in input order.
    pub async fn run_all(&self, verb: Verb, engines: Vec<SyncEngine>) -> Vec<(String, Result<SyncReport>)> {
        let tasks = engines.into_iter().map(|mut engine| {
            let notifier = self.notifier.clone();
            let name = engine.mapping().name.clone();
            let join = tokio::spawn(async move {
                let outcome = match verb {
                    Verb::Push => engine.push().await,
                    Verb::Pull => engine.pull().await,
                };
                let level = engine.mapping().options.notify;
                if let Some(line) = summary(level, &verb.to_string(), &engine.mapping().name, &outcome) {
                    notifier.notify(&line);
                }
                outcome
            });
            async move {
                let outcome = join.await.unwrap_or_else(|e| {
                    Err(SyncError::Transport {
                        endpoint: name.clone(),
                        message: format!("{verb} task aborted: {e}"),
                    })
                });
                (name, outcome)
            }
        });
        join_all(tasks).await
    }

    /// Start watching with `engine`; a second watch on the same mapping is refused.
    pub fn start_watch(&mut self, engine: SyncEngine, push_first: bool) -> bool {
        let name = engine.mapping().name.clone();
        if self.watches.contains_key(&name) {
            return false;
        }
        let handle = spawn_watch(engine, self.notifier.clone(), push_first);
        self.watches.insert(name, handle);
        true
    }

    pub fn watch(&self, name: &str) -> Option<&WatchHandle> {
        self.watches.get(name)
    }

    pub fn stop(&mut self, name: &str) {
        if let Some(h) = self.watches.get(name) {
            h.stop();
        }
    }

    pub fn stop_all(&self) {
        for h in self.watches.values() {
            h.stop();
        }
    }

    /// Wait for every watch to end and hand back their totals.
    pub async fn join_all(&mut self) -> Vec<(String, Result<SyncReport>)> {
        let handles: Vec<_> = self.watches.drain(..).collect();
        join_all(handles.into_iter().map(|(name, h)| async move { (name, h.join().await) })).await
    }
}
