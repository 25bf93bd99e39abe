//! Core library for bisync: keeps a local directory tree and a remote SFTP tree mirrored.

mod aggregate;
mod config;
mod diff;
mod engine;
mod error;
mod event;
mod filter;
mod local;
mod maintain;
mod manager;
pub mod memory;
mod notifier;
mod path_set;
mod remote;
mod session;
mod utils;
mod walker;
mod watch;

pub use aggregate::ChangeBatch;
pub use config::{Config, Endpoint, Mapping, NotifyLevel, Pattern, SyncOptions};
pub use diff::{DiffPolicy, Rounding};
pub use engine::{SyncEngine, SyncReport};
pub use error::{FileOp, Result, SyncError};
pub use event::{from_notify, WatchEvent};
pub use filter::PathFilter;
pub use local::{LocalFile, LocalTree};
pub use manager::{SyncManager, Verb};
pub use notifier::{summary, LogNotifier, Notifier};
pub use path_set::PathSet;
pub use remote::{Connector, EntryKind, RemoteEntry, RemoteFs, RemoteStat};
pub use session::{RemoteSession, SessionState};
pub use walker::{RemoteFile, RemoteWalker};
pub use watch::{spawn_watch, WatchCommand, WatchHandle, WatchState};
