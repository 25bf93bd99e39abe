use crate::filter::PathFilter;
use crate::utils::relative_posix;
use notify::{
    event::{ModifyKind, RemoveKind, RenameMode},
    EventKind,
};
use std::path::{Path, PathBuf};

/// A local filesystem change, relative to the mapping's local root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchEvent {
    Added(String),
    Changed(String),
    Removed(String),
    RemovedDir(String),
}

enum Raw {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
    RemovedDir(PathBuf),
}

/// Convert a notify::Event into zero or more [`WatchEvent`]s under `root`.
///
/// Paths outside `root`, the root itself, and paths rejected by `filter` are dropped.
pub fn from_notify(event: notify::Event, root: &Path, filter: &PathFilter) -> Vec<WatchEvent> {
    let mut raw = Vec::new();
    match event.kind {
        EventKind::Create(_) => {
            raw.extend(event.paths.into_iter().map(Raw::Added));
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => raw.extend(event.paths.into_iter().map(Raw::Removed)),
            RenameMode::To => raw.extend(event.paths.into_iter().map(Raw::Added)),
            RenameMode::Both if event.paths.len() == 2 => {
                let mut paths = event.paths.into_iter();
                if let (Some(from), Some(to)) = (paths.next(), paths.next()) {
                    raw.push(Raw::Removed(from));
                    raw.push(Raw::Added(to));
                }
            }
            // backend could not tell which side of the rename this is
            _ => {
                for p in event.paths {
                    if p.exists() {
                        raw.push(Raw::Added(p));
                    } else {
                        raw.push(Raw::Removed(p));
                    }
                }
            }
        },
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Metadata(_) | ModifyKind::Any) => {
            raw.extend(event.paths.into_iter().map(Raw::Changed));
        }
        EventKind::Remove(RemoveKind::Folder) => {
            raw.extend(event.paths.into_iter().map(Raw::RemovedDir));
        }
        EventKind::Remove(_) => {
            raw.extend(event.paths.into_iter().map(Raw::Removed));
        }
        _ => {}
    }

    raw.into_iter()
        .filter_map(|r| {
            let (path, make): (PathBuf, fn(String) -> WatchEvent) = match r {
                Raw::Added(p) => (p, WatchEvent::Added),
                Raw::Changed(p) => (p, WatchEvent::Changed),
                Raw::Removed(p) => (p, WatchEvent::Removed),
                Raw::RemovedDir(p) => (p, WatchEvent::RemovedDir),
            };
            let rel = relative_posix(root, &path)?;
            filter.check(&rel).then(|| make(rel))
        })
        .collect()
}
