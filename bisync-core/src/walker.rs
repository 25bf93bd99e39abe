use crate::error::Result;
use crate::remote::{EntryKind, RemoteEntry, RemoteStat};
use crate::session::RemoteSession;
use crate::utils::join_remote;
use tracing::trace;

/// A regular file found under the walk root.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    /// Path relative to the walk root, forward-slashed.
    pub rel: String,
    pub stat: RemoteStat,
}

struct Frame {
    rel: String,
    entries: std::vec::IntoIter<RemoteEntry>,
}

/// Depth-first enumeration of a remote tree, one file per [`next`](Self::next).
///
/// Dotfiles are skipped without descending; entries that are neither files
/// nor directories are ignored. Directories are listed only when reached, so
/// pacing is entirely up to the caller. The session is borrowed per call,
/// leaving it free for transfers between steps.
pub struct RemoteWalker {
    root: String,
    stack: Vec<Frame>,
    started: bool,
}

impl RemoteWalker {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            stack: Vec::new(),
            started: false,
        }
    }

    async fn descend(&mut self, session: &mut RemoteSession, rel: String) -> Result<()> {
        let path = join_remote(&self.root, &rel);
        let entries = session.read_dir(&path).await?;
        trace!("listed {path}: {} entries", entries.len());
        self.stack.push(Frame {
            rel,
            entries: entries.into_iter(),
        });
        Ok(())
    }

    pub async fn next(&mut self, session: &mut RemoteSession) -> Result<Option<RemoteFile>> {
        if !self.started {
            self.started = true;
            self.descend(session, String::new()).await?;
        }
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some(entry) = frame.entries.next() else {
                self.stack.pop();
                continue;
            };
            if entry.name.starts_with('.') {
                continue;
            }
            let rel = if frame.rel.is_empty() {
                entry.name
            } else {
                format!("{}/{}", frame.rel, entry.name)
            };
            match entry.stat.kind {
                EntryKind::Dir => self.descend(session, rel).await?,
                EntryKind::File => return Ok(Some(RemoteFile { rel, stat: entry.stat })),
                EntryKind::Other => trace!("skipping special entry {rel}"),
            }
        }
    }
}
