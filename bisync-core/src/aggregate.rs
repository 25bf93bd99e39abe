use crate::event::WatchEvent;
use crate::path_set::PathSet;

/// Pending watch-mode work: files to upload and paths to delete remotely.
///
/// A path is never in both sets; the latest event for a path wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub changed: PathSet,
    pub deleted: PathSet,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &WatchEvent) {
        match event {
            WatchEvent::Added(p) | WatchEvent::Changed(p) => {
                self.deleted.remove(p);
                self.changed.insert(p);
            }
            WatchEvent::Removed(p) | WatchEvent::RemovedDir(p) => {
                self.changed.remove(p);
                self.deleted.insert(p);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changed.len() + self.deleted.len()
    }

    /// Swap the pending sets out for empty ones.
    pub fn take(&mut self) -> ChangeBatch {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(events: &[WatchEvent]) -> ChangeBatch {
        let mut b = ChangeBatch::new();
        for e in events {
            b.record(e);
        }
        b
    }

    #[test]
    fn add_change_unlink_ends_deleted_only() {
        let b = batch(&[
            WatchEvent::Added("p".into()),
            WatchEvent::Changed("p".into()),
            WatchEvent::Removed("p".into()),
        ]);
        assert!(b.deleted.contains("p"));
        assert!(!b.changed.contains("p"));
    }

    #[test]
    fn unlink_then_add_ends_changed_only() {
        let b = batch(&[WatchEvent::Removed("p".into()), WatchEvent::Added("p".into())]);
        assert!(b.changed.contains("p"));
        assert!(!b.deleted.contains("p"));
    }

    #[test]
    fn repeated_changes_collapse() {
        let b = batch(&[
            WatchEvent::Changed("a".into()),
            WatchEvent::Changed("a".into()),
            WatchEvent::Changed("b".into()),
            WatchEvent::RemovedDir("d".into()),
        ]);
        assert_eq!(b.changed.len(), 2);
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn take_leaves_an_empty_batch() {
        let mut b = batch(&[WatchEvent::Added("a".into())]);
        let flushed = b.take();
        assert!(b.is_empty());
        assert_eq!(flushed.changed.len(), 1);
        b.record(&WatchEvent::Added("c".into()));
        assert!(!flushed.changed.contains("c"));
    }
}
