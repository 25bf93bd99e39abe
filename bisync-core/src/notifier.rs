use crate::config::NotifyLevel;
use crate::engine::SyncReport;
use crate::error::Result;
use tracing::info;

/// Receives a one-line summary per completed operation.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, summary: &str);
}

/// Writes summaries to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, summary: &str) {
        info!(target: "bisync::notify", "{summary}");
    }
}

/// Summary line for `verb` on `mapping`, or `None` when `level` filters it out.
pub fn summary(level: NotifyLevel, verb: &str, mapping: &str, outcome: &Result<SyncReport>) -> Option<String> {
    match (level, outcome) {
        (NotifyLevel::None, _) | (NotifyLevel::Errors, Ok(_)) => None,
        (_, Ok(report)) => Some(format!("{verb} {mapping}: {report}")),
        (_, Err(e)) => Some(format!("{verb} {mapping} failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[test]
    fn level_gates_summaries() {
        let ok: Result<SyncReport> = Ok(SyncReport {
            changed: 2,
            deleted: 1,
            skipped: 0,
        });
        let failed: Result<SyncReport> = Err(SyncError::Config("boom".into()));

        assert_eq!(summary(NotifyLevel::None, "push", "docs", &ok), None);
        assert_eq!(summary(NotifyLevel::Errors, "push", "docs", &ok), None);
        assert_eq!(
            summary(NotifyLevel::All, "push", "docs", &ok).as_deref(),
            Some("push docs: 2 changed, 1 deleted, 0 unchanged")
        );
        assert_eq!(
            summary(NotifyLevel::Errors, "pull", "docs", &failed).as_deref(),
            Some("pull docs failed: invalid configuration: boom")
        );
    }
}
