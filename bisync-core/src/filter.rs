use crate::config::Pattern;
use crate::error::{Result, SyncError};
use crate::utils::is_hidden;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Runtime filter compiled from include / exclude pattern lists.
///
/// Matches root-relative, forward-slashed paths. Dotfiles never pass.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
        }
    }
}

impl PathFilter {
    /// Build a filter from lists. Empty include list means "include all".
    ///
    /// A pattern that does not compile is a configuration error.
    pub fn new(include: &[Pattern], exclude: &[Pattern]) -> Result<Self> {
        Ok(Self {
            include: compile("include", include)?,
            exclude: compile("exclude", exclude)?,
        })
    }

    /// Determine whether a given relative path should be synced.
    pub fn check(&self, rel: &str) -> bool {
        if is_hidden(rel) {
            return false;
        }
        let included = self.include.is_empty() || self.include.is_match(rel);
        included && !self.exclude.is_match(rel)
    }
}

fn compile(list: &str, patterns: &[Pattern]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(&pat.0)
            .map_err(|e| SyncError::Config(format!("invalid {list} pattern {:?}: {e}", pat.0)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SyncError::Config(format!("{list} patterns: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_and_exclude() {
        let include = vec![Pattern("**/*.rs".into())];
        let exclude = vec![Pattern("tests/**".into())];
        let filter = PathFilter::new(&include, &exclude).unwrap();
        assert!(filter.check("src/lib.rs"));
        assert!(!filter.check("tests/main.rs"));
        assert!(!filter.check("README.md"));
    }

    #[test]
    fn default_passes_everything_but_dotfiles() {
        let filter = PathFilter::default();
        assert!(filter.check("a/b.txt"));
        assert!(!filter.check(".env"));
        assert!(!filter.check("sub/.git/HEAD"));
    }

    #[test]
    fn broken_pattern_is_rejected_by_name() {
        let exclude = vec![Pattern("uploads/[**".into())];
        let err = PathFilter::new(&[], &exclude).unwrap_err();
        assert!(matches!(&err, SyncError::Config(m) if m.contains("exclude") && m.contains("uploads/[**")));
    }
}
