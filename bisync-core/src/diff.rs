use serde::{Deserialize, Serialize};

/// How fractional modification times are reduced to whole seconds before comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Half-second and up rounds towards the later second.
    #[default]
    Nearest,
    Floor,
    Ceil,
}

impl Rounding {
    pub fn apply(self, secs: f64) -> i64 {
        let r = match self {
            Rounding::Nearest => (secs + 0.5).floor(),
            Rounding::Floor => secs.floor(),
            Rounding::Ceil => secs.ceil(),
        };
        r as i64
    }
}

/// Decides whether a file must be copied from source to target.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffPolicy {
    pub rounding: Rounding,
}

impl DiffPolicy {
    pub fn new(rounding: Rounding) -> Self {
        Self { rounding }
    }

    /// Returns the whole-second timestamp to stamp on the target after the
    /// transfer, or `None` when no transfer is needed. Only a source strictly
    /// newer than the target transfers; an absent target always loses.
    pub fn decide(&self, source: Option<f64>, target: Option<f64>) -> Option<i64> {
        let src = self.rounding.apply(source?);
        match target {
            None => Some(src),
            Some(t) if src > self.rounding.apply(t) => Some(src),
            Some(_) => None,
        }
    }
}
