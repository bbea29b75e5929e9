mod branch;
mod pr;

pub use branch::{BranchAction, BranchFacts, BranchRules};
pub use pr::{CheckState, PullRequestAction, PullRequestFacts, PullRequestRules};

use std::str::FromStr;

/// Engine selection for stray branch classification. `heuristic` and
/// `combined` are accepted as aliases of `rule` until a heuristic engine
/// exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrayDetectionMode {
    #[default]
    Rule,
}

impl FromStr for StrayDetectionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "rule" | "heuristic" | "combined" | "" => Ok(StrayDetectionMode::Rule),
            other => Err(format!("unknown stray detection mode '{other}'")),
        }
    }
}

pub(crate) fn normalize_state(state: &str) -> String {
    state.to_ascii_lowercase()
}
