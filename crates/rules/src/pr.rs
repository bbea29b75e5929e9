use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::normalize_state;

/// Aggregate CI verdict attached to a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    #[default]
    Unknown,
    Passed,
    Failed,
    Rejected,
}

/// Automated action the orchestrator should take for a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestAction {
    None,
    Wait,
    Ignore,
    Merge,
    Close,
}

/// The slice of pull request metadata the decider looks at.
#[derive(Debug, Clone, Default)]
pub struct PullRequestFacts {
    pub state: String,
    pub mergeable_state: String,
    pub draft: bool,
    pub check_state: CheckState,
}

/// Maps mergeability states reported by the server to automated actions.
///
/// Defaults: dirty pull requests close, everything the server considers
/// mergeable (clean, blocked, unstable, plus failed/rejected check labels)
/// merges. Individual states can be overridden at runtime.
pub struct PullRequestRules {
    state_actions: HashMap<String, PullRequestAction>,
}

impl Default for PullRequestRules {
    fn default() -> Self {
        Self::new()
    }
}

impl PullRequestRules {
    pub fn new() -> Self {
        let mut state_actions = HashMap::new();
        state_actions.insert("dirty".to_string(), PullRequestAction::Close);
        for state in ["clean", "blocked", "unstable", "failure", "failed", "rejected"] {
            state_actions.insert(state.to_string(), PullRequestAction::Merge);
        }
        Self { state_actions }
    }

    pub fn set_action(&mut self, state: &str, action: PullRequestAction) {
        self.state_actions.insert(normalize_state(state), action);
    }

    pub fn action_for_state(&self, state: &str) -> PullRequestAction {
        self.state_actions
            .get(&normalize_state(state))
            .copied()
            .unwrap_or(PullRequestAction::None)
    }

    pub fn decide(&self, facts: &PullRequestFacts) -> PullRequestAction {
        if !facts.state.is_empty() && normalize_state(&facts.state) != "open" {
            return PullRequestAction::Ignore;
        }

        if facts.draft {
            return PullRequestAction::Wait;
        }

        let action = self.action_for_state(&facts.mergeable_state);
        if action != PullRequestAction::None {
            return action;
        }

        if matches!(facts.check_state, CheckState::Passed | CheckState::Rejected) {
            return PullRequestAction::Merge;
        }

        PullRequestAction::Wait
    }
}
