use std::collections::HashMap;

use crate::normalize_state;

/// Automated action the orchestrator should take for a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchAction {
    None,
    Keep,
    Ignore,
    Delete,
}

/// Branch metadata evaluated by the rule engine: an explicit state label plus
/// contextual flags observed during the poll.
#[derive(Debug, Clone, Default)]
pub struct BranchFacts {
    pub state: String,
    pub stray: bool,
    pub newly_created: bool,
}

/// Maps branch state labels to actions, falling back to the contextual flags
/// when no explicit label matches.
pub struct BranchRules {
    state_actions: HashMap<String, BranchAction>,
}

impl Default for BranchRules {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchRules {
    pub fn new() -> Self {
        let mut state_actions = HashMap::new();
        state_actions.insert("stray".to_string(), BranchAction::Delete);
        state_actions.insert("new".to_string(), BranchAction::Keep);
        state_actions.insert("active".to_string(), BranchAction::Keep);
        state_actions.insert("dirty".to_string(), BranchAction::Delete);
        state_actions.insert("purge".to_string(), BranchAction::Delete);
        Self { state_actions }
    }

    pub fn set_action(&mut self, state: &str, action: BranchAction) {
        self.state_actions.insert(normalize_state(state), action);
    }

    pub fn action_for_state(&self, state: &str) -> BranchAction {
        self.state_actions
            .get(&normalize_state(state))
            .copied()
            .unwrap_or(BranchAction::None)
    }

    pub fn decide(&self, facts: &BranchFacts) -> BranchAction {
        if !facts.state.is_empty() {
            let configured = self.action_for_state(&facts.state);
            if configured != BranchAction::None {
                return configured;
            }
        }
        if facts.stray {
            let stray_action = self.action_for_state("stray");
            if stray_action != BranchAction::None {
                return stray_action;
            }
        }
        if facts.newly_created {
            let new_action = self.action_for_state("new");
            if new_action != BranchAction::None {
                return new_action;
            }
        }
        BranchAction::Keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_label_wins() {
        let rules = BranchRules::new();
        let facts = BranchFacts {
            state: "purge".to_string(),
            stray: false,
            newly_created: true,
        };
        assert_eq!(rules.decide(&facts), BranchAction::Delete);
    }

    #[test]
    fn stray_flag_falls_back_to_stray_action() {
        let rules = BranchRules::new();
        let facts = BranchFacts {
            state: String::new(),
            stray: true,
            newly_created: false,
        };
        assert_eq!(rules.decide(&facts), BranchAction::Delete);
    }

    #[test]
    fn new_branches_are_kept() {
        let rules = BranchRules::new();
        let facts = BranchFacts {
            state: String::new(),
            stray: false,
            newly_created: true,
        };
        assert_eq!(rules.decide(&facts), BranchAction::Keep);
    }

    #[test]
    fn unknown_state_defaults_to_keep() {
        let rules = BranchRules::new();
        let facts = BranchFacts {
            state: "glacial".to_string(),
            stray: false,
            newly_created: false,
        };
        assert_eq!(rules.decide(&facts), BranchAction::Keep);
    }

    #[test]
    fn overrides_change_fallback_behavior() {
        let mut rules = BranchRules::new();
        rules.set_action("stray", BranchAction::Ignore);
        let facts = BranchFacts {
            state: String::new(),
            stray: true,
            newly_created: false,
        };
        assert_eq!(rules.decide(&facts), BranchAction::Ignore);
    }
}
