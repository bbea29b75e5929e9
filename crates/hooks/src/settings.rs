use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::config::{HookActionConfig, HooksConfig};
use regex::Regex;
use tracing::warn;

/// Side effect executed when a hook event fires.
#[derive(Debug, Clone)]
pub enum HookAction {
    Command {
        command: String,
        parameters: Vec<(String, String)>,
    },
    Http {
        endpoint: String,
        method: String,
        headers: Vec<(String, String)>,
        parameters: Vec<(String, String)>,
    },
}

impl HookAction {
    pub fn parameters(&self) -> &[(String, String)] {
        match self {
            HookAction::Command { parameters, .. } => parameters,
            HookAction::Http { parameters, .. } => parameters,
        }
    }

    fn from_config(config: &HookActionConfig) -> Option<Self> {
        match config.kind.to_ascii_lowercase().as_str() {
            "command" => Some(HookAction::Command {
                command: config.command.clone(),
                parameters: config.parameters.clone(),
            }),
            "http" => Some(HookAction::Http {
                endpoint: config.endpoint.clone(),
                method: config.method.clone(),
                headers: config.headers.clone(),
                parameters: config.parameters.clone(),
            }),
            other => {
                warn!(kind = other, "unknown hook action kind; skipping");
                None
            }
        }
    }
}

/// Event payload delivered to hook actions. The timestamp is stamped at
/// enqueue time.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub name: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl HookEvent {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Repository-specific overrides, matched against `owner/repo` extracted from
/// the event data. Patterns containing regex metacharacters compile once at
/// construction; plain slugs compare literally.
#[derive(Debug, Clone)]
pub struct RepositoryHookSettings {
    pub pattern: String,
    pub enabled: Option<bool>,
    pub default_actions: Option<Vec<HookAction>>,
    pub event_actions: Option<HashMap<String, Vec<HookAction>>>,
    compiled: Option<Regex>,
}

impl RepositoryHookSettings {
    pub fn new(
        pattern: impl Into<String>,
        enabled: Option<bool>,
        default_actions: Option<Vec<HookAction>>,
        event_actions: Option<HashMap<String, Vec<HookAction>>>,
    ) -> Self {
        let pattern = pattern.into();
        let compiled = if pattern.chars().any(|c| ".*+?[](){}|^$\\".contains(c)) {
            match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(%pattern, error = %err, "invalid repository override pattern; matching literally");
                    None
                }
            }
        } else {
            None
        };
        Self {
            pattern,
            enabled,
            default_actions,
            event_actions,
            compiled,
        }
    }

    pub fn matches(&self, slug: &str) -> bool {
        match &self.compiled {
            Some(re) => re.is_match(slug),
            None => self.pattern == slug,
        }
    }
}

/// Global hook dispatch configuration.
#[derive(Debug, Clone, Default)]
pub struct HookSettings {
    pub enabled: bool,
    pub default_actions: Vec<HookAction>,
    pub event_actions: HashMap<String, Vec<HookAction>>,
    pub repository_overrides: Vec<RepositoryHookSettings>,
    pub pull_threshold: usize,
    pub branch_threshold: usize,
}

impl HookSettings {
    pub fn from_config(config: &HooksConfig) -> Self {
        let convert = |actions: &[HookActionConfig]| -> Vec<HookAction> {
            actions.iter().filter_map(HookAction::from_config).collect()
        };
        Self {
            enabled: config.hook_enabled,
            default_actions: convert(&config.hook_default_actions),
            event_actions: config
                .hook_event_actions
                .iter()
                .map(|(name, actions)| (name.clone(), convert(actions)))
                .collect(),
            repository_overrides: config
                .hook_repository_overrides
                .iter()
                .map(|entry| {
                    RepositoryHookSettings::new(
                        entry.pattern.clone(),
                        entry.enabled,
                        entry.default_actions.as_deref().map(convert),
                        entry.event_actions.as_ref().map(|map| {
                            map.iter()
                                .map(|(name, actions)| (name.clone(), convert(actions)))
                                .collect()
                        }),
                    )
                })
                .collect(),
            pull_threshold: config.hook_pull_threshold,
            branch_threshold: config.hook_branch_threshold,
        }
    }

    pub fn has_actions(&self) -> bool {
        if !self.default_actions.is_empty() {
            return true;
        }
        if self.event_actions.values().any(|actions| !actions.is_empty()) {
            return true;
        }
        self.repository_overrides.iter().any(|entry| {
            entry.enabled.is_some()
                || entry
                    .default_actions
                    .as_ref()
                    .is_some_and(|actions| !actions.is_empty())
                || entry
                    .event_actions
                    .as_ref()
                    .is_some_and(|map| map.values().any(|actions| !actions.is_empty()))
        })
    }
}
