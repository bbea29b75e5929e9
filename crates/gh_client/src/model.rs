use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rules::CheckState;
use serde::{Deserialize, Serialize};

/// `(owner, name)` pair identifying a remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    #[default]
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, Default)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub owner: String,
    pub repo: String,
    pub merged: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub draft: bool,
    pub state: PrState,
    pub mergeable_state: String,
    pub approvals: u32,
    pub check_state: CheckState,
}

impl PullRequest {
    /// Builds a pull request from one element of a `/pulls` listing. Items
    /// without a positive number are dropped.
    pub fn from_list_item(owner: &str, repo: &str, value: &serde_json::Value) -> Option<Self> {
        let number = value.get("number")?.as_u64().filter(|n| *n > 0)?;
        let merged = value
            .get("merged")
            .and_then(|m| m.as_bool())
            .unwrap_or_else(|| {
                value
                    .get("merged_at")
                    .map(|m| !m.is_null())
                    .unwrap_or(false)
            });
        let state_label = value.get("state").and_then(|s| s.as_str()).unwrap_or("open");
        let state = if merged {
            PrState::Merged
        } else if state_label.eq_ignore_ascii_case("closed") {
            PrState::Closed
        } else {
            PrState::Open
        };
        Some(Self {
            number,
            title: value
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            merged,
            created_at: parse_timestamp(value.get("created_at")),
            updated_at: parse_timestamp(value.get("updated_at")),
            draft: value.get("draft").and_then(|d| d.as_bool()).unwrap_or(false),
            state,
            mergeable_state: value
                .get("mergeable_state")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string(),
            approvals: value
                .get("approvals")
                .and_then(|a| a.as_u64())
                .unwrap_or(0) as u32,
            check_state: parse_check_state(value.get("check_state")),
        })
    }
}

/// Merge-gate view of a single pull request.
#[derive(Debug, Clone, Default)]
pub struct PullRequestMetadata {
    pub approvals: u32,
    pub mergeable: Option<bool>,
    pub mergeable_state: String,
    pub state: String,
    pub draft: bool,
    pub check_state: CheckState,
}

impl PullRequestMetadata {
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self {
            approvals: value
                .get("approvals")
                .and_then(|a| a.as_u64())
                .unwrap_or(0) as u32,
            mergeable: value.get("mergeable").and_then(|m| m.as_bool()),
            mergeable_state: value
                .get("mergeable_state")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string(),
            state: value
                .get("state")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            draft: value.get("draft").and_then(|d| d.as_bool()).unwrap_or(false),
            check_state: parse_check_state(value.get("check_state")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub owner: String,
    pub repo: String,
    pub name: String,
    pub last_sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareStatus {
    Identical,
    Behind,
    Ahead,
    Diverged,
    #[default]
    Unknown,
}

impl CompareStatus {
    pub fn parse(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "identical" => CompareStatus::Identical,
            "behind" => CompareStatus::Behind,
            "ahead" => CompareStatus::Ahead,
            "diverged" => CompareStatus::Diverged,
            _ => CompareStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompareResult {
    pub status: CompareStatus,
    pub ahead_by: u64,
}

fn parse_check_state(value: Option<&serde_json::Value>) -> CheckState {
    match value.and_then(|v| v.as_str()) {
        Some(label) => match label.to_ascii_lowercase().as_str() {
            "passed" | "success" => CheckState::Passed,
            "failed" | "failure" => CheckState::Failed,
            "rejected" => CheckState::Rejected,
            _ => CheckState::Unknown,
        },
        None => CheckState::Unknown,
    }
}

fn parse_timestamp(value: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Server-reported rate budget extracted from response headers. `limit` is
/// optional because throttled responses sometimes omit it.
#[derive(Debug, Clone)]
pub struct RateLimitUpdate {
    pub limit: Option<i64>,
    pub remaining: i64,
    pub reset: DateTime<Utc>,
}

pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn parse_rate_limit(headers: &[(String, String)]) -> Option<RateLimitUpdate> {
    let remaining = header_value(headers, "x-ratelimit-remaining")?
        .trim()
        .parse::<i64>()
        .ok()?;
    let reset_ts = header_value(headers, "x-ratelimit-reset")?
        .trim()
        .parse::<i64>()
        .ok()?;
    let reset = Utc.timestamp_opt(reset_ts, 0).single()?;
    let limit = header_value(headers, "x-ratelimit-limit")
        .and_then(|v| v.trim().parse::<i64>().ok());
    Some(RateLimitUpdate {
        limit,
        remaining,
        reset,
    })
}

#[derive(Debug, Clone)]
pub struct RetryAdvice {
    pub wait: Duration,
    pub reason: &'static str,
}

pub fn parse_retry_after(headers: &[(String, String)]) -> Option<RetryAdvice> {
    let value = header_value(headers, "retry-after")?;
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(RetryAdvice {
            wait: Duration::from_secs(seconds),
            reason: "retry_after",
        });
    }
    if let Ok(date) = httpdate::parse_http_date(value.trim()) {
        let wait = date
            .duration_since(std::time::SystemTime::now())
            .unwrap_or_default();
        return Some(RetryAdvice {
            wait,
            reason: "retry_after_date",
        });
    }
    None
}

/// Extracts the `rel="next"` target from a `Link` header.
pub fn parse_link_next(headers: &[(String, String)]) -> Option<String> {
    let link = header_value(headers, "link")?;
    for part in link.split(',') {
        let part = part.trim();
        let mut sections = part.split(';');
        let target = sections.next()?.trim();
        let is_next = sections
            .any(|attr| attr.trim().eq_ignore_ascii_case("rel=\"next\""));
        if is_next && target.starts_with('<') && target.ends_with('>') {
            return Some(target[1..target.len() - 1].to_string());
        }
    }
    None
}
