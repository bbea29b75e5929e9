use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::retry_backoff;
use crate::cache::HttpCache;
use crate::error::GhError;
use crate::governor::RateGovernor;
use crate::metrics;
use crate::model::{
    header_value, parse_link_next, parse_rate_limit, parse_retry_after, Branch, CompareResult,
    CompareStatus, PullRequest, PullRequestMetadata, RepoRef,
};
use crate::protect::BranchProtection;
use crate::transport::{HttpTransport, TransportReply};

/// Path-segment encoding for git ref names: `/`, space, `%`, and every
/// RFC 3986 reserved character are percent-encoded.
const REF_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'?')
    .add(b'#')
    .add(b'[')
    .add(b']')
    .add(b'@')
    .add(b'!')
    .add(b'$')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b';')
    .add(b'=');

pub fn encode_ref(name: &str) -> String {
    utf8_percent_encode(name, REF_ENCODE_SET).to_string()
}

#[derive(Debug, Clone)]
pub struct GitHubClientOptions {
    pub api_base: String,
    pub user_agent: String,
    pub include_repos: Vec<String>,
    pub exclude_repos: Vec<String>,
    pub retries: u32,
    pub allow_delete_base_branch: bool,
}

impl Default for GitHubClientOptions {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            user_agent: "agpm".to_string(),
            include_repos: Vec::new(),
            exclude_repos: Vec::new(),
            retries: 3,
            allow_delete_base_branch: false,
        }
    }
}

/// Gate consulted before issuing a merge request.
#[derive(Debug, Clone, Default)]
pub struct MergeGate {
    pub required_approvals: u32,
    /// Blocks unless the server reports `mergeable_state == "clean"`.
    pub require_status_success: bool,
    /// Blocks when the server reports `mergeable == false`.
    pub require_mergeable_state: bool,
}

/// Typed operations over the hosting API. Every call consults the repository
/// allow-lists, blocks on the rate governor, and keeps GETs conditional
/// through the cache. Unretryable failures surface as default values with a
/// logged warning so repository-level faults never abort a sweep.
pub struct GitHubClient {
    transport: Arc<dyn HttpTransport>,
    governor: Arc<RateGovernor>,
    cache: HttpCache,
    token: String,
    api_base: String,
    user_agent: String,
    include: Vec<String>,
    exclude: Vec<String>,
    retries: u32,
    allow_delete_base_branch: bool,
    gate: StdMutex<MergeGate>,
    cancel: CancellationToken,
    flusher: StdMutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl GitHubClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        governor: Arc<RateGovernor>,
        cache: HttpCache,
        token: impl Into<String>,
        options: GitHubClientOptions,
    ) -> Self {
        Self {
            transport,
            governor,
            cache,
            token: token.into(),
            api_base: options.api_base.trim_end_matches('/').to_string(),
            user_agent: options.user_agent,
            include: options.include_repos,
            exclude: options.exclude_repos,
            retries: options.retries,
            allow_delete_base_branch: options.allow_delete_base_branch,
            gate: StdMutex::new(MergeGate::default()),
            cancel: CancellationToken::new(),
            flusher: StdMutex::new(None),
        }
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_required_approvals(&self, approvals: u32) {
        self.gate.lock().unwrap().required_approvals = approvals;
    }

    pub fn set_require_status_success(&self, require: bool) {
        self.gate.lock().unwrap().require_status_success = require;
    }

    pub fn set_require_mergeable_state(&self, require: bool) {
        self.gate.lock().unwrap().require_mergeable_state = require;
    }

    /// Writes the cache document out immediately.
    pub fn flush_cache(&self) {
        if let Err(err) = self.cache.flush() {
            warn!(error = %err, "cache flush failed");
        }
    }

    /// Restarts the background flusher with a new interval; a zero interval
    /// stops it.
    pub fn set_cache_flush_interval(&self, interval: Duration) {
        let mut guard = self.flusher.lock().unwrap();
        if let Some((cancel, _)) = guard.take() {
            cancel.cancel();
        }
        if !interval.is_zero() {
            let cancel = self.cancel.child_token();
            let handle = self.cache.spawn_flusher(interval, cancel.clone());
            *guard = Some((cancel, handle));
        }
    }

    /// Cancels in-flight waits and stops the flusher (with a final flush).
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let flusher = self.flusher.lock().unwrap().take();
        if let Some((cancel, handle)) = flusher {
            cancel.cancel();
            let _ = handle.await;
        }
    }

    fn repo_allowed(&self, owner: &str, name: &str) -> bool {
        let slug = format!("{owner}/{name}");
        if !self.include.is_empty() && !self.include.iter().any(|r| r == &slug) {
            debug!(%slug, "repository not in include list");
            return false;
        }
        if self.exclude.iter().any(|r| r == &slug) {
            debug!(%slug, "repository excluded");
            return false;
        }
        true
    }

    fn base_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), format!("token {}", self.token)),
            (
                "Accept".to_string(),
                "application/vnd.github+json".to_string(),
            ),
            ("User-Agent".to_string(), self.user_agent.clone()),
            (
                "X-GitHub-Api-Version".to_string(),
                "2022-11-28".to_string(),
            ),
        ]
    }

    async fn sleep_retry(&self, attempt: u32, reason: &'static str) -> Result<(), GhError> {
        metrics::RETRIES_TOTAL.with_label_values(&[reason]).inc();
        let wait = retry_backoff(attempt);
        tokio::select! {
            _ = self.cancel.cancelled() => Err(GhError::Cancelled),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    /// Conditional GET with rate limiting, caching, and retries.
    async fn execute_get(&self, url: &str) -> Result<TransportReply, GhError> {
        let mut attempts = 0u32;
        loop {
            self.governor.acquire(&self.cancel).await?;
            let mut headers = self.base_headers();
            let etag = self.cache.etag_for(url);
            if let Some(etag) = &etag {
                headers.push(("If-None-Match".to_string(), etag.clone()));
            }

            let started = std::time::Instant::now();
            let reply = match self.transport.get(url, &headers).await {
                Ok(reply) => reply,
                Err(err) if err.retryable() => {
                    attempts += 1;
                    if attempts > self.retries {
                        return Err(err);
                    }
                    self.sleep_retry(attempts - 1, "transport").await?;
                    continue;
                }
                Err(err) => return Err(err),
            };
            metrics::LATENCY
                .with_label_values(&["GET"])
                .observe(started.elapsed().as_secs_f64());
            metrics::REQUESTS_TOTAL
                .with_label_values(&["GET", metrics::status_class(reply.status)])
                .inc();
            self.governor.note_response(reply.status, &reply.headers);

            if reply.is_success() {
                if let Some(new_etag) = header_value(&reply.headers, "etag") {
                    self.cache.store(
                        url,
                        new_etag.trim().to_string(),
                        reply.body.clone(),
                        Some(reply.headers.clone()),
                    );
                }
                metrics::CACHE_MISSES.inc();
                return Ok(reply);
            }

            if reply.status == 304 {
                if etag.is_none() {
                    return Err(GhError::Parse(
                        "304 received without a validator".to_string(),
                    ));
                }
                if let Some(body) = self.cache.refresh(url) {
                    return Ok(TransportReply {
                        status: 200,
                        headers: reply.headers,
                        body,
                    });
                }
                // Entry was evicted for lacking a body; refetch unconditionally.
                continue;
            }

            if reply.status == 403 || reply.status == 429 {
                let throttled = parse_rate_limit(&reply.headers).is_some()
                    || parse_retry_after(&reply.headers).is_some();
                if throttled {
                    // The governor recorded the deadline; the next acquire sleeps.
                    metrics::RETRIES_TOTAL
                        .with_label_values(&["rate_limit"])
                        .inc();
                    continue;
                }
                if reply.status == 429 {
                    attempts += 1;
                    if attempts > self.retries {
                        return Err(GhError::status(reply.status, url));
                    }
                    self.sleep_retry(attempts - 1, "throttle").await?;
                    continue;
                }
                return Err(GhError::status(reply.status, url));
            }

            if reply.status >= 500 {
                attempts += 1;
                if attempts > self.retries {
                    return Err(GhError::status(reply.status, url));
                }
                self.sleep_retry(attempts - 1, "server_error").await?;
                continue;
            }

            return Err(GhError::status(reply.status, url));
        }
    }

    /// Non-GET request with rate limiting and retries; bypasses the cache.
    async fn execute_mutation(
        &self,
        method: &str,
        url: &str,
        body: &str,
    ) -> Result<TransportReply, GhError> {
        let mut attempts = 0u32;
        loop {
            self.governor.acquire(&self.cancel).await?;
            let headers = self.base_headers();
            let started = std::time::Instant::now();
            let result = match method {
                "PUT" => self.transport.put(url, body, &headers).await,
                "POST" => self.transport.post(url, body, &headers).await,
                "PATCH" => self.transport.patch(url, body, &headers).await,
                "DELETE" => self.transport.delete(url, &headers).await,
                other => return Err(GhError::Transport(format!("unsupported method {other}"))),
            };
            let reply = match result {
                Ok(reply) => reply,
                Err(err) if err.retryable() => {
                    attempts += 1;
                    if attempts > self.retries {
                        return Err(err);
                    }
                    self.sleep_retry(attempts - 1, "transport").await?;
                    continue;
                }
                Err(err) => return Err(err),
            };
            metrics::LATENCY
                .with_label_values(&[method])
                .observe(started.elapsed().as_secs_f64());
            metrics::REQUESTS_TOTAL
                .with_label_values(&[method, metrics::status_class(reply.status)])
                .inc();
            self.governor.note_response(reply.status, &reply.headers);

            if reply.is_success() {
                return Ok(reply);
            }
            if reply.status == 403 || reply.status == 429 {
                let throttled = parse_rate_limit(&reply.headers).is_some()
                    || parse_retry_after(&reply.headers).is_some();
                if throttled {
                    metrics::RETRIES_TOTAL
                        .with_label_values(&["rate_limit"])
                        .inc();
                    continue;
                }
                if reply.status == 429 {
                    attempts += 1;
                    if attempts > self.retries {
                        return Err(GhError::status(reply.status, url));
                    }
                    self.sleep_retry(attempts - 1, "throttle").await?;
                    continue;
                }
                return Err(GhError::status(reply.status, url));
            }
            if reply.status >= 500 {
                attempts += 1;
                if attempts > self.retries {
                    return Err(GhError::status(reply.status, url));
                }
                self.sleep_retry(attempts - 1, "server_error").await?;
                continue;
            }
            return Err(GhError::status(reply.status, url));
        }
    }

    /// Parses a JSON array; unparseable bodies yield an empty list, never a
    /// retry.
    fn parse_array(url: &str, body: &str) -> Vec<Value> {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Null) => Vec::new(),
            Ok(_) => {
                warn!(url, "expected array response; treating as empty");
                Vec::new()
            }
            Err(err) => {
                warn!(url, error = %err, "unparseable response body; treating as empty");
                Vec::new()
            }
        }
    }

    fn parse_object(url: &str, body: &str) -> Value {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => value,
            Err(err) => {
                warn!(url, error = %err, "unparseable response body");
                Value::Null
            }
        }
    }

    async fn get_paginated(&self, first_url: String) -> Result<Vec<Value>, GhError> {
        let mut out = Vec::new();
        let mut next = Some(first_url);
        while let Some(url) = next {
            let reply = self.execute_get(&url).await?;
            out.extend(Self::parse_array(&url, &reply.body));
            next = parse_link_next(&reply.headers);
        }
        Ok(out)
    }

    /// Repositories visible to the configured token, filtered by the
    /// include/exclude lists.
    pub async fn list_repositories(&self) -> Vec<RepoRef> {
        let url = format!("{}/user/repos?per_page=100", self.api_base);
        let items = match self.get_paginated(url).await {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "listing repositories failed");
                return Vec::new();
            }
        };
        items
            .iter()
            .filter_map(|item| {
                let owner = item.get("owner")?.get("login")?.as_str()?;
                let name = item.get("name")?.as_str()?;
                Some(RepoRef::new(owner, name))
            })
            .filter(|repo| self.repo_allowed(&repo.owner, &repo.name))
            .collect()
    }

    pub async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        include_merged: bool,
        per_page: u32,
        since: Option<Duration>,
    ) -> Vec<PullRequest> {
        if !self.repo_allowed(owner, repo) {
            return Vec::new();
        }
        match self
            .try_list_pull_requests(owner, repo, include_merged, per_page, since)
            .await
        {
            Ok(prs) => prs,
            Err(err) => {
                warn!(owner, repo, error = %err, "listing pull requests failed");
                Vec::new()
            }
        }
    }

    async fn try_list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        include_merged: bool,
        per_page: u32,
        since: Option<Duration>,
    ) -> Result<Vec<PullRequest>, GhError> {
        let mut url = format!(
            "{}/repos/{}/{}/pulls?state={}",
            self.api_base,
            owner,
            repo,
            if include_merged { "all" } else { "open" }
        );
        if per_page > 0 {
            url.push_str(&format!("&per_page={per_page}"));
        }
        if since.is_some() {
            url.push_str("&sort=updated&direction=desc");
        }
        let cutoff = since.and_then(|window| {
            chrono::Duration::from_std(window)
                .ok()
                .map(|window| Utc::now() - window)
        });

        let mut out = Vec::new();
        let mut next = Some(url);
        while let Some(current) = next {
            let reply = self.execute_get(&current).await?;
            let items = Self::parse_array(&current, &reply.body);
            let had_items = !items.is_empty();
            let mut page_fresh = false;
            for item in &items {
                let Some(pr) = PullRequest::from_list_item(owner, repo, item) else {
                    continue;
                };
                if let (Some(cutoff), Some(updated)) = (cutoff, pr.updated_at.or(pr.created_at)) {
                    if updated < cutoff {
                        continue;
                    }
                }
                page_fresh = true;
                out.push(pr);
            }
            if cutoff.is_some() && had_items && !page_fresh {
                break;
            }
            next = parse_link_next(&reply.headers);
        }
        Ok(out)
    }

    /// Open pull requests through a single GraphQL request; the low-rate
    /// listing path.
    pub async fn list_open_pull_requests_graphql(&self, owner: &str, repo: &str) -> Vec<PullRequest> {
        if !self.repo_allowed(owner, repo) {
            return Vec::new();
        }
        let url = format!("{}/graphql", self.api_base);
        let payload = json!({
            "query": "query($owner:String!,$name:String!){repository(owner:$owner,name:$name){pullRequests(states:OPEN,first:100){nodes{number title isDraft createdAt updatedAt}}}}",
            "variables": {"owner": owner, "name": repo},
        });
        let reply = match self.execute_mutation("POST", &url, &payload.to_string()).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(owner, repo, error = %err, "graphql pull request listing failed");
                return Vec::new();
            }
        };
        let body = Self::parse_object(&url, &reply.body);
        let nodes = body
            .pointer("/data/repository/pullRequests/nodes")
            .and_then(|n| n.as_array())
            .cloned()
            .unwrap_or_default();
        nodes
            .iter()
            .filter_map(|node| {
                let mut pr = PullRequest::from_list_item(owner, repo, node)?;
                pr.draft = node.get("isDraft").and_then(|d| d.as_bool()).unwrap_or(false);
                Some(pr)
            })
            .collect()
    }

    pub async fn pull_request_metadata(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> PullRequestMetadata {
        match self.try_pull_request_metadata(owner, repo, number).await {
            Ok(meta) => meta,
            Err(err) => {
                warn!(owner, repo, number, error = %err, "fetching pull request metadata failed");
                PullRequestMetadata::default()
            }
        }
    }

    async fn try_pull_request_metadata(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestMetadata, GhError> {
        let url = format!("{}/repos/{}/{}/pulls/{}", self.api_base, owner, repo, number);
        let reply = self.execute_get(&url).await?;
        Ok(PullRequestMetadata::from_json(&Self::parse_object(
            &url,
            &reply.body,
        )))
    }

    /// Merges a pull request if the merge gate admits it. Returns `false`
    /// when the gate blocks, the server refuses, or the repository is
    /// filtered out.
    pub async fn merge_pull_request(&self, owner: &str, repo: &str, number: u64) -> bool {
        if !self.repo_allowed(owner, repo) {
            return false;
        }
        match self.try_merge_pull_request(owner, repo, number).await {
            Ok(merged) => merged,
            Err(err) => {
                warn!(owner, repo, number, error = %err, "merge request failed");
                false
            }
        }
    }

    async fn try_merge_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<bool, GhError> {
        let meta = self.try_pull_request_metadata(owner, repo, number).await?;
        let gate = self.gate.lock().unwrap().clone();
        if meta.approvals < gate.required_approvals {
            debug!(
                owner,
                repo,
                number,
                approvals = meta.approvals,
                required = gate.required_approvals,
                "merge blocked: not enough approvals"
            );
            return Ok(false);
        }
        if gate.require_status_success && !meta.mergeable_state.eq_ignore_ascii_case("clean") {
            debug!(owner, repo, number, state = %meta.mergeable_state, "merge blocked: mergeable state not clean");
            return Ok(false);
        }
        if gate.require_mergeable_state && meta.mergeable == Some(false) {
            debug!(owner, repo, number, "merge blocked: server reports not mergeable");
            return Ok(false);
        }

        let url = format!(
            "{}/repos/{}/{}/pulls/{}/merge",
            self.api_base, owner, repo, number
        );
        let reply = self.execute_mutation("PUT", &url, "{}").await?;
        let body = Self::parse_object(&url, &reply.body);
        Ok(body.get("merged").and_then(|m| m.as_bool()).unwrap_or(false))
    }

    /// Closes a pull request without merging (PATCH `{"state":"closed"}`).
    pub async fn close_pull_request(&self, owner: &str, repo: &str, number: u64) -> bool {
        if !self.repo_allowed(owner, repo) {
            return false;
        }
        let url = format!("{}/repos/{}/{}/pulls/{}", self.api_base, owner, repo, number);
        match self
            .execute_mutation("PATCH", &url, "{\"state\":\"closed\"}")
            .await
        {
            Ok(reply) => reply.is_success(),
            Err(err) => {
                warn!(owner, repo, number, error = %err, "close request failed");
                false
            }
        }
    }

    pub async fn list_branches(&self, owner: &str, repo: &str) -> Vec<Branch> {
        if !self.repo_allowed(owner, repo) {
            return Vec::new();
        }
        let url = format!("{}/repos/{}/{}/branches", self.api_base, owner, repo);
        let items = match self.get_paginated(url).await {
            Ok(items) => items,
            Err(err) => {
                warn!(owner, repo, error = %err, "listing branches failed");
                return Vec::new();
            }
        };
        items
            .iter()
            .filter_map(|item| {
                Some(Branch {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    name: item.get("name")?.as_str()?.to_string(),
                    last_sha: item
                        .pointer("/commit/sha")
                        .and_then(|s| s.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect()
    }

    pub async fn default_branch(&self, owner: &str, repo: &str) -> Option<String> {
        let url = format!("{}/repos/{}/{}", self.api_base, owner, repo);
        let reply = match self.execute_get(&url).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(owner, repo, error = %err, "fetching repository failed");
                return None;
            }
        };
        Self::parse_object(&url, &reply.body)
            .get("default_branch")
            .and_then(|b| b.as_str())
            .map(|b| b.to_string())
    }

    pub async fn compare(&self, owner: &str, repo: &str, base: &str, head: &str) -> CompareResult {
        let url = format!(
            "{}/repos/{}/{}/compare/{}...{}",
            self.api_base,
            owner,
            repo,
            encode_ref(base),
            encode_ref(head)
        );
        let reply = match self.execute_get(&url).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(owner, repo, base, head, error = %err, "compare failed");
                return CompareResult::default();
            }
        };
        let body = Self::parse_object(&url, &reply.body);
        CompareResult {
            status: CompareStatus::parse(
                body.get("status").and_then(|s| s.as_str()).unwrap_or(""),
            ),
            ahead_by: body.get("ahead_by").and_then(|a| a.as_u64()).unwrap_or(0),
        }
    }

    /// Deletes a branch ref unless it matches a protection pattern (minus
    /// excludes).
    pub async fn delete_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        protected: &[String],
        excludes: &[String],
    ) -> bool {
        if !self.repo_allowed(owner, repo) {
            return false;
        }
        let protection = BranchProtection::new(protected, excludes);
        if protection.is_protected(branch) {
            debug!(owner, repo, branch, "branch protected; skipping delete");
            return false;
        }
        let url = format!(
            "{}/repos/{}/{}/git/refs/heads/{}",
            self.api_base,
            owner,
            repo,
            encode_ref(branch)
        );
        match self.execute_mutation("DELETE", &url, "").await {
            Ok(reply) => reply.is_success(),
            Err(err) => {
                warn!(owner, repo, branch, error = %err, "branch delete failed");
                false
            }
        }
    }

    /// Deletes closed-PR head refs beginning with `prefix`.
    pub async fn cleanup_branches(
        &self,
        owner: &str,
        repo: &str,
        prefix: &str,
        protected: &[String],
        excludes: &[String],
    ) {
        if prefix.is_empty() || !self.repo_allowed(owner, repo) {
            return;
        }
        let url = format!(
            "{}/repos/{}/{}/pulls?state=closed&per_page=100",
            self.api_base, owner, repo
        );
        let items = match self.get_paginated(url).await {
            Ok(items) => items,
            Err(err) => {
                warn!(owner, repo, error = %err, "listing closed pull requests failed");
                return;
            }
        };
        let mut seen = HashSet::new();
        for item in &items {
            let Some(head_ref) = item.pointer("/head/ref").and_then(|r| r.as_str()) else {
                continue;
            };
            if !head_ref.starts_with(prefix) || !seen.insert(head_ref.to_string()) {
                continue;
            }
            if self
                .delete_branch(owner, repo, head_ref, protected, excludes)
                .await
            {
                debug!(owner, repo, branch = head_ref, "purged branch");
            }
        }
    }

    /// Deletes branches that are ahead of the default branch and not
    /// protected.
    pub async fn close_dirty_branches(
        &self,
        owner: &str,
        repo: &str,
        protected: &[String],
        excludes: &[String],
    ) {
        if !self.repo_allowed(owner, repo) {
            return;
        }
        let Some(default) = self.default_branch(owner, repo).await else {
            warn!(owner, repo, "no default branch; skipping dirty closure");
            return;
        };
        let branches = self.list_branches(owner, repo).await;
        for branch in branches {
            if branch.name == default && !self.allow_delete_base_branch {
                continue;
            }
            let compared = self.compare(owner, repo, &default, &branch.name).await;
            if compared.status == CompareStatus::Ahead {
                if self
                    .delete_branch(owner, repo, &branch.name, protected, excludes)
                    .await
                {
                    debug!(owner, repo, branch = %branch.name, ahead_by = compared.ahead_by, "deleted dirty branch");
                }
            }
        }
    }

    /// Reads the dedicated rate endpoint and feeds the governor. Transport
    /// failures are retried; after the retry budget the governor degrades to
    /// local-only throttling.
    pub async fn refresh_rate_budget(&self) {
        let url = format!("{}/rate_limit", self.api_base);
        let mut attempts = 0u32;
        loop {
            let outcome = self.transport.get(&url, &self.base_headers()).await;
            if let Ok(reply) = &outcome {
                if reply.is_success() {
                    let body = Self::parse_object(&url, &reply.body);
                    let core = body.pointer("/resources/core").cloned().unwrap_or(Value::Null);
                    let limit = core.get("limit").and_then(|l| l.as_i64());
                    let remaining = core.get("remaining").and_then(|r| r.as_i64());
                    let reset = core
                        .get("reset")
                        .and_then(|r| r.as_i64())
                        .and_then(|ts| chrono::TimeZone::timestamp_opt(&Utc, ts, 0).single());
                    if let (Some(limit), Some(remaining), Some(reset)) = (limit, remaining, reset) {
                        self.governor.apply_budget(limit, remaining, reset);
                        self.governor.record_probe_success();
                        return;
                    }
                }
            }
            attempts += 1;
            self.governor.record_probe_failure();
            if attempts >= self.retries.max(1) {
                return;
            }
            if self.sleep_retry(attempts - 1, "rate_probe").await.is_err() {
                return;
            }
        }
    }

    /// Periodic budget probe until the client shuts down.
    pub fn start_budget_probe(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let client = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = client.cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => client.refresh_rate_budget().await,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_encoding_covers_reserved_characters() {
        assert_eq!(encode_ref("feature/bug fix"), "feature%2Fbug%20fix");
        assert_eq!(encode_ref("release/1.2.30"), "release%2F1.2.30");
        assert_eq!(encode_ref("a:b?c#d"), "a%3Ab%3Fc%23d");
        assert_eq!(encode_ref("odd&name=x"), "odd%26name%3Dx");
        assert_eq!(encode_ref("plain-name_1"), "plain-name_1");
        // No reserved character survives unencoded.
        let encoded = encode_ref("/ ?#[]@!$&'()*+,;=%");
        for forbidden in ['/', ' ', '?', '#', '[', ']', '@', '!', '$', '&', '\'', '(', ')', '*', '+', ',', ';', '='] {
            assert!(!encoded.contains(forbidden), "{forbidden} survived in {encoded}");
        }
    }
}
