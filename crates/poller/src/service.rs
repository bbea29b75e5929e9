use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use common::SortMode;
use gh_client::{GitHubClient, PullRequest, RepoRef};
use history::PullRequestHistory;
use hooks::HookDispatcher;
use rules::{BranchFacts, BranchRules, BranchAction, PullRequestAction, PullRequestFacts, PullRequestRules};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use work_pool::WorkPool;

use crate::metrics;

pub type PrCallback = Arc<dyn Fn(&[PullRequest]) + Send + Sync>;
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Period between fan-outs; zero runs a single pass.
    pub interval: Duration,
    pub repos: Vec<RepoRef>,
    pub include_merged: bool,
    pub only_poll_prs: bool,
    pub only_poll_stray: bool,
    pub reject_dirty: bool,
    pub delete_stray: bool,
    pub auto_merge: bool,
    pub purge_prefix: String,
    pub purge_only: bool,
    /// Single-request PR listing path.
    pub use_graphql: bool,
    pub sort: SortMode,
    pub pr_limit: u32,
    pub pr_since: Option<Duration>,
    pub protected_branches: Vec<String>,
    pub protected_branch_excludes: Vec<String>,
    pub pull_threshold: usize,
    pub branch_threshold: usize,
    /// History dumps rewritten after every fan-out when set.
    pub export_csv: Option<String>,
    pub export_json: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            repos: Vec::new(),
            include_merged: false,
            only_poll_prs: false,
            only_poll_stray: false,
            reject_dirty: false,
            delete_stray: false,
            auto_merge: false,
            purge_prefix: String::new(),
            purge_only: false,
            use_graphql: false,
            sort: SortMode::Alpha,
            pr_limit: 50,
            pr_since: None,
            protected_branches: Vec::new(),
            protected_branch_excludes: Vec::new(),
            pull_threshold: 0,
            branch_threshold: 0,
            export_csv: None,
            export_json: None,
        }
    }
}

struct Shared {
    client: Arc<GitHubClient>,
    config: OrchestratorConfig,
    pr_rules: PullRequestRules,
    branch_rules: BranchRules,
    history: StdMutex<Option<PullRequestHistory>>,
    hooks: StdMutex<Option<Arc<HookDispatcher>>>,
    pr_callback: StdMutex<Option<PrCallback>>,
    log_callback: StdMutex<Option<LogCallback>>,
}

impl Shared {
    fn log(&self, message: &str) {
        let callback = self.log_callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    fn history(&self) -> Option<PullRequestHistory> {
        self.history.lock().unwrap().clone()
    }

    fn hooks(&self) -> Option<Arc<HookDispatcher>> {
        self.hooks.lock().unwrap().clone()
    }
}

/// Periodically enumerates the configured repositories, fans one task per
/// repository out through the work pool, applies the rule engine to every
/// open pull request, and records observations in the history store.
pub struct Orchestrator {
    shared: Arc<Shared>,
    pool: Arc<WorkPool>,
    cancel: CancellationToken,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(client: Arc<GitHubClient>, pool: Arc<WorkPool>, config: OrchestratorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                config,
                pr_rules: PullRequestRules::new(),
                branch_rules: BranchRules::new(),
                history: StdMutex::new(None),
                hooks: StdMutex::new(None),
                pr_callback: StdMutex::new(None),
                log_callback: StdMutex::new(None),
            }),
            pool,
            cancel: CancellationToken::new(),
            supervisor: StdMutex::new(None),
        }
    }

    pub fn set_history(&self, history: PullRequestHistory) {
        *self.shared.history.lock().unwrap() = Some(history);
    }

    pub fn set_hooks(&self, hooks: Arc<HookDispatcher>) {
        *self.shared.hooks.lock().unwrap() = Some(hooks);
    }

    pub fn set_pr_callback<F>(&self, callback: F)
    where
        F: Fn(&[PullRequest]) + Send + Sync + 'static,
    {
        *self.shared.pr_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn set_log_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.shared.log_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Launches the supervisor. A zero interval runs one pass and stops.
    pub fn start(&self) {
        let mut guard = self.supervisor.lock().unwrap();
        if guard.is_some() {
            return;
        }
        info!("starting poll orchestrator");
        self.pool.start();
        let shared = self.shared.clone();
        let pool = self.pool.clone();
        let cancel = self.cancel.clone();
        *guard = Some(tokio::spawn(async move {
            loop {
                run_poll(&shared, &pool).await;
                if shared.config.interval.is_zero() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(shared.config.interval) => {}
                }
            }
        }));
    }

    /// One synchronous fan-out, outside the periodic schedule.
    pub async fn poll_now(&self) {
        run_poll(&self.shared, &self.pool).await;
    }

    /// Cancels the supervisor and the work pool; both are joined before
    /// return. Idempotent.
    pub async fn stop(&self) {
        info!("stopping poll orchestrator");
        self.cancel.cancel();
        let supervisor = self.supervisor.lock().unwrap().take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.await;
        }
        self.pool.stop().await;
    }
}

async fn run_poll(shared: &Arc<Shared>, pool: &Arc<WorkPool>) {
    debug!("polling repositories");
    metrics::RUNS_TOTAL.inc();
    metrics::LAST_RUN_TIMESTAMP.set(chrono::Utc::now().timestamp());
    let _timer = metrics::RUN_DURATION.start_timer();

    let all_prs: Arc<StdMutex<Vec<PullRequest>>> = Arc::new(StdMutex::new(Vec::new()));
    let branch_total = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for repo in shared.config.repos.clone() {
        let shared = shared.clone();
        let all_prs = all_prs.clone();
        let branch_total = branch_total.clone();
        let label = format!("poll {}", repo.slug());
        handles.push(pool.submit(label, async move {
            poll_repo(&shared, &repo, &all_prs, &branch_total).await;
            Ok(())
        }));
    }
    for handle in handles {
        match handle.wait().await {
            work_pool::RequestState::Completed => {
                metrics::REPOS_PROCESSED_TOTAL
                    .with_label_values(&["success"])
                    .inc();
            }
            state => {
                metrics::REPOS_PROCESSED_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                debug!(?state, "repository task did not complete");
            }
        }
    }

    let mut prs = std::mem::take(&mut *all_prs.lock().unwrap());
    shared
        .config
        .sort
        .sort_by_title(&mut prs, |pr| pr.title.as_str());
    metrics::PULLS_OBSERVED_TOTAL.inc_by(prs.len() as u64);

    let pr_callback = shared.pr_callback.lock().unwrap().clone();
    if let Some(callback) = pr_callback {
        callback(&prs);
    }
    if let Some(history) = shared.history() {
        if let Some(path) = &shared.config.export_csv {
            if let Err(err) = history.export_csv(path).await {
                warn!(path = %path, error = %err, "history csv export failed");
            }
        }
        if let Some(path) = &shared.config.export_json {
            if let Err(err) = history.export_json(path).await {
                warn!(path = %path, error = %err, "history json export failed");
            }
        }
    }
    shared.log(&format!("Polled {} pull requests", prs.len()));

    let branches = branch_total.load(Ordering::Relaxed);
    if let Some(hooks) = shared.hooks() {
        let pull_threshold = shared.config.pull_threshold;
        if pull_threshold > 0 && prs.len() > pull_threshold {
            hooks.enqueue(
                "poll.pull_threshold",
                json!({"total_pulls": prs.len(), "threshold": pull_threshold}),
            );
        }
        let branch_threshold = shared.config.branch_threshold;
        if branch_threshold > 0 && branches > branch_threshold {
            hooks.enqueue(
                "poll.branch_threshold",
                json!({"total_branches": branches, "threshold": branch_threshold}),
            );
        }
    }
}

async fn poll_repo(
    shared: &Shared,
    repo: &RepoRef,
    all_prs: &StdMutex<Vec<PullRequest>>,
    branch_total: &AtomicUsize,
) {
    let config = &shared.config;
    let client = &shared.client;
    let (owner, name) = (repo.owner.as_str(), repo.name.as_str());

    if config.purge_only {
        debug!(slug = %repo.slug(), "purge-only pass");
        if !config.purge_prefix.is_empty() {
            client
                .cleanup_branches(
                    owner,
                    name,
                    &config.purge_prefix,
                    &config.protected_branches,
                    &config.protected_branch_excludes,
                )
                .await;
        }
        return;
    }

    if !config.only_poll_stray {
        let prs = if config.use_graphql {
            client.list_open_pull_requests_graphql(owner, name).await
        } else {
            client
                .list_pull_requests(owner, name, config.include_merged, config.pr_limit, config.pr_since)
                .await
        };

        if let Some(history) = shared.history() {
            for pr in &prs {
                if let Err(err) = history.insert(pr.number as i64, &pr.title, pr.merged).await {
                    warn!(number = pr.number, error = %err, "history insert failed");
                }
            }
        }

        if config.auto_merge {
            for pr in &prs {
                let meta = client.pull_request_metadata(owner, name, pr.number).await;
                let action = shared.pr_rules.decide(&PullRequestFacts {
                    state: meta.state.clone(),
                    mergeable_state: meta.mergeable_state.clone(),
                    draft: meta.draft,
                    check_state: meta.check_state,
                });
                match action {
                    PullRequestAction::Merge => {
                        let merged = client.merge_pull_request(owner, name, pr.number).await;
                        if merged {
                            if let Some(history) = shared.history() {
                                if let Err(err) = history.update_merged(pr.number as i64).await {
                                    warn!(number = pr.number, error = %err, "history update failed");
                                }
                            }
                            if let Some(hooks) = shared.hooks() {
                                hooks.enqueue(
                                    "pull_request.merged",
                                    json!({"number": pr.number, "owner": owner, "repo": name}),
                                );
                            }
                            shared.log(&format!("Merged PR #{}", pr.number));
                        } else {
                            shared.log(&format!(
                                "PR #{} did not meet merge requirements",
                                pr.number
                            ));
                        }
                    }
                    PullRequestAction::Close => {
                        let closed = client.close_pull_request(owner, name, pr.number).await;
                        if closed {
                            if let Some(hooks) = shared.hooks() {
                                hooks.enqueue(
                                    "pull_request.closed",
                                    json!({"number": pr.number, "owner": owner, "repo": name}),
                                );
                            }
                            shared.log(&format!("Closed PR #{}", pr.number));
                        }
                    }
                    PullRequestAction::Wait => {
                        debug!(number = pr.number, "waiting on pull request")
                    }
                    PullRequestAction::Ignore | PullRequestAction::None => {
                        debug!(number = pr.number, "ignoring pull request")
                    }
                }
            }
        }

        all_prs.lock().unwrap().extend(prs);
    }

    if !config.only_poll_prs {
        let branches = client.list_branches(owner, name).await;
        branch_total.fetch_add(branches.len(), Ordering::Relaxed);
        let stray: Vec<&gh_client::Branch> = branches
            .iter()
            .filter(|branch| {
                config.purge_prefix.is_empty() || !branch.name.starts_with(&config.purge_prefix)
            })
            .collect();
        shared.log(&format!(
            "{} stray branches: {}",
            repo.slug(),
            stray.len()
        ));

        if config.delete_stray {
            let default = client.default_branch(owner, name).await;
            for branch in &stray {
                if default.as_deref() == Some(branch.name.as_str()) {
                    continue;
                }
                let action = shared.branch_rules.decide(&BranchFacts {
                    state: String::new(),
                    stray: true,
                    newly_created: false,
                });
                if action == BranchAction::Delete
                    && client
                        .delete_branch(
                            owner,
                            name,
                            &branch.name,
                            &config.protected_branches,
                            &config.protected_branch_excludes,
                        )
                        .await
                {
                    shared.log(&format!("Deleted stray branch {}", branch.name));
                }
            }
        }
    }

    if !config.purge_prefix.is_empty() {
        client
            .cleanup_branches(
                owner,
                name,
                &config.purge_prefix,
                &config.protected_branches,
                &config.protected_branch_excludes,
            )
            .await;
    }

    if config.reject_dirty && !config.only_poll_prs {
        client
            .close_dirty_branches(
                owner,
                name,
                &config.protected_branches,
                &config.protected_branch_excludes,
            )
            .await;
    }
}
