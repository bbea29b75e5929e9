use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use common::{config::AppConfig, logging, SortMode};
use gh_client::{
    GitHubClient, GitHubClientOptions, GovernorConfig, HttpCache, RateGovernor, ReqwestTransport,
    RepoRef, TransportOptions,
};
use history::PullRequestHistory;
use hooks::{HookDispatcher, HookSettings};
use mcp::{GithubMcpBackend, McpServer, McpServerOptions, McpServerRunner};
use poller::{Orchestrator, OrchestratorConfig};
use tracing::{error, info, warn};
use work_pool::WorkPool;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging("info");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    // Purging everything with no prefix would mean deleting every closed-PR
    // head ref; refuse instead of guessing.
    if config.poll.purge_only && config.poll.purge_prefix.is_empty() {
        error!("purge_only requires purge_prefix");
        return ExitCode::from(2);
    }

    let sort: SortMode = match config.poll.sort.parse() {
        Ok(sort) => sort,
        Err(err) => {
            error!(error = %err, "invalid sort mode");
            return ExitCode::from(1);
        }
    };
    if let Err(err) = config
        .poll
        .stray_detection_mode
        .parse::<rules::StrayDetectionMode>()
    {
        error!(error = %err, "invalid stray detection mode");
        return ExitCode::from(1);
    }

    let transport = match ReqwestTransport::new(TransportOptions {
        timeout: Duration::from_secs(config.http.http_timeout),
        http_proxy: config.http.http_proxy.clone(),
        https_proxy: config.http.https_proxy.clone(),
        download_limit: config.http.download_limit,
        upload_limit: config.http.upload_limit,
        max_download: config.http.max_download,
        max_upload: config.http.max_upload,
    }) {
        Ok(transport) => Arc::new(transport),
        Err(err) => {
            error!(error = %err, "failed to build http transport");
            return ExitCode::from(1);
        }
    };

    let governor = Arc::new(RateGovernor::new(GovernorConfig {
        max_per_minute: config.rate.max_request_rate,
        reserve_fraction: config.rate.rate_limit_margin.clamp(0.0, 1.0),
        max_hourly: config.rate.max_hourly_requests,
        ..GovernorConfig::default()
    }));

    let cache = match &config.history.cache_file {
        Some(path) => HttpCache::load(path),
        None => HttpCache::in_memory(),
    };

    let client = Arc::new(GitHubClient::new(
        transport,
        governor.clone(),
        cache,
        config.github.token.clone(),
        GitHubClientOptions {
            api_base: config.github.api_base.clone(),
            user_agent: config.github.user_agent.clone(),
            include_repos: config.repos.include_repos.clone(),
            exclude_repos: config.repos.exclude_repos.clone(),
            retries: config.http.http_retries,
            allow_delete_base_branch: config.poll.allow_delete_base_branch,
        },
    ));
    client.set_required_approvals(config.merge.required_approvals);
    client.set_require_status_success(config.merge.require_status_success);
    client.set_require_mergeable_state(config.merge.require_mergeable_state);
    if config.history.cache_file.is_some() && config.history.cache_flush_interval > 0 {
        client.set_cache_flush_interval(Duration::from_secs(config.history.cache_flush_interval));
    }
    if config.rate.rate_limit_refresh_interval > 0 {
        let _ = client
            .clone()
            .start_budget_probe(Duration::from_secs(config.rate.rate_limit_refresh_interval));
    }

    let repos: Vec<RepoRef> = if config.repos.include_repos.is_empty() {
        info!("no repositories configured; discovering from the API");
        client.list_repositories().await
    } else {
        config
            .repos
            .include_repos
            .iter()
            .filter_map(|slug| {
                let (owner, name) = slug.split_once('/')?;
                if owner.is_empty() || name.is_empty() {
                    return None;
                }
                Some(RepoRef::new(owner, name))
            })
            .collect()
    };
    if repos.is_empty() {
        warn!("no repositories to poll");
    }

    let history = match &config.history.history_db {
        Some(path) => match PullRequestHistory::open(path).await {
            Ok(history) => Some(history),
            Err(err) => {
                error!(path = %path, error = %err, "failed to open history store");
                return ExitCode::from(1);
            }
        },
        None => None,
    };
    if history.is_none()
        && (config.history.history_export_csv.is_some()
            || config.history.history_export_json.is_some())
    {
        warn!("history export configured without history_db; exports disabled");
    }

    let hook_settings = HookSettings::from_config(&config.hooks);
    let dispatcher = Arc::new(HookDispatcher::new(hook_settings));

    let pool = Arc::new(WorkPool::new(config.poll.workers));
    {
        let governor = governor.clone();
        pool.set_pressure_probe(move |outstanding| governor.note_outstanding(outstanding));
    }

    let orchestrator = Orchestrator::new(
        client.clone(),
        pool,
        OrchestratorConfig {
            interval: Duration::from_secs(config.poll.poll_interval),
            repos: repos.clone(),
            include_merged: config.poll.include_merged,
            only_poll_prs: config.poll.only_poll_prs,
            only_poll_stray: config.poll.only_poll_stray,
            reject_dirty: config.poll.reject_dirty,
            delete_stray: config.poll.delete_stray,
            auto_merge: config.merge.auto_merge,
            purge_prefix: config.poll.purge_prefix.clone(),
            purge_only: config.poll.purge_only,
            use_graphql: config.github.use_graphql || config.rate.max_request_rate == 1,
            sort,
            pr_limit: config.poll.pr_limit,
            pr_since: (config.poll.pr_since > 0)
                .then(|| Duration::from_secs(config.poll.pr_since)),
            protected_branches: config.branches.protected_branches.clone(),
            protected_branch_excludes: config.branches.protected_branch_excludes.clone(),
            pull_threshold: config.hooks.hook_pull_threshold,
            branch_threshold: config.hooks.hook_branch_threshold,
            export_csv: config.history.history_export_csv.clone(),
            export_json: config.history.history_export_json.clone(),
        },
    );
    if let Some(history) = history {
        orchestrator.set_history(history);
    }
    orchestrator.set_hooks(dispatcher.clone());
    orchestrator.start();

    let mcp_runner = if config.mcp.mcp_server_enabled {
        let backend = GithubMcpBackend::new(
            client.clone(),
            repos,
            config.branches.protected_branches.clone(),
            config.branches.protected_branch_excludes.clone(),
        );
        let server = Arc::new(McpServer::new(Arc::new(backend)));
        let runner = McpServerRunner::new(
            server,
            McpServerOptions {
                bind_address: config.mcp.mcp_server_bind_address.clone(),
                port: config.mcp.mcp_server_port,
                backlog: config.mcp.mcp_server_backlog,
                max_clients: config.mcp.mcp_server_max_clients,
            },
        );
        runner.set_event_sink(|message| info!(target: "mcp", "{message}"));
        if let Err(err) = runner.start().await {
            error!(error = %err, "failed to start control server");
            return ExitCode::from(1);
        }
        Some(runner)
    } else {
        None
    };

    info!("agpm running; press ctrl-c to stop");
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");

    if let Some(runner) = &mcp_runner {
        runner.stop().await;
    }
    // Cancel the client first so repo tasks blocked on rate sleeps unwind,
    // then join the orchestrator and drain the hook queue.
    client.shutdown().await;
    orchestrator.stop().await;
    dispatcher.shutdown().await;
    client.flush_cache();

    ExitCode::SUCCESS
}
