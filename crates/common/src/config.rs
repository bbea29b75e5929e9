use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub github: GithubConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub repos: RepoFilterConfig,
    #[serde(default)]
    pub branches: BranchProtectionConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(".")
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Config::builder()
            .add_source(
                File::with_name(
                    path.as_ref()
                        .join("config/default")
                        .to_string_lossy()
                        .as_ref(),
                )
                .required(false),
            )
            .add_source(
                File::with_name(
                    path.as_ref()
                        .join("config/local")
                        .to_string_lossy()
                        .as_ref(),
                )
                .required(false),
            )
            .add_source(Environment::default().separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    pub token: String,
    #[serde(default = "GithubConfig::default_user_agent")]
    pub user_agent: String,
    #[serde(default = "GithubConfig::default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub use_graphql: bool,
}

impl GithubConfig {
    fn default_user_agent() -> String {
        "agpm".to_string()
    }

    fn default_api_base() -> String {
        "https://api.github.com".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Orchestrator period in seconds; 0 runs a single pass and stops.
    #[serde(default = "PollConfig::default_interval_secs")]
    pub poll_interval: u64,
    /// Work pool size; 0 derives from host parallelism.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "PollConfig::default_pr_limit")]
    pub pr_limit: u32,
    /// Only consider pull requests updated within this many seconds; 0 disables.
    #[serde(default)]
    pub pr_since: u64,
    #[serde(default = "PollConfig::default_sort")]
    pub sort: String,
    #[serde(default)]
    pub include_merged: bool,
    #[serde(default)]
    pub only_poll_prs: bool,
    #[serde(default)]
    pub only_poll_stray: bool,
    #[serde(default)]
    pub reject_dirty: bool,
    #[serde(default)]
    pub delete_stray: bool,
    #[serde(default)]
    pub allow_delete_base_branch: bool,
    #[serde(default)]
    pub purge_prefix: String,
    #[serde(default)]
    pub purge_only: bool,
    #[serde(default = "PollConfig::default_stray_detection_mode")]
    pub stray_detection_mode: String,
}

impl PollConfig {
    const fn default_interval_secs() -> u64 {
        300
    }

    const fn default_pr_limit() -> u32 {
        50
    }

    fn default_sort() -> String {
        "alpha".to_string()
    }

    fn default_stray_detection_mode() -> String {
        "rule".to_string()
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Self::default_interval_secs(),
            workers: 0,
            pr_limit: Self::default_pr_limit(),
            pr_since: 0,
            sort: Self::default_sort(),
            include_merged: false,
            only_poll_prs: false,
            only_poll_stray: false,
            reject_dirty: false,
            delete_stray: false,
            allow_delete_base_branch: false,
            purge_prefix: String::new(),
            purge_only: false,
            stray_detection_mode: Self::default_stray_detection_mode(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateConfig {
    /// Local token bucket capacity in requests per minute; 0 disables.
    #[serde(default)]
    pub max_request_rate: u32,
    /// Hourly budget estimate when the server never reports one.
    #[serde(default = "RateConfig::default_max_hourly")]
    pub max_hourly_requests: u32,
    /// Reserve fraction of the hourly budget held back.
    #[serde(default = "RateConfig::default_margin")]
    pub rate_limit_margin: f64,
    /// Seconds between budget probes against the rate endpoint.
    #[serde(default = "RateConfig::default_refresh_secs")]
    pub rate_limit_refresh_interval: u64,
}

impl RateConfig {
    const fn default_max_hourly() -> u32 {
        5000
    }

    const fn default_refresh_secs() -> u64 {
        300
    }

    fn default_margin() -> f64 {
        0.7
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            max_request_rate: 0,
            max_hourly_requests: Self::default_max_hourly(),
            rate_limit_margin: Self::default_margin(),
            rate_limit_refresh_interval: Self::default_refresh_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_timeout_secs")]
    pub http_timeout: u64,
    #[serde(default = "HttpConfig::default_retries")]
    pub http_retries: u32,
    /// Approximate download pacing in bytes per second; 0 disables.
    #[serde(default)]
    pub download_limit: u64,
    /// Approximate upload pacing in bytes per second; 0 disables.
    #[serde(default)]
    pub upload_limit: u64,
    /// Cumulative download cap in bytes; 0 disables.
    #[serde(default)]
    pub max_download: u64,
    /// Cumulative upload cap in bytes; 0 disables.
    #[serde(default)]
    pub max_upload: u64,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
}

impl HttpConfig {
    const fn default_timeout_secs() -> u64 {
        30
    }

    const fn default_retries() -> u32 {
        3
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            http_timeout: Self::default_timeout_secs(),
            http_retries: Self::default_retries(),
            download_limit: 0,
            upload_limit: 0,
            max_download: 0,
            max_upload: 0,
            http_proxy: None,
            https_proxy: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoFilterConfig {
    /// `owner/name` entries; a non-empty list restricts every operation.
    #[serde(default)]
    pub include_repos: Vec<String>,
    /// `owner/name` entries subtracted from every operation.
    #[serde(default)]
    pub exclude_repos: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchProtectionConfig {
    /// Literal names, `*` globs, or `regex:`-prefixed full-match patterns.
    #[serde(default)]
    pub protected_branches: Vec<String>,
    #[serde(default)]
    pub protected_branch_excludes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub auto_merge: bool,
    #[serde(default)]
    pub required_approvals: u32,
    #[serde(default)]
    pub require_status_success: bool,
    #[serde(default)]
    pub require_mergeable_state: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Path to the history database; unset disables recording.
    #[serde(default)]
    pub history_db: Option<String>,
    /// CSV dump rewritten after every poll; unset disables.
    #[serde(default)]
    pub history_export_csv: Option<String>,
    /// JSON dump rewritten after every poll; unset disables.
    #[serde(default)]
    pub history_export_json: Option<String>,
    /// Path to the persisted HTTP cache document; unset keeps the cache in memory.
    #[serde(default)]
    pub cache_file: Option<String>,
    #[serde(default = "HistoryConfig::default_flush_secs")]
    pub cache_flush_interval: u64,
}

impl HistoryConfig {
    const fn default_flush_secs() -> u64 {
        30
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            history_db: None,
            history_export_csv: None,
            history_export_json: None,
            cache_file: None,
            cache_flush_interval: Self::default_flush_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookActionConfig {
    /// `command` or `http`.
    pub kind: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "HookActionConfig::default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub parameters: Vec<(String, String)>,
}

impl HookActionConfig {
    fn default_method() -> String {
        "POST".to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookRepoOverrideConfig {
    pub pattern: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub default_actions: Option<Vec<HookActionConfig>>,
    #[serde(default)]
    pub event_actions: Option<HashMap<String, Vec<HookActionConfig>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub hook_enabled: bool,
    #[serde(default)]
    pub hook_default_actions: Vec<HookActionConfig>,
    #[serde(default)]
    pub hook_event_actions: HashMap<String, Vec<HookActionConfig>>,
    #[serde(default)]
    pub hook_repository_overrides: Vec<HookRepoOverrideConfig>,
    #[serde(default)]
    pub hook_pull_threshold: usize,
    #[serde(default)]
    pub hook_branch_threshold: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub mcp_server_enabled: bool,
    #[serde(default = "McpConfig::default_bind")]
    pub mcp_server_bind_address: String,
    #[serde(default = "McpConfig::default_port")]
    pub mcp_server_port: u16,
    #[serde(default = "McpConfig::default_backlog")]
    pub mcp_server_backlog: u32,
    /// Connections handled before the listener stops; 0 keeps it open.
    #[serde(default = "McpConfig::default_max_clients")]
    pub mcp_server_max_clients: u32,
}

impl McpConfig {
    fn default_bind() -> String {
        "127.0.0.1".to_string()
    }

    const fn default_port() -> u16 {
        7332
    }

    const fn default_backlog() -> u32 {
        16
    }

    const fn default_max_clients() -> u32 {
        4
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            mcp_server_enabled: false,
            mcp_server_bind_address: Self::default_bind(),
            mcp_server_port: Self::default_port(),
            mcp_server_backlog: Self::default_backlog(),
            mcp_server_max_clients: Self::default_max_clients(),
        }
    }
}
