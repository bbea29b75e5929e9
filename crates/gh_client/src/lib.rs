pub mod backoff;
pub mod cache;
pub mod client;
pub mod error;
pub mod governor;
pub mod metrics;
pub mod model;
pub mod protect;
pub mod transport;

pub use crate::cache::{CacheEntry, HttpCache};
pub use crate::client::{encode_ref, GitHubClient, GitHubClientOptions, MergeGate};
pub use crate::error::GhError;
pub use crate::governor::{BudgetSnapshot, BudgetSource, GovernorConfig, RateGovernor};
pub use crate::model::{
    Branch, CompareResult, CompareStatus, PrState, PullRequest, PullRequestMetadata, RepoRef,
};
pub use crate::protect::BranchProtection;
pub use crate::transport::{HttpTransport, ReqwestTransport, TransportOptions, TransportReply};
