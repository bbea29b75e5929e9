use std::sync::Arc;

use async_trait::async_trait;
use gh_client::{GitHubClient, PullRequest, RepoRef};

/// Backend capability set the control server drives.
#[async_trait]
pub trait McpBackend: Send + Sync {
    async fn list_repositories(&self) -> Vec<RepoRef>;
    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        include_merged: bool,
    ) -> Vec<PullRequest>;
    async fn list_branches(&self, owner: &str, repo: &str) -> Vec<String>;
    async fn merge_pull_request(&self, owner: &str, repo: &str, number: u64) -> bool;
    async fn close_pull_request(&self, owner: &str, repo: &str, number: u64) -> bool;
    async fn delete_branch(&self, owner: &str, repo: &str, branch: &str) -> bool;
}

/// Adapter over the shared remote client. When a static repository list is
/// configured it answers `listRepositories` without touching the network.
pub struct GithubMcpBackend {
    client: Arc<GitHubClient>,
    repositories: Vec<RepoRef>,
    protected_branches: Vec<String>,
    protected_branch_excludes: Vec<String>,
}

impl GithubMcpBackend {
    pub fn new(
        client: Arc<GitHubClient>,
        repositories: Vec<RepoRef>,
        protected_branches: Vec<String>,
        protected_branch_excludes: Vec<String>,
    ) -> Self {
        Self {
            client,
            repositories,
            protected_branches,
            protected_branch_excludes,
        }
    }
}

#[async_trait]
impl McpBackend for GithubMcpBackend {
    async fn list_repositories(&self) -> Vec<RepoRef> {
        if !self.repositories.is_empty() {
            return self.repositories.clone();
        }
        self.client.list_repositories().await
    }

    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        include_merged: bool,
    ) -> Vec<PullRequest> {
        self.client
            .list_pull_requests(owner, repo, include_merged, 0, None)
            .await
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Vec<String> {
        self.client
            .list_branches(owner, repo)
            .await
            .into_iter()
            .map(|branch| branch.name)
            .collect()
    }

    async fn merge_pull_request(&self, owner: &str, repo: &str, number: u64) -> bool {
        self.client.merge_pull_request(owner, repo, number).await
    }

    async fn close_pull_request(&self, owner: &str, repo: &str, number: u64) -> bool {
        self.client.close_pull_request(owner, repo, number).await
    }

    async fn delete_branch(&self, owner: &str, repo: &str, branch: &str) -> bool {
        self.client
            .delete_branch(
                owner,
                repo,
                branch,
                &self.protected_branches,
                &self.protected_branch_excludes,
            )
            .await
    }
}
