pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

#[async_trait]
pub trait Platform: Send + Sync {
    /// One page of repository search results for `query`.
    async fn search_repositories(
        &self,
        query: &str,
        cursor: Option<&Cursor>,
    ) -> Result<Page<Repository>>;

    /// One page of closed issues, most recently updated first.
    async fn list_closed_issues(
        &self,
        repo_full_name: &str,
        cursor: Option<&Cursor>,
    ) -> Result<Page<Issue>>;

    /// Pull requests that closed, or declared they will close, an issue.
    async fn list_issue_closers(
        &self,
        issue: &IssueRef,
        cursor: Option<&Cursor>,
    ) -> Result<Page<PullRef>>;

    /// Fetch a pull request with its closing-issue references.
    async fn get_pull_request(&self, pr: &PullRef) -> Result<PullRequest>;

    /// One page of a pull request's changed files.
    async fn list_pull_files(
        &self,
        pr: &PullRef,
        cursor: Option<&Cursor>,
    ) -> Result<Page<ChangedFile>>;
}

/// Gate checked once before a run issues any request.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<()>;
}
