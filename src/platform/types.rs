use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A repository returned by search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Repository {
    pub full_name: String,
    pub stars: u64,
    pub size_kb: u64,
    pub language: Option<String>,
    pub fork: bool,
    pub archived: bool,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IssueRef {
    pub repository: String,
    pub number: u64,
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repository, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PullRef {
    pub repository: String,
    pub number: u64,
}

impl fmt::Display for PullRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repository, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub closed_at: Option<DateTime<Utc>>,
    /// Full name of the owning repository.
    pub repository: String,
    pub html_url: String,
    /// The issues endpoint also lists pull requests.
    #[serde(skip)]
    pub is_pull_request: bool,
}

impl Issue {
    pub fn reference(&self) -> IssueRef {
        IssueRef {
            repository: self.repository.clone(),
            number: self.number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PullRequest {
    pub repository: String,
    pub number: u64,
    pub merged: bool,
    pub base_sha: Option<String>,
    pub html_url: String,
    /// Issues this PR declares it closes (first page only).
    pub closing_issues: Vec<IssueRef>,
    /// Upstream total of closing references, which may exceed `closing_issues`.
    pub closing_total: u64,
}

impl PullRequest {
    pub fn reference(&self) -> PullRef {
        PullRef {
            repository: self.repository.clone(),
            number: self.number,
        }
    }
}

/// One entry of a pull request's changed-file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedFile {
    pub path: String,
    pub additions: u64,
    pub deletions: u64,
    pub status: String,
}

/// Opaque pagination position: a REST `Link` URL or a GraphQL `endCursor`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(pub String);

/// One page of results plus descriptions of items that failed to decode.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub skipped: Vec<String>,
    pub next: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            skipped: Vec::new(),
            next: None,
        }
    }
}
