#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use issue_scout::config::AppConfig;
use issue_scout::error::{AppError, Result};
use issue_scout::pipeline::scoring::{CandidateScorer, ComplexityScorer, ScoreBreakdown, ScoreInput};
use issue_scout::platform::types::*;
use issue_scout::platform::{Authenticator, Platform};

pub const REPO: &str = "acme/widgets";

pub const PLAIN_BODY: &str = "The config loader ignores the override value when the \
    environment variable is set to an empty string.";

#[derive(Debug, Clone, Copy)]
pub enum FailWith {
    Authentication,
    RetriesExhausted,
}

impl FailWith {
    fn error(self) -> AppError {
        match self {
            FailWith::Authentication => AppError::Authentication("Bad credentials".into()),
            FailWith::RetriesExhausted => AppError::RetriesExhausted {
                attempts: 4,
                last: Box::new(AppError::Transient("502".into())),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct Calls {
    pub search: AtomicUsize,
    pub issues: AtomicUsize,
    pub closers: AtomicUsize,
    pub pulls: AtomicUsize,
    pub files: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// In-memory platform with call counters. Every listing is a single page.
#[derive(Debug, Default)]
pub struct FakePlatform {
    pub repos: Vec<Repository>,
    pub issues: HashMap<String, Vec<Issue>>,
    pub closers: HashMap<(String, u64), Vec<PullRef>>,
    pub pulls: HashMap<(String, u64), PullRequest>,
    pub files: HashMap<(String, u64), Vec<ChangedFile>>,
    pub closer_failures: HashMap<(String, u64), FailWith>,
    pub calls: Calls,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, repo: Repository) -> Self {
        self.issues.entry(repo.full_name.clone()).or_default();
        self.repos.push(repo);
        self
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues
            .entry(issue.repository.clone())
            .or_default()
            .push(issue);
        self
    }

    /// An issue closed by `pr_number`, which closes only that issue.
    pub fn with_linked_issue(
        self,
        repo: &str,
        number: u64,
        body: &str,
        pr_number: u64,
        files: Vec<ChangedFile>,
    ) -> Self {
        self.with_issue(issue(repo, number, body))
            .with_closers(repo, number, &[pr_number])
            .with_pull(pull(repo, pr_number, &[number], true), files)
    }

    pub fn with_closers(mut self, repo: &str, issue: u64, prs: &[u64]) -> Self {
        self.closers.insert(
            (repo.to_string(), issue),
            prs.iter().map(|&n| pr_ref(repo, n)).collect(),
        );
        self
    }

    pub fn with_pull(mut self, pr: PullRequest, files: Vec<ChangedFile>) -> Self {
        let key = (pr.repository.clone(), pr.number);
        self.files.insert(key.clone(), files);
        self.pulls.insert(key, pr);
        self
    }

    pub fn failing_closers(mut self, repo: &str, issue: u64, fail: FailWith) -> Self {
        self.closer_failures.insert((repo.to_string(), issue), fail);
        self
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn search_repositories(
        &self,
        _query: &str,
        _cursor: Option<&Cursor>,
    ) -> Result<Page<Repository>> {
        self.calls.search.fetch_add(1, Ordering::SeqCst);
        Ok(Page::last(self.repos.clone()))
    }

    async fn list_closed_issues(
        &self,
        repo: &str,
        _cursor: Option<&Cursor>,
    ) -> Result<Page<Issue>> {
        self.calls.issues.fetch_add(1, Ordering::SeqCst);
        Ok(Page::last(self.issues.get(repo).cloned().unwrap_or_default()))
    }

    async fn list_issue_closers(
        &self,
        issue: &IssueRef,
        _cursor: Option<&Cursor>,
    ) -> Result<Page<PullRef>> {
        self.calls.closers.fetch_add(1, Ordering::SeqCst);
        let key = (issue.repository.clone(), issue.number);
        if let Some(fail) = self.closer_failures.get(&key) {
            return Err(fail.error());
        }
        Ok(Page::last(self.closers.get(&key).cloned().unwrap_or_default()))
    }

    async fn get_pull_request(&self, pr: &PullRef) -> Result<PullRequest> {
        self.calls.pulls.fetch_add(1, Ordering::SeqCst);
        self.pulls
            .get(&(pr.repository.clone(), pr.number))
            .cloned()
            .ok_or_else(|| AppError::NotFound(pr.to_string()))
    }

    async fn list_pull_files(
        &self,
        pr: &PullRef,
        _cursor: Option<&Cursor>,
    ) -> Result<Page<ChangedFile>> {
        self.calls.files.fetch_add(1, Ordering::SeqCst);
        Ok(Page::last(
            self.files
                .get(&(pr.repository.clone(), pr.number))
                .cloned()
                .unwrap_or_default(),
        ))
    }
}

/// Default scorer that counts its invocations.
pub struct CountingScorer {
    inner: ComplexityScorer,
    pub calls: AtomicUsize,
}

impl CountingScorer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: ComplexityScorer::new(AppConfig::default().scoring).unwrap(),
            calls: AtomicUsize::new(0),
        })
    }
}

impl CandidateScorer for CountingScorer {
    fn score(&self, input: &ScoreInput) -> ScoreBreakdown {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.score(input)
    }
}

pub struct RejectingAuthenticator;

#[async_trait]
impl Authenticator for RejectingAuthenticator {
    async fn authenticate(&self) -> Result<()> {
        Err(AppError::Authentication("a GitHub token is required".into()))
    }
}

pub fn repo(name: &str) -> Repository {
    Repository {
        full_name: name.to_string(),
        stars: 1500,
        size_kb: 20_000,
        language: Some("Python".to_string()),
        fork: false,
        archived: false,
        html_url: format!("https://github.com/{name}"),
    }
}

/// Issues close earlier the higher their number, so discovery order follows
/// the issue number.
pub fn issue(repo: &str, number: u64, body: &str) -> Issue {
    let hour = 23 - u32::try_from(number % 24).unwrap();
    Issue {
        id: 1000 + number,
        number,
        title: format!("Bug report {number}"),
        body: body.to_string(),
        closed_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()),
        repository: repo.to_string(),
        html_url: format!("https://github.com/{repo}/issues/{number}"),
        is_pull_request: false,
    }
}

pub fn pr_ref(repo: &str, number: u64) -> PullRef {
    PullRef {
        repository: repo.to_string(),
        number,
    }
}

pub fn pull(repo: &str, number: u64, closes: &[u64], merged: bool) -> PullRequest {
    PullRequest {
        repository: repo.to_string(),
        number,
        merged,
        base_sha: Some("0123abcd".to_string()),
        html_url: format!("https://github.com/{repo}/pull/{number}"),
        closing_issues: closes
            .iter()
            .map(|&n| IssueRef {
                repository: repo.to_string(),
                number: n,
            })
            .collect(),
        closing_total: closes.len() as u64,
    }
}

pub fn file(path: &str, additions: u64, deletions: u64) -> ChangedFile {
    ChangedFile {
        path: path.to_string(),
        additions,
        deletions,
        status: "modified".to_string(),
    }
}

/// `count` Python sources of `lines` changed lines spread over `dirs` packages.
pub fn code_files(count: usize, lines: u64, dirs: usize) -> Vec<ChangedFile> {
    (0..count)
        .map(|i| file(&format!("pkg{}/module_{i}.py", i % dirs.max(1)), lines, 0))
        .collect()
}

pub fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.repo_concurrency = 1;
    config.pipeline.issue_concurrency = 1;
    config
}
