//! Lazy repository and issue sources over the platform's paginated listings.

use std::collections::HashSet;
use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;

use crate::config::SearchConfig;
use crate::error::{AppError, Result};
use crate::platform::types::{Cursor, Issue, Repository};
use crate::platform::Platform;
use crate::shutdown::CancelSignal;

/// Repository search query: language, popularity, size and exclusion terms.
pub fn build_query(search: &SearchConfig) -> String {
    let language = search.language.trim();
    let language = if language.contains(' ') {
        format!("\"{language}\"")
    } else {
        language.to_string()
    };

    let mut parts = vec![
        format!("language:{language}"),
        format!("stars:>={}", search.min_stars),
        format!("size:<={}", search.max_repo_size_mb * 1024),
        "fork:false".to_string(),
        "archived:false".to_string(),
    ];
    parts.extend(
        search
            .exclude_terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| format!("NOT {t}")),
    );
    if let Some(extra) = search.extra_query.as_deref().map(str::trim) {
        if !extra.is_empty() {
            parts.push(extra.to_string());
        }
    }
    parts.join(" ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepoScreening {
    Accepted(Repository),
    Rejected { repo: Repository, reason: String },
    Malformed(String),
}

pub struct RepositorySource {
    platform: Arc<dyn Platform>,
    search: SearchConfig,
    cancel: CancelSignal,
}

impl RepositorySource {
    pub fn new(platform: Arc<dyn Platform>, search: SearchConfig, cancel: CancelSignal) -> Self {
        Self {
            platform,
            search,
            cancel,
        }
    }

    /// Search results are re-checked locally; the server's filters are advisory.
    pub fn screen(&self, repo: &Repository) -> Option<String> {
        let wanted = self.search.language.trim();
        match repo.language.as_deref() {
            Some(language) if language.eq_ignore_ascii_case(wanted) => {}
            Some(language) => return Some(format!("language {language} != {wanted}")),
            None => return Some("no primary language".to_string()),
        }
        if repo.stars < self.search.min_stars {
            return Some(format!("stars {} < {}", repo.stars, self.search.min_stars));
        }
        let max_kb = self.search.max_repo_size_mb * 1024;
        if repo.size_kb > max_kb {
            return Some(format!("size {} KB > {max_kb} KB", repo.size_kb));
        }
        if repo.fork {
            return Some("repository is a fork".to_string());
        }
        if repo.archived {
            return Some("repository is archived".to_string());
        }
        None
    }

    /// Stops after `max_repos` accepted repositories, at the end of the
    /// results, or once the run is cancelled.
    pub fn stream(&self) -> impl Stream<Item = Result<RepoScreening>> + Send + '_ {
        try_stream! {
            let query = build_query(&self.search);
            tracing::info!(query = %query, "Searching repositories");

            let mut seen = HashSet::new();
            let mut accepted = 0usize;
            let mut cursor: Option<Cursor> = None;

            while accepted < self.search.max_repos && !self.cancel.is_cancelled() {
                let page = self.platform.search_repositories(&query, cursor.as_ref()).await?;
                for detail in page.skipped {
                    yield RepoScreening::Malformed(detail);
                }
                for repo in page.items {
                    if accepted >= self.search.max_repos {
                        break;
                    }
                    if !seen.insert(repo.full_name.to_lowercase()) {
                        continue;
                    }
                    match self.screen(&repo) {
                        None => {
                            accepted += 1;
                            yield RepoScreening::Accepted(repo);
                        }
                        Some(reason) => yield RepoScreening::Rejected { repo, reason },
                    }
                }
                match page.next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IssueItem {
    Issue(Issue),
    Malformed(String),
}

pub struct IssueSource {
    platform: Arc<dyn Platform>,
    max_issues: usize,
    cancel: CancelSignal,
}

impl IssueSource {
    pub fn new(platform: Arc<dyn Platform>, max_issues: usize, cancel: CancelSignal) -> Self {
        Self {
            platform,
            max_issues,
            cancel,
        }
    }

    /// Closed issues of `repo`, newest close first (number breaks ties).
    ///
    /// The listing is ordered by update time, so every page up to
    /// `max_issues` is fetched and re-sorted before the first issue is
    /// yielded. Only the repository stream is lazy per page.
    pub fn stream<'a>(
        &'a self,
        repo: &'a str,
    ) -> impl Stream<Item = Result<IssueItem>> + Send + 'a {
        try_stream! {
            let mut seen = HashSet::new();
            let mut issues: Vec<Issue> = Vec::new();
            let mut cursor: Option<Cursor> = None;

            while issues.len() < self.max_issues {
                if self.cancel.is_cancelled() {
                    Err::<(), _>(AppError::Cancelled)?;
                }
                let page = self.platform.list_closed_issues(repo, cursor.as_ref()).await?;
                for detail in page.skipped {
                    yield IssueItem::Malformed(detail);
                }
                for issue in page.items {
                    if issues.len() >= self.max_issues {
                        break;
                    }
                    if issue.is_pull_request || !seen.insert(issue.number) {
                        continue;
                    }
                    issues.push(issue);
                }
                match page.next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }

            issues.sort_by(|a, b| {
                b.closed_at
                    .cmp(&a.closed_at)
                    .then_with(|| b.number.cmp(&a.number))
            });
            tracing::debug!(repo = %repo, issues = issues.len(), "Collected closed issues");

            for issue in issues {
                yield IssueItem::Issue(issue);
            }
        }
    }
}
