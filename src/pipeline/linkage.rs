//! Resolves the single pull request that closed an issue.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::FetchCache;
use crate::error::Result;
use crate::platform::types::{Cursor, Issue, IssueRef, PullRef, PullRequest};
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq)]
pub enum Linkage {
    Linked(Arc<PullRequest>),
    Unlinked { reason: String },
    Ambiguous { count: usize, reason: String },
}

pub struct LinkageResolver {
    platform: Arc<dyn Platform>,
    cache: Arc<FetchCache>,
    require_merged_pr: bool,
}

impl LinkageResolver {
    pub fn new(
        platform: Arc<dyn Platform>,
        cache: Arc<FetchCache>,
        require_merged_pr: bool,
    ) -> Self {
        Self {
            platform,
            cache,
            require_merged_pr,
        }
    }

    pub async fn resolve(&self, issue: &Issue) -> Result<Linkage> {
        let issue_ref = issue.reference();
        let closers = self
            .cache
            .closers(&issue_ref, || self.fetch_closers(&issue_ref))
            .await?;

        let pr_ref = match closers.as_slice() {
            [] => {
                return Ok(Linkage::Unlinked {
                    reason: "no closing pull request".to_string(),
                })
            }
            [single] => single,
            many => {
                return Ok(Linkage::Ambiguous {
                    count: many.len(),
                    reason: format!("{} closing pull requests", many.len()),
                })
            }
        };

        let pr = self
            .cache
            .pull_request(pr_ref, || self.platform.get_pull_request(pr_ref))
            .await?;

        // One-way closure: the PR must close this issue and nothing else.
        let closes_only_this = pr.closing_total == 1
            && pr.closing_issues.len() == 1
            && pr.closing_issues[0] == issue_ref;
        if !closes_only_this {
            let count = usize::try_from(pr.closing_total).unwrap_or(usize::MAX);
            let reason = if pr.closing_total == 1 {
                format!("{pr_ref} closes a different issue")
            } else {
                format!("{pr_ref} closes {} issues", pr.closing_total)
            };
            return Ok(Linkage::Ambiguous { count, reason });
        }

        if self.require_merged_pr && !pr.merged {
            return Ok(Linkage::Unlinked {
                reason: "pr not merged".to_string(),
            });
        }

        Ok(Linkage::Linked(pr))
    }

    /// All closer pages, deduplicated by (repository, number) in first-seen order.
    async fn fetch_closers(&self, issue: &IssueRef) -> Result<Vec<PullRef>> {
        let mut seen = HashSet::new();
        let mut closers = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = self
                .platform
                .list_issue_closers(issue, cursor.as_ref())
                .await?;
            for skipped in &page.skipped {
                tracing::warn!(
                    issue = %issue,
                    detail = %skipped,
                    "Skipping malformed timeline item"
                );
            }
            for pr in page.items {
                if seen.insert(pr.clone()) {
                    closers.push(pr);
                }
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(closers)
    }
}
