//! Run-scoped, identity-keyed fetch cache with single-flight semantics.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::{AppError, Result};
use crate::platform::types::{ChangedFile, IssueRef, PullRef, PullRequest};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Closers(IssueRef),
    PullRequest(PullRef),
    PullFiles(PullRef),
}

#[derive(Debug, Clone)]
enum Entry {
    Closers(Arc<Vec<PullRef>>),
    PullRequest(Arc<PullRequest>),
    PullFiles(Arc<Vec<ChangedFile>>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent requesters of one key share a single fetch. A failed fetch
/// leaves the key empty so the next requester tries again.
#[derive(Debug, Default)]
pub struct FetchCache {
    entries: Mutex<HashMap<CacheKey, Arc<OnceCell<Entry>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<OnceCell<Entry>>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Entry>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Entry>>,
    {
        let cell = self.lock().entry(key).or_default().clone();

        let mut fetched = false;
        let entry = cell
            .get_or_try_init(|| {
                fetched = true;
                fetch()
            })
            .await?
            .clone();

        if fetched {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(entry)
    }

    pub async fn closers<F, Fut>(&self, issue: &IssueRef, fetch: F) -> Result<Arc<Vec<PullRef>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<PullRef>>>,
    {
        let entry = self
            .get_or_fetch(CacheKey::Closers(issue.clone()), move || async move {
                Ok(Entry::Closers(Arc::new(fetch().await?)))
            })
            .await?;
        match entry {
            Entry::Closers(closers) => Ok(closers),
            _ => Err(mismatch(issue)),
        }
    }

    pub async fn pull_request<F, Fut>(&self, pr: &PullRef, fetch: F) -> Result<Arc<PullRequest>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PullRequest>>,
    {
        let entry = self
            .get_or_fetch(CacheKey::PullRequest(pr.clone()), move || async move {
                Ok(Entry::PullRequest(Arc::new(fetch().await?)))
            })
            .await?;
        match entry {
            Entry::PullRequest(pull) => Ok(pull),
            _ => Err(mismatch(pr)),
        }
    }

    pub async fn pull_files<F, Fut>(&self, pr: &PullRef, fetch: F) -> Result<Arc<Vec<ChangedFile>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ChangedFile>>>,
    {
        let entry = self
            .get_or_fetch(CacheKey::PullFiles(pr.clone()), move || async move {
                Ok(Entry::PullFiles(Arc::new(fetch().await?)))
            })
            .await?;
        match entry {
            Entry::PullFiles(files) => Ok(files),
            _ => Err(mismatch(pr)),
        }
    }
}

fn mismatch(key: &dyn std::fmt::Display) -> AppError {
    AppError::Internal(format!("cache entry for {key} has the wrong kind"))
}
