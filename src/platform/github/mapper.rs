//! GitHub wire shapes and their mapping to platform types.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::platform::types;
use crate::transport::{QuotaResource, QuotaSnapshot};

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RepositoryWire {
    full_name: String,
    stargazers_count: u64,
    size: u64,
    language: Option<String>,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    archived: bool,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct IssueWire {
    id: u64,
    number: u64,
    title: String,
    body: Option<String>,
    closed_at: Option<DateTime<Utc>>,
    html_url: String,
    pull_request: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FileWire {
    filename: String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    status: String,
}

/// Decode each item on its own so one malformed entry does not sink the page.
pub fn decode_items<W, T>(values: Vec<Value>, map: impl Fn(W) -> T) -> (Vec<T>, Vec<String>)
where
    W: DeserializeOwned,
{
    let mut items = Vec::with_capacity(values.len());
    let mut skipped = Vec::new();
    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<W>(value) {
            Ok(wire) => items.push(map(wire)),
            Err(e) => skipped.push(format!("item {index}: {e}")),
        }
    }
    (items, skipped)
}

pub fn map_repositories(values: Vec<Value>) -> (Vec<types::Repository>, Vec<String>) {
    decode_items(values, |repo: RepositoryWire| types::Repository {
        full_name: repo.full_name,
        stars: repo.stargazers_count,
        size_kb: repo.size,
        language: repo.language,
        fork: repo.fork,
        archived: repo.archived,
        html_url: repo.html_url,
    })
}

pub fn map_issues(repo_full_name: &str, values: Vec<Value>) -> (Vec<types::Issue>, Vec<String>) {
    decode_items(values, |issue: IssueWire| types::Issue {
        id: issue.id,
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        closed_at: issue.closed_at,
        repository: repo_full_name.to_string(),
        html_url: issue.html_url,
        is_pull_request: issue.pull_request.is_some(),
    })
}

pub fn map_files(values: Vec<Value>) -> (Vec<types::ChangedFile>, Vec<String>) {
    decode_items(values, |file: FileWire| types::ChangedFile {
        path: file.filename,
        additions: file.additions,
        deletions: file.deletions,
        status: file.status,
    })
}

// GraphQL

#[derive(Debug, Deserialize)]
pub struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Unwrap a GraphQL envelope, mapping reported errors into the error taxonomy.
pub fn graphql_data<T>(response: GraphqlResponse<T>, what: &str) -> Result<T> {
    if let Some(error) = response.errors.first() {
        return Err(match error.kind.as_deref() {
            Some("NOT_FOUND") => AppError::NotFound(format!("{what}: {}", error.message)),
            Some("RATE_LIMITED") => AppError::RateLimited { retry_after: None },
            _ => AppError::Api {
                status: 200,
                message: format!("{what}: {}", error.message),
            },
        });
    }
    response
        .data
        .ok_or_else(|| AppError::Malformed(format!("{what}: GraphQL response without data")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameWithOwner {
    pub name_with_owner: String,
}

#[derive(Debug, Deserialize)]
pub struct ClosersData {
    pub repository: Option<ClosersRepository>,
}

#[derive(Debug, Deserialize)]
pub struct ClosersRepository {
    pub issue: Option<ClosersIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosersIssue {
    pub timeline_items: TimelineConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineConnection {
    pub page_info: PageInfo,
    #[serde(default)]
    pub nodes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum TimelineNode {
    ClosedEvent {
        closer: Option<Closer>,
    },
    #[serde(rename_all = "camelCase")]
    CrossReferencedEvent {
        will_close_target: bool,
        source: Option<Closer>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum Closer {
    PullRequest {
        number: u64,
        repository: NameWithOwner,
    },
    #[serde(other)]
    Other,
}

impl Closer {
    fn into_pull_ref(self) -> Option<types::PullRef> {
        match self {
            Closer::PullRequest { number, repository } => Some(types::PullRef {
                repository: repository.name_with_owner,
                number,
            }),
            Closer::Other => None,
        }
    }
}

/// Pull requests named by closing events and closing cross-references.
pub fn map_closers(nodes: Vec<Value>) -> (Vec<types::PullRef>, Vec<String>) {
    let (events, skipped) = decode_items(nodes, |node: TimelineNode| match node {
        TimelineNode::ClosedEvent { closer } => closer.and_then(Closer::into_pull_ref),
        TimelineNode::CrossReferencedEvent {
            will_close_target: true,
            source,
        } => source.and_then(Closer::into_pull_ref),
        _ => None,
    });
    (events.into_iter().flatten().collect(), skipped)
}

#[derive(Debug, Deserialize)]
pub struct PullData {
    pub repository: Option<PullRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRepository {
    pub pull_request: Option<PullNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullNode {
    number: u64,
    merged: bool,
    url: String,
    base_ref_oid: Option<String>,
    closing_issues_references: ClosingReferences,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClosingReferences {
    total_count: u64,
    #[serde(default)]
    nodes: Vec<Option<ClosingReference>>,
}

#[derive(Debug, Deserialize)]
struct ClosingReference {
    number: u64,
    repository: NameWithOwner,
}

pub fn map_pull_request(repo_full_name: &str, pr: PullNode) -> types::PullRequest {
    types::PullRequest {
        repository: repo_full_name.to_string(),
        number: pr.number,
        merged: pr.merged,
        base_sha: pr.base_ref_oid,
        html_url: pr.url,
        closing_issues: pr
            .closing_issues_references
            .nodes
            .into_iter()
            .flatten()
            .map(|node| types::IssueRef {
                repository: node.repository.name_with_owner,
                number: node.number,
            })
            .collect(),
        closing_total: pr.closing_issues_references.total_count,
    }
}

// Rate limit status

#[derive(Debug, Deserialize)]
pub struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateWire,
    search: RateWire,
    graphql: Option<RateWire>,
}

#[derive(Debug, Deserialize)]
struct RateWire {
    limit: i64,
    remaining: i64,
    reset: u64,
}

pub fn map_rate_limit(response: RateLimitResponse) -> Vec<QuotaSnapshot> {
    let resources = response.resources;
    let snapshot = |resource, rate: RateWire| QuotaSnapshot {
        resource,
        limit: rate.limit,
        remaining: rate.remaining,
        reset_epoch: rate.reset,
    };

    let mut snapshots = vec![
        snapshot(QuotaResource::Core, resources.core),
        snapshot(QuotaResource::Search, resources.search),
    ];
    if let Some(graphql) = resources.graphql {
        snapshots.push(snapshot(QuotaResource::Graphql, graphql));
    }
    snapshots
}
