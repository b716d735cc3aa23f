use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::Platform;
use crate::transport::{ApiRequest, QuotaResource, QuotaSnapshot, TransportClient};

use super::mapper;

const ISSUE_CLOSERS_QUERY: &str = r#"
query IssueClosers($owner: String!, $name: String!, $number: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    issue(number: $number) {
      timelineItems(first: 100, after: $after, itemTypes: [CLOSED_EVENT, CROSS_REFERENCED_EVENT]) {
        pageInfo { hasNextPage endCursor }
        nodes {
          __typename
          ... on ClosedEvent {
            closer {
              __typename
              ... on PullRequest { number repository { nameWithOwner } }
            }
          }
          ... on CrossReferencedEvent {
            willCloseTarget
            source {
              __typename
              ... on PullRequest { number repository { nameWithOwner } }
            }
          }
        }
      }
    }
  }
}
"#;

const PULL_REQUEST_QUERY: &str = r#"
query PullRequestDetail($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      number
      merged
      url
      baseRefOid
      closingIssuesReferences(first: 10) {
        totalCount
        nodes { number repository { nameWithOwner } }
      }
    }
  }
}
"#;

pub struct GitHubPlatform {
    transport: Arc<TransportClient>,
    api_url: String,
    graphql_url: String,
}

impl GitHubPlatform {
    pub fn new(config: &GitHubConfig, transport: Arc<TransportClient>) -> Self {
        Self {
            transport,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            graphql_url: config.graphql_url.clone(),
        }
    }

    pub(super) fn transport(&self) -> &TransportClient {
        &self.transport
    }

    fn parse_repo(repo_full_name: &str) -> Result<(&str, &str)> {
        match repo_full_name.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => Ok((owner, repo)),
            _ => Err(AppError::Malformed(format!(
                "Invalid repo name: {repo_full_name}"
            ))),
        }
    }

    /// Fetch one page of a REST list, starting at `first` unless a cursor is given.
    async fn rest_page<T: DeserializeOwned>(
        &self,
        first: String,
        cursor: Option<&Cursor>,
        resource: QuotaResource,
    ) -> Result<(T, Option<Cursor>)> {
        let url = cursor.map(|c| c.0.clone()).unwrap_or(first);
        let response = self
            .transport
            .execute(&ApiRequest::get(url, resource))
            .await?;
        let next = response.next_link().map(Cursor);
        Ok((response.json()?, next))
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        what: &str,
    ) -> Result<T> {
        let request = ApiRequest::graphql(&self.graphql_url, query, variables);
        let response = self.transport.execute(&request).await?;
        mapper::graphql_data(response.json()?, what)
    }

    /// Current quota figures for every resource.
    pub async fn rate_limit(&self) -> Result<Vec<QuotaSnapshot>> {
        let url = format!("{}/rate_limit", self.api_url);
        let response = self
            .transport
            .execute(&ApiRequest::get(url, QuotaResource::Core))
            .await?;
        Ok(mapper::map_rate_limit(response.json()?))
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn search_repositories(
        &self,
        query: &str,
        cursor: Option<&Cursor>,
    ) -> Result<Page<Repository>> {
        let first = format!(
            "{}/search/repositories?q={}&sort=stars&order=desc&per_page=100",
            self.api_url,
            urlencoding::encode(query)
        );
        let (body, next): (mapper::SearchResponse, _) =
            self.rest_page(first, cursor, QuotaResource::Search).await?;
        let (items, skipped) = mapper::map_repositories(body.items);
        Ok(Page {
            items,
            skipped,
            next,
        })
    }

    async fn list_closed_issues(
        &self,
        repo_full_name: &str,
        cursor: Option<&Cursor>,
    ) -> Result<Page<Issue>> {
        let (owner, repo) = Self::parse_repo(repo_full_name)?;
        let first = format!(
            "{}/repos/{owner}/{repo}/issues?state=closed&sort=updated&direction=desc&per_page=100",
            self.api_url
        );
        let (body, next): (Vec<Value>, _) =
            self.rest_page(first, cursor, QuotaResource::Core).await?;
        let (items, skipped) = mapper::map_issues(repo_full_name, body);
        Ok(Page {
            items,
            skipped,
            next,
        })
    }

    async fn list_issue_closers(
        &self,
        issue: &IssueRef,
        cursor: Option<&Cursor>,
    ) -> Result<Page<PullRef>> {
        let (owner, repo) = Self::parse_repo(&issue.repository)?;
        let variables = json!({
            "owner": owner,
            "name": repo,
            "number": issue.number,
            "after": cursor.map(|c| c.0.as_str()),
        });

        let data: mapper::ClosersData = self
            .graphql(ISSUE_CLOSERS_QUERY, variables, &issue.to_string())
            .await?;
        let timeline = data
            .repository
            .and_then(|r| r.issue)
            .ok_or_else(|| AppError::NotFound(format!("issue {issue}")))?
            .timeline_items;

        let next = match timeline.page_info {
            mapper::PageInfo {
                has_next_page: true,
                end_cursor: Some(end),
            } => Some(Cursor(end)),
            _ => None,
        };
        let (items, skipped) = mapper::map_closers(timeline.nodes);
        Ok(Page {
            items,
            skipped,
            next,
        })
    }

    async fn get_pull_request(&self, pr: &PullRef) -> Result<PullRequest> {
        let (owner, repo) = Self::parse_repo(&pr.repository)?;
        let variables = json!({ "owner": owner, "name": repo, "number": pr.number });

        let data: mapper::PullData = self
            .graphql(PULL_REQUEST_QUERY, variables, &pr.to_string())
            .await?;
        let node = data
            .repository
            .and_then(|r| r.pull_request)
            .ok_or_else(|| AppError::NotFound(format!("pull request {pr}")))?;

        Ok(mapper::map_pull_request(&pr.repository, node))
    }

    async fn list_pull_files(
        &self,
        pr: &PullRef,
        cursor: Option<&Cursor>,
    ) -> Result<Page<ChangedFile>> {
        let (owner, repo) = Self::parse_repo(&pr.repository)?;
        let first = format!(
            "{}/repos/{owner}/{repo}/pulls/{}/files?per_page=100",
            self.api_url, pr.number
        );
        let (body, next): (Vec<Value>, _) =
            self.rest_page(first, cursor, QuotaResource::Core).await?;
        let (items, skipped) = mapper::map_files(body);
        Ok(Page {
            items,
            skipped,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::CancelSignal;
    use crate::transport::{ApiResponse, BackoffPolicy, Credential, HttpExchange, QuotaGovernors};
    use reqwest::header::{HeaderMap, HeaderValue, LINK};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned bodies and records every request it sees.
    #[derive(Default)]
    struct RecordingExchange {
        responses: Mutex<VecDeque<ApiResponse>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl RecordingExchange {
        fn push(&self, body: Value, link: Option<&'static str>) {
            let mut headers = HeaderMap::new();
            if let Some(link) = link {
                headers.insert(LINK, HeaderValue::from_static(link));
            }
            self.responses.lock().unwrap().push_back(ApiResponse {
                status: 200,
                headers,
                body: body.to_string(),
            });
        }

        fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpExchange for RecordingExchange {
        async fn send(&self, request: &ApiRequest, _: &Credential) -> Result<ApiResponse> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AppError::Internal("no canned response".into()))
        }
    }

    fn platform(exchange: Arc<RecordingExchange>) -> GitHubPlatform {
        let transport = TransportClient::new(
            exchange,
            Credential::Token("ghp_test".into()),
            Arc::new(QuotaGovernors::new(Duration::from_secs(60))),
            BackoffPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                jitter: 0.0,
            },
            Duration::from_secs(60),
            CancelSignal::new(),
        );
        GitHubPlatform::new(&GitHubConfig::default(), Arc::new(transport))
    }

    #[tokio::test]
    async fn test_search_encodes_query_and_follows_link() {
        let exchange = Arc::new(RecordingExchange::default());
        exchange.push(
            json!({ "items": [ {
                "full_name": "o/r", "stargazers_count": 900, "size": 1200,
                "language": "Python", "html_url": "https://github.com/o/r"
            } ] }),
            Some("<https://api.github.com/search/repositories?q=x&page=2>; rel=\"next\""),
        );
        let platform = platform(exchange.clone());

        let page = platform
            .search_repositories("language:Python stars:>=200", None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(
            page.next,
            Some(Cursor(
                "https://api.github.com/search/repositories?q=x&page=2".into()
            ))
        );

        let requests = exchange.requests();
        assert_eq!(requests[0].resource, QuotaResource::Search);
        assert!(requests[0]
            .url
            .contains("q=language%3APython%20stars%3A%3E%3D200"));
    }

    #[tokio::test]
    async fn test_issue_page_uses_cursor_url() {
        let exchange = Arc::new(RecordingExchange::default());
        exchange.push(json!([]), None);
        let platform = platform(exchange.clone());

        let cursor = Cursor("https://api.github.com/repos/o/r/issues?page=3".into());
        let page = platform
            .list_closed_issues("o/r", Some(&cursor))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert!(page.next.is_none());
        assert_eq!(exchange.requests()[0].url, cursor.0);
    }

    #[tokio::test]
    async fn test_closers_paginate_with_end_cursor() {
        let exchange = Arc::new(RecordingExchange::default());
        exchange.push(
            json!({ "data": { "repository": { "issue": { "timelineItems": {
                "pageInfo": { "hasNextPage": true, "endCursor": "Y3Vyc29y" },
                "nodes": [ {
                    "__typename": "ClosedEvent",
                    "closer": {
                        "__typename": "PullRequest",
                        "number": 4,
                        "repository": { "nameWithOwner": "o/r" }
                    }
                } ]
            } } } } }),
            None,
        );
        let platform = platform(exchange.clone());

        let issue = IssueRef {
            repository: "o/r".into(),
            number: 3,
        };
        let page = platform.list_issue_closers(&issue, None).await.unwrap();
        assert_eq!(page.items, vec![PullRef { repository: "o/r".into(), number: 4 }]);
        assert_eq!(page.next, Some(Cursor("Y3Vyc29y".into())));

        let request = &exchange.requests()[0];
        assert_eq!(request.resource, QuotaResource::Graphql);
        let body = request.body.as_ref().unwrap();
        assert_eq!(body["variables"]["number"], 3);
        assert!(body["variables"]["after"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_closers_wait_and_retry() {
        let exchange = Arc::new(RecordingExchange::default());
        exchange.push(
            json!({ "errors": [ {
                "type": "RATE_LIMITED",
                "message": "API rate limit exceeded"
            } ] }),
            None,
        );
        exchange.push(
            json!({ "data": { "repository": { "issue": { "timelineItems": {
                "pageInfo": { "hasNextPage": false, "endCursor": null },
                "nodes": []
            } } } } }),
            None,
        );
        let platform = platform(exchange.clone());

        let issue = IssueRef {
            repository: "o/r".into(),
            number: 3,
        };
        let page = platform.list_issue_closers(&issue, None).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.next.is_none());
        assert_eq!(exchange.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_pull_request_is_not_found() {
        let exchange = Arc::new(RecordingExchange::default());
        exchange.push(json!({ "data": { "repository": { "pullRequest": null } } }), None);
        let platform = platform(exchange);

        let pr = PullRef {
            repository: "o/r".into(),
            number: 99,
        };
        let err = platform.get_pull_request(&pr).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_parse_repo() {
        assert_eq!(GitHubPlatform::parse_repo("o/r").unwrap(), ("o", "r"));
        assert!(GitHubPlatform::parse_repo("no-slash").is_err());
        assert!(GitHubPlatform::parse_repo("/r").is_err());
    }
}
