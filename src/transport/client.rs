use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::shutdown::CancelSignal;

use super::backoff::BackoffPolicy;
use super::quota::{QuotaGovernors, QuotaResource};

const API_VERSION: &str = "2022-11-28";
const MAX_ERROR_BODY: usize = 300;

/// Opaque credential attached to every request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Anonymous,
    Token(String),
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Anonymous => write!(f, "Anonymous"),
            Credential::Token(_) => write!(f, "Token([REDACTED])"),
        }
    }
}

impl Credential {
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(token) if !token.trim().is_empty() => Credential::Token(token.trim().to_string()),
            _ => Credential::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credential::Anonymous)
    }

    fn authorization(&self) -> Option<String> {
        match self {
            Credential::Anonymous => None,
            Credential::Token(token) => Some(format!("Bearer {token}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
    pub resource: QuotaResource,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>, resource: QuotaResource) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
            resource,
        }
    }

    pub fn graphql(url: impl Into<String>, query: &str, variables: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(serde_json::json!({ "query": query, "variables": variables })),
            resource: QuotaResource::Graphql,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| AppError::Malformed(format!("unexpected response body: {e}")))
    }

    /// The `rel="next"` target of the `Link` header, if any.
    pub fn next_link(&self) -> Option<String> {
        let value = self.headers.get(LINK)?.to_str().ok()?;
        value.split(',').find_map(|part| {
            let mut segments = part.split(';');
            let url = segments
                .next()?
                .trim()
                .strip_prefix('<')?
                .strip_suffix('>')?;
            segments
                .any(|s| s.trim() == "rel=\"next\"")
                .then(|| url.to_string())
        })
    }
}

/// Sends one HTTP exchange. The seam between retry policy and the wire.
#[async_trait]
pub trait HttpExchange: Send + Sync {
    async fn send(&self, request: &ApiRequest, credential: &Credential) -> Result<ApiResponse>;
}

pub struct ReqwestExchange {
    client: Client,
    user_agent: String,
}

impl ReqwestExchange {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

#[async_trait]
impl HttpExchange for ReqwestExchange {
    async fn send(&self, request: &ApiRequest, credential: &Credential) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);

        if let Some(auth) = credential.authorization() {
            builder = builder.header(AUTHORIZATION, auth);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(network_error)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(network_error)?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

fn network_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        AppError::Transient(e.to_string())
    } else {
        AppError::Http(e)
    }
}

/// Executes API requests under quota control with retry and backoff.
pub struct TransportClient {
    exchange: Arc<dyn HttpExchange>,
    credential: Credential,
    quota: Arc<QuotaGovernors>,
    backoff: BackoffPolicy,
    max_rate_limit_wait: Duration,
    cancel: CancelSignal,
}

impl TransportClient {
    pub fn new(
        exchange: Arc<dyn HttpExchange>,
        credential: Credential,
        quota: Arc<QuotaGovernors>,
        backoff: BackoffPolicy,
        max_rate_limit_wait: Duration,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            exchange,
            credential,
            quota,
            backoff,
            max_rate_limit_wait,
            cancel,
        }
    }

    pub fn from_config(config: &AppConfig, cancel: CancelSignal) -> Result<Self> {
        let transport = &config.transport;
        let exchange = ReqwestExchange::new(
            &config.github.user_agent,
            Duration::from_secs(transport.timeout_secs),
        )?;
        let max_wait = Duration::from_secs(transport.max_rate_limit_wait_secs);

        Ok(Self::new(
            Arc::new(exchange),
            Credential::from_token(config.github_token()),
            Arc::new(QuotaGovernors::new(max_wait)),
            BackoffPolicy::from_config(transport),
            max_wait,
            cancel,
        ))
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn quota(&self) -> &QuotaGovernors {
        &self.quota
    }

    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let governor = self.quota.get(request.resource);
        let mut attempt = 1u32;
        let mut rate_limit_attempt = 1u32;
        let mut rate_limit_waited = Duration::ZERO;

        loop {
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            tokio::select! {
                reserved = governor.reserve(1) => reserved?,
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
            }

            let result = match self.exchange.send(request, &self.credential).await {
                Ok(response) => {
                    governor.observe(&response.headers);
                    classify(request, response)
                }
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };
            let delay = match error {
                AppError::RateLimited { retry_after } => {
                    let delay =
                        retry_after.unwrap_or_else(|| self.backoff.delay(rate_limit_attempt));
                    rate_limit_attempt = rate_limit_attempt.saturating_add(1);
                    rate_limit_waited += delay;
                    if rate_limit_waited > self.max_rate_limit_wait {
                        return Err(AppError::RateLimitCeiling {
                            wait: rate_limit_waited,
                            ceiling: self.max_rate_limit_wait,
                        });
                    }
                    tracing::warn!(
                        url = %request.url,
                        delay_ms = delay.as_millis() as u64,
                        waited_ms = rate_limit_waited.as_millis() as u64,
                        "Rate limited, retrying"
                    );
                    delay
                }
                AppError::Transient(message) => {
                    if !self.backoff.can_retry(attempt) {
                        return Err(AppError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(AppError::Transient(message)),
                        });
                    }
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        url = %request.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient GitHub failure, retrying"
                    );
                    attempt += 1;
                    delay
                }
                other => return Err(other),
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
            }
        }
    }
}

/// Map a raw response to success or to the error taxonomy.
pub fn classify(request: &ApiRequest, response: ApiResponse) -> Result<ApiResponse> {
    let status = response.status;
    match status {
        200..=299 if request.resource == QuotaResource::Graphql
            && graphql_rate_limited(&response.body) =>
        {
            Err(AppError::RateLimited {
                retry_after: retry_after(&response.headers),
            })
        }
        200..=299 => Ok(response),
        401 => Err(AppError::Authentication(snippet(&response.body))),
        403 | 429 if is_rate_limited(&response) => Err(AppError::RateLimited {
            retry_after: retry_after(&response.headers),
        }),
        404 => Err(AppError::NotFound(request.url.clone())),
        500..=599 => Err(AppError::Transient(format!(
            "{} returned {status}",
            request.url
        ))),
        _ => Err(AppError::Api {
            status,
            message: snippet(&response.body),
        }),
    }
}

fn is_rate_limited(response: &ApiResponse) -> bool {
    if response.status == 429 {
        return true;
    }
    let exhausted = response
        .headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    let body = response.body.to_lowercase();
    exhausted
        || body.contains("rate limit")
        || body.contains("abuse detection")
        || body.contains("secondary rate")
}

/// GraphQL reports an exhausted quota as a 200 with a `RATE_LIMITED` error.
fn graphql_rate_limited(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    value["errors"]
        .as_array()
        .is_some_and(|errors| errors.iter().any(|e| e["type"] == "RATE_LIMITED"))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedExchange {
        responses: Mutex<VecDeque<Result<ApiResponse>>>,
        calls: AtomicUsize,
    }

    impl ScriptedExchange {
        fn new(responses: Vec<Result<ApiResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpExchange for ScriptedExchange {
        async fn send(&self, _: &ApiRequest, _: &Credential) -> Result<ApiResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Internal("script exhausted".into())))
        }
    }

    fn response(status: u16, body: &str) -> Result<ApiResponse> {
        Ok(ApiResponse {
            status,
            headers: HeaderMap::new(),
            body: body.to_string(),
        })
    }

    fn response_with_headers(
        status: u16,
        headers: &[(&'static str, String)],
    ) -> Result<ApiResponse> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        Ok(ApiResponse {
            status,
            headers: map,
            body: String::new(),
        })
    }

    fn client(exchange: Arc<ScriptedExchange>, cancel: CancelSignal) -> TransportClient {
        let max_wait = Duration::from_secs(60);
        TransportClient::new(
            exchange,
            Credential::from_token(Some("ghp_test".into())),
            Arc::new(QuotaGovernors::new(max_wait)),
            BackoffPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                jitter: 0.0,
            },
            max_wait,
            cancel,
        )
    }

    fn request() -> ApiRequest {
        ApiRequest::get("https://api.github.com/repos/o/r", QuotaResource::Core)
    }

    fn graphql_request(query: &str) -> ApiRequest {
        ApiRequest::graphql("https://api.github.com/graphql", query, serde_json::json!({}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let exchange =
            ScriptedExchange::new(vec![response(502, "bad gateway"), response(200, "{}")]);
        let transport = client(exchange.clone(), CancelSignal::new());

        let result = transport.execute(&request()).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_is_retried() {
        let exchange = ScriptedExchange::new(vec![
            Err(AppError::Transient("connection reset".into())),
            response(200, "{}"),
        ]);
        let transport = client(exchange.clone(), CancelSignal::new());

        assert!(transport.execute(&request()).await.is_ok());
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_capped() {
        let exchange = ScriptedExchange::new(vec![
            response(503, ""),
            response(503, ""),
            response(503, ""),
            response(200, "{}"),
        ]);
        let transport = client(exchange.clone(), CancelSignal::new());

        let err = transport.execute(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(exchange.calls(), 3);
    }

    #[tokio::test]
    async fn test_authentication_error_is_not_retried() {
        let exchange = ScriptedExchange::new(vec![
            response(401, r#"{"message":"Bad credentials"}"#),
            response(200, "{}"),
        ]);
        let transport = client(exchange.clone(), CancelSignal::new());

        let err = transport.execute(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
        assert!(err.is_fatal());
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_request_is_not_retried() {
        let exchange = ScriptedExchange::new(vec![response(422, "Validation Failed")]);
        let transport = client(exchange.clone(), CancelSignal::new());

        let err = transport.execute(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::Api { status: 422, .. }));
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_permission_403_is_not_a_rate_limit() {
        let exchange = ScriptedExchange::new(vec![response(403, "Resource not accessible")]);
        let transport = client(exchange.clone(), CancelSignal::new());

        let err = transport.execute(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::Api { status: 403, .. }));
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_retry_after() {
        let exchange = ScriptedExchange::new(vec![
            response_with_headers(429, &[("retry-after", "5".to_string())]),
            response(200, "{}"),
        ]);
        let transport = client(exchange.clone(), CancelSignal::new());

        let started = tokio::time::Instant::now();
        assert!(transport.execute(&request()).await.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delay_grows_without_retry_after() {
        // 100ms doubling to the 1s cap: 1.5s over four waits, then 1s each,
        // so the 63rd wait crosses the 60s ceiling.
        let script = (0..100)
            .map(|_| response(429, r#"{"message":"API rate limit exceeded"}"#))
            .collect();
        let exchange = ScriptedExchange::new(script);
        let transport = client(exchange.clone(), CancelSignal::new());

        let started = tokio::time::Instant::now();
        let err = transport.execute(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimitCeiling { .. }));
        assert_eq!(exchange.calls(), 63);
        assert!(started.elapsed() >= Duration::from_millis(59_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_graphql_rate_limit_is_retried() {
        let exchange = ScriptedExchange::new(vec![
            response(
                200,
                r#"{"errors":[{"type":"RATE_LIMITED","message":"API rate limit exceeded"}]}"#,
            ),
            response(200, r#"{"data":{"viewer":{"login":"octocat"}}}"#),
        ]);
        let transport = client(exchange.clone(), CancelSignal::new());
        let query = graphql_request("{ viewer { login } }");

        let response = transport.execute(&query).await.unwrap();
        assert!(response.body.contains("octocat"));
        assert_eq!(exchange.calls(), 2);
    }

    #[test]
    fn test_graphql_errors_on_rest_are_not_rate_limits() {
        let body = r#"{"errors":[{"type":"RATE_LIMITED"}]}"#;
        let rest = classify(&request(), response(200, body).unwrap());
        assert!(rest.is_ok());

        let graphql = graphql_request("{}");
        let not_found = r#"{"errors":[{"type":"NOT_FOUND","message":"gone"}]}"#;
        assert!(classify(&graphql, response(200, not_found).unwrap()).is_ok());
        assert!(matches!(
            classify(&graphql, response(200, body).unwrap()),
            Err(AppError::RateLimited { retry_after: None })
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_beyond_ceiling_is_fatal() {
        let exchange = ScriptedExchange::new(vec![response_with_headers(
            429,
            &[("retry-after", "600".to_string())],
        )]);
        let transport = client(exchange.clone(), CancelSignal::new());

        let err = transport.execute(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimitCeiling { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_retry_reserves_quota_again() {
        // The failed attempt reports an exhausted quota resetting in an hour,
        // so the retry's reservation must hit the 60s ceiling.
        let reset = (chrono::Utc::now().timestamp() + 3600).to_string();
        let exchange = ScriptedExchange::new(vec![
            response_with_headers(
                502,
                &[
                    ("x-ratelimit-remaining", "0".to_string()),
                    ("x-ratelimit-reset", reset),
                ],
            ),
            response(200, "{}"),
        ]);
        let transport = client(exchange.clone(), CancelSignal::new());

        let err = transport.execute(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimitCeiling { .. }));
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_client_sends_nothing() {
        let exchange = ScriptedExchange::new(vec![response(200, "{}")]);
        let cancel = CancelSignal::new();
        cancel.cancel();
        let transport = client(exchange.clone(), cancel);

        let err = transport.execute(&request()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(exchange.calls(), 0);
    }

    #[test]
    fn test_next_link_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                "<https://api.github.com/search/repositories?q=x&page=2>; rel=\"next\", \
                 <https://api.github.com/search/repositories?q=x&page=10>; rel=\"last\"",
            ),
        );
        let response = ApiResponse {
            status: 200,
            headers,
            body: String::new(),
        };
        assert_eq!(
            response.next_link().as_deref(),
            Some("https://api.github.com/search/repositories?q=x&page=2")
        );
    }

    #[test]
    fn test_last_page_has_no_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static("<https://api.github.com/x?page=1>; rel=\"prev\""),
        );
        let response = ApiResponse {
            status: 200,
            headers,
            body: String::new(),
        };
        assert!(response.next_link().is_none());
    }

    #[test]
    fn test_credential_debug_redacts_token() {
        let credential = Credential::from_token(Some("ghp_secret".into()));
        assert_eq!(format!("{credential:?}"), "Token([REDACTED])");
        assert!(Credential::from_token(Some("  ".into())).is_anonymous());
    }
}
