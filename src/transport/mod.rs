//! Rate-limited access to the GitHub API.

pub mod backoff;
pub mod client;
pub mod quota;

pub use backoff::BackoffPolicy;
pub use client::{
    ApiRequest, ApiResponse, Credential, HttpExchange, ReqwestExchange, TransportClient,
};
pub use quota::{QuotaGovernor, QuotaGovernors, QuotaResource, QuotaSnapshot};
