use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::platform::Authenticator;
use crate::transport::QuotaResource;

use super::client::GitHubPlatform;

#[async_trait]
impl Authenticator for GitHubPlatform {
    /// GraphQL rejects anonymous callers, so a token is mandatory. Probing the
    /// rate-limit endpoint verifies it and seeds the quota governors.
    async fn authenticate(&self) -> Result<()> {
        let transport = self.transport();
        if transport.credential().is_anonymous() {
            return Err(AppError::Authentication(
                "a GitHub token is required (set github.token, GITHUB_TOKEN or GH_TOKEN)"
                    .to_string(),
            ));
        }

        let snapshots = self.rate_limit().await?;
        for snapshot in &snapshots {
            transport.quota().prime(snapshot);
        }

        let core = snapshots
            .iter()
            .find(|s| s.resource == QuotaResource::Core)
            .map(|s| s.remaining);
        tracing::info!(core_remaining = ?core, "Authenticated with GitHub");
        Ok(())
    }
}
