use super::{ForwardError, Forwarder};
use crate::metrics;
use crate::tenant::{TenantRuntime, TokenCache, DEFAULT_TOKEN_TYPE};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl Forwarder {
    /// Return the tenant's cached token as an `Authorization` header value,
    /// requesting a new one with the client-credentials grant when the cached
    /// token expires within the refresh margin.
    ///
    /// The tenant's token lock is held across the request, so concurrent
    /// forwards of one tenant trigger a single refresh.
    pub async fn get_or_refresh_token(
        &self,
        tenant: &TenantRuntime,
    ) -> Result<String, ForwardError> {
        let config = tenant.config().await;
        let mut cache = tenant.token_cache().lock().await;
        if cache.is_valid_at(Utc::now(), self.settings.token_refresh_margin) {
            return Ok(cache.authorization());
        }

        let result = self.request_token(&config.oauth).await;
        metrics::record_token_refresh(&config.name, result.is_ok());
        let fresh = result?;

        tracing::info!(
            "[Tenant {:?}] New OAuth token ({}) expires at {:?}",
            config.name,
            fresh.token_type,
            fresh.expiry
        );
        *cache = fresh;
        Ok(cache.authorization())
    }

    async fn request_token(
        &self,
        oauth: &crate::tenant::OAuthClient,
    ) -> Result<TokenCache, ForwardError> {
        if oauth.token_url.is_empty() {
            return Err(ForwardError::MissingTokenUrl);
        }

        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", oauth.client_id.clone()),
            ("client_secret", oauth.client_secret.clone()),
        ];
        if !oauth.scopes.is_empty() {
            form.push(("scope", oauth.scopes.join(" ")));
        }

        let now = Utc::now();
        let response = self
            .client
            .post(&oauth.token_url)
            .timeout(self.settings.token_timeout)
            .form(&form)
            .send()
            .await
            .map_err(ForwardError::TokenRequest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::TokenStatus(status.as_u16()));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(ForwardError::TokenResponse)?;

        let token_type = token
            .token_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string());

        Ok(TokenCache {
            access_token: token.access_token,
            token_type,
            expiry: Some(token_expiry(now, token.expires_in)),
        })
    }
}

/// Absolute expiry for an `expires_in` value. Missing, non-positive and
/// unrepresentable lifetimes fall back to one hour.
fn token_expiry(now: DateTime<Utc>, expires_in: Option<i64>) -> DateTime<Utc> {
    expires_in
        .filter(|secs| *secs > 0)
        .and_then(ChronoDuration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or_else(|| now + ChronoDuration::seconds(DEFAULT_TOKEN_LIFETIME_SECS))
}
