//! Outbound relay of decoded messages to tenant HTTP endpoints.

pub mod encode;
pub mod queue;
pub mod token;

pub use encode::{encode_body, EncodedBody};
pub use queue::{ForwardJob, ForwardQueue, ForwardWorker};

use crate::metrics;
use crate::tenant::TenantRuntime;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use thiserror::Error;

/// Header carrying a tenant's static token
pub const SIMPLE_AUTH_HEADER: &str = "X-Auth";

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Tenant has no endpoint configured")]
    MissingEndpoint,

    #[error("Tenant has no token URL configured")]
    MissingTokenUrl,

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Client(reqwest::Error),

    #[error("REST call error: {0}")]
    Request(reqwest::Error),

    #[error("REST call responded with status {0}")]
    Status(u16),

    #[error("Error requesting new token: {0}")]
    TokenRequest(reqwest::Error),

    #[error("Token endpoint returned status {0}")]
    TokenStatus(u16),

    #[error("Invalid token response: {0}")]
    TokenResponse(reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    pub request_timeout: Duration,
    pub token_timeout: Duration,
    pub token_refresh_margin: Duration,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            token_timeout: Duration::from_secs(5),
            token_refresh_margin: Duration::from_secs(10),
        }
    }
}

pub struct Forwarder {
    client: reqwest::Client,
    settings: ForwarderSettings,
}

impl Forwarder {
    pub fn new(settings: ForwarderSettings) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(ForwardError::Client)?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ForwarderSettings {
        &self.settings
    }

    /// Encode, authenticate and POST one message. A single attempt: any
    /// failure is returned to the caller, nothing is retried.
    pub async fn forward(
        &self,
        tenant: &TenantRuntime,
        message: &[u8],
    ) -> Result<reqwest::StatusCode, ForwardError> {
        let config = tenant.config().await;
        if config.endpoint.is_empty() {
            return Err(ForwardError::MissingEndpoint);
        }

        let encoded = encode_body(config.format(), &config.name, message)?;

        let mut request = self
            .client
            .post(&config.endpoint)
            .timeout(self.settings.request_timeout)
            .header(CONTENT_TYPE, encoded.content_type);

        request = match config.simple_auth() {
            Some(token) => request.header(SIMPLE_AUTH_HEADER, token),
            None => request.header(AUTHORIZATION, self.get_or_refresh_token(tenant).await?),
        };

        let response = request
            .body(encoded.body)
            .send()
            .await
            .map_err(ForwardError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status(status.as_u16()));
        }

        tracing::info!(
            "[Tenant {:?}] REST call to {} succeeded. Status: {}",
            config.name,
            config.endpoint,
            status.as_u16()
        );
        Ok(status)
    }

    /// Run a queued job: failures are logged and counted against the tenant.
    pub async fn dispatch(&self, job: ForwardJob) {
        let result = self.forward(&job.tenant, &job.message).await;
        let name = job.tenant.name().await;
        metrics::record_forward(&name, result.is_ok());

        if let Err(e) = result {
            job.tenant.record_error(format!("forward failed: {}", e)).await;
        }
    }
}
