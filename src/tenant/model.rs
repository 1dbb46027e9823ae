//! Tenant configuration, token cache and the persisted record format.
//!
//! `TenantRecord` is the wire/file representation shared by the tenants file
//! and the admin patch endpoint. Field names follow the established JSON
//! layout (`Name`, `Port`, `OAuthCredentials.ClientID`, ...), so existing
//! tenants files load unchanged.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default token type when the token endpoint does not send one
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TenantRecord {
    pub name: String,
    pub port: String,
    pub comment: String,
    pub start_byte: u8,
    pub end_byte: u8,

    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub errors: u64,

    pub simple_auth_token: String,

    #[serde(rename = "OAuthCredentials")]
    pub oauth_credentials: OAuthCredentials,

    pub keep_alive_interval_sec: i64,
    pub keep_alive_file: String,

    pub message_format: String,
    pub endpoint: String,

    #[serde(
        rename = "remove",
        alias = "Remove",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub remove: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OAuthCredentials {
    #[serde(rename = "ClientID")]
    pub client_id: String,
    pub client_secret: String,
    #[serde(rename = "TokenURL")]
    pub token_url: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub scopes: Vec<String>,

    pub access_token: String,
    pub token_type: String,
    pub token_expiry: Option<DateTime<Utc>>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outbound body encoding selected per tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Json,
    Xml,
    Text,
}

impl MessageFormat {
    /// Case-insensitive; anything unrecognized falls back to JSON.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "xml" => MessageFormat::Xml,
            "text" => MessageFormat::Text,
            _ => MessageFormat::Json,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MessageFormat::Json => "application/json",
            MessageFormat::Xml => "application/xml",
            MessageFormat::Text => "text/plain",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

/// Mutable tenant configuration. The port is the tenant's identity and lives
/// on the runtime, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantConfig {
    pub name: String,
    pub comment: String,
    pub start_byte: u8,
    pub end_byte: u8,
    pub simple_auth_token: String,
    pub oauth: OAuthClient,
    pub keep_alive_interval_sec: i64,
    pub keep_alive_file: String,
    pub message_format: String,
    pub endpoint: String,
}

impl TenantConfig {
    pub fn from_record(record: &TenantRecord) -> Self {
        let creds = &record.oauth_credentials;
        Self {
            name: record.name.clone(),
            comment: record.comment.clone(),
            start_byte: record.start_byte,
            end_byte: record.end_byte,
            simple_auth_token: record.simple_auth_token.clone(),
            oauth: OAuthClient {
                client_id: creds.client_id.clone(),
                client_secret: creds.client_secret.clone(),
                token_url: creds.token_url.clone(),
                scopes: creds.scopes.clone(),
            },
            keep_alive_interval_sec: record.keep_alive_interval_sec,
            keep_alive_file: record.keep_alive_file.clone(),
            message_format: record.message_format.clone(),
            endpoint: record.endpoint.clone(),
        }
    }

    /// Full overwrite of every configuration field from a reloaded record.
    pub fn overwrite_from(&mut self, record: &TenantRecord) {
        *self = Self::from_record(record);
    }

    /// Partial update: only non-empty / non-zero fields of `patch` are applied.
    /// Returns the names of the fields that were touched.
    pub fn patch_from(&mut self, patch: &TenantRecord) -> Vec<&'static str> {
        let mut touched = Vec::new();

        if !patch.name.is_empty() {
            self.name = patch.name.clone();
            touched.push("Name");
        }
        if !patch.comment.is_empty() {
            self.comment = patch.comment.clone();
            touched.push("Comment");
        }
        if patch.start_byte != 0 {
            self.start_byte = patch.start_byte;
            touched.push("StartByte");
        }
        if patch.end_byte != 0 {
            self.end_byte = patch.end_byte;
            touched.push("EndByte");
        }
        if !patch.simple_auth_token.is_empty() {
            self.simple_auth_token = patch.simple_auth_token.clone();
            touched.push("SimpleAuthToken");
        }

        let creds = &patch.oauth_credentials;
        if !creds.client_id.is_empty() {
            self.oauth.client_id = creds.client_id.clone();
            touched.push("ClientID");
        }
        if !creds.client_secret.is_empty() {
            self.oauth.client_secret = creds.client_secret.clone();
            touched.push("ClientSecret");
        }
        if !creds.token_url.is_empty() {
            self.oauth.token_url = creds.token_url.clone();
            touched.push("TokenURL");
        }
        if !creds.scopes.is_empty() {
            self.oauth.scopes = creds.scopes.clone();
            touched.push("Scopes");
        }

        if patch.keep_alive_interval_sec != 0 {
            self.keep_alive_interval_sec = patch.keep_alive_interval_sec;
            touched.push("KeepAliveIntervalSec");
        }
        if !patch.keep_alive_file.is_empty() {
            self.keep_alive_file = patch.keep_alive_file.clone();
            touched.push("KeepAliveFile");
        }
        if !patch.message_format.is_empty() {
            self.message_format = patch.message_format.clone();
            touched.push("MessageFormat");
        }
        if !patch.endpoint.is_empty() {
            self.endpoint = patch.endpoint.clone();
            touched.push("Endpoint");
        }

        touched
    }

    /// A tenant whose name was cleared is retired by the next reconcile pass.
    pub fn is_live(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn format(&self) -> MessageFormat {
        MessageFormat::parse(&self.message_format)
    }

    pub fn simple_auth(&self) -> Option<&str> {
        if self.simple_auth_token.is_empty() {
            None
        } else {
            Some(&self.simple_auth_token)
        }
    }

    /// Interval and file of the heartbeat, or `None` when keep-alive is off.
    pub fn keep_alive(&self) -> Option<(Duration, PathBuf)> {
        if self.keep_alive_interval_sec <= 0 || self.keep_alive_file.is_empty() {
            return None;
        }
        Some((
            Duration::from_secs(self.keep_alive_interval_sec as u64),
            PathBuf::from(&self.keep_alive_file),
        ))
    }
}

/// Cached OAuth access token of one tenant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenCache {
    pub access_token: String,
    pub token_type: String,
    pub expiry: Option<DateTime<Utc>>,
}

impl TokenCache {
    pub fn from_record(record: &TenantRecord) -> Self {
        let creds = &record.oauth_credentials;
        Self {
            access_token: creds.access_token.clone(),
            token_type: creds.token_type.clone(),
            expiry: creds.token_expiry,
        }
    }

    /// The token is usable only if it outlives `now + margin`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = ChronoDuration::from_std(margin).unwrap_or_else(|_| ChronoDuration::zero());
        match self.expiry {
            Some(expiry) => !self.access_token.is_empty() && expiry > now + margin,
            None => false,
        }
    }

    /// Value of the `Authorization` header for the cached token
    pub fn authorization(&self) -> String {
        let scheme = if self.token_type.is_empty() {
            DEFAULT_TOKEN_TYPE
        } else {
            &self.token_type
        };
        format!("{} {}", scheme, self.access_token)
    }
}

/// Point-in-time copy of a tenant's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub errors: u64,
}

impl CounterSnapshot {
    pub fn from_record(record: &TenantRecord) -> Self {
        Self {
            bytes_received: record.bytes_received,
            bytes_sent: record.bytes_sent,
            errors: record.errors,
        }
    }
}

impl TenantRecord {
    /// Assemble the persisted form of a live tenant
    pub fn assemble(
        port: &str,
        config: &TenantConfig,
        token: &TokenCache,
        counters: CounterSnapshot,
    ) -> Self {
        Self {
            name: config.name.clone(),
            port: port.to_string(),
            comment: config.comment.clone(),
            start_byte: config.start_byte,
            end_byte: config.end_byte,
            bytes_received: counters.bytes_received,
            bytes_sent: counters.bytes_sent,
            errors: counters.errors,
            simple_auth_token: config.simple_auth_token.clone(),
            oauth_credentials: OAuthCredentials {
                client_id: config.oauth.client_id.clone(),
                client_secret: config.oauth.client_secret.clone(),
                token_url: config.oauth.token_url.clone(),
                scopes: config.oauth.scopes.clone(),
                access_token: token.access_token.clone(),
                token_type: token.token_type.clone(),
                token_expiry: token.expiry,
            },
            keep_alive_interval_sec: config.keep_alive_interval_sec,
            keep_alive_file: config.keep_alive_file.clone(),
            message_format: config.message_format.clone(),
            endpoint: config.endpoint.clone(),
            remove: false,
        }
    }
}
