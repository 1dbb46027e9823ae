//! Periodic heartbeat frames.
//!
//! Each armed tenant owns a timer task. On every tick the heartbeat record in
//! the tenant's keep-alive file is refreshed and the same XML, framed with the
//! tenant's delimiters, is written to every open connection of the tenant.

use crate::network::framing::encode_frame;
use crate::tenant::{TenantConfig, TenantRuntime};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Longest keep-alive period the timer will arm
pub const MAX_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum KeepAliveError {
    #[error("Keep-alive file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keep-alive XML error: {0}")]
    Xml(#[from] quick_xml::DeError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "keepAlive")]
pub struct KeepAliveRecord {
    #[serde(rename = "tenantName", default)]
    pub tenant_name: String,
    #[serde(rename = "sendTime", default)]
    pub send_time: String,
}

impl KeepAliveRecord {
    pub fn from_xml(xml: &str) -> Result<Self, KeepAliveError> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    /// Two-space indented XML document
    pub fn to_xml(&self) -> Result<String, KeepAliveError> {
        let mut xml = String::new();
        let mut serializer = quick_xml::se::Serializer::new(&mut xml);
        serializer.indent(' ', 2);
        self.serialize(serializer)?;
        Ok(xml)
    }

    pub async fn load(path: &Path) -> Result<Self, KeepAliveError> {
        let xml = tokio::fs::read_to_string(path).await?;
        Self::from_xml(&xml)
    }

    pub async fn save(&self, path: &Path) -> Result<(), KeepAliveError> {
        tokio::fs::write(path, self.to_xml()?).await?;
        Ok(())
    }
}

/// Timer settings of an armed dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveSettings {
    pub interval: Duration,
    pub file: PathBuf,
}

impl KeepAliveSettings {
    /// `None` unless both an interval and a file are configured.
    pub fn from_config(config: &TenantConfig) -> Option<Self> {
        config
            .keep_alive()
            .map(|(interval, file)| Self { interval, file })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepAliveReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Run one heartbeat tick for `tenant`.
pub async fn send_keep_alive(tenant: &TenantRuntime, file: &Path) -> KeepAliveReport {
    let config = tenant.config().await;

    let mut record = match KeepAliveRecord::load(file).await {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(
                "[Tenant {:?}] Could not load keep-alive file ({}): {}. Creating default.",
                config.name,
                file.display(),
                e
            );
            KeepAliveRecord::default()
        }
    };

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    record.tenant_name = config.name.clone();
    record.send_time = now.clone();

    if let Err(e) = record.save(file).await {
        tracing::error!(
            "[Tenant {:?}] Could not write keep-alive file {}: {}",
            config.name,
            file.display(),
            e
        );
    }

    let xml = match record.to_xml() {
        Ok(xml) => xml,
        Err(e) => {
            tracing::error!(
                "[Tenant {:?}] Could not serialize keep-alive XML: {}",
                config.name,
                e
            );
            return KeepAliveReport::default();
        }
    };
    let frame = encode_frame(config.start_byte, xml.as_bytes(), config.end_byte);

    let mut report = KeepAliveReport::default();
    for connection in tenant.connections().snapshot() {
        match connection.send(&frame).await {
            Ok(written) => {
                tenant.counters().record_sent(written);
                report.delivered += 1;
            }
            Err(e) => {
                report.failed += 1;
                tenant
                    .record_error(format!(
                        "keep-alive write error to {}: {}",
                        connection.peer_addr(),
                        e
                    ))
                    .await;
            }
        }
    }

    tracing::info!(
        "[Tenant {:?}] Keep-alive sent at {} to {} connection(s).",
        config.name,
        now,
        report.delivered
    );
    report
}

/// Arm the dispatcher. The first tick fires one interval from now; the task
/// ends when the tenant is retired or the handle is aborted.
pub fn spawn_keep_alive(tenant: Arc<TenantRuntime>, settings: KeepAliveSettings) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = if settings.interval > MAX_KEEP_ALIVE_INTERVAL {
            tracing::warn!(
                "Keep-alive interval {:?} for port {} capped to {:?}",
                settings.interval,
                tenant.port(),
                MAX_KEEP_ALIVE_INTERVAL
            );
            MAX_KEEP_ALIVE_INTERVAL
        } else {
            settings.interval
        };
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = tenant.subscribe_shutdown();

        tracing::info!(
            "Keep-alive armed for port {} every {:?} ({})",
            tenant.port(),
            period,
            settings.file.display()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    send_keep_alive(&tenant, &settings.file).await;
                }
                _ = shutdown.changed() => {
                    tracing::debug!("Keep-alive for port {} stopped", tenant.port());
                    break;
                }
            }
        }
    })
}
