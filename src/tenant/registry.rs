//! The tenant registry: live tenants and their bound listeners behind one lock.
//!
//! Every merge, patch, reconcile, persist and status pass holds the registry
//! lock for its whole duration. Per-tenant locks (config, connection set,
//! token cache) are only ever taken after it, never before.

use super::model::TenantRecord;
use super::reconcile::{ListenerHandle, ReconcileReport};
use super::runtime::TenantRuntime;
use super::store::{StoreError, TenantStore};
use crate::forward::ForwardQueue;
use crate::network::listener::ListenerSettings;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to load tenants: {0}")]
    Load(#[source] StoreError),

    #[error("Failed to persist tenants: {0}")]
    Persist(#[source] StoreError),
}

/// Ports touched by a full-source merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub invalidated: Vec<String>,
    pub skipped: usize,
}

/// Ports touched by an admin patch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchSummary {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub skipped: usize,
}

/// Per-tenant line of the status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantStatus {
    pub port: String,
    pub name: String,
    pub comment: String,
    pub listening: bool,
    pub local_addr: Option<SocketAddr>,
    pub connections: usize,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub errors: u64,
    pub keep_alive_interval_sec: i64,
    pub keep_alive_file: String,
    pub message_format: String,
    pub endpoint: String,
}

/// The two maps guarded by the registry lock
#[derive(Default)]
pub struct RegistryState {
    pub(crate) tenants: HashMap<String, Arc<TenantRuntime>>,
    pub(crate) listeners: HashMap<String, ListenerHandle>,
}

impl RegistryState {
    /// Full overwrite from a configuration source. Ports the source no longer
    /// lists are marked invalid and purged by the next reconcile.
    pub(crate) async fn merge_from_source(&mut self, records: &[TenantRecord]) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let mut seen = HashSet::new();

        for record in records {
            if record.port.is_empty() {
                tracing::warn!("Skipping tenant {:?} without a port", record.name);
                summary.skipped += 1;
                continue;
            }
            seen.insert(record.port.clone());

            match self.tenants.get(&record.port).cloned() {
                Some(tenant) => {
                    tenant.config_mut().await.overwrite_from(record);
                    summary.updated.push(record.port.clone());
                }
                None => {
                    self.tenants.insert(
                        record.port.clone(),
                        Arc::new(TenantRuntime::from_record(record)),
                    );
                    summary.created.push(record.port.clone());
                }
            }
        }

        for (port, tenant) in &self.tenants {
            if seen.contains(port) {
                continue;
            }
            let mut config = tenant.config_mut().await;
            if config.is_live() {
                tracing::info!(
                    "Tenant {:?} on port {} no longer configured; marking for removal",
                    config.name,
                    port
                );
                config.name.clear();
                summary.invalidated.push(port.clone());
            }
        }
        summary.invalidated.sort();

        summary
    }

    /// Field-granular update: empty and zero fields leave the current value.
    pub(crate) async fn apply_patch(&mut self, records: &[TenantRecord]) -> PatchSummary {
        let mut summary = PatchSummary::default();

        for record in records {
            if record.port.is_empty() {
                tracing::warn!("Patch entry without a port skipped");
                summary.skipped += 1;
                continue;
            }

            if record.remove {
                if self.tenants.contains_key(&record.port) {
                    self.retire(&record.port).await;
                    summary.removed.push(record.port.clone());
                } else {
                    tracing::warn!("Patch removes unknown port {}; ignored", record.port);
                    summary.skipped += 1;
                }
                continue;
            }

            match self.tenants.get(&record.port).cloned() {
                Some(tenant) => {
                    let touched = tenant.config_mut().await.patch_from(record);
                    tracing::info!(
                        "Patched tenant on port {}: {}",
                        record.port,
                        touched.join(", ")
                    );
                    summary.updated.push(record.port.clone());
                }
                None => {
                    tracing::info!(
                        "Patch creates tenant {:?} on port {}",
                        record.name,
                        record.port
                    );
                    self.tenants.insert(
                        record.port.clone(),
                        Arc::new(TenantRuntime::from_record(record)),
                    );
                    summary.created.push(record.port.clone());
                }
            }
        }

        summary
    }

    /// Stop the port's listener, end every connection of its tenant and drop
    /// both entries. Returns true if a listener was closed.
    pub(crate) async fn retire(&mut self, port: &str) -> bool {
        let closed = match self.listeners.remove(port) {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        };

        if let Some(tenant) = self.tenants.remove(port) {
            tenant.shut_down();
            tracing::info!(
                "Retired tenant on port {} ({} open connection(s) closed)",
                port,
                tenant.connections().len()
            );
        }

        closed
    }

    /// Records of all live tenants, ordered by port
    pub(crate) async fn records(&self) -> Vec<TenantRecord> {
        let mut records = Vec::with_capacity(self.tenants.len());
        for tenant in self.tenants.values() {
            let record = tenant.to_record().await;
            if !record.name.is_empty() {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.port.cmp(&b.port));
        records
    }

    async fn status(&self) -> Vec<TenantStatus> {
        let mut status = Vec::with_capacity(self.tenants.len());
        for (port, tenant) in &self.tenants {
            let config = tenant.config().await;
            let counters = tenant.counters().snapshot();
            let local_addr = self.listeners.get(port).map(|l| l.local_addr());
            status.push(TenantStatus {
                port: port.clone(),
                name: config.name,
                comment: config.comment,
                listening: local_addr.is_some(),
                local_addr,
                connections: tenant.connections().len(),
                bytes_received: counters.bytes_received,
                bytes_sent: counters.bytes_sent,
                errors: counters.errors,
                keep_alive_interval_sec: config.keep_alive_interval_sec,
                keep_alive_file: config.keep_alive_file,
                message_format: config.message_format,
                endpoint: config.endpoint,
            });
        }
        status.sort_by(|a, b| a.port.cmp(&b.port));
        status
    }
}

/// Owner of all tenant state. Shared as `Arc` by the admin server and the
/// reload loop.
pub struct TenantRegistry {
    state: Mutex<RegistryState>,
    store: TenantStore,
    listener_settings: ListenerSettings,
    queue: ForwardQueue,
}

impl TenantRegistry {
    pub fn new(store: TenantStore, listener_settings: ListenerSettings, queue: ForwardQueue) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            store,
            listener_settings,
            queue,
        }
    }

    pub fn store(&self) -> &TenantStore {
        &self.store
    }

    /// Startup load. Unlike [`reload`](Self::reload) a load failure here is
    /// meant to abort the process.
    pub async fn load_initial(&self) -> Result<ReconcileReport, RegistryError> {
        let records = self.store.load().await.map_err(RegistryError::Load)?;
        let mut state = self.state.lock().await;
        let merged = state.merge_from_source(&records).await;
        tracing::info!(
            "Loaded {} tenant(s) from {}",
            merged.created.len(),
            self.store.path().display()
        );
        Ok(state.reconcile(&self.listener_settings, &self.queue).await)
    }

    /// Periodic full reload: load, merge, reconcile, persist.
    pub async fn reload(&self) -> Result<ReconcileReport, RegistryError> {
        let records = self.store.load().await.map_err(RegistryError::Load)?;
        let mut state = self.state.lock().await;
        state.merge_from_source(&records).await;
        let report = state.reconcile(&self.listener_settings, &self.queue).await;
        self.persist_locked(&state).await?;
        Ok(report)
    }

    /// Merge without reconciling. Listeners follow on the next reconcile.
    pub async fn merge_from_source(&self, records: &[TenantRecord]) -> MergeSummary {
        self.state.lock().await.merge_from_source(records).await
    }

    /// Apply an admin patch, reconcile, then persist. A persist failure is
    /// returned but the in-memory change stays.
    pub async fn apply_patch(&self, records: &[TenantRecord]) -> Result<PatchSummary, RegistryError> {
        let mut state = self.state.lock().await;
        let summary = state.apply_patch(records).await;
        state.reconcile(&self.listener_settings, &self.queue).await;
        self.persist_locked(&state).await?;
        Ok(summary)
    }

    pub async fn reconcile(&self) -> ReconcileReport {
        let mut state = self.state.lock().await;
        state.reconcile(&self.listener_settings, &self.queue).await
    }

    pub async fn persist(&self) -> Result<(), RegistryError> {
        let state = self.state.lock().await;
        self.persist_locked(&state).await
    }

    async fn persist_locked(&self, state: &RegistryState) -> Result<(), RegistryError> {
        let records = state.records().await;
        self.store.save(&records).await.map_err(|e| {
            tracing::error!("Failed to save {}: {}", self.store.path().display(), e);
            RegistryError::Persist(e)
        })
    }

    pub async fn status(&self) -> Vec<TenantStatus> {
        self.state.lock().await.status().await
    }

    pub async fn log_status(&self) {
        let status = self.status().await;
        tracing::info!("=== Tenant status ({} tenant(s)) ===", status.len());
        for tenant in status {
            let keep_alive = if tenant.keep_alive_interval_sec > 0 && !tenant.keep_alive_file.is_empty() {
                format!("every {}s -> {}", tenant.keep_alive_interval_sec, tenant.keep_alive_file)
            } else {
                "off".to_string()
            };
            tracing::info!(
                "Tenant {:?} port {}: listening={} connections={} rx={} tx={} errors={} keep-alive={} comment={:?}",
                tenant.name,
                tenant.port,
                tenant.listening,
                tenant.connections,
                tenant.bytes_received,
                tenant.bytes_sent,
                tenant.errors,
                keep_alive,
                tenant.comment
            );
        }
    }

    pub async fn tenant(&self, port: &str) -> Option<Arc<TenantRuntime>> {
        self.state.lock().await.tenants.get(port).cloned()
    }

    /// Bound address of a tenant's listener
    pub async fn listener_addr(&self, port: &str) -> Option<SocketAddr> {
        self.state
            .lock()
            .await
            .listeners
            .get(port)
            .map(|l| l.local_addr())
    }

    /// Retire every tenant. Used on process shutdown.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let mut ports: Vec<String> = state.tenants.keys().cloned().collect();
        ports.sort();
        for port in ports {
            state.retire(&port).await;
        }
        let leftover: Vec<String> = state.listeners.keys().cloned().collect();
        for port in leftover {
            if let Some(handle) = state.listeners.remove(&port) {
                handle.stop().await;
            }
        }
    }
}
