use super::connections::ConnectionSet;
use super::model::{CounterSnapshot, TenantConfig, TenantRecord, TokenCache};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::sync::{watch, Mutex, RwLock, RwLockWriteGuard};

/// Per-tenant traffic counters, updated lock-free from many tasks.
#[derive(Default)]
pub struct TenantCounters {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    errors: AtomicU64,
}

impl TenantCounters {
    pub fn from_snapshot(snapshot: CounterSnapshot) -> Self {
        Self {
            bytes_received: AtomicU64::new(snapshot.bytes_received),
            bytes_sent: AtomicU64::new(snapshot.bytes_sent),
            errors: AtomicU64::new(snapshot.errors),
        }
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            bytes_received: self.bytes_received(),
            bytes_sent: self.bytes_sent(),
            errors: self.errors(),
        }
    }
}

/// Runtime state of one live tenant, shared by its listener, connections,
/// keep-alive task and in-flight forwards.
///
/// Config writes happen only while the registry lock is held. The token cache
/// has its own lock so a refresh round trip never blocks the registry.
pub struct TenantRuntime {
    port: String,
    config: RwLock<TenantConfig>,
    token: Mutex<TokenCache>,
    /// Token last seen by `to_record`, used while a refresh holds `token`
    saved_token: StdMutex<TokenCache>,
    counters: TenantCounters,
    connections: ConnectionSet,
    shutdown: watch::Sender<bool>,
}

impl TenantRuntime {
    pub fn new(
        port: impl Into<String>,
        config: TenantConfig,
        token: TokenCache,
        counters: CounterSnapshot,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            port: port.into(),
            config: RwLock::new(config),
            saved_token: StdMutex::new(token.clone()),
            token: Mutex::new(token),
            counters: TenantCounters::from_snapshot(counters),
            connections: ConnectionSet::new(),
            shutdown,
        }
    }

    pub fn from_record(record: &TenantRecord) -> Self {
        Self::new(
            record.port.clone(),
            TenantConfig::from_record(record),
            TokenCache::from_record(record),
            CounterSnapshot::from_record(record),
        )
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub async fn config(&self) -> TenantConfig {
        self.config.read().await.clone()
    }

    pub(crate) async fn config_mut(&self) -> RwLockWriteGuard<'_, TenantConfig> {
        self.config.write().await
    }

    pub async fn name(&self) -> String {
        self.config.read().await.name.clone()
    }

    /// Current (StartByte, EndByte)
    pub async fn delimiters(&self) -> (u8, u8) {
        let config = self.config.read().await;
        (config.start_byte, config.end_byte)
    }

    pub fn token_cache(&self) -> &Mutex<TokenCache> {
        &self.token
    }

    pub fn counters(&self) -> &TenantCounters {
        &self.counters
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal every framing loop of this tenant to terminate.
    pub fn shut_down(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Count an error against this tenant and log it with tenant context.
    pub async fn record_error(&self, error: impl Display) {
        self.counters.record_error();
        let name = self.name().await;
        tracing::error!("[Tenant {:?} port {}] {}", name, self.port, error);
    }

    /// Current token without waiting on a refresh in flight. On contention
    /// the previous snapshot is returned.
    fn token_snapshot(&self) -> TokenCache {
        let mut saved = self.saved_token.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(token) = self.token.try_lock() {
            *saved = token.clone();
        }
        saved.clone()
    }

    pub async fn to_record(&self) -> TenantRecord {
        let config = self.config().await;
        let token = self.token_snapshot();
        TenantRecord::assemble(&self.port, &config, &token, self.counters.snapshot())
    }
}
