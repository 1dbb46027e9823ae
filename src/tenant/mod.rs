pub mod connections;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod runtime;
pub mod store;

pub use connections::{ConnectionGuard, ConnectionId, ConnectionSet, ConnectionWriter, TenantConnection};
pub use model::{
    CounterSnapshot, MessageFormat, OAuthClient, OAuthCredentials, TenantConfig, TenantRecord,
    TokenCache, DEFAULT_TOKEN_TYPE,
};
pub use reconcile::{ListenerHandle, ReconcileReport};
pub use registry::{MergeSummary, PatchSummary, RegistryError, TenantRegistry, TenantStatus};
pub use runtime::{TenantCounters, TenantRuntime};
pub use store::{parse_records, StoreError, TenantStore};
