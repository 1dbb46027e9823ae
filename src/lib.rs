//! tenantgate - multi-tenant TCP to HTTP gateway
//!
//! Every configured tenant gets its own TCP port. Clients speak a framing
//! protocol delimited by a per-tenant start and end byte; each complete
//! message is echoed back and relayed to the tenant's HTTP endpoint with a
//! static token or an OAuth client-credentials token. Listeners follow the
//! tenants file and admin patches at runtime.

pub mod admin;
pub mod config;
pub mod forward;
pub mod keepalive;
pub mod metrics;
pub mod network;
pub mod tenant;

pub use config::{load_config, Config};
pub use forward::{Forwarder, ForwarderSettings};
pub use tenant::{TenantRecord, TenantRegistry, TenantRuntime, TenantStore};
