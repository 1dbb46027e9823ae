//! Listener lifecycle: binding tenant ports, their accept loops and the
//! keep-alive timers armed alongside them.

use super::registry::RegistryState;
use super::runtime::TenantRuntime;
use crate::forward::ForwardQueue;
use crate::keepalive::{spawn_keep_alive, KeepAliveSettings};
use crate::metrics;
use crate::network::connection::handle_connection;
use crate::network::listener::{ListenerSettings, TenantListener};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Outcome of one reconcile pass, by port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub bound: Vec<String>,
    pub closed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub rearmed: Vec<String>,
}

impl ReconcileReport {
    /// True when the pass neither bound nor closed a listener nor touched a
    /// keep-alive timer.
    pub fn is_noop(&self) -> bool {
        self.bound.is_empty() && self.closed.is_empty() && self.rearmed.is_empty()
    }
}

/// A bound tenant port with its accept loop and optional keep-alive timer
pub struct ListenerHandle {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    keep_alive: Option<(KeepAliveSettings, JoinHandle<()>)>,
}

impl ListenerHandle {
    /// Bind `tenant`'s port, start its accept loop and arm its keep-alive.
    pub async fn start(
        tenant: Arc<TenantRuntime>,
        settings: &ListenerSettings,
        queue: ForwardQueue,
    ) -> std::io::Result<Self> {
        let listener = TenantListener::bind(settings, tenant.port()).await?;
        let local_addr = listener.local_addr();

        let keep_alive = KeepAliveSettings::from_config(&tenant.config().await)
            .map(|ka| (ka.clone(), spawn_keep_alive(tenant.clone(), ka)));
        let accept_task = tokio::spawn(accept_loop(listener, tenant, queue));

        Ok(Self {
            local_addr,
            accept_task,
            keep_alive,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn keep_alive(&self) -> Option<&KeepAliveSettings> {
        self.keep_alive.as_ref().map(|(settings, _)| settings)
    }

    /// Replace the keep-alive timer when its settings differ from `desired`.
    /// Returns true if anything changed.
    async fn rearm_keep_alive(
        &mut self,
        tenant: &Arc<TenantRuntime>,
        desired: Option<KeepAliveSettings>,
    ) -> bool {
        if self.keep_alive() == desired.as_ref() {
            return false;
        }

        if let Some((_, task)) = self.keep_alive.take() {
            task.abort();
            let _ = task.await;
        }
        self.keep_alive = desired.map(|ka| (ka.clone(), spawn_keep_alive(tenant.clone(), ka)));
        true
    }

    /// Stop accepting and release the port. Waits for both tasks so the
    /// socket is closed when this returns.
    pub async fn stop(self) {
        self.accept_task.abort();
        let _ = self.accept_task.await;

        if let Some((_, task)) = self.keep_alive {
            task.abort();
            let _ = task.await;
        }
    }
}

async fn accept_loop(listener: TenantListener, tenant: Arc<TenantRuntime>, queue: ForwardQueue) {
    let mut shutdown = tenant.subscribe_shutdown();
    if *shutdown.borrow_and_update() {
        return;
    }

    tracing::info!(
        "Listening for tenant on port {} ({})",
        tenant.port(),
        listener.local_addr()
    );

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                let name = tenant.name().await;
                tracing::info!("Tenant {:?} client connected: {}", name, peer);
                metrics::record_connection_accepted(&name);

                let (reader, writer) = stream.into_split();
                let connection = tenant.connections().register(peer, Box::new(writer));
                tokio::spawn(handle_connection(
                    tenant.clone(),
                    connection,
                    reader,
                    queue.clone(),
                ));
            }
            Err(e) => {
                tracing::warn!("Accept failed on port {}: {}", tenant.port(), e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }

    tracing::info!("Listener on port {} closed", tenant.port());
}

impl RegistryState {
    /// Converge bound listeners to the set of live tenants.
    ///
    /// Called with the registry lock held. Bind failures are reported and
    /// retried on the next pass.
    pub(crate) async fn reconcile(
        &mut self,
        settings: &ListenerSettings,
        queue: &ForwardQueue,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let mut invalid = Vec::new();
        for (port, tenant) in &self.tenants {
            if !tenant.config().await.is_live() {
                invalid.push(port.clone());
            }
        }
        invalid.sort();
        for port in invalid {
            if self.retire(&port).await {
                report.closed.push(port);
            }
        }

        let mut unbound: Vec<String> = self
            .tenants
            .keys()
            .filter(|port| !self.listeners.contains_key(*port))
            .cloned()
            .collect();
        unbound.sort();
        for port in unbound {
            let Some(tenant) = self.tenants.get(&port).cloned() else {
                continue;
            };
            match ListenerHandle::start(tenant, settings, queue.clone()).await {
                Ok(handle) => {
                    self.listeners.insert(port.clone(), handle);
                    report.bound.push(port);
                }
                Err(e) => {
                    tracing::error!("Failed to listen on port {}: {}", port, e);
                    report.failed.push((port, e.to_string()));
                }
            }
        }

        let mut orphans: Vec<String> = self
            .listeners
            .keys()
            .filter(|port| !self.tenants.contains_key(*port))
            .cloned()
            .collect();
        orphans.sort();
        for port in orphans {
            if let Some(handle) = self.listeners.remove(&port) {
                tracing::warn!("Closing listener on port {} with no tenant", port);
                handle.stop().await;
                report.closed.push(port);
            }
        }

        for (port, handle) in self.listeners.iter_mut() {
            let Some(tenant) = self.tenants.get(port) else {
                continue;
            };
            let desired = KeepAliveSettings::from_config(&tenant.config().await);
            if handle.rearm_keep_alive(tenant, desired).await {
                tracing::info!("Keep-alive settings changed for port {}", port);
                report.rearmed.push(port.clone());
            }
        }
        report.rearmed.sort();

        report
    }
}
