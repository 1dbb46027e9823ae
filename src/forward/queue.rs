use super::Forwarder;
use crate::tenant::TenantRuntime;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A completed message waiting to be forwarded
pub struct ForwardJob {
    pub tenant: Arc<TenantRuntime>,
    pub message: Bytes,
}

/// Hand-off point between framing loops and the forward worker.
///
/// Unbounded so a framing loop never waits on outbound HTTP.
#[derive(Clone)]
pub struct ForwardQueue {
    tx: mpsc::UnboundedSender<ForwardJob>,
}

impl ForwardQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ForwardJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a job without blocking. Returns false once the worker is gone.
    pub fn submit(&self, tenant: Arc<TenantRuntime>, message: Bytes) -> bool {
        if self.tx.send(ForwardJob { tenant, message }).is_err() {
            tracing::warn!("Forward worker stopped; dropping message");
            return false;
        }
        true
    }
}

/// Drains the forward queue, running every job as its own task so a slow
/// endpoint never delays other messages or tenants.
pub struct ForwardWorker {
    rx: mpsc::UnboundedReceiver<ForwardJob>,
    forwarder: Arc<Forwarder>,
}

impl ForwardWorker {
    pub fn new(rx: mpsc::UnboundedReceiver<ForwardJob>, forwarder: Arc<Forwarder>) -> Self {
        Self { rx, forwarder }
    }

    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            let forwarder = self.forwarder.clone();
            tokio::spawn(async move {
                forwarder.dispatch(job).await;
            });
        }
        tracing::info!("Forward queue closed, worker exiting");
    }
}
