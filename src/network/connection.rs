//! Per-connection framing loop.

use super::framing::{encode_frame, FrameDecoder, FrameEvent};
use crate::forward::ForwardQueue;
use crate::tenant::{ConnectionGuard, TenantConnection, TenantRuntime};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Why a framing loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// Peer closed the stream
    Disconnected,
    /// Read failed; counted as a tenant error
    ReadError,
    /// Tenant was retired
    Shutdown,
}

/// Run the framing protocol for one accepted connection until the peer
/// disconnects, a read fails, or the tenant is retired.
///
/// Completed messages go to `queue` without waiting for the HTTP round trip and
/// are echoed back framed. The connection always leaves the tenant's set on
/// return; the socket closes when the reader and the last writer handle drop.
pub async fn handle_connection<R>(
    tenant: Arc<TenantRuntime>,
    connection: Arc<TenantConnection>,
    reader: R,
    queue: ForwardQueue,
) -> ConnectionEnd
where
    R: AsyncRead + Unpin,
{
    let _guard = ConnectionGuard::new(tenant.connections(), connection.id());
    let peer = connection.peer_addr();
    let mut shutdown = tenant.subscribe_shutdown();
    let mut reader = BufReader::new(reader);
    let mut decoder = FrameDecoder::new();

    if *shutdown.borrow_and_update() {
        return ConnectionEnd::Shutdown;
    }

    loop {
        let read = tokio::select! {
            read = reader.read_u8() => read,
            _ = shutdown.changed() => {
                tracing::info!(
                    "Closing connection {} of retired tenant on port {}",
                    peer,
                    tenant.port()
                );
                return ConnectionEnd::Shutdown;
            }
        };

        let byte = match read {
            Ok(byte) => byte,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                let name = tenant.name().await;
                tracing::info!("Tenant {:?} client disconnected: {}", name, peer);
                return ConnectionEnd::Disconnected;
            }
            Err(e) => {
                tenant
                    .record_error(format!("read error from {}: {}", peer, e))
                    .await;
                return ConnectionEnd::ReadError;
            }
        };

        tenant.counters().record_received(1);
        let (start, end) = tenant.delimiters().await;

        match decoder.push(byte, start, end) {
            FrameEvent::Complete(payload) => {
                let name = tenant.name().await;
                tracing::info!(
                    "Received from tenant {:?}: {}",
                    name,
                    String::from_utf8_lossy(&payload)
                );

                let frame = encode_frame(start, &payload, end);
                queue.submit(tenant.clone(), payload);

                let sent = tokio::select! {
                    sent = connection.send(&frame) => sent,
                    _ = shutdown.changed() => {
                        tracing::info!(
                            "Closing connection {} of retired tenant on port {} during echo",
                            peer,
                            tenant.port()
                        );
                        return ConnectionEnd::Shutdown;
                    }
                };
                match sent {
                    Ok(written) => tenant.counters().record_sent(written),
                    Err(e) => {
                        tenant
                            .record_error(format!("write error to {}: {}", peer, e))
                            .await;
                    }
                }
            }
            FrameEvent::Stray(b) => {
                tracing::debug!(
                    "Tenant on port {}: unexpected byte {:#04x} from {}",
                    tenant.port(),
                    b,
                    peer
                );
            }
            FrameEvent::Started { discarded } if discarded > 0 => {
                tracing::debug!(
                    "Tenant on port {}: restart discarded {} buffered byte(s) from {}",
                    tenant.port(),
                    discarded,
                    peer
                );
            }
            FrameEvent::Started { .. } | FrameEvent::Buffered | FrameEvent::Ignored => {}
        }
    }
}
