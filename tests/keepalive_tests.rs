//! Keep-alive dispatcher tests

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tempfile::tempdir;
use tenantgate::keepalive::{send_keep_alive, spawn_keep_alive, KeepAliveRecord, KeepAliveSettings};
use tenantgate::tenant::{TenantRecord, TenantRuntime};
use tokio::io::{AsyncReadExt, AsyncWrite, DuplexStream};

/// A writer whose socket is already gone
struct BrokenWriter;

impl AsyncWrite for BrokenWriter {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn peer(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn tenant() -> Arc<TenantRuntime> {
    Arc::new(TenantRuntime::from_record(&TenantRecord {
        name: "acme".to_string(),
        port: "4000".to_string(),
        start_byte: 0x02,
        end_byte: 0x03,
        ..Default::default()
    }))
}

fn attach(tenant: &TenantRuntime, port: u16) -> DuplexStream {
    let (client, server) = tokio::io::duplex(4096);
    tenant.connections().register(peer(port), Box::new(server));
    client
}

async fn read_frame(client: &mut DuplexStream) -> Vec<u8> {
    let mut frame = Vec::new();
    loop {
        let byte = tokio::time::timeout(Duration::from_secs(5), client.read_u8())
            .await
            .expect("no keep-alive frame")
            .unwrap();
        frame.push(byte);
        if byte == 0x03 {
            return frame;
        }
    }
}

#[tokio::test]
async fn test_tick_reaches_every_connection() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("hb.xml");
    let tenant = tenant();
    let mut first = attach(&tenant, 50001);
    let mut second = attach(&tenant, 50002);

    let report = send_keep_alive(&tenant, &file).await;
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 0);

    let a = read_frame(&mut first).await;
    let b = read_frame(&mut second).await;
    assert_eq!(a, b);
    assert_eq!(a[0], 0x02);

    let body = String::from_utf8(a[1..a.len() - 1].to_vec()).unwrap();
    let record = KeepAliveRecord::from_xml(&body).unwrap();
    assert_eq!(record.tenant_name, "acme");
    assert_eq!(KeepAliveRecord::load(&file).await.unwrap(), record);

    assert_eq!(tenant.counters().bytes_sent(), 2 * a.len() as u64);
    assert_eq!(tenant.counters().errors(), 0);
}

#[tokio::test]
async fn test_failed_write_does_not_stop_delivery() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("hb.xml");
    let tenant = tenant();
    tenant
        .connections()
        .register(peer(50001), Box::new(BrokenWriter));
    let mut healthy = attach(&tenant, 50002);

    let report = send_keep_alive(&tenant, &file).await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(tenant.counters().errors(), 1);

    let frame = read_frame(&mut healthy).await;
    assert_eq!(tenant.counters().bytes_sent(), frame.len() as u64);
}

#[tokio::test]
async fn test_existing_file_is_updated_in_place() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("hb.xml");
    KeepAliveRecord {
        tenant_name: "old-name".to_string(),
        send_time: "2000-01-01T00:00:00Z".to_string(),
    }
    .save(&file)
    .await
    .unwrap();

    send_keep_alive(&tenant(), &file).await;

    let saved = KeepAliveRecord::load(&file).await.unwrap();
    assert_eq!(saved.tenant_name, "acme");
    assert_ne!(saved.send_time, "2000-01-01T00:00:00Z");
    assert!(chrono::DateTime::parse_from_rfc3339(&saved.send_time).is_ok());
}

#[tokio::test]
async fn test_unwritable_file_still_broadcasts() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("missing-dir").join("hb.xml");
    let tenant = tenant();
    let mut client = attach(&tenant, 50001);

    let report = send_keep_alive(&tenant, &file).await;

    assert_eq!(report.delivered, 1);
    let frame = read_frame(&mut client).await;
    assert!(String::from_utf8_lossy(&frame).contains("<tenantName>acme</tenantName>"));
}

#[tokio::test]
async fn test_timer_stops_on_tenant_shutdown() {
    let dir = tempdir().unwrap();
    let tenant = tenant();
    let mut client = attach(&tenant, 50001);

    let handle = spawn_keep_alive(
        tenant.clone(),
        KeepAliveSettings {
            interval: Duration::from_millis(20),
            file: dir.path().join("hb.xml"),
        },
    );

    read_frame(&mut client).await;
    read_frame(&mut client).await;

    tenant.shut_down();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("keep-alive task kept running")
        .unwrap();
}

#[tokio::test]
async fn test_huge_interval_is_armed_and_stoppable() {
    let dir = tempdir().unwrap();
    let tenant = tenant();

    let handle = spawn_keep_alive(
        tenant.clone(),
        KeepAliveSettings {
            interval: Duration::from_secs(i64::MAX as u64),
            file: dir.path().join("hb.xml"),
        },
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());

    tenant.shut_down();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("keep-alive task kept running")
        .unwrap();
}
