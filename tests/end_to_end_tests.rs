//! End-to-end tests: TCP client -> framing -> echo and HTTP forward

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tenantgate::forward::{ForwardQueue, ForwardWorker, Forwarder, ForwarderSettings};
use tenantgate::network::ListenerSettings;
use tenantgate::tenant::{TenantRecord, TenantRegistry, TenantRuntime, TenantStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn free_port() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port().to_string()
}

async fn start_gateway(path: &Path, records: &[TenantRecord]) -> Arc<TenantRegistry> {
    std::fs::write(path, serde_json::to_vec(records).unwrap()).unwrap();

    let forwarder = Arc::new(Forwarder::new(ForwarderSettings::default()).unwrap());
    let (queue, jobs) = ForwardQueue::channel();
    tokio::spawn(ForwardWorker::new(jobs, forwarder).run());

    let settings = ListenerSettings {
        listen_ip: IpAddr::from([127, 0, 0, 1]),
        ..Default::default()
    };
    let registry = Arc::new(TenantRegistry::new(TenantStore::new(path), settings, queue));
    registry.load_initial().await.unwrap();
    registry
}

async fn connect(registry: &TenantRegistry, port: &str) -> (TcpStream, Arc<TenantRuntime>) {
    let addr: SocketAddr = registry.listener_addr(port).await.unwrap();
    let stream = TcpStream::connect(addr).await.unwrap();
    let tenant = registry.tenant(port).await.unwrap();
    wait_for(|| tenant.connections().len() == 1).await;
    (stream, tenant)
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for echo")
        .unwrap();
    buf
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn test_frame_is_echoed_and_forwarded() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/ingest")
        .match_header("content-type", "application/json")
        .match_header("x-auth", "s3cret")
        .match_body(mockito::Matcher::Json(serde_json::json!({
            "tenant": "acme",
            "message": "hello"
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let port = free_port();
    let registry = start_gateway(
        &dir.path().join("tenants.json"),
        &[TenantRecord {
            name: "acme".to_string(),
            port: port.clone(),
            start_byte: 0x02,
            end_byte: 0x03,
            simple_auth_token: "s3cret".to_string(),
            endpoint: format!("{}/ingest", server.url()),
            ..Default::default()
        }],
    )
    .await;

    let (mut stream, tenant) = connect(&registry, &port).await;
    stream.write_all(b"\x02hello\x03").await.unwrap();

    let echo = read_exactly(&mut stream, 7).await;
    assert_eq!(echo, b"\x02hello\x03");

    wait_for(|| tenant.counters().bytes_sent() == 7).await;
    assert_eq!(tenant.counters().bytes_received(), 7);

    for _ in 0..200 {
        if mock.matched_async().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    mock.assert_async().await;
    assert_eq!(tenant.counters().errors(), 0);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_stray_bytes_and_restarts_are_tolerated() {
    let dir = tempdir().unwrap();
    let port = free_port();
    let registry = start_gateway(
        &dir.path().join("tenants.json"),
        &[TenantRecord {
            name: "acme".to_string(),
            port: port.clone(),
            start_byte: b'[',
            end_byte: b']',
            ..Default::default()
        }],
    )
    .await;

    let (mut stream, tenant) = connect(&registry, &port).await;
    // Stray bytes, an end byte while idle, a restart that drops "ab"
    stream.write_all(b"zz][ab[hello]").await.unwrap();

    let echo = read_exactly(&mut stream, 7).await;
    assert_eq!(echo, b"[hello]");
    wait_for(|| tenant.counters().bytes_received() == 13).await;

    registry.shutdown().await;
}

#[tokio::test]
async fn test_delimiter_patch_applies_to_open_connection() {
    let dir = tempdir().unwrap();
    let port = free_port();
    let registry = start_gateway(
        &dir.path().join("tenants.json"),
        &[TenantRecord {
            name: "acme".to_string(),
            port: port.clone(),
            start_byte: 0x02,
            end_byte: 0x03,
            ..Default::default()
        }],
    )
    .await;

    let (mut stream, _tenant) = connect(&registry, &port).await;
    registry
        .apply_patch(&[TenantRecord {
            port: port.clone(),
            start_byte: b'<',
            end_byte: b'>',
            ..Default::default()
        }])
        .await
        .unwrap();

    stream.write_all(b"<hi>").await.unwrap();
    assert_eq!(read_exactly(&mut stream, 4).await, b"<hi>");

    registry.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_leaves_connection_set() {
    let dir = tempdir().unwrap();
    let port = free_port();
    let registry = start_gateway(
        &dir.path().join("tenants.json"),
        &[TenantRecord {
            name: "acme".to_string(),
            port: port.clone(),
            start_byte: 0x02,
            end_byte: 0x03,
            ..Default::default()
        }],
    )
    .await;

    let (stream, tenant) = connect(&registry, &port).await;
    drop(stream);

    wait_for(|| tenant.connections().is_empty()).await;
    assert_eq!(tenant.counters().errors(), 0);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_removing_tenant_closes_its_connections() {
    let dir = tempdir().unwrap();
    let port = free_port();
    let registry = start_gateway(
        &dir.path().join("tenants.json"),
        &[TenantRecord {
            name: "acme".to_string(),
            port: port.clone(),
            start_byte: 0x02,
            end_byte: 0x03,
            ..Default::default()
        }],
    )
    .await;

    let (mut stream, tenant) = connect(&registry, &port).await;
    registry
        .apply_patch(&[TenantRecord {
            port: port.clone(),
            remove: true,
            ..Default::default()
        }])
        .await
        .unwrap();

    wait_for(|| tenant.connections().is_empty()).await;

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("socket was not closed");
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_failed_forward_counts_error_without_closing() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/ingest")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let port = free_port();
    let registry = start_gateway(
        &dir.path().join("tenants.json"),
        &[TenantRecord {
            name: "acme".to_string(),
            port: port.clone(),
            start_byte: 0x02,
            end_byte: 0x03,
            simple_auth_token: "s3cret".to_string(),
            message_format: "text".to_string(),
            endpoint: format!("{}/ingest", server.url()),
            ..Default::default()
        }],
    )
    .await;

    let (mut stream, tenant) = connect(&registry, &port).await;
    stream.write_all(b"\x02one\x03").await.unwrap();
    assert_eq!(read_exactly(&mut stream, 5).await, b"\x02one\x03");

    wait_for(|| tenant.counters().errors() == 1).await;
    mock.assert_async().await;

    // Still serving
    stream.write_all(b"\x02two\x03").await.unwrap();
    assert_eq!(read_exactly(&mut stream, 5).await, b"\x02two\x03");

    registry.shutdown().await;
}
