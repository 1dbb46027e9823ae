use clap::Parser;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, Command};
use tenantgate::config::{self, Config, LoggingConfig};
use tenantgate::forward::{ForwardQueue, ForwardWorker, Forwarder};
use tenantgate::network::ListenerSettings;
use tenantgate::tenant::{TenantRecord, TenantRegistry, TenantStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        return print_version();
    }

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(&cli, &config.logging)?;

    match cli.command {
        Command::Serve(args) => run_gateway(config, args).await,
        Command::Validate(args) => validate_tenants(config, args).await,
        Command::Version => print_version(),
    }
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> anyhow::Result<()> {
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    let format = cli.log_format.as_deref().unwrap_or(&logging.format);

    let subscriber = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(level));

    match format {
        "json" => {
            subscriber
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "plain" => {
            subscriber.with(tracing_subscriber::fmt::layer()).init();
        }
        _ => {
            subscriber.with(tracing_subscriber::fmt::layer()).init();
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, args: &cli::ServeArgs) -> anyhow::Result<()> {
    if let Some(path) = &args.tenants_file {
        config.gateway.tenants_file = path.clone();
    }
    if let Some(bind) = &args.admin_bind {
        config.admin.bind = bind.clone();
    }
    if let Some(ip) = &args.listen_ip {
        config.gateway.listen_ip = ip.clone();
    }

    config::validate_config(config)?;
    Ok(())
}

/// Fires once per reload period. The first tick is one period after start,
/// the initial load having already happened.
fn spawn_reload_ticker(period: Duration) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    rx
}

async fn reload_tenants(registry: &TenantRegistry) {
    match registry.reload().await {
        Ok(report) => {
            if !report.is_noop() || !report.failed.is_empty() {
                tracing::info!(
                    "Tenants reloaded: bound={:?} closed={:?} rearmed={:?} failed={:?}",
                    report.bound,
                    report.closed,
                    report.rearmed,
                    report.failed
                );
            }
        }
        Err(err) => {
            tracing::error!("Tenant reload failed: {}", err);
        }
    }
    registry.log_status().await;
}

async fn run_gateway(mut config: Config, args: cli::ServeArgs) -> anyhow::Result<()> {
    apply_overrides(&mut config, &args)?;

    let listener_settings = config.listener_settings()?;
    let forwarder = Arc::new(Forwarder::new(config.forwarder_settings())?);
    let (queue, jobs) = ForwardQueue::channel();
    let worker = tokio::spawn(ForwardWorker::new(jobs, forwarder).run());

    tracing::info!(
        "Starting tenantgate with tenants file {}",
        config.gateway.tenants_file.display()
    );
    let store = TenantStore::new(config.gateway.tenants_file.clone());
    let registry = Arc::new(TenantRegistry::new(store, listener_settings, queue));

    let report = registry.load_initial().await?;
    for (port, err) in &report.failed {
        tracing::warn!("Tenant port {} not listening: {}", port, err);
    }
    registry.log_status().await;

    if config.admin.enabled {
        let addr = config.admin_addr()?;
        tokio::spawn(tenantgate::admin::serve(addr, registry.clone()));
    }

    let mut reload_rx = spawn_reload_ticker(config.reload_interval());
    let mut shutdown = Box::pin(wait_for_shutdown_signal());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                break;
            }
            tick = reload_rx.recv() => {
                if tick.is_none() {
                    break;
                }
                reload_tenants(&registry).await;
            }
        }
    }

    // Graceful shutdown
    tracing::info!("Initiating graceful shutdown...");
    if let Err(err) = registry.persist().await {
        tracing::error!("Final save failed: {}", err);
    }
    registry.shutdown().await;
    worker.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Problems that would keep a tenant from running, one line each
fn check_records(records: &[TenantRecord]) -> Vec<String> {
    let settings = ListenerSettings::default();
    let mut problems = Vec::new();
    let mut ports = HashSet::new();

    for (i, record) in records.iter().enumerate() {
        if record.port.is_empty() {
            problems.push(format!("entry {}: missing Port", i));
            continue;
        }
        if let Err(e) = settings.bind_addr(&record.port) {
            problems.push(format!("entry {}: {}", i, e));
        }
        if !ports.insert(record.port.as_str()) {
            problems.push(format!("entry {}: duplicate Port {}", i, record.port));
        }
        if record.name.is_empty() {
            problems.push(format!("entry {}: port {} has no Name", i, record.port));
        }
        if record.endpoint.is_empty() {
            problems.push(format!("entry {}: port {} has no Endpoint", i, record.port));
        }
    }

    problems
}

async fn validate_tenants(config: Config, args: cli::ValidateArgs) -> anyhow::Result<()> {
    let path = args
        .tenants_file
        .unwrap_or_else(|| config.gateway.tenants_file.clone());
    let records = TenantStore::new(path.clone()).load().await?;

    println!("{}: {} tenant(s)", path.display(), records.len());
    for record in &records {
        println!(
            "  port {:>5}  {:<20} format={:<5} endpoint={}",
            record.port,
            record.name,
            if record.message_format.is_empty() {
                "json"
            } else {
                record.message_format.as_str()
            },
            record.endpoint
        );
    }

    let problems = check_records(&records);
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  {}", problem);
        }
        anyhow::bail!("{} problem(s) found in {}", problems.len(), path.display());
    }

    println!("OK");
    Ok(())
}

fn print_version() -> anyhow::Result<()> {
    println!("tenantgate {}", env!("CARGO_PKG_VERSION"));
    println!(
        "Build timestamp: {}",
        option_env!("BUILD_TIMESTAMP").unwrap_or("unknown")
    );
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C (SIGINT)");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_serve_overrides() {
        let mut config = Config::default();
        let args = cli::ServeArgs {
            tenants_file: Some(PathBuf::from("/tmp/other.json")),
            admin_bind: Some("127.0.0.1:9999".to_string()),
            listen_ip: Some("127.0.0.1".to_string()),
        };

        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.gateway.tenants_file, PathBuf::from("/tmp/other.json"));
        assert_eq!(config.admin_addr().unwrap().port(), 9999);
        assert_eq!(config.gateway.listen_ip, "127.0.0.1");
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = Config::default();
        let args = cli::ServeArgs {
            tenants_file: None,
            admin_bind: None,
            listen_ip: Some("nowhere".to_string()),
        };
        assert!(apply_overrides(&mut config, &args).is_err());
    }

    #[test]
    fn test_check_records() {
        let good = TenantRecord {
            name: "acme".to_string(),
            port: "4000".to_string(),
            endpoint: "http://localhost/ingest".to_string(),
            ..Default::default()
        };
        assert!(check_records(&[good.clone()]).is_empty());

        let problems = check_records(&[
            good.clone(),
            good,
            TenantRecord {
                port: "abc".to_string(),
                ..Default::default()
            },
            TenantRecord::default(),
        ]);
        assert!(problems.iter().any(|p| p.contains("duplicate Port 4000")));
        assert!(problems.iter().any(|p| p.contains("invalid tenant port")));
        assert!(problems.iter().any(|p| p.contains("missing Port")));
    }

    #[tokio::test]
    async fn test_reload_ticker_fires_after_period() {
        let mut rx = spawn_reload_ticker(Duration::from_millis(20));
        let tick = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(matches!(tick, Ok(Some(()))));
    }
}
