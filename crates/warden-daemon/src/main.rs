//! warden-daemon — local policy gateway for agent actions.
//!
//! Boot order: parse flags, initialise logging, load config and the auth
//! token, create `./data`, open the database, assemble the kernel, then
//! serve three planes concurrently:
//!
//! - binary RPC on `--grpc-port` (planner and Sentinel)
//! - message-framed JSON gateway on `--ghost-port` (all client species)
//! - HTTP control plane on `--http-port` (the human approval queue)
//!
//! SIGINT/SIGTERM drain the planes and exit 0; a boot failure exits 1.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use warden_core::KernelConfig;
use warden_daemon::events::{publish, KernelEvent};
use warden_daemon::gateway::GatewayServer;
use warden_daemon::rpc::RpcServer;
use warden_daemon::token::AuthToken;
use warden_daemon::{http, storage, KernelService};

/// Heartbeat period for the gateway `tick` event.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

/// warden daemon - policy gateway for agent actions
#[derive(Parser, Debug)]
#[command(name = "warden-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port for the binary RPC plane
    #[arg(long, default_value = "50051")]
    grpc_port: u16,

    /// Port for the HTTP control plane
    #[arg(long, default_value = "8080")]
    http_port: u16,

    /// Port for the message-framed gateway plane
    #[arg(long, default_value = "5005")]
    ghost_port: u16,

    /// Path to the configuration file (searched when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the kernel database
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to create runtime: {error}");
            std::process::exit(1);
        }
    };
    if let Err(error) = runtime.block_on(run(args)) {
        eprintln!("fatal: {error:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    // Config first: its system section carries the logging defaults.
    let (config, config_path) = match &args.config {
        Some(path) => (
            KernelConfig::from_file(path).context("failed to load configuration")?,
            Some(path.clone()),
        ),
        None => KernelConfig::discover().context("failed to load configuration")?,
    };

    init_logging(&args, &config)?;

    match &config_path {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no config file found, using safe defaults"),
    }
    info!(
        version = %config.system.version,
        environment = %config.system.environment,
        safe_mode = config.security.safe_mode,
        "warden initialising"
    );

    std::fs::create_dir_all(&args.data_dir).context("failed to create data directory")?;

    let (token, token_path) =
        AuthToken::load_or_generate(std::path::Path::new(".")).context("failed to initialise auth token")?;
    info!(path = %token_path.display(), "authentication enabled");

    let db_path = args.data_dir.join("kernel.db");
    let conn = storage::open_database(&db_path).context("failed to open database")?;
    info!(path = %db_path.display(), "database initialised");

    let service = KernelService::new(conn, &config).context("failed to assemble kernel")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Binary RPC plane.
    let rpc_listener = tokio::net::TcpListener::bind(("127.0.0.1", args.grpc_port))
        .await
        .with_context(|| format!("failed to bind rpc port {}", args.grpc_port))?;
    let rpc_task = tokio::spawn(RpcServer::new(service.clone()).run(rpc_listener, shutdown_rx.clone()));

    // Message-framed gateway plane.
    let gateway_listener = tokio::net::TcpListener::bind((
        config.network.kernel_host.as_str(),
        args.ghost_port,
    ))
    .await
    .with_context(|| format!("failed to bind gateway port {}", args.ghost_port))?;
    let gateway_task = tokio::spawn(
        GatewayServer::new(service.clone(), token).run(gateway_listener, shutdown_rx.clone()),
    );

    // HTTP control plane.
    let http_listener = tokio::net::TcpListener::bind(("127.0.0.1", args.http_port))
        .await
        .with_context(|| format!("failed to bind http port {}", args.http_port))?;
    let http_service = service.clone();
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(error) = http::serve(http_service, http_listener, http_shutdown).await {
            error!(%error, "http control plane exited");
        }
    });

    // Heartbeat tick to every gateway client.
    let tick_service = service.clone();
    let mut tick_shutdown = shutdown_rx.clone();
    let tick_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_PERIOD);
        interval.tick().await; // the immediate first tick
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    publish(
                        &tick_service.events(),
                        KernelEvent::Tick {
                            timestamp: chrono::Utc::now(),
                            uptime_seconds: tick_service.uptime_seconds(),
                        },
                    );
                }
                _ = tick_shutdown.changed() => {
                    if *tick_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    info!(
        grpc_port = args.grpc_port,
        ghost_port = args.ghost_port,
        http_port = args.http_port,
        "warden started"
    );

    wait_for_signal().await;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(
        Duration::from_secs(5),
        futures::future::join4(rpc_task, gateway_task, http_task, tick_task),
    )
    .await;

    info!("shutdown complete");
    Ok(())
}

fn init_logging(args: &Args, config: &KernelConfig) -> Result<()> {
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.system.log_level.clone());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = args.log_file.clone().or_else(|| {
        if config.system.log_file.is_empty() {
            None
        } else {
            Some(PathBuf::from(&config.system.log_file))
        }
    });

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

async fn wait_for_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(error) => {
            error!(%error, "failed to register SIGTERM handler");
            return std::future::pending::<()>().await;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(sigint) => sigint,
        Err(error) => {
            error!(%error, "failed to register SIGINT handler");
            return std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}
