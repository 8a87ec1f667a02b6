//! Turnstile gateway binary
//!
//! Binds the limbo gateway on a TCP port and runs it until ctrl-c. Intended
//! to front a game backend behind a port forward; every knob comes from an
//! optional JSON config file plus the flags below.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use turnstile::net::{AdmissionGate, LogSink, VerifiedStore};
use turnstile::{Config, Gateway};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "turnstile", version, about = "Turnstile: anti-bot limbo gateway")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:25565")]
    listen: SocketAddr,

    /// JSON config file overlaying the defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verified-store file, loaded at startup and saved on shutdown
    #[arg(short = 's', long, default_value = "./verified.dat")]
    store: PathBuf,

    /// Refuse every connection (operator lockdown)
    #[arg(long)]
    lockdown: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("turnstile=info".parse().expect("static directive")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config {}: {}", path.display(), e);
                return;
            }
        },
        None => Config::default(),
    };
    if args.lockdown {
        config.lockdown = true;
    }
    let config = Arc::new(config);

    info!("════════════════════════════════════════════════════════════");
    info!("  Turnstile v{} — limbo verification gateway", VERSION);
    info!("════════════════════════════════════════════════════════════");
    info!(
        "Window: {} ticks | verifying cap: {} | queue: {}/tick",
        config.max_movement_ticks, config.max_verifying_players, config.max_queue_polls
    );
    if config.lockdown {
        warn!("LOCKDOWN enabled: every connection will be refused");
    }

    let gateway = match Gateway::bind(args.listen, config.clone(), Arc::new(LogSink)).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to bind {}: {}", args.listen, e);
            return;
        }
    };

    restore_verified(gateway.gate(), &args.store, &config).await;

    // Status printer
    let gate = gateway.gate().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            info!(
                "Status: {} verifying | {} queued | {} verified | ~{} blacklisted{}",
                gate.active_sessions(),
                gate.queue_len().await,
                gate.verified_len().await,
                gate.blacklist_size().await,
                if gate.attack_active().await { " | UNDER ATTACK" } else { "" },
            );
        }
    });

    info!("Gateway running. Waiting for connections...");
    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");

    if let Err(e) = gateway.gate().save_verified(&args.store).await {
        warn!("Could not save verified store: {}", e);
    }
    gateway.shutdown().await;
}

async fn restore_verified(gate: &Arc<AdmissionGate>, path: &PathBuf, config: &Config) {
    if !path.exists() {
        return;
    }
    match VerifiedStore::load(path, config.max_verified_entries, config.verified_ttl_secs) {
        Ok(store) => {
            for (ip, uuid) in store.iter() {
                gate.insert_verified(ip, uuid, "").await;
            }
        }
        Err(e) => warn!("Could not load verified store {}: {}", path.display(), e),
    }
}
