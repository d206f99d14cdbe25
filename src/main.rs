//! Rover - auto-login client for campus captive portals
//!
//! Authenticates every local address of every configured interface against
//! a JSON login portal, retrying and bouncing the link when signin keeps
//! failing.

mod config;
mod crypto;
mod dial;
mod error;
mod http;
mod link;
mod models;
mod net;
mod online;
mod parser;
mod portal;
mod shutdown;

use anyhow::Result;
use clap::Parser;
use config::Config;
use dial::{DialOutcome, DialPolicy, Dialer};
use link::IpLink;
use models::Account;
use online::{IcmpProbe, OnlineProber};
use portal::NuistPortal;
use shutdown::{Shutdown, ShutdownTrigger};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rover")]
#[command(about = "Campus Captive Portal Auto Login Client", long_about = None)]
struct Args {
    /// Config file path (default: config.toml, then /etc/rover/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run in daemon mode (re-dial periodically)
    #[arg(short, long)]
    daemon: bool,

    /// Retry failed signins at least once
    #[arg(long)]
    retry: bool,

    /// Log level, overrides the config file
    #[arg(short, long)]
    verbose: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut cfg = Config::load(args.config.as_deref())?;
    if args.retry {
        cfg.global.retry = cfg.global.retry.max(1);
    }

    // Initialize logging
    let level = args.verbose.clone().unwrap_or_else(|| cfg.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Rover v{} - Campus Portal Auto Login", env!("CARGO_PKG_VERSION"));

    if cfg.global.server_url.is_empty() {
        tracing::warn!("Server url has empty value");
    }
    if cfg.accounts.is_empty() {
        tracing::warn!("No accounts configured! Add [accounts.<interface>] sections to the config");
    }
    tracing::info!("Loaded {} account(s)", cfg.accounts.len());

    let cfg = Arc::new(cfg);
    let (trigger, shutdown) = Shutdown::new();
    let signals = tokio::spawn(forward_shutdown_signal(trigger));

    if args.daemon {
        run_daemon(cfg, &shutdown).await;
    } else {
        dial_all(cfg, &shutdown).await;
    }

    signals.abort();
    Ok(())
}

async fn forward_shutdown_signal(trigger: ShutdownTrigger) {
    wait_for_shutdown_signal().await;
    tracing::info!("Shutdown requested, cancelling in-flight dials");
    trigger.cancel();
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            return;
        }
    }

    let _ = tokio::signal::ctrl_c().await;
}

/// Run in daemon mode - dial every account, then again every check interval
async fn run_daemon(cfg: Arc<Config>, shutdown: &Shutdown) {
    tracing::info!("Starting daemon mode...");
    tracing::info!("Check interval: {}s", cfg.global.check_interval);

    loop {
        dial_all(cfg.clone(), shutdown).await;

        tokio::select! {
            _ = tokio::time::sleep(cfg.global.check_interval()) => {}
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Dial every (interface, account) pair in parallel; one pair failing never
/// affects the others.
async fn dial_all(cfg: Arc<Config>, shutdown: &Shutdown) {
    let mut dials = JoinSet::new();
    for (interface, account) in &cfg.accounts {
        let cfg = cfg.clone();
        let interface = interface.clone();
        let account = account.clone();
        let shutdown = shutdown.clone();
        dials.spawn(async move { dial_interface(&cfg, &interface, &account, &shutdown).await });
    }

    while let Some(joined) = dials.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Dial task failed: {}", e);
        }
    }
}

async fn dial_interface(cfg: &Config, interface: &str, account: &Account, shutdown: &Shutdown) {
    let portal = match NuistPortal::new(&cfg.global.server_url, interface, &cfg.http) {
        Ok(portal) => portal,
        Err(e) => {
            tracing::error!("Cannot dial via {}: {}", interface, e);
            return;
        }
    };
    tracing::debug!(
        "[{}] Dialing {} from {:?}",
        interface,
        account.username,
        portal.addresses().collect::<Vec<_>>()
    );

    let ping = IcmpProbe;
    let link = IpLink;
    let dialer = Dialer {
        interface,
        portal: &portal,
        prober: cfg
            .online_check
            .enabled
            .then(|| OnlineProber::new(&cfg.online_check, &portal, &ping)),
        link: &link,
        policy: DialPolicy::from(&cfg.global),
    };

    match dialer.dial(account, shutdown).await {
        Ok(DialOutcome::Exhausted { trials, link_restarted }) => tracing::error!(
            "Giving up on {} after {} trial(s){}",
            interface,
            trials,
            if link_restarted { ", link restarted" } else { "" }
        ),
        Ok(DialOutcome::Cancelled) => tracing::info!("Dial on {} cancelled", interface),
        Ok(_) => {}
        Err(e) => tracing::error!("Dial on {} failed: {}", interface, e),
    }
}
