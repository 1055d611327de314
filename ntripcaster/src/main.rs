mod console;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ntripcaster_relay::bootstrap::{build_context, load_config, load_relays};
use ntripcaster_relay::logging::init_logging;
use ntripcaster_relay::{CasterContext, RelayScheduler};

#[derive(Parser, Debug)]
#[command(name = "ntripcaster")]
#[command(about = "NTRIP caster with pull relays", long_about = None)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level, overrides logging.level
    #[arg(long, env = "NTRIPCASTER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Do not read admin commands from stdin
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Configuration
    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // 2. Logging
    init_logging(&config.logging)?;
    info!(product = %config.caster.product, "NtripCaster starting...");

    // 3. Caster context and configured relays
    let (ctx, sources) = build_context(&config)?;
    load_relays(&ctx, &config);

    // 4. Background tasks
    let shutdown = CancellationToken::new();
    let scheduler = tokio::spawn(RelayScheduler::new(Arc::clone(&ctx)).run(shutdown.clone()));

    #[cfg(unix)]
    spawn_rehash_on_hangup(Arc::clone(&ctx), args.config.clone(), shutdown.clone());

    if !args.no_console {
        tokio::spawn(console::run(
            Arc::clone(&ctx),
            sources,
            args.config.clone(),
            shutdown.clone(),
        ));
    }

    tokio::select! {
        () = shutdown_signal() => {}
        () = shutdown.cancelled() => { info!("Shutdown requested from console"); }
    }

    // 5. Shutdown
    shutdown.cancel();
    if let Err(e) = scheduler.await {
        error!("Relay scheduler task failed: {}", e);
    }
    close_live_relays(&ctx);
    info!("NtripCaster stopped");
    Ok(())
}

fn close_live_relays(ctx: &CasterContext) {
    for relay in ctx.registry.list() {
        if let Some(ref connection) = relay.connection {
            info!(relay = %relay.key(), "Closing relay connection");
            connection.close();
        }
    }
}

/// Reload the configuration whenever SIGHUP arrives.
#[cfg(unix)]
fn spawn_rehash_on_hangup(
    ctx: Arc<CasterContext>,
    config_path: Option<String>,
    shutdown: CancellationToken,
) {
    use ntripcaster_relay::bootstrap::rehash;
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to install SIGHUP handler: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                received = hangup.recv() => {
                    if received.is_none() {
                        return;
                    }
                    info!("Received SIGHUP, reloading configuration");
                    if let Err(e) = rehash(&ctx, config_path.as_deref()) {
                        error!("Rehash failed: {:#}", e);
                    }
                }
            }
        }
    });
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
