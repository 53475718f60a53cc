//! Ember GW - control-surface bridge for Ember+ devices
//!
//! Runs one bridge instance against a console host, driven from a REPL.

use anyhow::{bail, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ember_gw::cli::{spawn_reader, Repl};
use ember_gw::config::watcher::{ConfigChange, ConfigWatcher, DEFAULT_DEBOUNCE};
use ember_gw::config::GatewayConfig;
use ember_gw::ember::SimulatedProvider;
use ember_gw::host::console::ConsoleHost;
use ember_gw::EmberInstance;

/// Ember GW - Bridge Ember+ parameters and matrices to a control surface
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write daily-rolling log files into this directory
    #[arg(long, env = "LOG_DIR")]
    log_dir: Option<String>,

    /// Serve the device tree from the config's `simulation` section
    #[arg(long)]
    simulate: bool,

    /// Print the config file JSON schema and exit
    #[arg(long)]
    print_schema: bool,

    /// Run without the interactive prompt
    #[arg(long)]
    no_repl: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if args.print_schema {
        println!("{}", GatewayConfig::json_schema()?);
        return Ok(());
    }

    let _log_guard = init_logging(&args.log_level, args.log_dir.as_deref())?;

    info!("Starting Ember GW v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    if !args.simulate {
        bail!("No Ember+ wire client is built into this binary; run with --simulate");
    }

    // Load configuration with hot-reload watcher
    let (config_watcher, initial_config) =
        ConfigWatcher::new(args.config.clone(), DEFAULT_DEBOUNCE).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    let elements = initial_config
        .simulation
        .as_ref()
        .map(|s| s.elements.clone())
        .unwrap_or_default();
    info!("🧪 Simulated provider with {} element(s)", elements.len());
    let provider = SimulatedProvider::with_elements(elements);

    let host = Arc::new(ConsoleHost::new("console"));
    let instance = EmberInstance::new(
        initial_config.instance.clone(),
        host.clone(),
        Arc::new(provider),
    );
    instance.init();

    let repl = Repl::new(host, initial_config.saved.clone());
    let lines = if args.no_repl {
        None
    } else {
        Some(spawn_reader("ember> ")?)
    };

    run_app(&instance, repl, lines, config_watcher, shutdown_signal()).await;

    info!("Shutting down...");
    instance.flush_updates().await;
    instance.destroy();
    info!("Ember GW shutdown complete");
    Ok(())
}

async fn run_app(
    instance: &EmberInstance,
    mut repl: Repl,
    mut lines: Option<mpsc::UnboundedReceiver<String>>,
    mut config_watcher: ConfigWatcher,
    shutdown: impl std::future::Future<Output = ()>,
) {
    info!("Starting main application loop...");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(line) = next_line(&mut lines) => {
                if !repl.handle_line(instance, &line).await {
                    info!("Quit requested from the prompt");
                    break;
                }
            }

            // Handle config reload
            Some(change) = config_watcher.next_change() => match change {
                ConfigChange::Instance(config) => {
                    info!("📝 Instance settings changed, reconfiguring...");
                    instance.update_config(config.instance);
                    repl.set_saved(config.saved);
                    info!("✅ Configuration reloaded");
                },
                ConfigChange::Saved(config) => {
                    info!("📝 Saved actions/feedbacks updated");
                    repl.set_saved(config.saved);
                },
            },

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }
}

/// Next prompt line; never resolves when the prompt is disabled
async fn next_line(lines: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match lines {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn init_logging(
    level: &str,
    log_dir: Option<&str>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ember-gw.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}
