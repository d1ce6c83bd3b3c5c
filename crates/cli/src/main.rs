mod builtin;
mod config_commands;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    dbhq_common::TracingSink,
    dbhq_config::{DbhqConfig, Severity},
    dbhq_discord::BotRuntime,
    dbhq_dispatch::HandlerRegistry,
    dbhq_metrics::MetricsRecorderConfig,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "dbhq", about = "dbhq: Discord bot core", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching the standard locations.
    #[arg(long, global = true, env = "DBHQ_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and run the bot (default when no subcommand is given).
    Run,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn init_metrics(config: &DbhqConfig) -> anyhow::Result<()> {
    let listen = config
        .metrics
        .listen
        .as_deref()
        .map(str::parse::<SocketAddr>)
        .transpose()
        .context("metrics.listen is not a socket address")?;
    dbhq_metrics::init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        listen,
        global_labels: vec![("service".into(), "dbhq".into())],
    })?;
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

async fn run_bot(cli: &Cli) -> anyhow::Result<()> {
    let loaded = dbhq_config::discover_and_load(cli.config.as_deref())?;
    match &loaded.path {
        Some(path) => info!(path = %path.display(), "config loaded"),
        None => info!("running with default config"),
    }
    let config = loaded.config;

    let report = dbhq_config::validate(&config);
    for diagnostic in &report.diagnostics {
        match diagnostic.severity {
            Severity::Error => error!(path = %diagnostic.path, "{}", diagnostic.message),
            Severity::Warning => warn!(path = %diagnostic.path, "{}", diagnostic.message),
            Severity::Info => debug!(path = %diagnostic.path, "{}", diagnostic.message),
        }
    }
    if report.has_errors() {
        anyhow::bail!(
            "configuration has {} error(s); run `dbhq config check` for details",
            report.count(Severity::Error)
        );
    }

    init_metrics(&config)?;

    let registry = Arc::new(HandlerRegistry::new());
    builtin::register(&registry, &config.commands.prefix);

    let runtime = BotRuntime::new(config, registry, Arc::new(TracingSink))?;
    runtime.verify().await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    runtime.run(cancel).await?;
    info!("dbhq stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "dbhq starting");

    match cli.command {
        None | Some(Commands::Run) => run_bot(&cli).await,
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
    }
}
