use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use rand::{Rng, distributions::Alphanumeric};
use shibgate::{AppState, auth::SessionStore, build_app, config::ShibgateConfig, observability};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

const DEFAULT_CONFIG_PATH: &str = "shibgate.toml";

/// Length of the generated token signing secret.
const GENERATED_SECRET_LEN: usize = 48;

/// CLI arguments for shibgate
#[derive(Parser, Debug)]
#[command(version, about = "Shibboleth attribute to session bridge", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./shibgate.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the server (default)
    Serve,
    /// Load and validate the config file, then exit
    Check,
    /// Write a starter configuration file
    Init {
        /// Path to create the config file (defaults to ./shibgate.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Show enabled compile-time features
    Features,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Init { output, force }) => run_init(output, force),
        Some(Command::Check) => run_check(args.config.as_deref()),
        Some(Command::Features) => run_features(),
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}

fn resolve_config_path(explicit_path: Option<&str>) -> PathBuf {
    PathBuf::from(explicit_path.unwrap_or(DEFAULT_CONFIG_PATH))
}

fn load_config(explicit_path: Option<&str>) -> ShibgateConfig {
    let config_path = resolve_config_path(explicit_path);
    match ShibgateConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            if !config_path.exists() {
                eprintln!("Create one with: shibgate init");
            }
            std::process::exit(1);
        }
    }
}

/// Write a starter configuration file with a fresh token secret.
fn run_init(output: Option<String>, force: bool) {
    let output_path = PathBuf::from(output.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LEN)
        .map(char::from)
        .collect();

    if let Err(e) = std::fs::write(&output_path, ShibgateConfig::default_toml(&secret)) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("To start the bridge, run:");
    println!("  shibgate serve --config {}", output_path.display());
}

fn run_check(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);

    println!("Configuration OK");
    println!("  base_url:        {}", config.server.base_url);
    println!("  identifier:      {}", config.shibboleth.identifier);
    println!("  simple session:  {}", config.shibboleth.use_simple_session);
    println!("  add new users:   {}", config.shibboleth.add_new_users);
    println!(
        "  redirect suffix: {}",
        config
            .shibboleth
            .allowed_redirect_host
            .as_deref()
            .unwrap_or("(none)")
    );
    println!("  token handoff:   {}", config.token.enabled);
    println!("  emulated IdP:    {}", config.emulator.enabled);
}

fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        ("server", "Runtime", cfg!(feature = "server")),
        ("cli", "Runtime", cfg!(feature = "cli")),
        ("jwt", "Auth", cfg!(feature = "jwt")),
        ("emulator", "Development", cfg!(feature = "emulator")),
    ];

    let profile = if cfg!(feature = "full") {
        "full"
    } else if cfg!(feature = "tiny") {
        "tiny"
    } else {
        "custom"
    };

    println!("shibgate {} ({} profile)", version, profile);
    println!();
    println!("{:<12} {:<12} Enabled", "Feature", "Category");
    println!("{}", "-".repeat(32));
    for (name, category, enabled) in features {
        println!(
            "{:<12} {:<12} {}",
            name,
            category,
            if *enabled { "yes" } else { "no" }
        );
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let state = match AppState::new(config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    let task_tracker = TaskTracker::new();
    let shutdown = CancellationToken::new();
    task_tracker.spawn(session_cleanup(
        state.sessions.clone(),
        Duration::from_secs(state.config.session.cleanup_interval_secs),
        shutdown.clone(),
    ));

    let bind_addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = build_app(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(task_tracker, shutdown))
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Periodically drop expired sessions until cancelled.
async fn session_cleanup(
    sessions: Arc<dyn SessionStore>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
    // First tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                match sessions.cleanup().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Swept expired sessions"),
                    Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
                }
            }
        }
    }
}

async fn shutdown_signal(task_tracker: TaskTracker, shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, waiting for background tasks to complete...");

    shutdown.cancel();
    task_tracker.close();

    match tokio::time::timeout(Duration::from_secs(10), task_tracker.wait()).await {
        Ok(()) => tracing::info!("All background tasks completed"),
        Err(_) => {
            tracing::warn!("Timeout waiting for background tasks, some may not have completed")
        }
    }

    tracing::info!("Shutdown complete");
}
