use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::task::TaskTracker;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use supervisor::compose::run_compose;
use supervisor::config::SupervisorConfig;
use supervisor::docker::client::DockerCli;
use supervisor::reconcile::run_event_loop;
use supervisor::state::{AppState, SharedState};
use supervisor::web::route;

#[derive(Parser)]
#[command(name = "supervisor")]
#[command(about = "Watches container starts and relocates colliding host ports")]
#[command(version)]
struct Cli {
    /// Status UI port [default: 5000]
    #[arg(long = "port")]
    port: Option<u16>,

    /// Lower bound of the dynamic port range [default: 10000]
    #[arg(long = "min")]
    min: Option<u16>,

    /// Upper bound of the dynamic port range [default: 65000]
    #[arg(long = "max")]
    max: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-plan a compose descriptor and launch it conflict-free
    Compose {
        /// `[-f] <file> <compose args…>`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "supervisor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match SupervisorConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        config.ui_port = port;
    }
    if let Some(min) = cli.min {
        config.min_port = min;
    }
    if let Some(max) = cli.max {
        config.max_port = max;
    }
    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        std::process::exit(1);
    }

    let docker = Arc::new(DockerCli::new(&config.docker_bin, &config.compose_bin));
    let state = Arc::new(AppState::new(docker, config));

    // A runtime that cannot even list containers is fatal at startup;
    // mid-run failures are tolerated and retried by the event loop.
    if let Err(e) = state.store.refresh(state.docker.as_ref()).await {
        error!("cannot reach the container runtime: {}", e);
        std::process::exit(1);
    }
    info!(
        "tracking {} containers; dynamic range [{}, {}]",
        state.store.get_all().len(),
        state.config.min_port,
        state.config.max_port
    );

    match cli.command {
        Some(Commands::Compose { args }) => {
            let (file, rest) = match split_compose_args(&args) {
                Some(split) => split,
                None => {
                    error!("compose requires a descriptor path");
                    std::process::exit(1);
                }
            };
            match run_compose(&state, file, rest).await {
                Ok(code) => std::process::exit(code),
                Err(e) => {
                    error!("compose launch failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => run_supervisor(state).await,
    }
}

/// Long-running mode: event loop plus the read-only status surface.
async fn run_supervisor(state: SharedState) {
    let tracker = TaskTracker::new();
    tokio::spawn(run_event_loop(state.clone(), tracker.clone()));

    if let Err(e) = route::serve(state, shutdown_signal()).await {
        error!("status surface failed: {}", e);
        std::process::exit(1);
    }

    // Event workers already dispatched run to completion; nothing new is
    // spawned once the reader task dies with the runtime.
    info!("draining in-flight workers...");
    tracker.close();
    tracker.wait().await;
    info!("shutdown complete");
}

/// The descriptor path may be preceded by `-f`; everything after it goes to
/// docker-compose untouched.
fn split_compose_args(args: &[String]) -> Option<(&str, &[String])> {
    match args.first().map(String::as_str) {
        Some("-f") => args.get(1).map(|file| (file.as_str(), &args[2..])),
        Some(file) => Some((file, &args[1..])),
        None => None,
    }
}

/// Graceful shutdown on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
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
            info!("received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_compose_args_plain() {
        let args = vec!["stack.yml".to_string(), "up".to_string(), "-d".to_string()];
        let (file, rest) = split_compose_args(&args).unwrap();
        assert_eq!(file, "stack.yml");
        assert_eq!(rest, &args[1..]);
    }

    #[test]
    fn test_split_compose_args_with_flag() {
        let args = vec![
            "-f".to_string(),
            "stack.yml".to_string(),
            "up".to_string(),
        ];
        let (file, rest) = split_compose_args(&args).unwrap();
        assert_eq!(file, "stack.yml");
        assert_eq!(rest, &["up".to_string()]);
    }

    #[test]
    fn test_split_compose_args_empty() {
        assert!(split_compose_args(&[]).is_none());
        assert!(split_compose_args(&["-f".to_string()]).is_none());
    }
}
