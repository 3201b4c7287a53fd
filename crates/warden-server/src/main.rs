use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use warden_server::{logging, McpServer};
use warden_types::{apply_safe_local_preset, Config};

/// MCP server supervising codex CLI sessions.
#[derive(Debug, Parser)]
#[command(name = "warden", version)]
struct Cli {
    /// Path to config file (optional). Can also be set via CODEX_MCP_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable safer defaults for local usage (read-only default sandbox,
    /// disable yolo, restrict work dirs to $HOME unless overridden). Can
    /// also be set via CODEX_SAFE_LOCAL=true.
    #[arg(long)]
    safe_local: bool,

    /// Comma-separated allowed workdir prefixes when --safe-local is
    /// enabled. Can also be set via CODEX_SAFE_LOCAL_ROOT.
    #[arg(long)]
    safe_local_root: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| env_path("CODEX_MCP_CONFIG"));
    let mut config = match Config::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            return ExitCode::FAILURE;
        }
    };

    let safe_local = cli.safe_local || env_bool("CODEX_SAFE_LOCAL");
    let safe_local_root = cli
        .safe_local_root
        .or_else(|| env_string("CODEX_SAFE_LOCAL_ROOT"));
    if safe_local {
        apply_safe_local_preset(&mut config, safe_local_root.as_deref());
        if let Err(err) = config.validate() {
            eprintln!("Failed to apply safe-local preset: {err}");
            return ExitCode::FAILURE;
        }
    }

    if let Err(err) = logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    info!(
        server_name = %config.server.name,
        server_version = %config.server.version,
        "starting mcp server"
    );
    if safe_local {
        info!(
            allowed_work_dirs = ?config.security.allowed_work_dirs,
            disable_yolo = config.security.disable_yolo,
            default_sandbox = %config.security.default_sandbox,
            "safe-local preset enabled"
        );
    }

    let shutdown = CancellationToken::new();
    let server = McpServer::new(config, shutdown);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    match server.run(stdin, tokio::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server stopped with error");
            eprintln!("Error running server: {err}");
            ExitCode::FAILURE
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_bool(key: &str) -> bool {
    env_string(key)
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false)
}
