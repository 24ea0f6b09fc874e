use std::process::ExitCode;

use common::utils::logging::LogFormat;
use dotenvy::dotenv;
use tracing::{error, info};
use uuid::Uuid;

fn init_logging() {
    // .env first so RUST_LOG / LOG_FORMAT take effect
    dotenv().ok();
    let format = LogFormat::from_env();
    common::utils::logging::init_logging(format);
    info!(service = "hub", event = "logger_init", ?format, "tracing subscriber initialized");
}

/// `hub --generate-config [path]` writes the default configuration and exits.
fn generate_config(args: &[String]) -> Option<ExitCode> {
    let pos = args.iter().position(|a| a == "--generate-config")?;
    let path = args.get(pos + 1).map(String::as_str).unwrap_or("hub_config.toml");
    Some(match configs::write_default(path) {
        Ok(()) => {
            info!(service = "hub", event = "config_written", path, "default configuration written");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(service = "hub", event = "config_write_failed", path, error = %e, "failed to write configuration");
            ExitCode::FAILURE
        }
    })
}

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    if let Some(code) = generate_config(&args) {
        return code;
    }

    let instance_id = Uuid::new_v4();
    let pid = std::process::id();
    let version = env!("CARGO_PKG_VERSION");

    std::panic::set_hook(Box::new(move |info| {
        error!(service = "hub", event = "panic", %instance_id, pid, message = %info, "unhandled panic occurred");
    }));

    let cfg = match configs::AppConfig::load_and_validate() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(service = "hub", event = "config_invalid", error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    // Every task (API server, service startup, periodic jobs) shares one thread.
    if let Some(threads) = cfg.server.worker_threads {
        info!(service = "hub", threads, "server.worker_threads ignored by the single-threaded runtime");
    }
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(service = "hub", event = "runtime_build_failed", error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    info!(service = "hub", event = "start", %instance_id, pid, version, services = cfg.services.len(), "hub starting");

    rt.block_on(async move {
        match server::run(cfg).await {
            Ok(()) => {
                info!(service = "hub", event = "stop", %instance_id, pid, "hub stopped normally");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(service = "hub", event = "run_failed", error = %e, "hub exited with error");
                ExitCode::FAILURE
            }
        }
    })
}
