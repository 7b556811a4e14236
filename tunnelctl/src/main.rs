mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use shared_utils::config::{Config, ConfigManager};
use shared_utils::logging::{init_logging, LogOptions};
use std::process::ExitCode;
use tracing::{debug, error};
use tunnel_engine::EngineError;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(Config::default_path);

    // Logging is configured from the file, so the configuration comes first.
    let loaded = ConfigManager::load_or_default(&path);
    let base = loaded
        .as_ref()
        .map(|manager| LogOptions::from_config(manager.config()))
        .unwrap_or_default();

    let _guard = init_logging(LogOptions {
        level: cli.level(base.level),
        json_format: cli.json_logs || base.json_format,
        ..base
    });

    let manager = match loaded {
        Ok(manager) => manager,
        Err(err) => {
            error!("Failed to load configuration from {}: {}", path.display(), err);
            return ExitCode::from(2);
        }
    };
    debug!("Loaded configuration from {}", manager.config_path().display());

    if cli.needs_root() && !nix::unistd::geteuid().is_root() {
        error!("You need to be root to run this command!");
        return ExitCode::from(2);
    }

    match commands::run(cli.command, manager.config()) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);

            match err.downcast_ref::<EngineError>() {
                Some(engine) => {
                    debug!("Error kind: {}", engine.kind());
                    commands::exit_code(engine)
                }
                None => ExitCode::from(2),
            }
        }
    }
}
