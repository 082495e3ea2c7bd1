use clap::Parser;
mod archive;
mod commands;
mod error;
mod github;
mod process;
mod schedule;
mod settings;
mod sync;
mod system;
mod tag;
mod update;
mod utils;
use std::io::IsTerminal;
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)] // Command config
enum CliArgs {
    /// Show settings
    Settings,
    /// Check for a newer release and stage it locally
    Fetch(commands::FetchCommand),
    /// Swap an installation's files for a staged release
    Apply(commands::ApplyCommand),
}

fn main() {
    dotenv::from_path(".env").ok();
    // Initialize logger with default info level if RUST_LOG is not set
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    // run the application
    match run_app() {
        Ok(()) => {}
        Err(error::UpdError::ScheduleThrottled(remaining)) => {
            log::info!(
                "Skipping update check, next check allowed in {}s",
                remaining.as_secs()
            );
        }
        Err(err) => {
            log::error!("Error: {}", err);
            std::process::exit(1);
        }
    }
}

fn run_app() -> error::UpdResult<()> {
    // Read configuration file
    let config_name =
        std::env::var("UPDATR_CONFIG").unwrap_or_else(|_| "updatr.toml".to_string());
    let settings = settings::Settings::load(&config_name);

    let app = CliArgs::parse();
    match app {
        CliArgs::Settings => match serde_json::to_string_pretty(&settings) {
            Ok(pretty_settings) => {
                println!("{}", pretty_settings);
                Ok(())
            }
            Err(err) => Err(format!("Failed to serialize settings: {}", err).into()),
        },
        CliArgs::Fetch(fetch) => fetch.run(&settings),
        CliArgs::Apply(apply) => apply.run(&settings),
    }
}
