mod app;
mod cli;
mod pipeline;
mod provider;
mod refresh;
mod sampler;
mod settings;
mod smoothing;
mod state;
mod trace;
mod ui;

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false);
    match log_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Opening log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).with_ansi(false).try_init().ok();
        }
        None => {
            builder.try_init().ok();
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let result: Result<()> = init_logging(cli.log_file.as_deref()).and_then(|()| match cli.command {
        Some(Commands::Run(source)) => app::run_overlay(source),
        Some(Commands::Probe { source, count }) => app::run_probe(source, count),
        Some(Commands::Settings { settings, reset }) => app::show_settings(&settings, reset),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    });

    if let Err(err) = result {
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: settings file, 3: terminal/output io, 1: other
    for cause in err.chain() {
        if cause.is::<crate::settings::SettingsError>() {
            return 2;
        }
        if cause.is::<std::io::Error>() {
            return 3;
        }
    }
    1
}
