mod app;
mod cli;
mod commands;
mod error;
mod frontend;
mod logging;
mod message;
mod notices;
mod settings;
mod single_instance;

use std::process::ExitCode;

use clap::Parser;
use copy2_core::SELF_TEST_FLAG;
use copy2_platform::AppPaths;
use log::{error, info};

use crate::cli::Cli;
use crate::settings::AppSettings;

fn main() -> ExitCode {
    // The installer runs the new binary with this flag before committing;
    // nothing may be initialised first.
    if std::env::args_os()
        .nth(1)
        .is_some_and(|arg| arg == SELF_TEST_FLAG)
    {
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();

    let paths = match AppPaths::new() {
        Ok(paths) => paths,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };
    let settings = AppSettings::load(&paths);
    logging::init_logging(&paths, settings.debug_logging, settings.max_log_size_bytes);
    info!("copy2 {} starting", env!("CARGO_PKG_VERSION"));

    match commands::run(cli, paths, settings) {
        Ok(code) => code,
        Err(error) => {
            error!("{error}");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
