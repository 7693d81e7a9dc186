//! Removes copy2's data, settings and cache, and optionally its executables.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use copy2_core::write_cleanup_script;
use copy2_platform::{AppPaths, current_executable, executable_file_name};
use log::{LevelFilter, error, info, warn};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

#[derive(Debug, Parser)]
#[command(name = "copy2-uninstall")]
#[command(version, about = "Remove copy2 and everything it stored")]
struct Cli {
    /// Do not ask for confirmation
    #[arg(long, short)]
    yes: bool,

    /// Also delete the copy2 executables once this program exits
    #[arg(long)]
    remove_binaries: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    let paths = match AppPaths::new() {
        Ok(paths) => paths,
        Err(error) => {
            error!("{error}");
            return ExitCode::FAILURE;
        }
    };
    let dirs = paths.distinct_dirs();

    println!("This removes your copy2 history, favorites, tags and settings:");
    for dir in &dirs {
        println!("  {}", dir.display());
    }
    if !cli.yes && !confirm("Continue?") {
        println!("Nothing was removed.");
        return ExitCode::SUCCESS;
    }

    let mut failed = false;
    for dir in &dirs {
        match remove_dir(dir) {
            Ok(true) => info!("Removed {}", dir.display()),
            Ok(false) => {}
            Err(error) => {
                error!("Could not remove {}: {error}", dir.display());
                failed = true;
            }
        }
    }

    if cli.remove_binaries {
        schedule_binary_removal();
    }

    if failed {
        ExitCode::FAILURE
    } else {
        println!("copy2 data removed.");
        ExitCode::SUCCESS
    }
}

fn confirm(question: &str) -> bool {
    print!("{question} [y/N] ");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// `Ok(false)` when there was nothing to remove.
fn remove_dir(dir: &Path) -> std::io::Result<bool> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

/// A running executable cannot delete itself, so deletion is left to a
/// script that waits for this process to exit.
fn schedule_binary_removal() {
    let Ok(executable) = current_executable() else {
        warn!("Could not locate the installed executables");
        return;
    };
    let Some(install_dir) = executable.parent() else {
        return;
    };

    let binaries = installed_binaries(install_dir);
    if binaries.is_empty() {
        return;
    }

    match write_cleanup_script(&binaries, &std::env::temp_dir()).and_then(|script| script.launch()) {
        Ok(()) => info!("Executables in {} will be removed", install_dir.display()),
        Err(error) => warn!("Could not schedule executable removal: {error}"),
    }
}

fn installed_binaries(install_dir: &Path) -> Vec<PathBuf> {
    ["copy2", "copy2-uninstall"]
        .into_iter()
        .map(|stem| install_dir.join(executable_file_name(stem)))
        .filter(|path| path.is_file())
        .collect()
}
