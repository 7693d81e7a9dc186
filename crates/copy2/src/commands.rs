use std::process::ExitCode;

use clap::CommandFactory;
use copy2_core::auto_update::cleanup_stale_sessions;
use copy2_core::last_outcome;
use copy2_platform::AppPaths;
use copy2_store::{AddOutcome, Entry, Protection};
use log::{debug, info};

use crate::app::{App, UpdatePhase};
use crate::cli::{Cli, Command, ConfigCommand, UpdateCommand};
use crate::error::AppError;
use crate::frontend::ConsoleFrontend;
use crate::settings::AppSettings;
use crate::single_instance::SingleInstance;

const PREVIEW_CHARS: usize = 72;

pub fn run(cli: Cli, paths: AppPaths, settings: AppSettings) -> Result<ExitCode, AppError> {
    if cli.self_test {
        return Ok(ExitCode::SUCCESS);
    }
    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        return Ok(ExitCode::SUCCESS);
    };

    let _instance = if command.mutates() {
        let instance = SingleInstance::acquire(&paths)
            .map_err(|error| AppError::message(error.to_string()))?;
        // Staging directories of a running session are only safe to remove
        // while the lock is held.
        let removed = cleanup_stale_sessions(&paths.cache_dir);
        if removed > 0 {
            debug!("Removed {removed} stale update directories");
        }
        Some(instance)
    } else {
        None
    };

    let update_command = matches!(command, Command::Update(_));
    let assume_yes = matches!(command, Command::Update(UpdateCommand::Check { yes: true }));
    let check_on_start = settings.check_updates_on_start && !matches!(command, Command::Update(_));
    let mut app = App::new(paths, settings, Box::new(ConsoleFrontend::new(assume_yes)))?;

    if check_on_start {
        app.check_for_update(false);
    }
    execute(&mut app, command)?;
    app.run_until_idle();

    if app.should_exit() {
        info!("Exiting for update");
    }
    Ok(if update_failed(update_command, &app.update_phase) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// A failed start-up check in the background has already been shown as a
/// notice; it only decides the exit status of `update` commands.
fn update_failed(update_command: bool, phase: &UpdatePhase) -> bool {
    update_command && matches!(phase, UpdatePhase::Failed(_))
}

fn execute(app: &mut App, command: Command) -> Result<(), AppError> {
    match command {
        Command::Add { text } => match app.capture(&text)? {
            AddOutcome::Added { evicted } => {
                println!("Saved as #{}.", app.store.len());
                if !evicted.is_empty() {
                    println!("Dropped {} old entries.", evicted.len());
                }
            }
            AddOutcome::Promoted => println!("Already saved; moved to #{}.", app.store.len()),
            AddOutcome::AlreadyLatest => println!("Already the latest entry."),
            AddOutcome::Empty => println!("Nothing to save."),
            AddOutcome::BlockedByProtection => {}
        },
        Command::List => {
            if app.store.is_empty() {
                println!("History is empty.");
            }
            for (index, entry) in app.store.iter().enumerate() {
                println!("{}", format_entry(index + 1, entry));
            }
        }
        Command::Remove { position } => {
            let removed = app.remove_entry(position)?;
            println!("Removed #{position}: {}", preview(&removed));
        }
        Command::Favorite { position, off } => {
            app.set_protection(position, Protection::Favorite, !off)?;
        }
        Command::Pin { position, off } => {
            app.set_protection(position, Protection::Pinned, !off)?;
        }
        Command::Tag {
            position,
            name,
            off,
        } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::message("Tag name cannot be empty"));
            }
            app.set_protection(position, Protection::Tag(name), !off)?;
        }
        Command::Search { query } => {
            let positions = app.search(&query);
            if positions.is_empty() {
                println!("No matches.");
            }
            for position in positions {
                if let Some(entry) = app.store.get(position - 1) {
                    println!("{}", format_entry(position, entry));
                }
            }
        }
        Command::Combine { positions } => match app.combine(&positions) {
            Some(combined) => println!("{combined}"),
            None => return Err(AppError::message("None of those entries exist")),
        },
        Command::Clear => {
            let removed = app.clear_history()?;
            println!(
                "Removed {removed} entries; {} protected entries kept.",
                app.store.len()
            );
        }
        Command::Export { path } => {
            app.export_history(&path)?;
            println!("Exported {} entries to {}.", app.store.len(), path.display());
        }
        Command::Import { path } => {
            let report = app.import_history(&path)?;
            println!(
                "Imported {} entries; history now holds {}.",
                report.imported,
                app.store.len()
            );
        }
        Command::Config(config) => configure(app, config)?,
        Command::Update(UpdateCommand::Check { .. }) => app.check_for_update(true),
        Command::Update(UpdateCommand::Status) => {
            println!("copy2 {}", app.build().version);
            match last_outcome(&app.paths.update_log_file()) {
                Some(outcome) => println!("Last update: {outcome}"),
                None => println!("No update has been installed yet."),
            }
        }
    }
    Ok(())
}

fn configure(app: &mut App, command: ConfigCommand) -> Result<(), AppError> {
    match command {
        ConfigCommand::Show => {
            let rendered = serde_json::to_string_pretty(&app.settings)
                .map_err(|error| AppError::settings_failed("show", error))?;
            println!("{rendered}");
        }
        ConfigCommand::SetMaxHistory { value } => {
            let report = app.apply_settings(AppSettings {
                max_history: value,
                ..app.settings.clone()
            })?;
            println!("Max history is {}.", report.capacity.soft());
            if !report.evicted.is_empty() {
                println!("Dropped {} old entries.", report.evicted.len());
            }
        }
        ConfigCommand::SessionOnly { enabled } => {
            app.apply_settings(AppSettings {
                session_only: enabled,
                ..app.settings.clone()
            })?;
            if enabled {
                println!("History changes are no longer saved.");
            } else {
                println!("History changes are saved again.");
            }
        }
    }
    Ok(())
}

fn format_entry(position: usize, entry: &Entry) -> String {
    let flags = entry.flags();
    let mut markers = String::new();
    if flags.favorite {
        markers.push('*');
    }
    if flags.pinned {
        markers.push('^');
    }
    let tags = if flags.tags.is_empty() {
        String::new()
    } else {
        let names: Vec<&str> = flags.tags.iter().map(String::as_str).collect();
        format!(" [{}]", names.join(", "))
    };
    format!("{position:>3}{markers:<2} {}{tags}", preview(entry.content()))
}

/// First line of `content`, shortened for one-line display.
fn preview(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or_default();
    let mut shown: String = first_line.chars().take(PREVIEW_CHARS).collect();
    if first_line.chars().count() > PREVIEW_CHARS || content.lines().nth(1).is_some() {
        shown.push_str("...");
    }
    shown
}
