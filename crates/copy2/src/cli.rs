use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "copy2")]
#[command(version, about = "Clipboard history with favorites, pins and tags")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Exit immediately with success. Used by the installer to check a new build.
    #[arg(long = "self-test", hide = true)]
    pub self_test: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture text into the history
    Add {
        /// Text to store
        text: String,
    },

    /// Show the history, oldest first
    List,

    /// Delete an entry
    Remove {
        /// Entry number from `list`
        position: usize,
    },

    /// Mark an entry as favorite, protecting it from eviction
    Favorite {
        /// Entry number from `list`
        position: usize,

        /// Remove the mark instead
        #[arg(long)]
        off: bool,
    },

    /// Pin an entry, protecting it from eviction
    Pin {
        /// Entry number from `list`
        position: usize,

        /// Remove the pin instead
        #[arg(long)]
        off: bool,
    },

    /// Tag an entry, protecting it from eviction
    Tag {
        /// Entry number from `list`
        position: usize,

        /// Tag name
        name: String,

        /// Remove the tag instead
        #[arg(long)]
        off: bool,
    },

    /// Find entries containing text, ignoring case
    Search {
        query: String,
    },

    /// Print several entries joined by newlines
    Combine {
        /// Entry numbers from `list`, in output order
        #[arg(required = true)]
        positions: Vec<usize>,
    },

    /// Remove every entry that is not protected
    Clear,

    /// Write the history to a JSON file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Merge a JSON export into the history
    Import {
        /// Input file path
        path: PathBuf,
    },

    /// Show or change settings
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Check for and install new releases
    #[command(subcommand)]
    Update(UpdateCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the current settings
    Show,

    /// Change how many entries the history keeps (5 to 500)
    SetMaxHistory {
        value: usize,
    },

    /// Keep the history in memory only
    SessionOnly {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum UpdateCommand {
    /// Look for a newer release and offer to install it
    Check {
        /// Install without asking
        #[arg(long, short)]
        yes: bool,
    },

    /// Show the result of the last installed update
    Status,
}

impl Command {
    /// Commands that only read may run next to another instance.
    pub fn mutates(&self) -> bool {
        !matches!(
            self,
            Self::List
                | Self::Search { .. }
                | Self::Combine { .. }
                | Self::Export { .. }
                | Self::Config(ConfigCommand::Show)
                | Self::Update(UpdateCommand::Status)
        )
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command, ConfigCommand, UpdateCommand};

    #[test]
    fn parses_protection_toggles() {
        let cli = Cli::try_parse_from(["copy2", "tag", "3", "work", "--off"])
            .expect("tag command should parse");

        assert!(matches!(
            cli.command,
            Some(Command::Tag { position: 3, ref name, off: true }) if name == "work"
        ));
    }

    #[test]
    fn parses_session_only_value() {
        let cli = Cli::try_parse_from(["copy2", "config", "session-only", "false"])
            .expect("config command should parse");

        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::SessionOnly { enabled: false }))
        ));
    }

    #[test]
    fn self_test_flag_is_accepted_without_command() {
        let cli = Cli::try_parse_from(["copy2", "--self-test"]).expect("flag should parse");
        assert!(cli.self_test);
        assert!(cli.command.is_none());
    }

    #[test]
    fn read_only_commands_do_not_need_the_lock() {
        assert!(!Command::List.mutates());
        assert!(!Command::Update(UpdateCommand::Status).mutates());
        assert!(Command::Update(UpdateCommand::Check { yes: false }).mutates());
        assert!(Command::Clear.mutates());
    }

    #[test]
    fn combine_requires_positions() {
        assert!(Cli::try_parse_from(["copy2", "combine"]).is_err());
    }
}
