use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use copy2_platform::AppPaths;
use log::LevelFilter;
#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, SharedLogger, WriteLogger};

/// Append-only log file that is reopened when something deletes it
/// underneath a running process.
struct ReopeningLog {
    path: PathBuf,
    file: File,
}

impl ReopeningLog {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = append_to(&path)?;
        Ok(Self { path, file })
    }

    fn reopen_if_missing(&mut self) -> io::Result<()> {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            self.file = append_to(&self.path)?;
        }
        Ok(())
    }
}

fn append_to(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for ReopeningLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.reopen_if_missing()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Offset of the first full line in the second half of `contents`.
fn recent_half_start(contents: &[u8]) -> usize {
    let middle = contents.len() / 2;
    contents[middle..]
        .iter()
        .position(|&byte| byte == b'\n')
        .map_or(middle, |newline| middle + newline + 1)
}

fn shrink_log(log_path: &Path, max_bytes: u64) {
    let oversized = std::fs::metadata(log_path).is_ok_and(|metadata| metadata.len() > max_bytes);
    if !oversized {
        return;
    }
    if let Ok(contents) = std::fs::read(log_path) {
        let start = recent_half_start(&contents);
        let _ = std::fs::write(log_path, &contents[start..]);
    }
}

/// Route `log` output to `debug.log` in the data directory, plus stderr in
/// debug builds. Logging problems never stop the program.
pub fn init_logging(paths: &AppPaths, debug_enabled: bool, max_log_size: u64) {
    let _ = paths.ensure_dirs();
    let log_path = paths.log_file();
    shrink_log(&log_path, max_log_size);

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("copy2")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    #[cfg(debug_assertions)]
    loggers.push(TermLogger::new(
        LevelFilter::Debug,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ));
    match ReopeningLog::open(log_path.clone()) {
        Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, config, file)),
        Err(error) => eprintln!("warning: cannot write {}: {error}", log_path.display()),
    }
    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }

    set_debug_logging(debug_enabled);
    log::debug!("Logging to {}", log_path.display());
}

pub fn set_debug_logging(enabled: bool) {
    log::set_max_level(if enabled {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::{ReopeningLog, recent_half_start, set_debug_logging, shrink_log};

    #[test]
    fn deleted_log_is_recreated_on_next_write() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("debug.log");
        let mut log = ReopeningLog::open(log_path.clone()).expect("log file should open");

        log.write_all(b"captured 3 entries\n")
            .expect("first write should succeed");
        std::fs::remove_file(&log_path).expect("log file should be removable");
        log.write_all(b"update check started\n")
            .expect("write after deletion should succeed");

        let contents = std::fs::read_to_string(&log_path).expect("log file should be readable");
        assert_eq!(contents, "update check started\n");
    }

    #[test]
    fn recent_half_starts_on_a_line_boundary() {
        assert_eq!(recent_half_start(b"aaaa\nbbbb\ncccc\n"), 10);
        assert_eq!(recent_half_start(b"no newline at all"), 8);
    }

    #[test]
    fn oversized_log_keeps_newest_lines() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("debug.log");
        std::fs::write(&log_path, "one\ntwo\nthree\nfour\nfive\nsix\n")
            .expect("log file should be written");

        shrink_log(&log_path, 8);

        let kept = std::fs::read_to_string(&log_path).expect("log file should be readable");
        assert!(kept.ends_with("six\n"));
        assert!(!kept.contains("one"));
        assert!(kept.lines().all(|line| !line.is_empty()));
    }

    #[test]
    fn log_within_limit_is_untouched() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("debug.log");
        std::fs::write(&log_path, "one\n").expect("log file should be written");

        shrink_log(&log_path, 1024);

        let kept = std::fs::read_to_string(&log_path).expect("log file should be readable");
        assert_eq!(kept, "one\n");
    }

    #[test]
    fn debug_toggle_switches_between_debug_and_info() {
        set_debug_logging(true);
        assert_eq!(log::max_level(), log::LevelFilter::Debug);

        set_debug_logging(false);
        assert_eq!(log::max_level(), log::LevelFilter::Info);
    }
}
