use std::io::{BufRead, Write};

use crate::notices::{Notice, NoticeLevel};

/// The interactive surface: everything the user sees or answers goes
/// through here, on the interactive thread only.
pub trait Frontend {
    fn notify(&mut self, notice: Notice);

    /// Ask a yes/no question. Returning `false` means "no" or "could not ask".
    fn confirm(&mut self, question: &str) -> bool;

    /// Report download progress. Frontends without a progress display may
    /// ignore it.
    fn progress(&mut self, _downloaded: u64, _total: Option<u64>) {}
}

/// Terminal frontend used by the `copy2` binary.
pub struct ConsoleFrontend {
    assume_yes: bool,
    last_step: Option<u64>,
}

impl ConsoleFrontend {
    pub fn new(assume_yes: bool) -> Self {
        Self {
            assume_yes,
            last_step: None,
        }
    }
}

impl Frontend for ConsoleFrontend {
    fn notify(&mut self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => println!("{}", notice.text),
            NoticeLevel::Warning => eprintln!("warning: {}", notice.text),
            NoticeLevel::Error => eprintln!("error: {}", notice.text),
        }
    }

    fn confirm(&mut self, question: &str) -> bool {
        if self.assume_yes {
            println!("{question} [y/N] y");
            return true;
        }

        print!("{question} [y/N] ");
        let _ = std::io::stdout().flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    fn progress(&mut self, downloaded: u64, total: Option<u64>) {
        let Some(total) = total.filter(|total| *total > 0) else {
            return;
        };
        let step = downloaded.saturating_mul(10) / total;
        if self.last_step != Some(step) {
            self.last_step = Some(step);
            eprintln!("downloading: {}%", step.min(10) * 10);
        }
    }
}
