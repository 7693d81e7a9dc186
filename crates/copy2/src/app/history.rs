use std::path::Path;

use copy2_store::{AddOutcome, ImportReport, Protection, read_export, write_export};
use log::{debug, info, warn};

use crate::error::AppError;
use crate::notices::RepeatingWarning;

use super::App;

impl App {
    /// Store captured text. A full store of protected entries is an outcome,
    /// reported once per session, not an error.
    pub fn capture(&mut self, text: &str) -> Result<AddOutcome, AppError> {
        let outcome = self.store.add(text);
        match &outcome {
            AddOutcome::BlockedByProtection => {
                warn!("Capture dropped: protected entries fill the history");
                self.warn_once(
                    RepeatingWarning::CaptureBlocked,
                    "History is full of favorite, pinned or tagged entries, so new text was not saved. \
                     Unprotect an entry or raise max history.",
                );
            }
            AddOutcome::Added { evicted } if !evicted.is_empty() => {
                debug!("Evicted {} old entries", evicted.len());
            }
            _ => {}
        }

        if matches!(outcome, AddOutcome::Added { .. } | AddOutcome::Promoted) {
            self.persist_history()?;
        }
        Ok(outcome)
    }

    /// Remove the entry at 1-based `position`, dropping all its flags.
    pub fn remove_entry(&mut self, position: usize) -> Result<String, AppError> {
        let index = self.index_of(position)?;
        let entry = self
            .store
            .remove_at(index)
            .ok_or_else(|| AppError::entry_not_found(position))?;
        self.persist_history()?;
        Ok(entry.content().to_string())
    }

    pub fn set_protection(
        &mut self,
        position: usize,
        protection: Protection,
        value: bool,
    ) -> Result<(), AppError> {
        let index = self.index_of(position)?;
        let content = self
            .store
            .get(index)
            .map(|entry| entry.content().to_string())
            .ok_or_else(|| AppError::entry_not_found(position))?;

        if let Some(report) = self.store.set_protected(&content, protection, value)
            && !report.evicted.is_empty()
        {
            debug!(
                "Unprotecting made {} entries evictable",
                report.evicted.len()
            );
        }
        self.persist_history()
    }

    /// Explicit clear. Protected entries survive.
    pub fn clear_history(&mut self) -> Result<usize, AppError> {
        let removed = self.store.clear_unprotected();
        self.persist_history()?;
        Ok(removed)
    }

    /// 1-based positions of entries containing `query`, oldest first.
    pub fn search(&self, query: &str) -> Vec<usize> {
        self.store
            .search(query)
            .into_iter()
            .map(|index| index + 1)
            .collect()
    }

    /// Join the entries at 1-based `positions` with newlines. Positions out
    /// of range are skipped.
    pub fn combine(&self, positions: &[usize]) -> Option<String> {
        let indices: Vec<usize> = positions
            .iter()
            .filter_map(|position| position.checked_sub(1))
            .collect();
        self.store.combine(&indices)
    }

    pub fn export_history(&self, path: &Path) -> Result<(), AppError> {
        write_export(path, &self.store).map_err(|error| AppError::store_failed("export", error))?;
        info!("Exported {} entries to {}", self.store.len(), path.display());
        Ok(())
    }

    /// Merge an export document into the store. A malformed document is
    /// rejected whole and the store is left untouched.
    pub fn import_history(&mut self, path: &Path) -> Result<ImportReport, AppError> {
        let document =
            read_export(path).map_err(|error| AppError::store_failed("import", error))?;
        let report = self.store.import(&document.snapshot);
        let capacity = self.store.apply_capacity_change(self.store.capacity());
        self.report_capacity(&capacity);
        info!(
            "Imported {} entries from {} ({} evicted)",
            report.imported,
            path.display(),
            report.evicted.len()
        );
        self.persist_history()?;
        Ok(report)
    }

    /// Write the store to disk unless the session is memory-only.
    pub(crate) fn persist_history(&mut self) -> Result<(), AppError> {
        if self.settings.session_only {
            debug!("Session-only mode, history not written");
            return Ok(());
        }
        self.files
            .save(&self.store)
            .map_err(|error| AppError::store_failed("save", error))
    }

    fn index_of(&self, position: usize) -> Result<usize, AppError> {
        if position == 0 || position > self.store.len() {
            return Err(AppError::entry_not_found(position));
        }
        Ok(position - 1)
    }
}
