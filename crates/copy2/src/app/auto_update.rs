//! Update orchestration: check, confirm, download and stage on the worker,
//! then flush local state and hand over to the installer script.
//!
//! Handles messages: `UpdateChecked`, `UpdateProgress`, `UpdatePrepared`

use std::sync::Arc;
use std::time::Duration;

use copy2_core::auto_update::{UpdateProgress, UpdateRequest, prepare_update};
use copy2_core::{AssetSelection, HelperScript, PayloadLayout, ReleaseInfo};
use log::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::Message;
use crate::notices::Notice;

use super::App;
use super::async_helpers::run_with_timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    Checking,
    UpToDate,
    /// Newer release without a usable download, or a build that cannot
    /// replace itself. Only the release page is offered.
    NoAssetAvailable(Box<ReleaseInfo>),
    UpdateAvailable(Box<ReleaseInfo>),
    Skipped,
    Downloading {
        downloaded: u64,
        total: Option<u64>,
    },
    Validating,
    Staging,
    Launching,
    Exiting,
    Failed(AppError),
}

impl UpdatePhase {
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Checking
                | Self::Downloading { .. }
                | Self::Validating
                | Self::Staging
                | Self::Launching
                | Self::Exiting
        )
    }
}

impl App {
    /// Ask the release source for the latest version on the worker. With
    /// `prompt_if_newer` the user is asked whether to install a newer
    /// release; otherwise availability is only reported.
    pub fn check_for_update(&mut self, prompt_if_newer: bool) {
        if self.update_phase.is_busy() {
            debug!("Update check skipped, update already in progress");
            return;
        }
        self.update_phase = UpdatePhase::Checking;

        let releases = Arc::clone(&self.releases);
        let timeout = Duration::from_secs(self.settings.http_timeout_secs);
        self.spawn(async move {
            let result = run_with_timeout(timeout, "Update check", releases.fetch_latest(), |error| {
                AppError::update_check_failed("App", error)
            })
            .await;
            Message::UpdateChecked {
                result: Box::new(result),
                prompt: prompt_if_newer,
            }
        });
    }

    pub(super) fn handle_update_checked(&mut self, result: Result<ReleaseInfo, AppError>, prompt: bool) {
        let info = match result {
            Ok(info) => info,
            Err(error) => {
                self.fail_update(error);
                return;
            }
        };

        let current = self.build.version;
        let latest = info.version_triple();
        if !latest.is_newer_than(current) {
            info!("copy2 {current} is up to date (latest release {})", info.version);
            self.update_phase = UpdatePhase::UpToDate;
            if prompt {
                self.notify(Notice::info(format!("copy2 {current} is up to date.")));
            }
            return;
        }

        if info.download.asset().is_none() {
            info!("Release {} has no downloadable build", info.version);
            self.notify(Notice::info(format!(
                "copy2 {latest} is available, but it has no download for this platform."
            )));
            if prompt {
                self.offer_release_page(&info);
            }
            self.update_phase = UpdatePhase::NoAssetAvailable(Box::new(info));
            return;
        }

        if !self.build.self_contained {
            info!("This build is not a standalone executable, offering the release page");
            self.notify(Notice::info(format!(
                "copy2 {latest} is available. This build cannot replace itself; download it from the release page."
            )));
            if prompt {
                self.offer_release_page(&info);
            }
            self.update_phase = UpdatePhase::NoAssetAvailable(Box::new(info));
            return;
        }

        if !prompt {
            self.notify(Notice::info(format!(
                "copy2 {latest} is available. Run `copy2 update check` to install it."
            )));
            self.update_phase = UpdatePhase::UpdateAvailable(Box::new(info));
            return;
        }

        self.update_phase = UpdatePhase::UpdateAvailable(Box::new(info.clone()));
        if self
            .frontend
            .confirm(&format!("Update copy2 {current} to {latest} and restart?"))
        {
            self.apply_update(info);
        } else {
            info!("Update to {latest} skipped");
            self.update_phase = UpdatePhase::Skipped;
        }
    }

    /// Download, validate and stage `info`'s asset on the worker. Accepting
    /// an update implies accepting the restart: once staged, nothing asks
    /// again before the installer is launched.
    pub fn apply_update(&mut self, info: ReleaseInfo) {
        if self.update_phase.is_busy() {
            return;
        }

        let AssetSelection::Found(asset) = info.download.clone() else {
            self.offer_release_page(&info);
            self.update_phase = UpdatePhase::NoAssetAvailable(Box::new(info));
            return;
        };

        if !self.build.self_contained {
            info!("This build is not a standalone executable, offering the release page");
            self.notify(Notice::info(
                "This copy2 build cannot replace itself; download the update from the release page.",
            ));
            self.offer_release_page(&info);
            self.update_phase = UpdatePhase::NoAssetAvailable(Box::new(info));
            return;
        }

        let target = match (self.hooks.update_target)() {
            Ok(target) => target,
            Err(error) => {
                self.fail_update(AppError::auto_update_failed("download", error));
                return;
            }
        };

        info!("Updating to {} from {}", info.version, asset.url);
        self.update_phase = UpdatePhase::Downloading {
            downloaded: 0,
            total: asset.size,
        };

        let request = UpdateRequest {
            asset,
            target,
            layout: PayloadLayout::for_host(),
            cache_dir: self.paths.cache_dir.clone(),
            log_path: self.paths.update_log_file(),
        };
        let client = self.http_client.clone();
        let timeout = Duration::from_secs(self.settings.download_timeout_secs);
        let progress = self.progress_sink();

        self.spawn(async move {
            let (tx, mut rx) = tokio::sync::mpsc::channel(32);

            let work = tokio::spawn(async move {
                run_with_timeout(
                    timeout,
                    "Update download",
                    prepare_update(&client, request, tx),
                    |error| AppError::auto_update_failed(error.phase(), error),
                )
                .await
            });

            while let Some(update) = rx.recv().await {
                progress.send(Message::UpdateProgress(update));
            }

            let result = match work.await {
                Ok(result) => result,
                Err(error) => Err(AppError::auto_update_failed(
                    "task join",
                    format!("update task panicked: {error}"),
                )),
            };
            Message::UpdatePrepared(Box::new(result))
        });
    }

    pub(super) fn handle_update_progress(&mut self, progress: UpdateProgress) {
        if !matches!(
            self.update_phase,
            UpdatePhase::Downloading { .. } | UpdatePhase::Validating | UpdatePhase::Staging
        ) {
            return;
        }

        match progress {
            UpdateProgress::Downloading { downloaded, total } => {
                self.update_phase = UpdatePhase::Downloading { downloaded, total };
                self.frontend.progress(downloaded, total);
            }
            UpdateProgress::Validating => self.update_phase = UpdatePhase::Validating,
            UpdateProgress::Staging => self.update_phase = UpdatePhase::Staging,
            UpdateProgress::Ready => debug!("Update staged"),
        }
    }

    pub(super) fn handle_update_prepared(&mut self, result: Result<HelperScript, AppError>) {
        let script = match result {
            Ok(script) => script,
            Err(error) => {
                self.fail_update(error);
                return;
            }
        };

        self.update_phase = UpdatePhase::Launching;
        if let Err(error) = self.persist_history() {
            discard_script(&script);
            self.fail_update(error);
            return;
        }

        if let Err(error) = (self.hooks.launch_script)(&script) {
            discard_script(&script);
            self.fail_update(AppError::auto_update_failed("installer", error));
            return;
        }

        info!("Installer launched, exiting for update");
        self.notify(Notice::info(
            "Installing the update; copy2 will start again when it is done.",
        ));
        self.update_phase = UpdatePhase::Exiting;
    }

    fn offer_release_page(&mut self, info: &ReleaseInfo) {
        if !self
            .frontend
            .confirm(&format!("Open the release page for {}?", info.version))
        {
            return;
        }
        if let Err(error) = (self.hooks.open_url)(&info.release_page_url) {
            warn!("Could not open {}: {error}", info.release_page_url);
            self.notify(Notice::warning(format!(
                "Could not open the browser; the release is at {}",
                info.release_page_url
            )));
        }
    }

    /// Every failure before the installer runs leaves the application as
    /// it was. Reported exactly once.
    pub(super) fn fail_update(&mut self, error: AppError) {
        error!("{error}");
        self.notify(Notice::error(error.to_string()));
        self.update_phase = UpdatePhase::Failed(error);
    }
}

/// The staging directory is removed by the next stale-session cleanup.
fn discard_script(script: &HelperScript) {
    if let Err(error) = std::fs::remove_file(script.path()) {
        warn!("Could not remove {}: {error}", script.path().display());
    }
}
