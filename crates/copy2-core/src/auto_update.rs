use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::fetch::{FetchError, download_to};
use crate::installer::{HelperScript, ScriptError, build_installer};
use crate::release::ReleaseAsset;
use crate::session::{STAGING_PREFIX, UpdateSession, UpdateTarget, is_installer_owned};
use crate::stage::{PayloadLayout, StageError, check_size, stage_payload, verify_sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateProgress {
    Downloading { downloaded: u64, total: Option<u64> },
    Validating,
    Staging,
    Ready,
}

#[derive(Debug, Error)]
pub enum AutoUpdateError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("{context}: {details}")]
    Worker {
        context: &'static str,
        details: String,
    },
}

impl AutoUpdateError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    /// Pipeline step the failure belongs to, for user-facing messages.
    #[must_use]
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Io { .. } | Self::Fetch(_) => "download",
            Self::Stage(StageError::SizeMismatch { .. } | StageError::ChecksumMismatch { .. }) => {
                "validation"
            }
            Self::Stage(_) | Self::Worker { .. } => "staging",
            Self::Script(_) => "installer",
        }
    }
}

/// Inputs of one update attempt.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub asset: ReleaseAsset,
    pub target: UpdateTarget,
    pub layout: PayloadLayout,
    pub cache_dir: PathBuf,
    pub log_path: PathBuf,
}

/// Download, validate and stage `request.asset`, then write the installer
/// script. The script is returned unlaunched.
///
/// Nothing outside the private staging directory is modified; on error the
/// staging directory is removed.
///
/// # Errors
/// Returns an error when any step before the script launch fails.
pub async fn prepare_update(
    client: &reqwest::Client,
    request: UpdateRequest,
    progress: mpsc::Sender<UpdateProgress>,
) -> Result<HelperScript, AutoUpdateError> {
    let UpdateRequest {
        asset,
        target,
        layout,
        cache_dir,
        log_path,
    } = request;

    let mut session = UpdateSession::create(&cache_dir, target)
        .map_err(|error| AutoUpdateError::io("failed to create staging directory", error))?;
    let download_path = session.download_path(&asset.name);

    info!("Downloading update from {}", asset.url);
    let report = download_to(client, &asset.url, &download_path, &progress).await?;
    session.record_download(report);

    let _ = progress.send(UpdateProgress::Validating).await;
    let expected_bytes = session.expected_bytes().or(asset.size);
    let actual_bytes = session.downloaded_bytes();
    check_size(expected_bytes, actual_bytes)?;
    if let Some(digest) = asset.sha256 {
        let path = download_path.clone();
        run_blocking("checksum verification stopped", move || {
            verify_sha256(&path, &digest)
        })
        .await??;
    } else {
        debug!("Release publishes no digest for {}", asset.name);
    }

    let _ = progress.send(UpdateProgress::Staging).await;
    let staged = run_blocking("staging stopped", move || {
        stage_payload(&download_path, expected_bytes, actual_bytes, &layout)
    })
    .await??;
    session.record_staged(staged);

    let script = build_installer(session, &log_path)?;
    let _ = progress.send(UpdateProgress::Ready).await;
    Ok(script)
}

async fn run_blocking<T, F>(context: &'static str, work: F) -> Result<T, AutoUpdateError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| AutoUpdateError::Worker {
            context,
            details: error.to_string(),
        })
}

/// Remove staging directories left behind by earlier attempts. Returns how
/// many were removed.
///
/// A directory handed to an installer that has not finished yet is kept: the
/// installer still has to copy the staged build out of it.
pub fn cleanup_stale_sessions(cache_dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(cache_dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() || !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
            continue;
        }
        if is_installer_owned(&path) {
            debug!("Keeping {} for the running installer", path.display());
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!("Removed stale update directory {}", path.display());
                removed += 1;
            }
            Err(error) => warn!("Could not remove {}: {error}", path.display()),
        }
    }
    removed
}
