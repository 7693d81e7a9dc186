//! Self-update engine for Copy2.
//!
//! This crate is independent of the front end:
//! - Release discovery and download-asset selection.
//! - Streaming payload download with expected/actual byte accounting.
//! - Content-sniffing validation and staging of archives or raw executables.
//! - Generation of the external installer script that swaps the binary,
//!   self-tests it, and rolls back on failure.

pub mod auto_update;
mod fetch;
mod installer;
mod release;
mod session;
mod stage;
mod version;

/// Streaming download of a payload to disk.
pub use fetch::{DownloadReport, FetchError, download_to};
/// Installer and cleanup script generation plus the installer log contract.
pub use installer::{
    AuxiliaryInstall, HelperScript, InstallerOutcome, InstallerParams, PACKAGING_ENV_VARS,
    SELF_TEST_ATTEMPTS, SELF_TEST_BACKOFF_SECS, SELF_TEST_FLAG, ScriptError, ScriptFlavor,
    build_installer, last_outcome, render_cleanup, render_installer, write_cleanup_script,
};
/// Release metadata model, asset selection, and the release source seam.
pub use release::{
    AssetKind, AssetSelection, DEFAULT_REPOSITORY, GitHubAsset, GitHubRelease, GitHubReleases,
    ReleaseAsset, ReleaseError, ReleaseInfo, ReleaseSource, default_asset_hint, resolve_release,
    scan_notes_for_asset, select_asset,
};
/// Private staging area for one update attempt.
pub use session::{STAGING_PREFIX, UpdateSession, UpdateTarget};
/// Payload validation and staging.
pub use stage::{
    MIN_EXECUTABLE_BYTES, PayloadKind, PayloadLayout, StageError, StagedPaths, check_size,
    stage_payload, verify_sha256,
};
/// Tag normalization and comparison.
pub use version::VersionTriple;
