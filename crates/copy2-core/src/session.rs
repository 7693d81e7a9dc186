use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::fetch::DownloadReport;
use crate::stage::StagedPaths;

/// Prefix of every staging directory created under the cache directory.
pub const STAGING_PREFIX: &str = "update-";
const BACKUP_SUFFIX: &str = ".bak";
/// Names the installer script a released staging directory belongs to.
const OWNER_MARKER: &str = "installer-owner";

/// The running binary an update will replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTarget {
    pub executable: PathBuf,
    pub directory: PathBuf,
    pub backup: PathBuf,
    pub pid: u32,
}

impl UpdateTarget {
    #[must_use]
    pub fn new(executable: PathBuf, pid: u32) -> Self {
        let directory = executable
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let mut backup = OsString::from(executable.as_os_str());
        backup.push(BACKUP_SUFFIX);
        Self {
            executable,
            directory,
            backup: PathBuf::from(backup),
            pid,
        }
    }

    /// The current process and its resolved executable.
    ///
    /// # Errors
    /// Returns an error if the running executable cannot be located.
    pub fn current() -> std::io::Result<Self> {
        let executable = copy2_platform::current_executable()?;
        Ok(Self::new(executable, std::process::id()))
    }

    /// Where the auxiliary program lands next to the target.
    #[must_use]
    pub fn sibling(&self, staged_auxiliary: &Path) -> Option<PathBuf> {
        staged_auxiliary
            .file_name()
            .map(|name| self.directory.join(name))
    }
}

/// State of one update attempt, from download start until the installer
/// script takes ownership of the staged files.
#[derive(Debug)]
pub struct UpdateSession {
    staging: TempDir,
    target: UpdateTarget,
    download: Option<DownloadReport>,
    staged: Option<StagedPaths>,
}

impl UpdateSession {
    /// Create a fresh, private staging directory under `cache_dir`.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn create(cache_dir: &Path, target: UpdateTarget) -> std::io::Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(cache_dir)?;
        Ok(Self {
            staging,
            target,
            download: None,
            staged: None,
        })
    }

    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Destination for the downloaded asset, named after it when the name is
    /// a plain file name.
    #[must_use]
    pub fn download_path(&self, asset_name: &str) -> PathBuf {
        let file_name = Path::new(asset_name)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty() && !name.contains(".."))
            .unwrap_or("update-download");
        self.staging.path().join(file_name)
    }

    pub fn record_download(&mut self, report: DownloadReport) {
        self.download = Some(report);
    }

    #[must_use]
    pub fn downloaded_bytes(&self) -> u64 {
        self.download.map_or(0, |report| report.downloaded_bytes)
    }

    #[must_use]
    pub fn expected_bytes(&self) -> Option<u64> {
        self.download.and_then(|report| report.expected_bytes)
    }

    pub fn record_staged(&mut self, staged: StagedPaths) {
        self.staged = Some(staged);
    }

    #[must_use]
    pub fn staged(&self) -> Option<&StagedPaths> {
        self.staged.as_ref()
    }

    /// Stop managing the staging directory; whoever receives the path is now
    /// responsible for removing it.
    #[must_use]
    pub fn release(self) -> (PathBuf, UpdateTarget, Option<StagedPaths>) {
        let staging = self.staging.keep();
        (staging, self.target, self.staged)
    }
}

/// Record that the installer at `script` owns `staging_dir` from now on.
pub(crate) fn mark_installer_owned(staging_dir: &Path, script: &Path) -> std::io::Result<()> {
    std::fs::write(
        staging_dir.join(OWNER_MARKER),
        script.to_string_lossy().as_bytes(),
    )
}

/// True while the installer recorded in `staging_dir` has not finished.
/// The script deletes itself only after removing the staging directory, so a
/// missing script means the directory was abandoned.
pub(crate) fn is_installer_owned(staging_dir: &Path) -> bool {
    std::fs::read_to_string(staging_dir.join(OWNER_MARKER))
        .is_ok_and(|script| !script.is_empty() && Path::new(&script).exists())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{
        STAGING_PREFIX, UpdateSession, UpdateTarget, is_installer_owned, mark_installer_owned,
    };
    use crate::fetch::DownloadReport;

    #[test]
    fn target_derives_directory_and_backup() {
        let target = UpdateTarget::new(PathBuf::from("/opt/copy2/copy2"), 42);
        assert_eq!(target.directory, PathBuf::from("/opt/copy2"));
        assert_eq!(target.backup, PathBuf::from("/opt/copy2/copy2.bak"));
        assert_eq!(
            target.sibling(&PathBuf::from("/tmp/update-x/extracted/copy2-uninstall")),
            Some(PathBuf::from("/opt/copy2/copy2-uninstall"))
        );
    }

    #[test]
    fn sessions_get_private_staging_directories() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = UpdateTarget::new(temp.path().join("copy2"), 1);

        let first = UpdateSession::create(temp.path(), target.clone())
            .expect("first session should be created");
        let second =
            UpdateSession::create(temp.path(), target).expect("second session should be created");

        assert_ne!(first.staging_dir(), second.staging_dir());
        for session in [&first, &second] {
            let name = session
                .staging_dir()
                .file_name()
                .and_then(|name| name.to_str())
                .expect("staging dir should have a name");
            assert!(name.starts_with(STAGING_PREFIX), "{name}");
        }
    }

    #[test]
    fn dropping_a_session_removes_its_staging_directory() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let session = UpdateSession::create(temp.path(), UpdateTarget::new(temp.path().join("copy2"), 1))
            .expect("session should be created");
        let staging = session.staging_dir().to_path_buf();
        assert!(staging.is_dir());

        drop(session);

        assert!(!staging.exists());
    }

    #[test]
    fn released_session_keeps_staging_directory() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let mut session =
            UpdateSession::create(temp.path(), UpdateTarget::new(temp.path().join("copy2"), 1))
                .expect("session should be created");
        session.record_download(DownloadReport {
            downloaded_bytes: 10,
            expected_bytes: Some(12),
        });
        assert_eq!(session.downloaded_bytes(), 10);
        assert_eq!(session.expected_bytes(), Some(12));

        let (staging, _, staged) = session.release();

        assert!(staging.is_dir());
        assert_eq!(staged, None);
    }

    #[test]
    fn download_path_rejects_path_like_names() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let session = UpdateSession::create(temp.path(), UpdateTarget::new(temp.path().join("copy2"), 1))
            .expect("session should be created");

        assert_eq!(
            session.download_path("Copy2.zip"),
            session.staging_dir().join("Copy2.zip")
        );
        assert_eq!(
            session.download_path("../../evil.zip"),
            session.staging_dir().join("evil.zip")
        );
        assert_eq!(
            session.download_path(".."),
            session.staging_dir().join("update-download")
        );
    }

    #[test]
    fn ownership_lasts_while_the_installer_script_exists() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let staging = temp.path().join("update-owned");
        std::fs::create_dir_all(&staging).expect("staging dir should be created");
        let script = temp.path().join("copy2-install-7.sh");
        assert!(!is_installer_owned(&staging));

        std::fs::write(&script, "#!/bin/sh\n").expect("script should be written");
        mark_installer_owned(&staging, &script).expect("marker should be written");
        assert!(is_installer_owned(&staging));

        std::fs::remove_file(&script).expect("script should be removable");
        assert!(!is_installer_owned(&staging));
    }
}
