use std::io;
use std::path::PathBuf;

use log::info;

/// File name of an executable called `stem` on the host platform.
#[must_use]
pub fn executable_file_name(stem: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{stem}.exe")
    } else {
        stem.to_string()
    }
}

/// Absolute path of the running executable.
///
/// On Linux, once the file behind `/proc/self/exe` has been replaced the
/// kernel reports the old inode with a ` (deleted)` suffix; the suffix is
/// stripped so callers get the path where the binary actually lives.
///
/// # Errors
/// Returns an error when the executable path cannot be resolved.
pub fn current_executable() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let exe = strip_deleted_suffix(exe);
    Ok(std::fs::canonicalize(&exe).unwrap_or(exe))
}

fn strip_deleted_suffix(exe: PathBuf) -> PathBuf {
    let path_str = exe.to_string_lossy();
    if let Some(stripped) = path_str.strip_suffix(" (deleted)") {
        let fixed = PathBuf::from(stripped);
        info!("Adjusted exe path from deleted inode: {}", fixed.display());
        fixed
    } else {
        exe
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{current_executable, executable_file_name, strip_deleted_suffix};

    #[test]
    fn strip_deleted_suffix_removes_kernel_marker() {
        let fixed = strip_deleted_suffix(PathBuf::from("/opt/copy2/copy2 (deleted)"));
        assert_eq!(fixed, PathBuf::from("/opt/copy2/copy2"));

        let untouched = strip_deleted_suffix(PathBuf::from("/opt/copy2/copy2"));
        assert_eq!(untouched, PathBuf::from("/opt/copy2/copy2"));
    }

    #[test]
    fn executable_file_name_matches_platform_convention() {
        let name = executable_file_name("copy2");
        if cfg!(target_os = "windows") {
            assert_eq!(name, "copy2.exe");
        } else {
            assert_eq!(name, "copy2");
        }
    }

    #[test]
    fn current_executable_is_absolute() {
        let exe = current_executable().expect("test binary path should resolve");
        assert!(exe.is_absolute());
    }
}
