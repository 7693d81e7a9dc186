use std::fmt::Write as _;
use std::io::Read;
use std::path::{Path, PathBuf};

use copy2_platform::executable_file_name;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Smallest raw executable accepted as a plausible build.
pub const MIN_EXECUTABLE_BYTES: u64 = 64 * 1024;

const SIGNATURE_BYTES: usize = 16;
const EXTRACT_DIR: &str = "extracted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Archive,
    Executable,
}

/// File names expected inside a release archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadLayout {
    pub executable_name: String,
    /// Staged only when present.
    pub auxiliary_name: Option<String>,
}

impl PayloadLayout {
    #[must_use]
    pub fn for_host() -> Self {
        Self {
            executable_name: executable_file_name("copy2"),
            auxiliary_name: Some(executable_file_name("copy2-uninstall")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPaths {
    pub executable: PathBuf,
    pub auxiliary: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("download incomplete: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("download is neither an archive nor an executable (starts with {signature})")]
    NotAnArchiveOrExecutable { signature: String },
    #[error("executable is only {bytes} bytes, expected at least {minimum}")]
    TruncatedExecutable { bytes: u64, minimum: u64 },
    #[error("archive does not contain {expected}; executables found: {}", format_candidates(.candidates))]
    RequiredFileMissing {
        expected: String,
        candidates: Vec<String>,
    },
    #[error("{context} {}: {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Zip {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
}

impl StageError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }

    fn zip(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Zip { context, source }
    }
}

fn format_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "none".to_string()
    } else {
        candidates.join(", ")
    }
}

/// # Errors
/// Returns [`StageError::SizeMismatch`] when an expected size is known and
/// differs from the received byte count.
pub fn check_size(expected: Option<u64>, actual: u64) -> Result<(), StageError> {
    match expected {
        Some(expected) if expected != actual => Err(StageError::SizeMismatch { expected, actual }),
        _ => Ok(()),
    }
}

/// # Errors
/// Returns an error if the file cannot be read or its digest differs from
/// `expected` (hex, case-insensitive).
pub fn verify_sha256(path: &Path, expected: &str) -> Result<(), StageError> {
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        info!("Payload checksum verified");
        Ok(())
    } else {
        Err(StageError::ChecksumMismatch {
            expected: expected.to_ascii_lowercase(),
            actual,
        })
    }
}

/// Validate a downloaded payload and stage the files to install.
///
/// The size check runs before the contents are looked at; the kind is decided
/// from the binary signature, never from the file name.
///
/// # Errors
/// Returns an error on a size mismatch, an unrecognized signature, a
/// truncated executable, an archive missing the expected executable, or an
/// I/O or archive failure.
pub fn stage_payload(
    downloaded: &Path,
    expected_bytes: Option<u64>,
    actual_bytes: u64,
    layout: &PayloadLayout,
) -> Result<StagedPaths, StageError> {
    check_size(expected_bytes, actual_bytes)?;

    let head = read_head(downloaded)?;
    match classify_signature(&head) {
        Some(PayloadKind::Archive) => stage_archive(downloaded, layout),
        Some(PayloadKind::Executable) => {
            if actual_bytes < MIN_EXECUTABLE_BYTES {
                return Err(StageError::TruncatedExecutable {
                    bytes: actual_bytes,
                    minimum: MIN_EXECUTABLE_BYTES,
                });
            }
            debug!("Payload is a raw executable, staging as-is");
            Ok(StagedPaths {
                executable: downloaded.to_path_buf(),
                auxiliary: None,
            })
        }
        None => Err(StageError::NotAnArchiveOrExecutable {
            signature: describe_signature(&head),
        }),
    }
}

fn stage_archive(archive: &Path, layout: &PayloadLayout) -> Result<StagedPaths, StageError> {
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let extract_dir = parent.join(EXTRACT_DIR);
    std::fs::create_dir_all(&extract_dir).map_err(|error| {
        StageError::io("failed to create extraction directory", &extract_dir, error)
    })?;
    extract_zip(archive, &extract_dir)?;

    let Some(executable) = find_file_named(&extract_dir, &layout.executable_name)? else {
        let candidates = find_executables(&extract_dir)?
            .iter()
            .map(|path| {
                path.strip_prefix(&extract_dir)
                    .unwrap_or(path)
                    .display()
                    .to_string()
            })
            .collect();
        return Err(StageError::RequiredFileMissing {
            expected: layout.executable_name.clone(),
            candidates,
        });
    };

    let auxiliary = match &layout.auxiliary_name {
        Some(name) => find_file_named(&extract_dir, name)?,
        None => None,
    };
    if auxiliary.is_none()
        && let Some(name) = &layout.auxiliary_name
    {
        debug!("Archive has no {name}, skipping it");
    }

    info!("Staged {}", executable.display());
    Ok(StagedPaths {
        executable,
        auxiliary,
    })
}

fn read_head(path: &Path) -> Result<Vec<u8>, StageError> {
    let file = std::fs::File::open(path)
        .map_err(|error| StageError::io("failed to open payload", path, error))?;
    let mut head = Vec::with_capacity(SIGNATURE_BYTES);
    file.take(SIGNATURE_BYTES as u64)
        .read_to_end(&mut head)
        .map_err(|error| StageError::io("failed to read payload", path, error))?;
    Ok(head)
}

fn classify_signature(head: &[u8]) -> Option<PayloadKind> {
    const ARCHIVE: [&[u8]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];
    const EXECUTABLE: [&[u8]; 6] = [
        b"MZ",
        b"\x7fELF",
        b"\xfe\xed\xfa\xce",
        b"\xfe\xed\xfa\xcf",
        b"\xce\xfa\xed\xfe",
        b"\xcf\xfa\xed\xfe",
    ];
    const FAT_MACH_O: &[u8] = b"\xca\xfe\xba\xbe";

    if ARCHIVE.iter().any(|magic| head.starts_with(magic)) {
        Some(PayloadKind::Archive)
    } else if EXECUTABLE.iter().any(|magic| head.starts_with(magic))
        || head.starts_with(FAT_MACH_O)
    {
        Some(PayloadKind::Executable)
    } else {
        None
    }
}

fn describe_signature(head: &[u8]) -> String {
    if head.is_empty() {
        return "an empty file".to_string();
    }
    let mut hex = String::with_capacity(head.len() * 2);
    for byte in head {
        let _ = write!(hex, "{byte:02x}");
    }
    let preview: String = head
        .iter()
        .map(|&byte| {
            if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            }
        })
        .collect();
    format!("{hex} \"{preview}\"")
}

fn sha256_file(path: &Path) -> Result<String, StageError> {
    let mut file = std::fs::File::open(path)
        .map_err(|error| StageError::io("failed to open file for checksum", path, error))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|error| StageError::io("failed to read file for checksum", path, error))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<(), StageError> {
    let file = std::fs::File::open(zip_path)
        .map_err(|error| StageError::io("failed to open zip file", zip_path, error))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| StageError::zip("failed to read zip archive", error))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|error| StageError::zip("failed to read zip entry", error))?;
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path");
            continue;
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|error| {
                StageError::io("failed to create extraction directory", &out_path, error)
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                StageError::io("failed to create extraction parent directory", parent, error)
            })?;
        }
        let mut outfile = std::fs::File::create(&out_path)
            .map_err(|error| StageError::io("failed to create extracted file", &out_path, error))?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(|error| StageError::io("failed to extract archive entry", &out_path, error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
            }
        }
    }

    debug!("Extraction complete to {}", dest.display());
    Ok(())
}

fn walk_files(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), StageError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|error| StageError::io("failed to read extracted directory", dir, error))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            walk_files(&path, found)?;
        } else {
            found.push(path);
        }
    }
    Ok(())
}

/// File names compare exactly, except on Windows where the file system
/// itself ignores case.
fn same_file_name(candidate: &str, expected: &str) -> bool {
    if cfg!(windows) {
        candidate.eq_ignore_ascii_case(expected)
    } else {
        candidate == expected
    }
}

/// Shallowest match wins.
fn find_file_named(dir: &Path, name: &str) -> Result<Option<PathBuf>, StageError> {
    let mut files = Vec::new();
    walk_files(dir, &mut files)?;
    Ok(files
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(std::ffi::OsStr::to_str)
                .is_some_and(|file_name| same_file_name(file_name, name))
        })
        .min_by_key(|path| path.components().count()))
}

fn find_executables(dir: &Path) -> Result<Vec<PathBuf>, StageError> {
    let mut files = Vec::new();
    walk_files(dir, &mut files)?;
    Ok(files
        .into_iter()
        .filter(|path| {
            let named_exe = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));
            named_exe
                || read_head(path).is_ok_and(|head| {
                    classify_signature(&head) == Some(PayloadKind::Executable)
                })
        })
        .collect())
}
