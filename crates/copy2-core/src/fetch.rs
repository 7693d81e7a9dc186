use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

use crate::auto_update::UpdateProgress;

const WRITE_CHUNK_BYTES: usize = 64 * 1024;

/// Byte accounting for one finished transfer. A mismatch is left to the
/// caller to judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded_bytes: u64,
    pub expected_bytes: Option<u64>,
}

impl DownloadReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.expected_bytes
            .is_none_or(|expected| expected == self.downloaded_bytes)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download from {url} failed with HTTP {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("download stream error: {0}")]
    Stream(#[source] reqwest::Error),
    #[error("{context} {}: {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Stream `url` into `dest`, reporting progress per received chunk.
///
/// The body is never held in memory as a whole.
///
/// # Errors
/// Returns an error if the request fails, the server answers with a
/// non-success status, the stream breaks, or the file cannot be written.
pub async fn download_to(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    progress: &mpsc::Sender<UpdateProgress>,
) -> Result<DownloadReport, FetchError> {
    let response = client
        .get(url)
        .header("User-Agent", "copy2")
        .send()
        .await
        .map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let expected_bytes = response.content_length();
    debug!(
        "Download started, expected size: {}",
        expected_bytes.map_or_else(|| "unknown".to_string(), |bytes| bytes.to_string())
    );

    let file = tokio::fs::File::create(dest)
        .await
        .map_err(|error| FetchError::io("failed to create download file", dest, error))?;
    let mut writer = BufWriter::with_capacity(WRITE_CHUNK_BYTES, file);
    let mut downloaded_bytes: u64 = 0;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Stream)?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|error| FetchError::io("failed to write download data", dest, error))?;
        downloaded_bytes += chunk.len() as u64;
        let _ = progress
            .send(UpdateProgress::Downloading {
                downloaded: downloaded_bytes,
                total: expected_bytes,
            })
            .await;
    }

    writer
        .flush()
        .await
        .map_err(|error| FetchError::io("failed to flush download file", dest, error))?;
    writer
        .get_ref()
        .sync_all()
        .await
        .map_err(|error| FetchError::io("failed to sync download file", dest, error))?;

    let report = DownloadReport {
        downloaded_bytes,
        expected_bytes,
    };
    if report.is_complete() {
        info!("Download complete: {downloaded_bytes} bytes");
    } else {
        warn!(
            "Download finished with {downloaded_bytes} of {} expected bytes",
            expected_bytes.unwrap_or_default()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::DownloadReport;

    #[test]
    fn report_is_complete_when_size_is_unknown_or_matching() {
        let unknown = DownloadReport {
            downloaded_bytes: 998,
            expected_bytes: None,
        };
        let matching = DownloadReport {
            downloaded_bytes: 1000,
            expected_bytes: Some(1000),
        };
        let short = DownloadReport {
            downloaded_bytes: 998,
            expected_bytes: Some(1000),
        };
        assert!(unknown.is_complete());
        assert!(matching.is_complete());
        assert!(!short.is_complete());
    }
}
