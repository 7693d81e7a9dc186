use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;

use crate::version::VersionTriple;

pub const DEFAULT_REPOSITORY: &str = "MellowsLab/copy2";
const GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    pub html_url: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub url: String,
    pub size: Option<u64>,
    /// Lowercase hex SHA-256 published alongside the asset, if any.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSelection {
    Found(ReleaseAsset),
    NotFound,
}

impl AssetSelection {
    #[must_use]
    pub fn asset(&self) -> Option<&ReleaseAsset> {
        match self {
            Self::Found(asset) => Some(asset),
            Self::NotFound => None,
        }
    }
}

/// Latest published release. With [`AssetSelection::NotFound`] only the
/// release page can be offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: String,
    pub release_page_url: String,
    pub notes: Option<String>,
    pub download: AssetSelection,
}

impl ReleaseInfo {
    #[must_use]
    pub fn version_triple(&self) -> VersionTriple {
        VersionTriple::parse_tag(&self.version)
    }
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("failed to check for updates: {0}")]
    Request(#[source] reqwest::Error),
    #[error("update check failed with HTTP {status}{body_snippet}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body_snippet: String,
    },
    #[error("update check timed out")]
    Timeout,
    #[error("failed to parse release metadata: {0}")]
    Parse(#[source] reqwest::Error),
}

impl ReleaseError {
    /// Unreachable host, timeout, or non-success status.
    #[must_use]
    pub fn is_network_failure(&self) -> bool {
        !matches!(self, Self::Parse(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Archive,
    Executable,
    Other,
}

impl AssetKind {
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Self::Archive
        } else if lower.ends_with(".exe") || lower.ends_with(".appimage") {
            Self::Executable
        } else {
            Self::Other
        }
    }
}

/// Asset-name substring identifying builds for this host.
#[must_use]
pub fn default_asset_hint() -> Option<&'static str> {
    let hint = if cfg!(target_os = "windows") && cfg!(target_arch = "x86_64") {
        "windows-x64"
    } else if cfg!(target_os = "windows") && cfg!(target_arch = "aarch64") {
        "windows-arm64"
    } else if cfg!(target_os = "linux") && cfg!(target_arch = "x86_64") {
        "linux-x64"
    } else if cfg!(target_os = "linux") && cfg!(target_arch = "aarch64") {
        "linux-arm64"
    } else if cfg!(target_os = "macos") && cfg!(target_arch = "aarch64") {
        "macos-arm64"
    } else if cfg!(target_os = "macos") && cfg!(target_arch = "x86_64") {
        "macos-x64"
    } else {
        return None;
    };
    Some(hint)
}

/// Pick the asset to download.
///
/// Priority: hinted archive, largest archive, hinted executable, first
/// executable.
#[must_use]
pub fn select_asset(assets: &[GitHubAsset], hint: Option<&str>) -> AssetSelection {
    let hint = hint
        .map(str::trim)
        .filter(|hint| !hint.is_empty())
        .map(str::to_ascii_lowercase);
    let hint = hint.as_deref();

    let archives: Vec<&GitHubAsset> = assets
        .iter()
        .filter(|asset| AssetKind::from_name(&asset.name) == AssetKind::Archive)
        .collect();
    let executables: Vec<&GitHubAsset> = assets
        .iter()
        .filter(|asset| AssetKind::from_name(&asset.name) == AssetKind::Executable)
        .collect();

    let chosen = archives
        .iter()
        .find(|asset| name_matches_hint(asset, hint))
        .or_else(|| archives.iter().max_by_key(|asset| asset.size))
        .or_else(|| executables.iter().find(|asset| name_matches_hint(asset, hint)))
        .or_else(|| executables.first());

    match chosen {
        Some(asset) => AssetSelection::Found(ReleaseAsset {
            name: asset.name.clone(),
            url: asset.browser_download_url.clone(),
            size: (asset.size > 0).then_some(asset.size),
            sha256: asset.digest.as_deref().and_then(parse_sha256_digest),
        }),
        None => AssetSelection::NotFound,
    }
}

fn name_matches_hint(asset: &GitHubAsset, hint: Option<&str>) -> bool {
    hint.is_some_and(|hint| asset.name.to_ascii_lowercase().contains(hint))
}

/// Fallback for releases that link their downloads from the notes instead of
/// attaching them: first `.zip` URL, then first `.exe` URL.
#[must_use]
pub fn scan_notes_for_asset(notes: &str) -> AssetSelection {
    let urls: Vec<&str> = notes
        .split(|ch: char| ch.is_whitespace() || "()<>[]\"'`".contains(ch))
        .map(|token| token.trim_end_matches(['.', ',', ';', ':', '!']))
        .filter(|token| token.starts_with("https://") || token.starts_with("http://"))
        .collect();

    for extension in [".zip", ".exe"] {
        if let Some(url) = urls
            .iter()
            .find(|url| url.to_ascii_lowercase().ends_with(extension))
        {
            let name = url.rsplit('/').next().unwrap_or(*url).to_string();
            return AssetSelection::Found(ReleaseAsset {
                name,
                url: (*url).to_string(),
                size: None,
                sha256: None,
            });
        }
    }

    AssetSelection::NotFound
}

#[must_use]
pub fn resolve_release(release: GitHubRelease, hint: Option<&str>) -> ReleaseInfo {
    let mut download = select_asset(&release.assets, hint);
    if download == AssetSelection::NotFound
        && let Some(notes) = release.body.as_deref()
    {
        download = scan_notes_for_asset(notes);
        if download != AssetSelection::NotFound {
            debug!("Using download link from release notes");
        }
    }

    ReleaseInfo {
        version: release.tag_name,
        release_page_url: release.html_url,
        notes: release.body,
        download,
    }
}

/// Where the latest release comes from.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<ReleaseInfo, ReleaseError>;
}

/// "Latest release" endpoint of a GitHub repository.
#[derive(Debug, Clone)]
pub struct GitHubReleases {
    client: reqwest::Client,
    repository: String,
    asset_hint: Option<String>,
    api_base: String,
}

impl GitHubReleases {
    #[must_use]
    pub fn new(client: reqwest::Client, repository: &str, asset_hint: Option<String>) -> Self {
        Self {
            client,
            repository: repository.trim_matches('/').to_string(),
            asset_hint,
            api_base: GITHUB_API.to_string(),
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn latest_url(&self) -> String {
        format!("{}/repos/{}/releases/latest", self.api_base, self.repository)
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleases {
    async fn fetch_latest(&self) -> Result<ReleaseInfo, ReleaseError> {
        let url = self.latest_url();
        debug!("Fetching release metadata from {url}");

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "copy2")
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ReleaseError::Timeout
                } else {
                    ReleaseError::Request(error)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body_snippet = response
                .text()
                .await
                .ok()
                .map(|body| response_snippet(&body, 160))
                .unwrap_or_default();
            return Err(ReleaseError::HttpStatus {
                status,
                body_snippet,
            });
        }

        let release: GitHubRelease = response.json().await.map_err(ReleaseError::Parse)?;
        let info = resolve_release(release, self.asset_hint.as_deref());
        info!(
            "Latest release is {} ({})",
            info.version,
            info.download
                .asset()
                .map_or("no downloadable asset", |asset| asset.name.as_str())
        );
        Ok(info)
    }
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

fn parse_sha256_digest(digest: &str) -> Option<String> {
    let (algorithm, hash) = digest.split_once(':')?;
    if !algorithm.eq_ignore_ascii_case("sha256") {
        return None;
    }
    if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str, size: u64) -> GitHubAsset {
        GitHubAsset {
            name: name.to_string(),
            browser_download_url: format!("https://example.invalid/download/{name}"),
            size,
            digest: None,
        }
    }

    fn selected_name(selection: &AssetSelection) -> Option<&str> {
        selection.asset().map(|asset| asset.name.as_str())
    }

    #[test]
    fn select_asset_prefers_archive_without_hint() {
        let assets = [
            asset("Readme.txt", 10),
            asset("App.zip", 2_000),
            asset("App.exe", 5_000),
        ];
        assert_eq!(selected_name(&select_asset(&assets, None)), Some("App.zip"));
    }

    #[test]
    fn select_asset_falls_back_to_executable_without_archive() {
        let assets = [asset("Readme.txt", 10), asset("App.exe", 5_000)];
        assert_eq!(selected_name(&select_asset(&assets, None)), Some("App.exe"));
    }

    #[test]
    fn select_asset_prefers_hinted_archive_over_larger_one() {
        let assets = [
            asset("copy2-macos-arm64.zip", 9_000),
            asset("copy2-windows-x64.zip", 3_000),
            asset("copy2-linux-x64.zip", 4_000),
        ];
        assert_eq!(
            selected_name(&select_asset(&assets, Some("Windows-X64"))),
            Some("copy2-windows-x64.zip")
        );
        assert_eq!(
            selected_name(&select_asset(&assets, Some("freebsd"))),
            Some("copy2-macos-arm64.zip")
        );
    }

    #[test]
    fn select_asset_uses_hint_among_executables() {
        let assets = [
            asset("copy2-linux-x64.AppImage", 8_000),
            asset("copy2-windows-x64.exe", 7_000),
        ];
        assert_eq!(
            selected_name(&select_asset(&assets, Some("windows"))),
            Some("copy2-windows-x64.exe")
        );
        assert_eq!(
            selected_name(&select_asset(&assets, None)),
            Some("copy2-linux-x64.AppImage")
        );
    }

    #[test]
    fn select_asset_reports_not_found_for_unusable_assets() {
        let assets = [asset("Readme.txt", 10), asset("checksums.sha256", 100)];
        assert_eq!(select_asset(&assets, None), AssetSelection::NotFound);
        assert_eq!(select_asset(&[], Some("windows")), AssetSelection::NotFound);
    }

    #[test]
    fn select_asset_carries_published_digest() {
        let mut archive = asset("App.zip", 2_000);
        archive.digest = Some(
            "sha256:50639D63848D275A7EFCD04478DE62CA0DF8F35DFD75BE490E4FCAE667ECD436".to_string(),
        );
        let selection = select_asset(&[archive], None);
        let chosen = selection.asset().expect("archive should be selected");
        assert_eq!(chosen.size, Some(2_000));
        assert_eq!(
            chosen.sha256.as_deref(),
            Some("50639d63848d275a7efcd04478de62ca0df8f35dfd75be490e4fcae667ecd436")
        );
    }

    #[test]
    fn scan_notes_prefers_archive_links() {
        let notes = "Download the [installer](https://host.invalid/files/Copy2.exe) \
                     or the portable build: https://host.invalid/files/Copy2.zip.";
        let selection = scan_notes_for_asset(notes);
        let chosen = selection.asset().expect("a link should be found");
        assert_eq!(chosen.url, "https://host.invalid/files/Copy2.zip");
        assert_eq!(chosen.name, "Copy2.zip");
        assert_eq!(chosen.size, None);

        let exe_only = scan_notes_for_asset("Get it at <https://host.invalid/Copy2.exe>");
        assert_eq!(selected_name(&exe_only), Some("Copy2.exe"));

        assert_eq!(
            scan_notes_for_asset("No binaries this time, see https://host.invalid/changelog"),
            AssetSelection::NotFound
        );
    }

    #[test]
    fn resolve_release_falls_back_to_notes_only_without_assets() {
        let release: GitHubRelease = serde_json::from_str(
            r#"{
                "tag_name": "v2.1.0",
                "html_url": "https://github.com/MellowsLab/copy2/releases/tag/v2.1.0",
                "body": "Portable: https://mirror.invalid/copy2-2.1.0.zip",
                "assets": []
            }"#,
        )
        .expect("release fixture should parse");

        let info = resolve_release(release, None);
        assert_eq!(info.version_triple(), VersionTriple::new(2, 1, 0));
        assert_eq!(
            info.download.asset().map(|asset| asset.url.as_str()),
            Some("https://mirror.invalid/copy2-2.1.0.zip")
        );
    }

    #[test]
    fn resolve_release_without_any_asset_keeps_release_page() {
        let release: GitHubRelease = serde_json::from_str(
            r#"{
                "tag_name": "v2.1.0",
                "html_url": "https://github.com/MellowsLab/copy2/releases/tag/v2.1.0"
            }"#,
        )
        .expect("release fixture should parse");

        let info = resolve_release(release, Some("linux-x64"));
        assert_eq!(info.download, AssetSelection::NotFound);
        assert!(info.release_page_url.ends_with("/v2.1.0"));
        assert_eq!(info.notes, None);
    }

    #[test]
    fn latest_url_targets_repository() {
        let source = GitHubReleases::new(reqwest::Client::new(), "/MellowsLab/copy2/", None)
            .with_api_base("http://127.0.0.1:9/");
        assert_eq!(
            source.latest_url(),
            "http://127.0.0.1:9/repos/MellowsLab/copy2/releases/latest"
        );
    }

    #[test]
    fn parse_sha256_digest_rejects_invalid_values() {
        assert!(parse_sha256_digest("sha1:abc").is_none());
        assert!(parse_sha256_digest("sha256:not-hex").is_none());
        assert!(parse_sha256_digest("sha256:abcd").is_none());
    }

    #[test]
    fn response_snippet_is_prefixed_and_bounded() {
        assert_eq!(response_snippet("", 10), "");
        assert_eq!(response_snippet("rate limited", 4), ": rate");
    }
}
