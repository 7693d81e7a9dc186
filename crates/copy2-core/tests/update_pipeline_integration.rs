use std::io::Write as _;
use std::path::Path;

use copy2_core::auto_update::{AutoUpdateError, UpdateProgress, UpdateRequest, prepare_update};
use copy2_core::{
    AssetSelection, GitHubReleases, PayloadLayout, ReleaseAsset, ReleaseError, ReleaseSource,
    StageError, UpdateTarget, VersionTriple, download_to,
};
use copy2_platform::executable_file_name;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Serve each canned response to one connection, in order.
async fn serve(responses: Vec<Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");

    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buffer = [0_u8; 4096];
            loop {
                let read = socket.read(&mut buffer).await.unwrap_or(0);
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buffer[..read]);
                if request.windows(4).any(|window| window == b"\r\n\r\n") {
                    break;
                }
            }
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{addr}")
}

fn response(status: &str, body: &[u8], with_length: bool) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
    if with_length {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("\r\n");
    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("client should build")
}

fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        for (name, contents) in entries {
            writer
                .start_file(*name, options)
                .expect("file entry should be started");
            writer
                .write_all(contents.as_bytes())
                .expect("file entry should be written");
        }
        writer.finish().expect("zip archive should be finalized");
    }
    cursor.into_inner()
}

fn request(root: &Path, url: String, size: Option<u64>) -> UpdateRequest {
    UpdateRequest {
        asset: ReleaseAsset {
            name: "copy2-linux-x64.zip".to_string(),
            url,
            size,
            sha256: None,
        },
        target: UpdateTarget::new(root.join(executable_file_name("copy2")), 1),
        layout: PayloadLayout::for_host(),
        cache_dir: root.join("cache"),
        log_path: root.join("update.log"),
    }
}

fn staging_dirs(cache_dir: &Path) -> usize {
    std::fs::read_dir(cache_dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_name().to_string_lossy().starts_with("update-"))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn fetch_latest_resolves_release_metadata() {
    let body = br#"{
        "tag_name": "v2.3.1",
        "html_url": "https://github.com/MellowsLab/copy2/releases/tag/v2.3.1",
        "body": "Bug fixes",
        "assets": [
            {"name": "Readme.txt", "browser_download_url": "https://dl.invalid/Readme.txt", "size": 10},
            {"name": "copy2-linux-x64.zip", "browser_download_url": "https://dl.invalid/copy2-linux-x64.zip", "size": 4000},
            {"name": "copy2-windows-x64.exe", "browser_download_url": "https://dl.invalid/copy2-windows-x64.exe", "size": 9000}
        ]
    }"#;
    let base = serve(vec![response("200 OK", body, true)]).await;
    let source = GitHubReleases::new(client(), "MellowsLab/copy2", Some("linux-x64".to_string()))
        .with_api_base(&base);

    let info = source.fetch_latest().await.expect("release should resolve");

    assert_eq!(info.version_triple(), VersionTriple::new(2, 3, 1));
    assert_eq!(info.notes.as_deref(), Some("Bug fixes"));
    match info.download {
        AssetSelection::Found(asset) => {
            assert_eq!(asset.name, "copy2-linux-x64.zip");
            assert_eq!(asset.size, Some(4000));
        }
        AssetSelection::NotFound => panic!("an asset should be selected"),
    }
}

#[tokio::test]
async fn fetch_latest_reports_http_failures_as_network_errors() {
    let base = serve(vec![response(
        "403 Forbidden",
        b"API rate limit exceeded",
        true,
    )])
    .await;
    let source = GitHubReleases::new(client(), "MellowsLab/copy2", None).with_api_base(&base);

    let error = source
        .fetch_latest()
        .await
        .expect_err("HTTP 403 should fail the check");

    assert!(error.is_network_failure());
    match error {
        ReleaseError::HttpStatus {
            status,
            body_snippet,
        } => {
            assert_eq!(status.as_u16(), 403);
            assert!(body_snippet.contains("rate limit"), "{body_snippet}");
        }
        other => panic!("expected HTTP status error, got {other:?}"),
    }
}

#[tokio::test]
async fn fetch_latest_reports_malformed_metadata_as_parse_failure() {
    let base = serve(vec![response("200 OK", b"<html>maintenance</html>", true)]).await;
    let source = GitHubReleases::new(client(), "MellowsLab/copy2", None).with_api_base(&base);

    let error = source
        .fetch_latest()
        .await
        .expect_err("HTML should not parse as release metadata");

    assert!(matches!(error, ReleaseError::Parse(_)));
    assert!(!error.is_network_failure());
}

#[tokio::test]
async fn download_reports_expected_and_actual_bytes() {
    let body = vec![7_u8; 5000];
    let base = serve(vec![
        response("200 OK", &body, true),
        response("200 OK", &body, false),
    ])
    .await;
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let (tx, mut rx) = mpsc::channel(256);

    let with_length = download_to(&client(), &format!("{base}/a"), &temp.path().join("a"), &tx)
        .await
        .expect("download should succeed");
    let without_length =
        download_to(&client(), &format!("{base}/b"), &temp.path().join("b"), &tx)
            .await
            .expect("download should succeed");
    drop(tx);

    assert_eq!(with_length.downloaded_bytes, 5000);
    assert_eq!(with_length.expected_bytes, Some(5000));
    assert_eq!(without_length.downloaded_bytes, 5000);
    assert_eq!(without_length.expected_bytes, None);
    assert_eq!(
        std::fs::read(temp.path().join("a")).expect("download should be on disk"),
        body
    );

    let mut last = None;
    while let Some(progress) = rx.recv().await {
        last = Some(progress);
    }
    assert_eq!(
        last,
        Some(UpdateProgress::Downloading {
            downloaded: 5000,
            total: None
        })
    );
}

#[tokio::test]
async fn prepare_update_stages_archive_and_writes_installer() {
    let executable = executable_file_name("copy2");
    let uninstaller = executable_file_name("copy2-uninstall");
    let executable_entry = format!("copy2/{executable}");
    let uninstaller_entry = format!("copy2/{uninstaller}");
    let archive = zip_with(&[
        (executable_entry.as_str(), "\x7fELF new build"),
        (uninstaller_entry.as_str(), "\x7fELF uninstaller"),
    ]);
    let base = serve(vec![response("200 OK", &archive, true)]).await;
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let (tx, mut rx) = mpsc::channel(256);

    let script = prepare_update(
        &client(),
        request(temp.path(), format!("{base}/copy2.zip"), Some(archive.len() as u64)),
        tx,
    )
    .await
    .expect("update should be prepared");

    assert!(script.path().is_file());
    assert!(script.path().starts_with(temp.path().join("cache")));
    let contents = std::fs::read_to_string(script.path()).expect("script should be readable");
    assert!(contents.contains(&uninstaller));
    assert_eq!(staging_dirs(&temp.path().join("cache")), 1);

    let mut phases = Vec::new();
    while let Some(progress) = rx.recv().await {
        if !matches!(progress, UpdateProgress::Downloading { .. }) {
            phases.push(progress);
        }
    }
    assert_eq!(
        phases,
        vec![
            UpdateProgress::Validating,
            UpdateProgress::Staging,
            UpdateProgress::Ready
        ]
    );
}

#[tokio::test]
async fn prepare_update_rejects_short_download_and_discards_staging() {
    let payload = vec![b'P'; 998];
    let base = serve(vec![response("200 OK", &payload, false)]).await;
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let (tx, _rx) = mpsc::channel(256);

    let error = prepare_update(
        &client(),
        request(temp.path(), format!("{base}/copy2.zip"), Some(1000)),
        tx,
    )
    .await
    .expect_err("short download should be rejected");

    assert!(matches!(
        error,
        AutoUpdateError::Stage(StageError::SizeMismatch {
            expected: 1000,
            actual: 998
        })
    ));
    assert_eq!(error.phase(), "validation");
    assert_eq!(staging_dirs(&temp.path().join("cache")), 0);
}

#[tokio::test]
async fn prepare_update_rejects_error_page_saved_as_archive() {
    let page = b"<!DOCTYPE html><html><body>Too many requests</body></html>";
    let base = serve(vec![response("200 OK", page, true)]).await;
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let (tx, _rx) = mpsc::channel(256);

    let error = prepare_update(
        &client(),
        request(temp.path(), format!("{base}/copy2.zip"), None),
        tx,
    )
    .await
    .expect_err("HTML payload should be rejected");

    assert!(matches!(
        error,
        AutoUpdateError::Stage(StageError::NotAnArchiveOrExecutable { .. })
    ));
}
