//! Registry client tests against a mock HTTP registry.

use std::time::Duration;

use slotswap_registry::{ArtifactCache, BuildResolver, CacheOutcome, DownloadError, RegistryError};

const BUILDS_PATH: &str = "/projects/paper/versions/1.20.4/builds";
const DOWNLOAD_PATH: &str = "/projects/paper/versions/1.20.4/builds/2/downloads/paper-2.jar";

fn paper_2() -> slotswap_core::BuildDescriptor {
    slotswap_core::BuildDescriptor {
        project: "paper".to_string(),
        version: "1.20.4".to_string(),
        build_number: 2,
        published_at: chrono::Utc::now(),
        artifact_file_name: "paper-2.jar".to_string(),
    }
}

fn builds_body() -> &'static str {
    r#"{
        "builds": [
            {"build": 1, "time": "2024-01-01T10:00:00Z",
             "downloads": {"application": {"name": "paper-1.jar"}}},
            {"build": 2, "time": "2024-01-02T10:00:00Z",
             "downloads": {"application": {"name": "paper-2.jar"}}}
        ]
    }"#
}

fn resolver(server: &mockito::ServerGuard) -> BuildResolver {
    BuildResolver::new(reqwest::Client::new(), &server.url(), Duration::from_secs(5))
}

#[tokio::test]
async fn resolves_last_build_in_list() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", BUILDS_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(builds_body())
        .create_async()
        .await;

    let build = resolver(&server)
        .resolve_latest_build("paper", "1.20.4")
        .await
        .unwrap();

    assert_eq!(build.build_number, 2);
    assert_eq!(build.artifact_file_name, "paper-2.jar");
    assert_eq!(build.project, "paper");
    assert_eq!(build.version, "1.20.4");
    mock.assert_async().await;
}

#[tokio::test]
async fn empty_build_list_is_distinct_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", BUILDS_PATH)
        .with_status(200)
        .with_body(r#"{"builds": []}"#)
        .create_async()
        .await;

    let err = resolver(&server)
        .resolve_latest_build("paper", "1.20.4")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NoBuilds { .. }), "got {err:?}");
}

#[tokio::test]
async fn non_success_status_is_registry_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", BUILDS_PATH)
        .with_status(404)
        .with_body(r#"{"error": "no such version"}"#)
        .create_async()
        .await;

    let err = resolver(&server)
        .resolve_latest_build("paper", "1.20.4")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Status { status: 404, .. }), "got {err:?}");
}

#[tokio::test]
async fn malformed_body_is_decode_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", BUILDS_PATH)
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let err = resolver(&server)
        .resolve_latest_build("paper", "1.20.4")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn download_happens_once_then_cache_hits() {
    let mut server = mockito::Server::new_async().await;
    let builds = server
        .mock("GET", BUILDS_PATH)
        .with_status(200)
        .with_body(builds_body())
        .expect(2)
        .create_async()
        .await;
    let download = server
        .mock("GET", DOWNLOAD_PATH)
        .with_status(200)
        .with_body("jar-bytes")
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let resolver = resolver(&server);
    let cache = ArtifactCache::new(reqwest::Client::new(), &server.url(), dir.path());

    let build = resolver.resolve_latest_build("paper", "1.20.4").await.unwrap();
    let first = cache.ensure_local(&build).await.unwrap();
    assert_eq!(
        first,
        CacheOutcome::Downloaded {
            path: dir.path().join("paper-2.jar"),
            bytes: 9,
        }
    );
    assert_eq!(std::fs::read(dir.path().join("paper-2.jar")).unwrap(), b"jar-bytes");

    let again = resolver.resolve_latest_build("paper", "1.20.4").await.unwrap();
    let second = cache.ensure_local(&again).await.unwrap();
    assert!(matches!(second, CacheOutcome::Hit(_)));

    builds.assert_async().await;
    download.assert_async().await;

    // Only the artifact is left behind; no temp files.
    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["paper-2.jar".to_string()]);
}

#[tokio::test]
async fn error_status_surfaces_body_and_writes_nothing() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", DOWNLOAD_PATH)
        .with_status(500)
        .with_body(r#"{"error":"storage offline"}"#)
        .create_async()
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let cache = ArtifactCache::new(reqwest::Client::new(), &server.url(), dir.path());

    let err = cache.ensure_local(&paper_2()).await.unwrap_err();
    match err {
        DownloadError::Status { status, body, .. } => {
            assert_eq!(status, 500);
            assert!(body.contains("storage offline"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn truncated_error_body_is_reported_not_blank() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Promises 100 bytes of body, sends 7, then hangs up.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        socket
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\npartial")
            .await
            .unwrap();
    });

    let dir = tempfile::TempDir::new().unwrap();
    let cache = ArtifactCache::new(reqwest::Client::new(), &base, dir.path());

    match cache.ensure_local(&paper_2()).await.unwrap_err() {
        DownloadError::Status { status, body, .. } => {
            assert_eq!(status, 500);
            assert!(body.starts_with("<unreadable body:"), "got {body:?}");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
