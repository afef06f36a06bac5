//! Integration tests for mediacrawl
//!
//! These tests drive the resolver and retriever end to end against a local
//! HTTP server.

use httpmock::prelude::*;
use mediacrawl::{
    scraping::{
        ComplianceGate, CredentialStore, DispatchError, Dispatcher, FetchConfig, MediaResolver,
        PolitenessConfig, QualityTable, ResolveError, RetrieveError, Retriever, RetrieverConfig,
    },
    types::{ArtifactKind, DownloadSelection, MediaKind},
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    dispatcher: Arc<Dispatcher>,
    resolver: MediaResolver,
    retriever: Retriever,
}

fn harness(dir: &Path, max_pages_per_origin: u64) -> Harness {
    let gate = Arc::new(ComplianceGate::new(PolitenessConfig {
        enabled: true,
        user_agent: "MediaCrawlTest".to_string(),
        robots_timeout: Duration::from_secs(5),
    }));
    let credentials = Arc::new(CredentialStore::new(dir.join("cookies")));
    let fetch = FetchConfig {
        base_delay: Duration::ZERO,
        jitter_min: Duration::ZERO,
        jitter_max: Duration::ZERO,
        max_retries: 1,
        backoff_unit: Duration::from_millis(1),
        max_pages_per_origin,
        timeout: Duration::from_secs(5),
        exempt_hosts: Vec::new(),
        user_agents: vec!["MediaCrawlTest/1.0".to_string()],
        accept_language: "en".to_string(),
    };
    let dispatcher = Arc::new(Dispatcher::new(fetch, gate, credentials).unwrap());
    let resolver = MediaResolver::with_dispatcher(Arc::clone(&dispatcher), QualityTable::default());
    let retriever = Retriever::new(
        Arc::clone(&dispatcher),
        RetrieverConfig {
            video_dir: dir.join("video"),
            audio_dir: dir.join("audio"),
            chunk_size: 4,
            max_concurrent_downloads: 2,
            ffmpeg_path: dir.join("missing-ffmpeg"),
        },
    );

    Harness {
        dispatcher,
        resolver,
        retriever,
    }
}

/// Resolve a generic page with a `<video>` element and download its stream
#[tokio::test]
async fn test_resolve_and_download_generic_video() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/robots.txt");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(GET).path("/watch");
        then.status(200).header("content-type", "text/html").body(
            r#"<html><head><title>Launch Clip</title></head>
               <body><video src="/media/clip.mp4"></video></body></html>"#,
        );
    });
    let media = server.mock(|when, then| {
        when.method(GET).path("/media/clip.mp4");
        then.status(200).body("0123456789");
    });

    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 100);

    let descriptor = h.resolver.resolve(&server.url("/watch")).await.unwrap();
    assert_eq!(descriptor.kind, MediaKind::Video);
    assert_eq!(descriptor.title, "Launch Clip");
    assert_eq!(descriptor.video_url.as_deref(), Some(server.url("/media/clip.mp4").as_str()));
    assert!(!descriptor.login_required);

    let result = h
        .retriever
        .download(&descriptor, Default::default())
        .await
        .unwrap();

    let video = result.get(ArtifactKind::Video).unwrap();
    assert_eq!(video, dir.path().join("video").join("Launch Clip.mp4"));
    assert_eq!(std::fs::read(video).unwrap(), b"0123456789");
    assert!(result.get(ArtifactKind::Merged).is_none());
    media.assert();

    let stats = h.dispatcher.stats();
    assert_eq!(stats.failures, 0);
    assert_eq!(h.dispatcher.origin_requests(&server.base_url()).await, 2);
}

/// Both streams are kept when the merger is unavailable
#[tokio::test]
async fn test_video_and_audio_kept_without_merger() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/robots.txt");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(GET).path("/page");
        then.status(200).body(
            r#"<html><head><title>Session</title></head><body>
               <video><source src="v.mp4"></video>
               <audio src="a.mp3"></audio></body></html>"#,
        );
    });
    server.mock(|when, then| {
        when.method(GET).path("/v.mp4");
        then.status(200).body("video");
    });
    server.mock(|when, then| {
        when.method(GET).path("/a.mp3");
        then.status(200).body("audio");
    });

    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 100);

    let descriptor = h.resolver.resolve(&server.url("/page")).await.unwrap();
    assert!(descriptor.video_url.is_some());
    assert!(descriptor.audio_url.is_some());

    let result = h
        .retriever
        .download(&descriptor, Default::default())
        .await
        .unwrap();

    assert!(result.get(ArtifactKind::Video).is_some());
    assert!(result.get(ArtifactKind::Audio).is_some());
    assert!(result.get(ArtifactKind::Merged).is_none());
}

/// A disallowed page is refused before any page request goes out
#[tokio::test]
async fn test_robots_disallow_refuses_resolution() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/robots.txt");
        then.status(200).body("User-agent: *\nDisallow: /private\n");
    });
    let page = server.mock(|when, then| {
        when.method(GET).path("/private/clip");
        then.status(200).body("<video src=\"x.mp4\"></video>");
    });

    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 100);

    let err = h.resolver.resolve(&server.url("/private/clip")).await.unwrap_err();
    assert!(matches!(err, ResolveError::Dispatch(DispatchError::PolicyDenied(_))));
    assert!(err.is_refusal());
    page.assert_calls(0);
    assert_eq!(h.dispatcher.stats().policy_denials, 1);
}

/// The per-origin quota stops the stream download after the page fetch
#[tokio::test]
async fn test_quota_stops_download() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/robots.txt");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(GET).path("/watch");
        then.status(200).body(r#"<title>Quota</title><video src="/clip.mp4"></video>"#);
    });
    let media = server.mock(|when, then| {
        when.method(GET).path("/clip.mp4");
        then.status(200).body("data");
    });

    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 1);

    let descriptor = h.resolver.resolve(&server.url("/watch")).await.unwrap();
    let err = h
        .retriever
        .download(&descriptor, Default::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RetrieveError::Dispatch(DispatchError::QuotaExceeded { limit: 1, .. })
    ));
    media.assert_calls(0);
    assert!(!dir.path().join("video").join("Quota.mp4").exists());
}

/// A page without media resolves to an unknown descriptor with nothing to download
#[tokio::test]
async fn test_page_without_media() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/robots.txt");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(GET).path("/article");
        then.status(200).body("<html><head><title>Just Text</title></head><body><p>hi</p></body></html>");
    });

    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 100);

    let descriptor = h.resolver.resolve(&server.url("/article")).await.unwrap();
    assert_eq!(descriptor.kind, MediaKind::Unknown);
    assert_eq!(descriptor.title, "Just Text");
    assert!(!descriptor.has_streams());

    let request = mediacrawl::scraping::DownloadRequest {
        selection: DownloadSelection::Audio,
        ..Default::default()
    };
    let err = h.retriever.download(&descriptor, request).await.unwrap_err();
    assert!(matches!(err, RetrieveError::NothingToDownload));
}
