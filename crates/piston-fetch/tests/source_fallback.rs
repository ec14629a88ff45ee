mod common;

use common::{fast_config, fetcher, files_under, init_logger, mirror, mirrored_path, sha1_hex};
use piston_fetch::game::installer::core::fallback::ResourceRequest;
use piston_fetch::game::installer::sources::ResourceClass;
use piston_fetch::game::installer::types::CancelToken;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LIBRARY_URL: &str =
    "https://libraries.minecraft.net/com/example/demo/1.0/demo-1.0.jar";

#[tokio::test]
async fn not_found_on_official_falls_back_to_bmclapi() {
    init_logger();
    let server = MockServer::start().await;
    let body = b"demo library".to_vec();

    Mock::given(method("GET"))
        .and(path(mirrored_path("official", LIBRARY_URL)))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(mirrored_path("bmclapi", LIBRARY_URL)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let config = fast_config("official");
    let fetcher = fetcher(
        vec![mirror("official", &server), mirror("bmclapi", &server)],
        &config,
        CancelToken::never(),
    );
    assert_eq!(fetcher.source_keys(), vec!["official", "bmclapi"]);

    let dir = tempdir().unwrap();
    let target = dir.path().join("demo-1.0.jar");
    let request = ResourceRequest::new(ResourceClass::Library, LIBRARY_URL)
        .expect(Some(&sha1_hex(&body)), Some(body.len() as u64));

    let fetched = fetcher.fetch_file(&request, &target, None).await.unwrap();
    assert_eq!(fetched.used_source, "bmclapi");
    assert_eq!(fetched.attempted_sources, vec!["official", "bmclapi"]);
    assert_eq!(std::fs::read(&target).unwrap(), body);
}

#[tokio::test]
async fn digest_mismatch_is_not_retried_on_the_same_source() {
    init_logger();
    let server = MockServer::start().await;
    let body = b"the real bytes".to_vec();

    // Several attempts are allowed per source, but a bad digest uses one
    Mock::given(method("GET"))
        .and(path(mirrored_path("official", LIBRARY_URL)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(mirrored_path("bmclapi", LIBRARY_URL)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = fast_config("official");
    config.max_retries_per_source = 3;
    let fetcher = fetcher(
        vec![mirror("official", &server), mirror("bmclapi", &server)],
        &config,
        CancelToken::never(),
    );

    let dir = tempdir().unwrap();
    let target = dir.path().join("demo-1.0.jar");
    let request =
        ResourceRequest::new(ResourceClass::Library, LIBRARY_URL).expect(Some(&sha1_hex(&body)), None);

    let fetched = fetcher.fetch_file(&request, &target, None).await.unwrap();
    assert_eq!(fetched.used_source, "bmclapi");
    assert_eq!(std::fs::read(&target).unwrap(), body);
    assert_eq!(files_under(dir.path()), vec!["demo-1.0.jar"]);
}

#[tokio::test]
async fn transient_errors_are_retried_before_moving_on() {
    init_logger();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(mirrored_path("official", LIBRARY_URL)))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(mirrored_path("bmclapi", LIBRARY_URL)))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = fast_config("official");
    config.max_retries_per_source = 2;
    let fetcher = fetcher(
        vec![mirror("official", &server), mirror("bmclapi", &server)],
        &config,
        CancelToken::never(),
    );

    let dir = tempdir().unwrap();
    let target = dir.path().join("demo-1.0.jar");
    let request = ResourceRequest::new(ResourceClass::Library, LIBRARY_URL);

    let failure = fetcher.fetch_file(&request, &target, None).await.unwrap_err();
    assert_eq!(failure.attempted_sources, vec!["official", "bmclapi"]);
    assert_eq!(failure.errors.len(), 2);
    assert!(!failure.is_cancelled());
    assert!(!target.exists());
    assert!(files_under(dir.path()).is_empty());
}

#[tokio::test]
async fn primary_source_is_tried_first() {
    init_logger();
    let server = MockServer::start().await;
    let body = b"mirror copy".to_vec();

    Mock::given(method("GET"))
        .and(path(mirrored_path("bmclapi", LIBRARY_URL)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(mirrored_path("official", LIBRARY_URL)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(0)
        .mount(&server)
        .await;

    let config = fast_config("bmclapi");
    let fetcher = fetcher(
        vec![mirror("official", &server), mirror("bmclapi", &server)],
        &config,
        CancelToken::never(),
    );

    let request = ResourceRequest::new(ResourceClass::Library, LIBRARY_URL);
    let fetched = fetcher.fetch_bytes(&request).await.unwrap();
    assert_eq!(fetched.used_source, "bmclapi");
    assert_eq!(fetched.attempted_sources, vec!["bmclapi"]);
    assert_eq!(fetched.value, body);
}
