mod common;

use common::{fast_config, fetcher, init_logger, mirror, mirrored_path, sha1_hex};
use piston_fetch::game::installer::types::CancelToken;
use piston_fetch::game::mods::{install_mod_with, ModrinthApi};
use serde_json::{json, Value};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API: &str = "https://api.modrinth.com/v2";

fn cdn_url(project: &str, file: &str) -> String {
    format!("https://cdn.modrinth.com/data/{}/versions/1.0/{}", project, file)
}

fn version(id: &str, project: &str, file: &str, bytes: &[u8], requires: &[&str]) -> Value {
    json!({
        "id": id,
        "project_id": project,
        "version_number": "1.0",
        "game_versions": ["1.20.1"],
        "loaders": ["fabric"],
        "date_published": "2024-03-01T12:00:00Z",
        "files": [{
            "url": cdn_url(project, file),
            "filename": file,
            "hashes": {"sha1": sha1_hex(bytes)},
            "size": bytes.len(),
            "primary": true
        }],
        "dependencies": requires
            .iter()
            .map(|p| json!({"project_id": p, "dependency_type": "required"}))
            .collect::<Vec<_>>()
    })
}

async fn get(server: &MockServer, upstream: &str, body: ResponseTemplate, times: u64) {
    Mock::given(method("GET"))
        .and(path(mirrored_path("official", upstream)))
        .respond_with(body)
        .expect(times)
        .mount(server)
        .await;
}

async fn no_known_hashes(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(mirrored_path("official", &format!("{}/version_files", API))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn installed_dependency_is_not_downloaded_again() {
    init_logger();
    let server = MockServer::start().await;
    let root_bytes = b"root mod".to_vec();
    let lib_bytes = b"shared library mod".to_vec();

    let root = version("root1", "ROOT", "root.jar", &root_bytes, &["LIB"]);
    let lib = version("lib1", "LIB", "lib-1.0.jar", &lib_bytes, &[]);

    get(&server, &format!("{}/version/root1", API), ResponseTemplate::new(200).set_body_json(root), 1).await;
    get(&server, &cdn_url("ROOT", "root.jar"), ResponseTemplate::new(200).set_body_bytes(root_bytes), 1).await;
    get(&server, &format!("{}/project/LIB/version", API), ResponseTemplate::new(200).set_body_json(json!([lib])), 1).await;
    get(&server, &cdn_url("LIB", "lib-1.0.jar"), ResponseTemplate::new(200).set_body_bytes(lib_bytes.clone()), 0).await;
    no_known_hashes(&server).await;

    let dir = tempdir().unwrap();
    let mods_dir = dir.path().join("mods");
    std::fs::create_dir_all(&mods_dir).unwrap();
    // Same bytes under a different name
    std::fs::write(mods_dir.join("library-renamed.jar"), &lib_bytes).unwrap();

    let config = fast_config("official");
    let api = ModrinthApi::new(fetcher(vec![mirror("official", &server)], &config, CancelToken::never()));
    let installed = install_mod_with(&api, "root1", &mods_dir, 2, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(installed.path, Some(mods_dir.join("root.jar")));
    assert_eq!(installed.dependencies.satisfied, 1);
    assert!(installed.dependencies.downloaded.is_empty());
    assert!(installed.dependencies.is_complete());
    assert!(!mods_dir.join("lib-1.0.jar").exists());
}

#[tokio::test]
async fn dependency_cycle_resolves_each_project_once() {
    init_logger();
    let server = MockServer::start().await;
    let a_bytes = b"mod a".to_vec();
    let b_bytes = b"mod b".to_vec();

    let a = version("a1", "A", "a.jar", &a_bytes, &["B"]);
    let b = version("b1", "B", "b.jar", &b_bytes, &["A"]);

    get(&server, &format!("{}/version/a1", API), ResponseTemplate::new(200).set_body_json(a.clone()), 1).await;
    get(&server, &cdn_url("A", "a.jar"), ResponseTemplate::new(200).set_body_bytes(a_bytes), 1).await;
    get(&server, &format!("{}/project/B/version", API), ResponseTemplate::new(200).set_body_json(json!([b])), 1).await;
    get(&server, &cdn_url("B", "b.jar"), ResponseTemplate::new(200).set_body_bytes(b_bytes), 1).await;
    get(&server, &format!("{}/project/A/version", API), ResponseTemplate::new(200).set_body_json(json!([a])), 0).await;
    no_known_hashes(&server).await;

    let dir = tempdir().unwrap();
    let config = fast_config("official");
    let api = ModrinthApi::new(fetcher(vec![mirror("official", &server)], &config, CancelToken::never()));
    let installed = install_mod_with(&api, "a1", dir.path(), 4, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(installed.dependencies.downloaded, vec![dir.path().join("b.jar")]);
    assert!(installed.dependencies.is_complete());
    assert!(dir.path().join("a.jar").is_file());
}

#[tokio::test]
async fn api_outage_falls_back_to_mirror() {
    init_logger();
    let server = MockServer::start().await;
    let bytes = b"standalone".to_vec();
    let solo = version("s1", "SOLO", "solo.jar", &bytes, &[]);

    Mock::given(method("GET"))
        .and(path(mirrored_path("official", &format!("{}/version/s1", API))))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(mirrored_path("mcim", &format!("{}/version/s1", API))))
        .respond_with(ResponseTemplate::new(200).set_body_json(solo))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(mirrored_path("official", &cdn_url("SOLO", "solo.jar"))))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let config = fast_config("official");
    let api = ModrinthApi::new(fetcher(
        vec![mirror("official", &server), mirror("mcim", &server)],
        &config,
        CancelToken::never(),
    ));
    let installed = install_mod_with(&api, "s1", dir.path(), 2, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(installed.path, Some(dir.path().join("solo.jar")));
    assert!(installed.dependencies.is_complete());
}

#[tokio::test]
async fn root_file_name_cannot_leave_the_mods_folder() {
    init_logger();
    let server = MockServer::start().await;
    let bytes = b"escaping mod".to_vec();
    let evil = version("root1", "EVIL", "../escaped.jar", &bytes, &[]);

    get(
        &server,
        &format!("{}/version/root1", API),
        ResponseTemplate::new(200).set_body_json(evil),
        1,
    )
    .await;
    get(
        &server,
        &cdn_url("EVIL", "../escaped.jar"),
        ResponseTemplate::new(200).set_body_bytes(bytes),
        0,
    )
    .await;

    let dir = tempdir().unwrap();
    let mods_dir = dir.path().join("mods");
    std::fs::create_dir_all(&mods_dir).unwrap();

    let config = fast_config("official");
    let api = ModrinthApi::new(fetcher(
        vec![mirror("official", &server)],
        &config,
        CancelToken::never(),
    ));
    let result = install_mod_with(&api, "root1", &mods_dir, 2, CancelToken::never()).await;

    assert!(result.is_err());
    assert!(!dir.path().join("escaped.jar").exists());
    assert!(std::fs::read_dir(&mods_dir).unwrap().next().is_none());
}
