#![cfg(unix)]

mod common;

use std::fs;
use std::path::Path;

use common::{fake_backend, parse_json, Project};
use serde_json::Value;

fn pinned_project(prefix: &str) -> Project {
    let project = Project::new(prefix).with_recipe("pinned").with_payload();
    project.write("requirements.txt", "idna==3.6\nrequests==2.31.0\n");
    project
}

fn blob_json(layout: &Path, digest: &str) -> Value {
    let path = layout
        .join("blobs/sha256")
        .join(digest.trim_start_matches("sha256:"));
    serde_json::from_slice(&fs::read(path).expect("blob")).expect("json")
}

#[test]
fn build_writes_an_oci_layout_with_the_entrypoint() {
    let project = pinned_project("hp-build");
    let backend_dir = tempfile::tempdir().expect("backend");
    let backend = fake_backend(backend_dir.path(), 0);

    let assert = project
        .hp()
        .env("HP_CONTAINER_BACKEND", &backend)
        .args(["--json", "build"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    let details = &payload["details"];
    assert_eq!(details["image"], "hpath-sim:1.0");
    let stages: Vec<&str> = details["layers"]
        .as_array()
        .expect("layers")
        .iter()
        .filter_map(|layer| layer["stage"].as_str())
        .collect();
    assert_eq!(stages, ["base", "dependencies", "payload"]);

    let layout = project.root.join("dist/oci/hpath-sim-1.0");
    assert!(layout.join("oci-layout").is_file());
    let index: Value =
        serde_json::from_slice(&fs::read(layout.join("index.json")).expect("index")).expect("json");
    let manifest_digest = index["manifests"][0]["digest"].as_str().expect("digest");
    assert_eq!(details["manifest_digest"], manifest_digest);
    let manifest = blob_json(&layout, manifest_digest);
    let config = blob_json(&layout, manifest["config"]["digest"].as_str().expect("config"));
    assert_eq!(config["config"]["WorkingDir"], "/app");
    assert_eq!(
        config["config"]["Cmd"],
        serde_json::json!(["python", "-m", "restful.server"])
    );
    assert_eq!(config["config"]["Labels"]["hp.dependency-mode"], "pinned");

    let calls = fs::read_to_string(backend_dir.path().join("backend.log")).expect("log");
    assert!(calls
        .lines()
        .next()
        .is_some_and(|line| line.starts_with("create --platform linux/amd64 python:3.11-slim")));
}

#[test]
fn rebuilding_into_a_tarball_is_reproducible() {
    let project = pinned_project("hp-build-tar");
    let backend_dir = tempfile::tempdir().expect("backend");
    let backend = fake_backend(backend_dir.path(), 0);

    let mut digests = Vec::new();
    for out in ["first.tar", "second.tar"] {
        let assert = project
            .hp()
            .env("HP_CONTAINER_BACKEND", &backend)
            .args(["--json", "build", "--out", out, "--tag", "hpath-sim:ci"])
            .assert()
            .success();
        let payload = parse_json(&assert);
        assert_eq!(payload["details"]["image"], "hpath-sim:ci");
        digests.push(payload["details"]["manifest_digest"].clone());
        assert!(project.root.join(out).is_file());
    }
    assert_eq!(digests[0], digests[1]);

    let mut archive = tar::Archive::new(fs::File::open(project.root.join("first.tar")).expect("tar"));
    let names: Vec<String> = archive
        .entries()
        .expect("entries")
        .filter_map(Result::ok)
        .filter_map(|entry| entry.path().ok().map(|p| p.display().to_string()))
        .collect();
    assert!(names.iter().any(|name| name == "index.json"));
    assert!(names.iter().any(|name| name == "oci-layout"));
}

#[test]
fn missing_payload_fails_without_writing_an_image() {
    let project = Project::new("hp-build-no-app").with_recipe("pinned");
    project.write("requirements.txt", "idna==3.6\n");
    let backend_dir = tempfile::tempdir().expect("backend");
    let backend = fake_backend(backend_dir.path(), 0);

    let assert = project
        .hp()
        .env("HP_CONTAINER_BACKEND", &backend)
        .args(["--json", "build"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["code"], "HP500");
    assert_eq!(payload["details"]["reason"], "payload_missing");
    assert!(!project.root.join("dist").exists());
}

#[test]
fn failed_os_update_stops_the_build() {
    let project = pinned_project("hp-build-update");
    let backend_dir = tempfile::tempdir().expect("backend");
    let backend = fake_backend(backend_dir.path(), 100);

    let assert = project
        .hp()
        .env("HP_CONTAINER_BACKEND", &backend)
        .args(["--json", "build"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["code"], "HP600");
    assert_eq!(payload["details"]["reason"], "update_failed");
    assert!(!project.root.join("dist").exists());
    let calls = fs::read_to_string(backend_dir.path().join("backend.log")).expect("log");
    assert!(!calls.lines().any(|line| line.starts_with("export")));
}

#[test]
fn unknown_backend_is_a_user_error() {
    let project = pinned_project("hp-build-backend");
    let assert = project
        .hp()
        .env("HP_CONTAINER_BACKEND", "/nonexistent/docker")
        .args(["--json", "build"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["reason"], "backend_not_found");
}
