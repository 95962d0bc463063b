mod common;

use std::fs;

use common::{parse_json, Project};

fn compile_project(prefix: &str, requirements: &str) -> Project {
    let project = Project::new(prefix).with_recipe("compile").with_payload();
    project.write("requirements.in", requirements);
    project
}

#[test]
fn compile_writes_a_stable_lock() {
    let project = compile_project("hp-compile", "flask>=2\nrequests\n");
    let first = project
        .hp()
        .args(["--json", "compile"])
        .assert()
        .success();
    let payload = parse_json(&first);
    assert_eq!(payload["details"]["changed"], true);
    let mut pins: Vec<String> = payload["details"]["pins"]
        .as_array()
        .map(|pins| pins.iter().filter_map(|p| p.as_str().map(String::from)).collect())
        .unwrap_or_default();
    pins.sort();
    assert_eq!(
        pins,
        [
            "click==8.1.7",
            "flask==2.3.3",
            "idna==3.6",
            "itsdangerous==2.1.2",
            "requests==2.31.0"
        ]
    );
    let lock = project.read("requirements.txt");
    assert!(lock.contains("\nclick==8.1.7\n"));
    assert!(!lock.contains("click==7.1"));

    let second = project
        .hp()
        .args(["--json", "compile"])
        .assert()
        .success();
    let payload = parse_json(&second);
    assert_eq!(payload["details"]["changed"], false);
    assert_eq!(project.read("requirements.txt"), lock);
}

#[test]
fn compile_dry_run_leaves_the_lock_alone() {
    let project = compile_project("hp-compile-dry", "flask>=2\n");
    let assert = project
        .hp()
        .args(["--json", "compile", "--dry-run"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert!(payload["details"]["lockfile"]
        .as_str()
        .is_some_and(|text| text.contains("flask==2.3.3")));
    assert!(!project.root.join("requirements.txt").exists());
}

#[test]
fn conflicting_requirements_fail_without_writing_a_lock() {
    let project = compile_project("hp-conflict", "flask==2.3.3\nclick<8\n");
    let assert = project
        .hp()
        .args(["--json", "compile"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["code"], "HP300");
    assert_eq!(payload["details"]["reason"], "conflict");
    assert!(!project.root.join("requirements.txt").exists());
}

#[test]
fn sync_compiles_then_installs_the_closure() {
    let project = compile_project("hp-sync", "flask>=2\n");
    let site = project.root.join("site");
    let assert = project
        .hp()
        .args(["--json", "sync", "--target", "site"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["mode"], "compile");
    assert_eq!(payload["details"]["lock_changed"], true);
    assert_eq!(payload["details"]["plan"]["actions"].as_array().map(Vec::len), Some(3));

    assert!(site.join("flask/__init__.py").is_file());
    assert!(site.join("click-8.1.7.dist-info/RECORD").is_file());
    assert!(site.join("itsdangerous-2.1.2.dist-info/METADATA").is_file());
    assert!(project.read("requirements.txt").contains("flask==2.3.3"));

    let again = project
        .hp()
        .args(["--json", "sync", "--target", "site"])
        .assert()
        .success();
    let payload = parse_json(&again);
    assert_eq!(payload["details"]["plan"]["actions"], serde_json::json!([]));
    assert_eq!(
        payload["details"]["plan"]["unchanged"].as_array().map(Vec::len),
        Some(3)
    );
}

#[test]
fn sync_removes_what_the_lock_drops() {
    let project = compile_project("hp-sync-prune", "flask>=2\nrequests\n");
    project
        .hp()
        .args(["sync", "--target", "site"])
        .assert()
        .success();
    project.write("requirements.in", "flask>=2\n");

    let assert = project
        .hp()
        .args(["--json", "sync", "--target", "site"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    let actions = payload["details"]["plan"]["actions"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    assert!(actions
        .iter()
        .all(|action| action["action"] == "uninstall"));
    assert_eq!(actions.len(), 2);
    assert!(!project.root.join("site/requests").exists());
    assert!(!project.root.join("site/idna-3.6.dist-info").exists());
    assert!(project.root.join("site/flask").is_dir());
}

#[test]
fn sync_dry_run_reports_the_plan_only() {
    let project = compile_project("hp-sync-dry", "flask>=2\n");
    let assert = project
        .hp()
        .args(["sync", "--target", "site", "--dry-run"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    assert!(stdout.contains("+ flask==2.3.3"));
    assert!(!project.root.join("site/flask").exists());
    assert!(!project.root.join("requirements.txt").exists());
}

#[test]
fn install_uses_the_committed_lock_verbatim() {
    let project = Project::new("hp-install").with_recipe("pinned").with_payload();
    project.write("requirements.txt", "idna==3.6\nrequests==2.31.0\n");
    project
        .hp()
        .args(["install", "--target", "site"])
        .assert()
        .success();
    let site = project.root.join("site");
    assert!(site.join("requests/__init__.py").is_file());
    assert!(site.join("idna-3.6.dist-info").is_dir());
    assert!(!site.join("flask").exists());
    let installed: Vec<_> = fs::read_dir(&site)
        .expect("site")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".dist-info"))
        .collect();
    assert_eq!(installed.len(), 2);
}

#[test]
fn install_rejects_a_loose_lock() {
    let project = Project::new("hp-install-loose").with_recipe("pinned");
    project.write("requirements.txt", "requests>=2\n");
    let assert = project
        .hp()
        .args(["--json", "install", "--target", "site"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["code"], "HP200");
    assert_eq!(payload["details"]["reason"], "not_pinned");
    assert!(!project.root.join("site").join("requests").exists());
}

#[test]
fn install_rejects_a_lock_missing_dependencies() {
    let project = Project::new("hp-install-open").with_recipe("pinned");
    project.write("requirements.txt", "requests==2.31.0\n");
    let assert = project
        .hp()
        .args(["--json", "install", "--target", "site"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["code"], "HP200");
    assert_eq!(payload["details"]["reason"], "lock_not_closed");
}

#[test]
fn install_accepts_index_options_in_the_lock() {
    let project = Project::new("hp-install-index").with_recipe("pinned");
    project.write(
        "requirements.txt",
        "--index-url https://pypi.org/simple\n\nidna==3.6\nrequests==2.31.0\n",
    );
    project
        .hp()
        .args(["install", "--target", "site"])
        .assert()
        .success();
    assert!(project.root.join("site/requests/__init__.py").is_file());
}
