mod common;

use common::{parse_json, Project};

#[test]
fn init_writes_the_default_recipe() {
    let project = Project::new("hp-init");
    project
        .hp()
        .args(["init", "--mode", "pinned"])
        .assert()
        .success();

    let recipe = project.read("hp.toml");
    assert!(recipe.contains("name = \"hpath-sim\""));
    assert!(recipe.contains("mode = \"pinned\""));
    assert!(recipe.contains("module = \"restful.server\""));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let project = Project::new("hp-init-exists").with_recipe("compile");
    let assert = project
        .hp()
        .args(["--json", "init"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["code"], "HP100");
    assert_eq!(payload["details"]["reason"], "recipe_exists");
    assert!(project.read("hp.toml").contains("find-links"));

    project
        .hp()
        .args(["init", "--force"])
        .assert()
        .success();
    assert!(!project.read("hp.toml").contains("find-links"));
}

#[test]
fn render_prints_the_pinned_dockerfile() {
    let project = Project::new("hp-render").with_recipe("pinned");
    let assert = project.hp().arg("render").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");

    let lines: Vec<&str> = stdout.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(lines[0], "FROM python:3.11-slim");
    assert!(stdout.contains("RUN export DEBIAN_FRONTEND=noninteractive"));
    assert!(stdout.contains("RUN pip install --no-cache-dir -r /tmp/hp/requirements.txt\n"));
    assert!(!stdout.contains("--no-deps"));
    assert!(!stdout.contains("pip-compile"));
    assert!(stdout.contains("COPY app /app\nWORKDIR /app\n"));
    assert!(stdout.ends_with("CMD [\"python\",\"-m\",\"restful.server\"]\n"));
}

#[test]
fn render_mode_override_uses_compile_then_sync() {
    let project = Project::new("hp-render-compile").with_recipe("pinned");
    project
        .hp()
        .args(["render", "--mode", "compile", "--out", "Dockerfile"])
        .assert()
        .success();
    let dockerfile = project.read("Dockerfile");
    assert!(dockerfile.contains("COPY requirements.in /tmp/hp/requirements.in"));
    assert!(dockerfile.contains("pip-compile --quiet --output-file /tmp/hp/requirements.txt"));
    assert!(dockerfile.contains("pip-sync /tmp/hp/requirements.txt"));
}

#[test]
fn missing_recipe_points_at_init() {
    let project = Project::new("hp-no-recipe");
    let assert = project.hp().args(["--json", "check"]).assert().code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["reason"], "missing_recipe");
    assert!(payload["details"]["hint"]
        .as_str()
        .is_some_and(|hint| hint.contains("hp init")));
}

#[test]
fn invalid_recipe_names_the_field() {
    let project = Project::new("hp-bad-recipe");
    project.write(
        "hp.toml",
        "[image]\nbase = \"python:latest\"\n\n[entrypoint]\nmodule = \"restful.server\"\n",
    );
    let assert = project.hp().args(["--json", "render"]).assert().code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["code"], "HP100");
    assert_eq!(payload["details"]["field"], "image.base");
}

#[test]
fn check_requires_a_compiled_lock_in_compile_mode() {
    let project = Project::new("hp-check-compile")
        .with_recipe("compile")
        .with_payload();
    project.write("requirements.in", "flask>=2\n");
    let assert = project.hp().args(["--json", "check"]).assert().code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["code"], "HP200");
    assert_eq!(payload["details"]["reason"], "missing_lock");
}

#[test]
fn check_reports_a_ready_image() {
    let project = Project::new("hp-check-ok")
        .with_recipe("pinned")
        .with_payload();
    project.write("requirements.txt", "idna==3.6\nrequests==2.31.0\n");
    let assert = project.hp().args(["--json", "check"]).assert().success();
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["details"]["image"], "hpath-sim:1.0");
    assert_eq!(payload["details"]["pins"], 2);
    assert_eq!(payload["details"]["workdir"], "/app");
    assert_eq!(
        payload["details"]["cmd"],
        serde_json::json!(["python", "-m", "restful.server"])
    );
}

#[test]
fn check_flags_a_missing_payload() {
    let project = Project::new("hp-check-payload").with_recipe("pinned");
    project.write("requirements.txt", "idna==3.6\n");
    let assert = project.hp().args(["check"]).assert().code(1);
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("HP500  application payload is missing"));
    assert!(stderr.contains("The application payload directory does not exist."));
}
