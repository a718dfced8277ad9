//! End-to-end tests for the `plugforge` binary.
//!
//! Every run gets its own `XDG_CONFIG_HOME` so a developer's config file
//! never leaks into the results.

use std::path::Path;
use std::process::{Command, Output};

use plugforge_core::PluginState;
use plugforge_test_utils::{plugin, sample_plugin, state_json, write_fixture};

fn plugforge(config_home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_plugforge"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("PLUGFORGE_EXPORT_FORMAT")
        .env_remove("PLUGFORGE_IMPORT_TIMEOUT_SECS")
        .env("RUST_LOG", "warn")
        .output()
        .expect("plugforge binary runs")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn validate_reports_clean_plugin() {
    let tmp = tempfile::TempDir::new().unwrap();
    let input = write_fixture(tmp.path(), "kit.json", state_json(&sample_plugin()).as_bytes());

    let out = plugforge(tmp.path(), &["validate", input.to_str().unwrap()]);
    assert!(out.status.success(), "validate failed: {}", stderr(&out));
    assert!(stdout(&out).contains("0 error(s)"), "unexpected output: {}", stdout(&out));
}

#[test]
fn validate_json_fails_on_errors() {
    let tmp = tempfile::TempDir::new().unwrap();
    let input = write_fixture(tmp.path(), "empty.json", state_json(&plugin("")).as_bytes());

    let out = plugforge(tmp.path(), &["validate", "--json", input.to_str().unwrap()]);
    assert!(!out.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(report["isValid"], serde_json::Value::Bool(false));
}

#[test]
fn export_then_import_roundtrips() {
    let tmp = tempfile::TempDir::new().unwrap();
    let input = write_fixture(tmp.path(), "kit.json", state_json(&sample_plugin()).as_bytes());
    let archive = tmp.path().join("kit.tar.gz");
    let snapshot = tmp.path().join("back.json");

    let out = plugforge(
        tmp.path(),
        &[
            "export",
            input.to_str().unwrap(),
            "--format",
            "tar.gz",
            "--output",
            archive.to_str().unwrap(),
        ],
    );
    assert!(out.status.success(), "export failed: {}", stderr(&out));
    assert!(archive.exists());

    let out = plugforge(
        tmp.path(),
        &[
            "import",
            archive.to_str().unwrap(),
            "--output",
            snapshot.to_str().unwrap(),
        ],
    );
    assert!(out.status.success(), "import failed: {}", stderr(&out));

    let state: PluginState =
        serde_json::from_str(&std::fs::read_to_string(&snapshot).unwrap()).unwrap();
    let original = sample_plugin();
    assert_eq!(state.plugin_name, original.plugin_name);
    assert_eq!(state.commands[0].nodes, original.commands[0].nodes);
    assert_eq!(state.commands[0].edges, original.commands[0].edges);
}

#[test]
fn export_refuses_invalid_plugin() {
    let tmp = tempfile::TempDir::new().unwrap();
    let input = write_fixture(tmp.path(), "bad.json", state_json(&plugin("  ")).as_bytes());
    let archive = tmp.path().join("bad.zip");

    let out = plugforge(
        tmp.path(),
        &[
            "export",
            input.to_str().unwrap(),
            "--output",
            archive.to_str().unwrap(),
        ],
    );
    assert!(!out.status.success());
    assert!(
        stderr(&out).contains("--allow-invalid"),
        "expected refusal, got: {}",
        stderr(&out)
    );
    assert!(!archive.exists());
}

#[test]
fn simulate_and_render_read_archives() {
    let tmp = tempfile::TempDir::new().unwrap();
    let input = write_fixture(tmp.path(), "kit.json", state_json(&sample_plugin()).as_bytes());
    let archive = tmp.path().join("kit.zip");

    let out = plugforge(
        tmp.path(),
        &[
            "export",
            input.to_str().unwrap(),
            "--output",
            archive.to_str().unwrap(),
        ],
    );
    assert!(out.status.success(), "export failed: {}", stderr(&out));

    // Imported agent ids are fresh, so simulating the command fails.
    let out = plugforge(tmp.path(), &["simulate", archive.to_str().unwrap(), "review"]);
    assert!(!out.status.success());
    assert!(stdout(&out).contains("Agent not found"), "unexpected output: {}", stdout(&out));

    let out = plugforge(tmp.path(), &["render", archive.to_str().unwrap(), "/review"]);
    assert!(out.status.success(), "render failed: {}", stderr(&out));
    assert!(stdout(&out).contains("## Pipeline"));
}

#[test]
fn init_writes_config_once() {
    let tmp = tempfile::TempDir::new().unwrap();

    let out = plugforge(tmp.path(), &["init"]);
    assert!(out.status.success(), "init failed: {}", stderr(&out));
    let written = std::fs::read_to_string(tmp.path().join("plugforge/config.toml")).unwrap();
    assert!(written.contains("format = \"zip\""), "unexpected config: {written}");

    let out = plugforge(tmp.path(), &["init"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("--force"));

    let out = plugforge(tmp.path(), &["init", "--force"]);
    assert!(out.status.success());
}

#[test]
fn config_file_sets_export_format() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = tmp.path().join("plugforge");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), "[export]\nformat = \"tar.gz\"\n").unwrap();

    let work = tempfile::TempDir::new().unwrap();
    let input = write_fixture(work.path(), "kit.json", state_json(&sample_plugin()).as_bytes());
    let out = Command::new(env!("CARGO_BIN_EXE_plugforge"))
        .args(["export", input.to_str().unwrap()])
        .current_dir(work.path())
        .env("XDG_CONFIG_HOME", tmp.path())
        .env_remove("PLUGFORGE_EXPORT_FORMAT")
        .output()
        .unwrap();
    assert!(out.status.success(), "export failed: {}", stderr(&out));
    assert!(work.path().join("review-kit.tar.gz").exists());
}

#[test]
fn snapshot_with_unknown_node_type_still_loads() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut doc: serde_json::Value = serde_json::from_str(&state_json(&sample_plugin())).unwrap();
    doc["commands"][0]["nodes"]
        .as_array_mut()
        .unwrap()
        .push(serde_json::json!({ "id": "warp", "type": "teleport", "data": {} }));
    let input = write_fixture(tmp.path(), "kit.json", doc.to_string().as_bytes());

    let out = plugforge(tmp.path(), &["validate", input.to_str().unwrap()]);
    assert!(out.status.success(), "validate failed: {}", stderr(&out));
    assert!(stdout(&out).contains("0 error(s)"), "unexpected output: {}", stdout(&out));
}

#[test]
fn simulate_json_keeps_commands_with_the_same_name() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut state = sample_plugin();
    let mut twin = state.commands[0].clone();
    twin.id = "cmd-review-2".to_owned();
    state.commands.push(twin);
    let input = write_fixture(tmp.path(), "kit.json", state_json(&state).as_bytes());

    let out = plugforge(tmp.path(), &["simulate", "--json", input.to_str().unwrap()]);
    assert!(out.status.success(), "simulate failed: {}", stderr(&out));
    let results: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    for entry in results {
        assert_eq!(entry["command"], "/review");
        assert_eq!(entry["result"]["isValid"], serde_json::Value::Bool(true));
    }
}
