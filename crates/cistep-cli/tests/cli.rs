//! End-to-end tests driving the `cistep` binary against a state file.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use cistep_core::{ExecutionReport, NodeStatus};
use cistep_steps::api::{ImageStream, NamedTagEventList, Route, TagEvent, TagReference};
use cistep_steps::MemoryCluster;

const CONFIG: &str = r#"{
    "namespace": "ci-op-1234",
    "input_images": [
        {"base_image": {"namespace": "ocp", "name": "base", "tag": "4.0"}, "to": "root"}
    ],
    "release_tag": {"namespace": "ocp", "name": "release"}
}"#;

fn stream(namespace: &str, name: &str, tag: &str, image: &str) -> ImageStream {
    let mut is = ImageStream::new(namespace, name);
    is.status.public_docker_image_repository = format!("quay.io/{namespace}/{name}");
    is.spec.tags.push(TagReference {
        name: tag.to_string(),
        ..TagReference::default()
    });
    is.status.tags.push(NamedTagEventList {
        tag: tag.to_string(),
        items: vec![TagEvent {
            docker_image_reference: format!("quay.io/{namespace}/{name}@{image}"),
            image: image.to_string(),
        }],
    });
    is
}

struct Workspace {
    _dir: tempfile::TempDir,
    config: PathBuf,
    state: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("pipeline.json");
    std::fs::write(&config, CONFIG).unwrap();

    let cluster = MemoryCluster::new().with_public_registry("registry.ci.example");
    cluster.insert_image_stream(stream("ocp", "base", "4.0", "sha256:base"));
    cluster.insert_image_stream(stream("ocp", "release", "cli", "sha256:cli"));
    cluster.insert_route(Route::new("ocp", "rpm-repo", "rpms.ocp.example"));
    let state = dir.path().join("cluster.json");
    cluster.save(&state).unwrap();

    Workspace {
        _dir: dir,
        config,
        state,
    }
}

fn cistep(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cistep"))
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("CISTEP_NAMESPACE")
        .env_remove("CISTEP_PARALLELISM")
        .output()
        .expect("spawn cistep")
}

fn path(p: &Path) -> &str {
    p.to_str().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn graph_prints_every_configured_step() {
    let ws = workspace();
    let output = cistep(&["graph", "--config", path(&ws.config)]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "[input:root]\n[release-inputs]\n");
}

#[test]
fn run_then_rerun_skips_completed_steps() {
    let ws = workspace();

    let first = cistep(&["run", "-c", path(&ws.config), "--state", path(&ws.state)]);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    let out = stdout(&first);
    assert!(out.contains("2 step(s): 2 succeeded, 0 skipped, 0 failed"));
    assert!(out.contains("\nCLI=registry.ci.example/ci-op-1234/stable@sha256:cli"));
    assert!(out.contains("IMAGE_FORMAT=registry.ci.example/ci-op-1234/stable:${component}"));

    let restored = MemoryCluster::load(&ws.state).unwrap();
    assert!(restored.image_stream("ci-op-1234", "pipeline").is_some());
    assert!(restored.config_map("ci-op-1234", "release").is_some());

    let second = cistep(&["run", "-c", path(&ws.config), "--state", path(&ws.state)]);
    assert!(second.status.success());
    assert!(stdout(&second).contains("2 step(s): 0 succeeded, 2 skipped, 0 failed"));
}

#[test]
fn dry_run_prints_objects_and_leaves_state_untouched() {
    let ws = workspace();
    let before = std::fs::read_to_string(&ws.state).unwrap();

    let output = cistep(&[
        "run",
        "-c",
        path(&ws.config),
        "--state",
        path(&ws.state),
        "--dry-run",
    ]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("pipeline:root"));
    assert!(out.contains("(dry run)"));

    let after = MemoryCluster::load(&ws.state).unwrap();
    let before: cistep_steps::ClusterSnapshot = serde_json::from_str(&before).unwrap();
    assert_eq!(after.snapshot(), before);
}

#[test]
fn targeted_run_writes_a_report() {
    let ws = workspace();
    let report_path = ws.state.with_file_name("report.json");

    let output = cistep(&[
        "run",
        "-c",
        path(&ws.config),
        "--state",
        path(&ws.state),
        "-t",
        "[input:root]",
        "--report",
        path(&report_path),
    ]);
    assert!(output.status.success());

    let report: ExecutionReport =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report.nodes.len(), 1);
    assert_eq!(report.nodes[0].step, "[input:root]");
    assert_eq!(report.nodes[0].status, NodeStatus::Succeeded);
}

#[test]
fn unknown_target_fails_before_running_anything() {
    let ws = workspace();
    let before = std::fs::read_to_string(&ws.state).unwrap();

    let output = cistep(&[
        "run",
        "-c",
        path(&ws.config),
        "--state",
        path(&ws.state),
        "--target",
        "[nope]",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("could not select steps"));
    assert!(stderr.contains("[nope]"));

    let after: cistep_steps::ClusterSnapshot =
        serde_json::from_str(&std::fs::read_to_string(&ws.state).unwrap()).unwrap();
    let before: cistep_steps::ClusterSnapshot = serde_json::from_str(&before).unwrap();
    assert_eq!(after, before);
}

#[test]
fn failed_step_gives_non_zero_exit() {
    let ws = workspace();
    let cluster = MemoryCluster::new();
    cluster.insert_image_stream(stream("ocp", "release", "cli", "sha256:cli"));
    cluster.insert_route(Route::new("ocp", "rpm-repo", "rpms.ocp.example"));
    cluster.save(&ws.state).unwrap();

    let output = cistep(&["run", "-c", path(&ws.config), "--state", path(&ws.state)]);
    assert!(!output.status.success());
    let out = stdout(&output);
    assert!(out.contains("failed"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[input:root]"));
}
