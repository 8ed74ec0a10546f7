use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::{Value, json};
use tempfile::TempDir;

fn write(root: &Path, stage: &str, id: &str, body: &Value) {
    let dir = root.join(stage);
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join(format!("{id}.json")), body.to_string()).expect("write fixture");
}

fn selection(pairs: Value) -> Value {
    json!({"num_bp": pairs.as_array().map_or(0, Vec::len), "pairs": pairs})
}

fn fixture(modern_pairs: Value) -> TempDir {
    let tmp = TempDir::new().expect("tempdir");
    let legacy = selection(json!([[3, 45], [10, 88]]));
    write(&tmp.path().join("legacy"), "find_bestpair_selection", "1EHZ", &legacy);
    write(
        &tmp.path().join("modern"),
        "find_bestpair_selection",
        "1EHZ",
        &selection(modern_pairs),
    );
    tmp
}

fn run(tmp: &TempDir, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_basepair_parity_runner"))
        .arg("--legacy-root")
        .arg(tmp.path().join("legacy"))
        .arg("--modern-root")
        .arg(tmp.path().join("modern"))
        .args(extra)
        .output()
        .expect("runner should execute")
}

#[test]
fn quiet_pass_exits_zero_without_output() {
    let tmp = fixture(json!([[45, 3], [88, 10]]));
    let output = run(&tmp, &["10", "--quiet"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(output.stdout.is_empty());
}

#[test]
fn selection_divergence_exits_one_and_writes_summary() {
    let tmp = fixture(json!([[3, 45], [10, 88], [12, 60]]));
    let summary_path = tmp.path().join("summary.json");
    let output = run(
        &tmp,
        &[
            "bestpair",
            "--summary-json",
            summary_path.to_str().expect("utf8 path"),
        ],
    );
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FAIL 1EHZ"), "{stdout}");
    assert!(stdout.contains("pipeline-defining stage failed"), "{stdout}");

    let summary: Value =
        serde_json::from_slice(&fs::read(&summary_path).expect("summary written")).expect("json");
    assert_eq!(summary["failed"], json!(1));
    assert_eq!(summary["stages_tested"], json!(["find_bestpair_selection"]));
}

#[test]
fn unknown_stage_is_a_configuration_error() {
    let tmp = fixture(json!([]));
    let output = run(&tmp, &["13"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown stage `13`"), "{stderr}");
}

#[test]
fn empty_worklist_is_a_configuration_error() {
    let tmp = TempDir::new().expect("tempdir");
    let output = run(&tmp, &["pairs", "-q"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("worklist is empty"));
}
