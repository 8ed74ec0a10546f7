use std::fs;
use std::path::Path;

use serde_json::{Value, json};
use tempfile::TempDir;

use basepair_parity::log_events::{ERROR_CORRUPT_INPUT, ERROR_MISSING_DATA, ValidationLogEvent};
use basepair_parity::orchestrator::{
    OutputMode, QuietObserver, SummaryObserver, ValidationConfig, ValidationRun, run_validation,
};
use basepair_parity::report::DifferencesReport;
use basepair_parity::stage_registry::StageId;
use basepair_parity::stage_runner::{SkipReason, StageStatus, StructureStatus};
use basepair_parity::worklist::WorklistSource;

struct Trees {
    tmp: TempDir,
    config: ValidationConfig,
}

impl Trees {
    fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let mut config = ValidationConfig::with_defaults();
        config.legacy_root = tmp.path().join("legacy");
        config.modern_root = tmp.path().join("modern");
        config.stages = vec![StageId::ResidueIndices];
        config.output_mode = OutputMode::Quiet;
        config.workers = 1;
        Self { tmp, config }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn write(&self, legacy: bool, stage: StageId, id: &str, body: &str) {
        let root = if legacy {
            &self.config.legacy_root
        } else {
            &self.config.modern_root
        };
        let dir = root.join(stage.as_str());
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(format!("{id}.json")), body).expect("write fixture");
    }

    fn residues(&self, id: &str, legacy_end: i64, modern_end: i64) {
        let body = |end: i64| json!([{"residue_idx": 1, "start_atom": 1, "end_atom": end}]).to_string();
        self.write(true, StageId::ResidueIndices, id, &body(legacy_end));
        self.write(false, StageId::ResidueIndices, id, &body(modern_end));
    }

    fn run(&self, config: &ValidationConfig) -> ValidationRun {
        run_validation(config, &mut QuietObserver).expect("run should complete")
    }
}

fn ids(count: usize) -> Vec<String> {
    (0..count).map(|n| format!("S{n:03}")).collect()
}

// ===========================================================================
// Skips
// ===========================================================================

#[test]
fn absent_and_corrupt_files_skip_with_distinct_reasons() {
    let trees = Trees::new();
    trees.residues("GOOD", 20, 20);
    trees.write(true, StageId::ResidueIndices, "ABSENT", "[]");
    trees.write(true, StageId::ResidueIndices, "CORRUPT", "[]");
    trees.write(false, StageId::ResidueIndices, "CORRUPT", "{not json");

    let mut config = trees.config.clone();
    config.worklist = WorklistSource::Explicit {
        ids: vec!["GOOD".into(), "ABSENT".into(), "CORRUPT".into()],
    };
    let run = trees.run(&config);
    assert_eq!(run.exit_code(), 0);
    assert_eq!(
        (run.summary.passed, run.summary.failed, run.summary.skipped),
        (1, 0, 2)
    );

    let reason = |idx: usize| -> SkipReason {
        let record = &run.reports[idx].stages[0];
        assert_eq!(record.status, StageStatus::Skipped);
        record.skip_reason.clone().expect("skip reason")
    };
    assert_ne!(reason(1).to_string(), reason(2).to_string());
    assert_eq!(run.summary.stage_results[0].skipped_by_reason.get("absent"), Some(&1));
    assert_eq!(run.summary.stage_results[0].skipped_by_reason.get("corrupt"), Some(&1));

    let codes: Vec<Option<&str>> = run
        .events
        .iter()
        .filter(|event| event.event == "structure_stage")
        .map(|event| event.error_code.as_deref())
        .collect();
    assert_eq!(codes, vec![Some(ERROR_MISSING_DATA), Some(ERROR_CORRUPT_INPUT)]);
}

// ===========================================================================
// Parallelism
// ===========================================================================

fn mixed_trees(count: usize) -> Trees {
    let trees = Trees::new();
    for (n, id) in ids(count).iter().enumerate() {
        match n % 4 {
            0 | 1 => trees.residues(id, 20, 20),
            2 => trees.residues(id, 20, 21),
            _ => trees.write(true, StageId::ResidueIndices, id, "[]"),
        }
    }
    trees
}

#[test]
fn worker_count_does_not_change_results() {
    let trees = mixed_trees(24);
    let mut config = trees.config.clone();
    config.worklist = WorklistSource::Explicit { ids: ids(24) };

    config.workers = 1;
    let sequential = trees.run(&config);
    config.workers = 8;
    let parallel = trees.run(&config);

    let counts = |run: &ValidationRun| {
        (run.summary.passed, run.summary.failed, run.summary.skipped)
    };
    assert_eq!(counts(&sequential), (12, 6, 6));
    assert_eq!(counts(&sequential), counts(&parallel));
    assert_eq!(sequential.summary.stage_results, parallel.summary.stage_results);
    assert_eq!(sequential.reports, parallel.reports);
    assert_eq!(sequential.summary.run_id, parallel.summary.run_id);
}

#[test]
fn stop_on_first_failure_truncates_at_the_failing_structure() {
    let trees = Trees::new();
    let worklist = ids(10);
    for (n, id) in worklist.iter().enumerate() {
        // Structure 3 of 10 fails first; a later one fails too.
        let modern_end = if n == 2 || n == 6 { 21 } else { 20 };
        trees.residues(id, 20, modern_end);
    }

    let mut firsts = Vec::new();
    for workers in [1, 8] {
        let mut config = trees.config.clone();
        config.worklist = WorklistSource::Explicit {
            ids: worklist.clone(),
        };
        config.stop_on_first_failure = true;
        config.workers = workers;
        let run = trees.run(&config);

        assert_eq!(run.summary.failed, 1);
        assert_eq!(run.summary.passed, 2);
        assert!(run.summary.stopped_early);
        assert_eq!(run.reports.len(), 3);
        assert_eq!(
            run.reports.last().map(|r| r.status()),
            Some(StructureStatus::Failed)
        );
        assert_eq!(run.exit_code(), 1);
        firsts.push(run.summary.first_failure.clone());
    }
    assert_eq!(firsts, vec![Some("S002".to_string()), Some("S002".to_string())]);
}

// ===========================================================================
// Persistence
// ===========================================================================

#[test]
fn report_summary_and_log_files_are_written() {
    let trees = mixed_trees(8);
    let mut config = trees.config.clone();
    config.worklist = WorklistSource::Discover;
    config.report_path = Some(trees.root().join("out/differences.json"));
    config.summary_json_path = Some(trees.root().join("out/summary.json"));
    config.log_jsonl_path = Some(trees.root().join("out/events.jsonl"));

    let run = trees.run(&config);
    // Discovery only sees ids with files on both trees.
    assert_eq!(run.summary.total_structures, 6);
    assert_eq!(run.summary.failed, 2);

    let report: DifferencesReport = serde_json::from_slice(
        &fs::read(trees.root().join("out/differences.json")).expect("report"),
    )
    .expect("report json");
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.tested_stages, vec![StageId::ResidueIndices]);
    assert!(report.failures.iter().all(|f| !f.mismatches.is_empty()));

    let summary: Value = serde_json::from_slice(
        &fs::read(trees.root().join("out/summary.json")).expect("summary"),
    )
    .expect("summary json");
    assert_eq!(summary["failed"], json!(2));
    assert_eq!(summary["run_id"], json!(run.summary.run_id));

    let lines = fs::read_to_string(trees.root().join("out/events.jsonl")).expect("events");
    let events: Vec<ValidationLogEvent> = lines
        .lines()
        .map(|line| serde_json::from_str(line).expect("event json"))
        .collect();
    assert_eq!(events.first().map(|e| e.event.as_str()), Some("run_start"));
    assert_eq!(events.last().map(|e| e.outcome.as_str()), Some("fail"));
    assert_eq!(events, run.events);
}

#[test]
fn summary_mode_prints_table_and_failures() {
    let trees = mixed_trees(4);
    let mut config = trees.config.clone();
    config.worklist = WorklistSource::Explicit { ids: ids(4) };
    config.output_mode = OutputMode::Summary;

    let mut out = Vec::new();
    let run = {
        let mut observer = SummaryObserver::new(&mut out);
        run_validation(&config, &mut observer).expect("run")
    };
    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(run.summary.failed, 1);
    assert!(text.contains("FAIL S002 [residue_indices]"), "{text}");
    assert!(text.contains("progress: 4/4"), "{text}");
    assert!(text.contains("structures: 4 total, 2 passed, 1 failed, 1 skipped"), "{text}");
}
