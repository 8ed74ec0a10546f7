//! Run-level summary, the persisted differences report, and the console
//! summary table.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage_registry::StageId;
use crate::stage_runner::{StageResult, StageStatus, StructureReport, StructureStatus};

pub const SUMMARY_SCHEMA_VERSION: &str = "basepair.parity.summary.v1";
pub const DIFFERENCES_REPORT_SCHEMA_VERSION: &str = "basepair.parity.differences.v1";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to serialize `{path}`: {source}")]
    Serialize {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to write `{path}`: {source}")]
    Write { path: String, source: io::Error },
}

pub(crate) fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Writes through a sibling temp file so readers never see a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ReportError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| ReportError::Serialize {
        path: path.display().to_string(),
        source,
    })?;
    write_atomic(path, &bytes).map_err(|source| ReportError::Write {
        path: path.display().to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub schema_version: String,
    pub run_id: String,
    pub generated_at_utc: String,
    /// Worklist size, including structures skipped on resume.
    pub total_structures: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Structures not evaluated because the checkpoint already had them
    /// passing.
    pub resumed: usize,
    pub stages_tested: Vec<StageId>,
    pub stage_results: Vec<StageResult>,
    pub stopped_early: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<String>,
}

impl ValidationSummary {
    pub fn new(
        run_id: &str,
        total_structures: usize,
        resumed: usize,
        stages: &[StageId],
        reports: &[StructureReport],
        stage_results: Vec<StageResult>,
    ) -> Self {
        let count = |status| reports.iter().filter(|r| r.status() == status).count();
        Self {
            schema_version: SUMMARY_SCHEMA_VERSION.to_string(),
            run_id: run_id.to_string(),
            generated_at_utc: now_utc(),
            total_structures,
            passed: count(StructureStatus::Passed),
            failed: count(StructureStatus::Failed),
            skipped: count(StructureStatus::Skipped),
            resumed,
            stages_tested: stages.to_vec(),
            stage_results,
            stopped_early: false,
            first_failure: reports
                .iter()
                .find(|r| r.status() == StructureStatus::Failed)
                .map(|r| r.structure_id.clone()),
            report_path: None,
            checkpoint_path: None,
        }
    }

    /// Passed over compared structures; skips never count against it.
    pub fn pass_rate(&self) -> Option<f64> {
        let compared = self.passed + self.failed;
        (compared > 0).then(|| self.passed as f64 / compared as f64)
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

fn percent(rate: Option<f64>) -> String {
    rate.map_or_else(|| "-".to_string(), |rate| format!("{:.2}%", rate * 100.0))
}

/// Renders the per-stage table plus the structure totals line.
pub fn render_table(summary: &ValidationSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<30} {:>9} {:>7} {:>7} {:>8} {:>10}",
        "stage", "attempted", "passed", "failed", "skipped", "pass rate"
    );
    let mut defining_failed = false;
    for result in &summary.stage_results {
        let marker = if result.pipeline_defining && result.failed > 0 {
            defining_failed = true;
            " *"
        } else {
            ""
        };
        let label = format!("{:>2} {}{marker}", result.stage.number(), result.stage);
        let _ = writeln!(
            out,
            "{label:<30} {:>9} {:>7} {:>7} {:>8} {:>10}",
            result.attempted,
            result.passed,
            result.failed,
            result.skipped,
            percent(result.pass_rate()),
        );
    }
    let _ = writeln!(
        out,
        "structures: {} total, {} passed, {} failed, {} skipped, {} resumed (pass rate {})",
        summary.total_structures,
        summary.passed,
        summary.failed,
        summary.skipped,
        summary.resumed,
        percent(summary.pass_rate()),
    );
    if summary.stopped_early
        && let Some(first) = &summary.first_failure
    {
        let _ = writeln!(out, "stopped at first failure: {first}");
    }
    if defining_failed {
        let _ = writeln!(out, "* pipeline-defining stage failed");
    }
    out
}

// ---------------------------------------------------------------------------
// Differences report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferenceRecord {
    pub structure_id: String,
    pub stage: StageId,
    pub stage_name: String,
    pub mismatches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferencesReport {
    pub schema_version: String,
    pub generated_at_utc: String,
    pub run_id: String,
    pub total_structures: usize,
    pub tested_stages: Vec<StageId>,
    pub failures: Vec<DifferenceRecord>,
    /// Non-failing findings such as duplicate pair conflicts.
    pub warnings: Vec<DifferenceRecord>,
}

impl DifferencesReport {
    pub fn from_reports(
        run_id: &str,
        total_structures: usize,
        stages: &[StageId],
        reports: &[StructureReport],
    ) -> Self {
        let mut failures = Vec::new();
        let mut warnings = Vec::new();
        for report in reports {
            for record in &report.stages {
                let entry = |mismatches: Vec<String>| DifferenceRecord {
                    structure_id: report.structure_id.clone(),
                    stage: record.stage,
                    stage_name: record.stage.definition().name.to_string(),
                    mismatches,
                };
                let (failing, warning): (Vec<_>, Vec<_>) =
                    record.diagnostics.iter().partition(|d| d.is_failure());
                if record.status == StageStatus::Failed {
                    failures.push(entry(failing.iter().map(ToString::to_string).collect()));
                }
                if !warning.is_empty() {
                    warnings.push(entry(warning.iter().map(ToString::to_string).collect()));
                }
            }
        }
        Self {
            schema_version: DIFFERENCES_REPORT_SCHEMA_VERSION.to_string(),
            generated_at_utc: now_utc(),
            run_id: run_id.to_string(),
            total_structures,
            tested_stages: stages.to_vec(),
            failures,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;
    use crate::diagnostics::Diagnostic;
    use crate::record_loader::Side;
    use crate::stage_runner::{STRUCTURE_REPORT_SCHEMA_VERSION, StructureStageRecord, aggregate};
    use crate::stages::ComparisonCounts;

    fn record(stage: StageId, status: StageStatus, diagnostics: Vec<Diagnostic>) -> StructureStageRecord {
        StructureStageRecord {
            stage,
            status,
            skip_reason: None,
            counts: ComparisonCounts::default(),
            failure_count: diagnostics.iter().filter(|d| d.is_failure()).count(),
            class_counts: BTreeMap::new(),
            diagnostics,
        }
    }

    fn structure(idx: usize, id: &str, stages: Vec<StructureStageRecord>) -> StructureReport {
        StructureReport {
            schema_version: STRUCTURE_REPORT_SCHEMA_VERSION.to_string(),
            worklist_index: idx,
            structure_id: id.to_string(),
            stages,
        }
    }

    fn fixture() -> Vec<StructureReport> {
        vec![
            structure(
                0,
                "1EHZ",
                vec![record(StageId::FindBestpairSelection, StageStatus::Passed, vec![
                    Diagnostic::DuplicateConflict {
                        key: "(3,45)".to_string(),
                        side: Side::Legacy,
                    },
                ])],
            ),
            structure(
                1,
                "1H4S",
                vec![record(StageId::FindBestpairSelection, StageStatus::Failed, vec![
                    Diagnostic::CountMismatch {
                        what: "selected pair".to_string(),
                        legacy: 2,
                        modern: 3,
                    },
                ])],
            ),
        ]
    }

    #[test]
    fn summary_counts_and_marks_pipeline_defining_failures() {
        let reports = fixture();
        let stages = [StageId::FindBestpairSelection];
        let summary = ValidationSummary::new(
            "parity-000000000000",
            2,
            0,
            &stages,
            &reports,
            aggregate(&stages, &reports),
        );
        assert_eq!((summary.passed, summary.failed, summary.skipped), (1, 1, 0));
        assert_eq!(summary.first_failure.as_deref(), Some("1H4S"));
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(summary.pass_rate(), Some(0.5));

        let table = render_table(&summary);
        assert!(table.contains("10 find_bestpair_selection *"));
        assert!(table.contains("pipeline-defining stage failed"));
    }

    #[test]
    fn differences_report_separates_failures_from_warnings() {
        let reports = fixture();
        let report = DifferencesReport::from_reports(
            "parity-000000000000",
            2,
            &[StageId::FindBestpairSelection],
            &reports,
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].structure_id, "1H4S");
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].structure_id, "1EHZ");

        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("out").join("differences.json");
        write_json(&path, &report).expect("write");
        let loaded: DifferencesReport =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("decode");
        assert_eq!(loaded, report);
    }

    #[test]
    fn skipped_only_run_has_no_pass_rate_and_succeeds() {
        let summary = ValidationSummary::new("parity-x", 3, 0, &[], &[], Vec::new());
        assert_eq!(summary.pass_rate(), None);
        assert_eq!(summary.exit_code(), 0);
    }
}
