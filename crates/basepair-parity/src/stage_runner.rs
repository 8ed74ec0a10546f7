//! Runs stage comparisons for a worklist of structures.
//!
//! Each (structure, stage) evaluation moves NotStarted -> Loaded ->
//! Compared -> Passed | Failed, or ends in Skipped when either side's data
//! is unavailable. Workers evaluate whole structures independently and hand
//! back a self-contained [`StructureReport`]; reports are re-sorted into
//! worklist order before anything downstream sees them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, MismatchClass};
use crate::generator::{self, GeneratorSettings};
use crate::record_loader::{self, LoadOutcome, MissingData, MissingReason, Side};
use crate::stage_registry::StageId;
use crate::stages::{CompareContext, ComparisonCounts, ComparisonResult, compare_stage};

pub const STRUCTURE_REPORT_SCHEMA_VERSION: &str = "basepair.parity.structure_report.v1";

/// Mismatch strings kept per failing structure in a [`StageResult`].
pub const FAILURE_SAMPLE_MISMATCHES: usize = 3;
/// Failing structures listed per [`StageResult`].
pub const MAX_FAILURE_SAMPLES: usize = 20;
/// Structures dispatched per worker per batch.
const BATCH_FACTOR: usize = 4;

// ---------------------------------------------------------------------------
// Per-structure payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    MissingData(MissingData),
    GeneratorFailed { detail: String },
    UpstreamFailed { stage: StageId },
}

impl SkipReason {
    /// Stable bucket name used in skip counts.
    pub fn bucket(&self) -> &'static str {
        match self {
            Self::MissingData(missing) => missing.reason.as_str(),
            Self::GeneratorFailed { .. } => "generator_failed",
            Self::UpstreamFailed { .. } => "upstream_failed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingData(missing) => fmt::Display::fmt(missing, f),
            Self::GeneratorFailed { detail } => write!(f, "generator failed: {detail}"),
            Self::UpstreamFailed { stage } => write!(f, "upstream stage {stage} failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureStageRecord {
    pub stage: StageId,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default)]
    pub counts: ComparisonCounts,
    #[serde(default)]
    pub failure_count: usize,
    #[serde(default)]
    pub class_counts: BTreeMap<MismatchClass, u64>,
    /// Retained diagnostics; a bounded sample unless full retention was
    /// requested.
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl StructureStageRecord {
    fn skipped(stage: StageId, reason: SkipReason) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            skip_reason: Some(reason),
            counts: ComparisonCounts::default(),
            failure_count: 0,
            class_counts: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    fn compared(result: ComparisonResult, retention: DiagnosticRetention) -> Self {
        let mut class_counts = BTreeMap::new();
        for diagnostic in &result.diagnostics {
            *class_counts.entry(diagnostic.class()).or_insert(0) += 1;
        }
        let failure_count = result.failures().count();
        let diagnostics = match retention {
            DiagnosticRetention::All => result.diagnostics,
            DiagnosticRetention::Sample => result
                .diagnostics
                .into_iter()
                .filter(Diagnostic::is_failure)
                .take(FAILURE_SAMPLE_MISMATCHES)
                .collect(),
        };
        Self {
            stage: result.stage,
            status: if result.passed {
                StageStatus::Passed
            } else {
                StageStatus::Failed
            },
            skip_reason: None,
            counts: result.counts,
            failure_count,
            class_counts,
            diagnostics,
        }
    }

    fn panicked(stage: StageId, message: String) -> Self {
        let diagnostic = Diagnostic::WorkerPanic { message };
        Self {
            stage,
            status: StageStatus::Failed,
            skip_reason: None,
            counts: ComparisonCounts::default(),
            failure_count: 1,
            class_counts: BTreeMap::from([(diagnostic.class(), 1)]),
            diagnostics: vec![diagnostic],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureStatus {
    Passed,
    Failed,
    Skipped,
}

impl StructureStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Versioned result of evaluating every selected stage for one structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureReport {
    pub schema_version: String,
    pub worklist_index: usize,
    pub structure_id: String,
    pub stages: Vec<StructureStageRecord>,
}

impl StructureReport {
    /// Failed if any stage failed, skipped if no stage was compared.
    pub fn status(&self) -> StructureStatus {
        if self
            .stages
            .iter()
            .any(|record| record.status == StageStatus::Failed)
        {
            StructureStatus::Failed
        } else if self
            .stages
            .iter()
            .any(|record| record.status == StageStatus::Passed)
        {
            StructureStatus::Passed
        } else {
            StructureStatus::Skipped
        }
    }

    pub fn stage(&self, stage: StageId) -> Option<&StructureStageRecord> {
        self.stages.iter().find(|record| record.stage == stage)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticRetention {
    /// First few failing diagnostics per stage.
    #[default]
    Sample,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub legacy_root: PathBuf,
    pub modern_root: PathBuf,
    pub stages: Vec<StageId>,
    pub compare: CompareContext,
    pub skip_dependents: bool,
    pub retention: DiagnosticRetention,
    pub generator: Option<GeneratorSettings>,
}

impl RunnerSettings {
    pub fn new(legacy_root: PathBuf, modern_root: PathBuf, stages: Vec<StageId>) -> Self {
        Self {
            legacy_root,
            modern_root,
            stages,
            compare: CompareContext::default(),
            skip_dependents: false,
            retention: DiagnosticRetention::Sample,
            generator: None,
        }
    }
}

/// Evaluates all selected stages for one structure.
pub fn evaluate_structure(
    settings: &RunnerSettings,
    worklist_index: usize,
    structure_id: &str,
) -> StructureReport {
    let generator_failure = settings.generator.as_ref().and_then(|generator| {
        generator::regenerate(
            generator,
            structure_id,
            &settings.legacy_root,
            &settings.modern_root,
            &settings.stages,
        )
        .err()
        .map(|err| err.to_string())
    });

    let mut blocked: BTreeSet<StageId> = BTreeSet::new();
    let mut stages = Vec::with_capacity(settings.stages.len());
    for &stage in &settings.stages {
        let upstream = stage
            .definition()
            .depends_on
            .iter()
            .find(|dep| blocked.contains(*dep))
            .copied();
        let record = if let Some(detail) = &generator_failure {
            StructureStageRecord::skipped(
                stage,
                SkipReason::GeneratorFailed {
                    detail: detail.clone(),
                },
            )
        } else if settings.skip_dependents
            && let Some(upstream) = upstream
        {
            StructureStageRecord::skipped(stage, SkipReason::UpstreamFailed { stage: upstream })
        } else {
            guarded(stage, || evaluate_stage(settings, structure_id, stage))
        };
        let is_blocking = record.status == StageStatus::Failed
            || matches!(record.skip_reason, Some(SkipReason::UpstreamFailed { .. }));
        if is_blocking {
            blocked.insert(stage);
        }
        stages.push(record);
    }

    StructureReport {
        schema_version: STRUCTURE_REPORT_SCHEMA_VERSION.to_string(),
        worklist_index,
        structure_id: structure_id.to_string(),
        stages,
    }
}

fn evaluate_stage(
    settings: &RunnerSettings,
    structure_id: &str,
    stage: StageId,
) -> StructureStageRecord {
    let legacy = match record_loader::load(&settings.legacy_root, structure_id, stage, Side::Legacy)
    {
        LoadOutcome::Loaded(document) => document,
        LoadOutcome::Missing(missing) => {
            return StructureStageRecord::skipped(stage, SkipReason::MissingData(missing));
        }
    };
    let modern = match record_loader::load(&settings.modern_root, structure_id, stage, Side::Modern)
    {
        LoadOutcome::Loaded(document) => document,
        LoadOutcome::Missing(missing) => {
            return StructureStageRecord::skipped(stage, SkipReason::MissingData(missing));
        }
    };
    let result = compare_stage(stage, &legacy, &modern, &settings.compare);
    StructureStageRecord::compared(result, settings.retention)
}

/// Runs `evaluate`, converting a panic into a failed record whose only
/// diagnostic is the panic message.
pub fn guarded<F>(stage: StageId, evaluate: F) -> StructureStageRecord
where
    F: FnOnce() -> StructureStageRecord,
{
    match panic::catch_unwind(AssertUnwindSafe(evaluate)) {
        Ok(record) => record,
        Err(payload) => StructureStageRecord::panicked(stage, panic_message(payload.as_ref())),
    }
}

/// Replaces the process panic hook with one that prints nothing, for runs
/// whose only output is the exit code. [`guarded`] still captures the panic
/// message into the stage record.
pub fn silence_panic_output() {
    panic::set_hook(Box::new(|_| {}));
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PoolOutcome {
    /// Reports in worklist order, truncated after the first failure when
    /// stopping early.
    pub reports: Vec<StructureReport>,
    pub stopped_early: bool,
}

/// Evaluates `worklist` on a pool of `workers` threads.
///
/// Work is dispatched in batches; `on_report` sees every kept report in
/// worklist order. With `stop_on_first_failure` no batch is dispatched after
/// the one containing the first failing structure, and reports after that
/// structure are discarded.
pub fn run_pool<F>(
    settings: &RunnerSettings,
    worklist: &[String],
    workers: usize,
    stop_on_first_failure: bool,
    mut on_report: F,
) -> Result<PoolOutcome, rayon::ThreadPoolBuildError>
where
    F: FnMut(&StructureReport),
{
    let workers = workers.max(1);
    let pool = ThreadPoolBuilder::new().num_threads(workers).build()?;
    let batch_size = if stop_on_first_failure {
        workers
    } else {
        workers * BATCH_FACTOR
    };

    let indexed: Vec<(usize, &str)> = worklist
        .iter()
        .enumerate()
        .map(|(idx, id)| (idx, id.as_str()))
        .collect();
    let mut outcome = PoolOutcome {
        reports: Vec::with_capacity(worklist.len()),
        stopped_early: false,
    };
    for batch in indexed.chunks(batch_size) {
        let mut reports: Vec<StructureReport> = pool.install(|| {
            batch
                .par_iter()
                .map(|(idx, id)| evaluate_structure(settings, *idx, id))
                .collect()
        });
        reports.sort_by_key(|report| report.worklist_index);
        for report in reports {
            let failed = report.status() == StructureStatus::Failed;
            on_report(&report);
            outcome.reports.push(report);
            if failed && stop_on_first_failure {
                outcome.stopped_early = true;
                return Ok(outcome);
            }
        }
    }
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSample {
    pub structure_id: String,
    pub mismatches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageId,
    pub name: String,
    pub pipeline_defining: bool,
    pub attempted: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub skipped_by_reason: BTreeMap<String, u64>,
    pub mismatch_counts_by_class: BTreeMap<String, u64>,
    pub failures: Vec<FailureSample>,
}

impl StageResult {
    pub fn new(stage: StageId) -> Self {
        let definition = stage.definition();
        Self {
            stage,
            name: definition.name.to_string(),
            pipeline_defining: definition.pipeline_defining,
            attempted: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            skipped_by_reason: BTreeMap::new(),
            mismatch_counts_by_class: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, structure_id: &str, record: &StructureStageRecord) {
        self.attempted += 1;
        match record.status {
            StageStatus::Passed => self.passed += 1,
            StageStatus::Skipped => {
                self.skipped += 1;
                let bucket = record
                    .skip_reason
                    .as_ref()
                    .map_or("unknown", SkipReason::bucket);
                *self.skipped_by_reason.entry(bucket.to_string()).or_insert(0) += 1;
            }
            StageStatus::Failed => {
                self.failed += 1;
                if self.failures.len() < MAX_FAILURE_SAMPLES {
                    self.failures.push(FailureSample {
                        structure_id: structure_id.to_string(),
                        mismatches: record
                            .diagnostics
                            .iter()
                            .filter(|d| d.is_failure())
                            .take(FAILURE_SAMPLE_MISMATCHES)
                            .map(ToString::to_string)
                            .collect(),
                    });
                }
            }
        }
        for (class, count) in &record.class_counts {
            *self
                .mismatch_counts_by_class
                .entry(class.as_str().to_string())
                .or_insert(0) += count;
        }
    }

    /// Passed over compared (skips excluded); `None` when nothing compared.
    pub fn pass_rate(&self) -> Option<f64> {
        let compared = self.passed + self.failed;
        (compared > 0).then(|| self.passed as f64 / compared as f64)
    }
}

/// Folds structure reports, already in worklist order, into per-stage
/// results.
pub fn aggregate(stages: &[StageId], reports: &[StructureReport]) -> Vec<StageResult> {
    let mut results: Vec<StageResult> = stages.iter().copied().map(StageResult::new).collect();
    for report in reports {
        for result in &mut results {
            if let Some(record) = report.stage(result.stage) {
                result.record(&report.structure_id, record);
            }
        }
    }
    results
}

/// Whether a skip came from unreadable or corrupt input rather than absence.
pub fn is_corrupt_input(reason: &SkipReason) -> bool {
    matches!(
        reason,
        SkipReason::MissingData(MissingData {
            reason: MissingReason::Corrupt | MissingReason::Unreadable,
            ..
        })
    )
}
