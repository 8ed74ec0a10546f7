//! Top-level validation run: resolves the worklist, drives the stage runner,
//! and persists the summary, differences report, checkpoint and log events
//! the caller asked for.
//!
//! Console output goes through a [`ValidationObserver`]; the output mode
//! only selects the observer and never changes what is compared.

use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::generator::GeneratorSettings;
use crate::log_events::{ERROR_MISMATCH, ValidationLogEvent, write_jsonl};
use crate::report::{DifferencesReport, ReportError, ValidationSummary, render_table, write_json};
use crate::stage_registry::{RegistryError, StageId};
use crate::stage_runner::{
    DiagnosticRetention, RunnerSettings, StageStatus, StructureReport, StructureStatus, aggregate,
    run_pool,
};
use crate::stages::CompareContext;
use crate::tolerances::ToleranceError;
use crate::worklist::{self, WorklistError, WorklistLimits, WorklistSource};

pub const DEFAULT_LEGACY_ROOT: &str = "data/json_legacy";
pub const DEFAULT_MODERN_ROOT: &str = "data/json";
/// Structures between progress lines in summary mode.
pub const HEARTBEAT_INTERVAL: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Quiet,
    #[default]
    Summary,
    Verbose,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Tolerance(#[from] ToleranceError),
    #[error(transparent)]
    Worklist(#[from] WorklistError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("failed to write log events `{path}`: {source}")]
    Log { path: String, source: io::Error },
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    pub legacy_root: PathBuf,
    pub modern_root: PathBuf,
    pub stages: Vec<StageId>,
    pub worklist: WorklistSource,
    pub limits: WorklistLimits,
    pub workers: usize,
    pub output_mode: OutputMode,
    pub stop_on_first_failure: bool,
    pub skip_dependents: bool,
    pub report_path: Option<PathBuf>,
    pub checkpoint_path: Option<PathBuf>,
    pub resume: bool,
    pub log_jsonl_path: Option<PathBuf>,
    pub summary_json_path: Option<PathBuf>,
    pub compare: CompareContext,
    pub generator: Option<GeneratorSettings>,
}

impl ValidationConfig {
    pub fn with_defaults() -> Self {
        Self {
            legacy_root: PathBuf::from(DEFAULT_LEGACY_ROOT),
            modern_root: PathBuf::from(DEFAULT_MODERN_ROOT),
            stages: StageId::ALL.to_vec(),
            worklist: WorklistSource::Discover,
            limits: WorklistLimits::default(),
            workers: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            output_mode: OutputMode::Summary,
            stop_on_first_failure: false,
            skip_dependents: false,
            report_path: None,
            checkpoint_path: None,
            resume: false,
            log_jsonl_path: None,
            summary_json_path: None,
            compare: CompareContext::default(),
            generator: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stages.is_empty() {
            return Err(RegistryError::EmptySelection.into());
        }
        if self.workers == 0 {
            return Err(ValidationError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.legacy_root.as_os_str().is_empty() || self.modern_root.as_os_str().is_empty() {
            return Err(ValidationError::InvalidConfig(
                "legacy and modern roots must not be empty".to_string(),
            ));
        }
        if self.resume && self.checkpoint_path.is_none() {
            return Err(ValidationError::InvalidConfig(
                "--resume requires a checkpoint path".to_string(),
            ));
        }
        if let Some(generator) = &self.generator
            && (generator.modern_exe.as_os_str().is_empty()
                || generator.legacy_exe.as_os_str().is_empty())
        {
            return Err(ValidationError::InvalidConfig(
                "regeneration requires both generator executables".to_string(),
            ));
        }
        self.compare.tolerances.validate()?;
        Ok(())
    }

    fn retention(&self) -> DiagnosticRetention {
        if self.report_path.is_some() || self.output_mode == OutputMode::Verbose {
            DiagnosticRetention::All
        } else {
            DiagnosticRetention::Sample
        }
    }
}

/// `parity-` plus the first 12 hex digits of a SHA-256 over the stage list
/// and the worklist.
pub fn derive_run_id(stages: &[StageId], worklist: &[String]) -> String {
    let mut hasher = Sha256::new();
    for stage in stages {
        hasher.update(stage.as_str().as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"\n");
    for id in worklist {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("parity-{hex}")
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Presentation hooks called from the orchestrating thread, in worklist
/// order.
pub trait ValidationObserver {
    fn on_run_start(&mut self, _run_id: &str, _stages: &[StageId], _structures: usize) {}
    fn on_structure(&mut self, _report: &StructureReport, _done: usize, _total: usize) {}
    fn on_run_end(&mut self, _summary: &ValidationSummary) {}
}

#[derive(Debug, Default)]
pub struct QuietObserver;

impl ValidationObserver for QuietObserver {}

pub struct SummaryObserver<W: Write> {
    out: W,
    heartbeat: usize,
}

impl<W: Write> SummaryObserver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }
}

impl<W: Write> ValidationObserver for SummaryObserver<W> {
    fn on_run_start(&mut self, run_id: &str, stages: &[StageId], structures: usize) {
        let _ = writeln!(
            self.out,
            "{run_id}: {structures} structures, {} stages",
            stages.len()
        );
    }

    fn on_structure(&mut self, report: &StructureReport, done: usize, total: usize) {
        if report.status() == StructureStatus::Failed {
            let first = report
                .stages
                .iter()
                .find(|record| record.status == StageStatus::Failed);
            if let Some(record) = first {
                let _ = writeln!(
                    self.out,
                    "FAIL {} [{}] {}",
                    report.structure_id,
                    record.stage,
                    record
                        .diagnostics
                        .first()
                        .map(ToString::to_string)
                        .unwrap_or_default()
                );
            }
        }
        if done % self.heartbeat == 0 || done == total {
            let _ = writeln!(self.out, "progress: {done}/{total}");
        }
    }

    fn on_run_end(&mut self, summary: &ValidationSummary) {
        let _ = write!(self.out, "{}", render_table(summary));
        let _ = self.out.flush();
    }
}

pub struct VerboseObserver<W: Write> {
    out: W,
}

impl<W: Write> VerboseObserver<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> ValidationObserver for VerboseObserver<W> {
    fn on_run_start(&mut self, run_id: &str, stages: &[StageId], structures: usize) {
        let names: Vec<&str> = stages.iter().map(|stage| stage.as_str()).collect();
        let _ = writeln!(
            self.out,
            "{run_id}: {structures} structures, stages {}",
            names.join(",")
        );
    }

    fn on_structure(&mut self, report: &StructureReport, done: usize, total: usize) {
        let _ = writeln!(
            self.out,
            "[{done}/{total}] {} {}",
            report.structure_id,
            report.status().as_str()
        );
        for record in &report.stages {
            let counts = &record.counts;
            match (&record.status, &record.skip_reason) {
                (StageStatus::Skipped, Some(reason)) => {
                    let _ = writeln!(self.out, "  {:<24} skipped: {reason}", record.stage.as_str());
                }
                (status, _) => {
                    let _ = writeln!(
                        self.out,
                        "  {:<24} {:<7} legacy={} modern={} common={} missing={} extra={} mismatched={}",
                        record.stage.as_str(),
                        if *status == StageStatus::Passed { "passed" } else { "failed" },
                        counts.legacy_total,
                        counts.modern_total,
                        counts.common,
                        counts.missing_in_modern,
                        counts.extra_in_modern,
                        counts.mismatched,
                    );
                }
            }
            for diagnostic in &record.diagnostics {
                let _ = writeln!(self.out, "    {diagnostic}");
            }
        }
    }

    fn on_run_end(&mut self, summary: &ValidationSummary) {
        let _ = write!(self.out, "{}", render_table(summary));
        let _ = self.out.flush();
    }
}

pub fn observer_for<'a, W: Write + 'a>(mode: OutputMode, out: W) -> Box<dyn ValidationObserver + 'a> {
    match mode {
        OutputMode::Quiet => Box::new(QuietObserver),
        OutputMode::Summary => Box::new(SummaryObserver::new(out)),
        OutputMode::Verbose => Box::new(VerboseObserver::new(out)),
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRun {
    pub summary: ValidationSummary,
    /// Reports for the structures actually evaluated, in worklist order.
    pub reports: Vec<StructureReport>,
    pub events: Vec<ValidationLogEvent>,
}

impl ValidationRun {
    /// 0 iff no evaluated structure failed.
    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code()
    }
}

pub fn run_validation(
    config: &ValidationConfig,
    observer: &mut dyn ValidationObserver,
) -> Result<ValidationRun, ValidationError> {
    config.validate()?;
    let stages = config.stages.as_slice();
    let full = worklist::build(
        &config.worklist,
        &config.limits,
        &config.legacy_root,
        &config.modern_root,
        stages,
    )?;

    let mut checkpoint = config
        .checkpoint_path
        .as_deref()
        .map(Checkpoint::load)
        .transpose()?;
    let pending: Vec<String> = match &checkpoint {
        Some(checkpoint) if config.resume => full
            .iter()
            .filter(|id| !checkpoint.has_passed(id, stages))
            .cloned()
            .collect(),
        _ => full.clone(),
    };
    let resumed = full.len() - pending.len();

    let run_id = derive_run_id(stages, &full);
    let mut events = vec![ValidationLogEvent {
        detail: Some(format!(
            "{} structures, {} pending, {} stages",
            full.len(),
            pending.len(),
            stages.len()
        )),
        ..ValidationLogEvent::new(&run_id, "run_start", "pass")
    }];
    observer.on_run_start(&run_id, stages, pending.len());

    let settings = RunnerSettings {
        legacy_root: config.legacy_root.clone(),
        modern_root: config.modern_root.clone(),
        stages: stages.to_vec(),
        compare: config.compare,
        skip_dependents: config.skip_dependents,
        retention: config.retention(),
        generator: config.generator.clone(),
    };
    let total = pending.len();
    let mut done = 0;
    let outcome = run_pool(
        &settings,
        &pending,
        config.workers,
        config.stop_on_first_failure,
        |report| {
            done += 1;
            observer.on_structure(report, done, total);
        },
    )?;

    for report in &outcome.reports {
        events.extend(report.stages.iter().filter_map(|record| {
            ValidationLogEvent::for_stage_record(&run_id, &report.structure_id, record)
        }));
    }
    let stage_results = aggregate(stages, &outcome.reports);
    for result in &stage_results {
        events.push(ValidationLogEvent {
            stage: Some(result.stage),
            detail: Some(format!(
                "attempted={} passed={} failed={} skipped={}",
                result.attempted, result.passed, result.failed, result.skipped
            )),
            ..ValidationLogEvent::new(
                &run_id,
                "stage_complete",
                if result.failed == 0 { "pass" } else { "fail" },
            )
        });
    }

    let mut summary = ValidationSummary::new(
        &run_id,
        full.len(),
        resumed,
        stages,
        &outcome.reports,
        stage_results,
    );
    summary.stopped_early = outcome.stopped_early;

    if let Some(path) = &config.report_path {
        let differences =
            DifferencesReport::from_reports(&run_id, full.len(), stages, &outcome.reports);
        write_json(path, &differences)?;
        summary.report_path = Some(path.display().to_string());
    }
    if let (Some(checkpoint), Some(path)) = (checkpoint.as_mut(), &config.checkpoint_path) {
        for report in &outcome.reports {
            checkpoint.record(report, stages);
        }
        checkpoint.save(path)?;
        summary.checkpoint_path = Some(path.display().to_string());
    }

    events.push(ValidationLogEvent {
        error_code: (!summary.is_success()).then(|| ERROR_MISMATCH.to_string()),
        detail: Some(format!(
            "passed={} failed={} skipped={} resumed={} stopped_early={}",
            summary.passed, summary.failed, summary.skipped, summary.resumed, summary.stopped_early
        )),
        ..ValidationLogEvent::new(
            &run_id,
            "run_end",
            if summary.is_success() { "pass" } else { "fail" },
        )
    });

    if let Some(path) = &config.summary_json_path {
        write_json(path, &summary)?;
    }
    if let Some(path) = &config.log_jsonl_path {
        write_jsonl(path, &events).map_err(|source| ValidationError::Log {
            path: path.display().to_string(),
            source,
        })?;
    }
    observer.on_run_end(&summary);

    Ok(ValidationRun {
        summary,
        reports: outcome.reports,
        events,
    })
}
