use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::diagnostics::MismatchClass;
use crate::record_loader::MissingReason;
use crate::report::write_atomic;
use crate::stage_registry::StageId;
use crate::stage_runner::{SkipReason, StageStatus, StructureStageRecord};

pub const PARITY_COMPONENT: &str = "basepair_parity_runner";

pub const ERROR_MISMATCH: &str = "BPP-MISMATCH";
pub const ERROR_MISSING_DATA: &str = "BPP-MISSING-DATA";
pub const ERROR_CORRUPT_INPUT: &str = "BPP-CORRUPT-INPUT";
pub const ERROR_WORKER_PANIC: &str = "BPP-WORKER-PANIC";
pub const ERROR_GENERATOR_FAILED: &str = "BPP-GENERATOR-FAILED";
pub const ERROR_UPSTREAM_FAILED: &str = "BPP-UPSTREAM-FAILED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationLogEvent {
    pub trace_id: String,
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ValidationLogEvent {
    pub fn new(trace_id: &str, event: &str, outcome: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            component: PARITY_COMPONENT.to_string(),
            event: event.to_string(),
            outcome: outcome.to_string(),
            error_code: None,
            structure_id: None,
            stage: None,
            detail: None,
        }
    }

    /// Event for a (structure, stage) that did not pass; `None` for a pass.
    pub fn for_stage_record(
        trace_id: &str,
        structure_id: &str,
        record: &StructureStageRecord,
    ) -> Option<Self> {
        let (outcome, code, detail) = match record.status {
            StageStatus::Passed => return None,
            StageStatus::Failed => {
                let panicked = record.class_counts.contains_key(&MismatchClass::WorkerPanic);
                let code = if panicked {
                    ERROR_WORKER_PANIC
                } else {
                    ERROR_MISMATCH
                };
                let detail = record.diagnostics.first().map(ToString::to_string);
                ("fail", code, detail)
            }
            StageStatus::Skipped => {
                let reason = record.skip_reason.as_ref();
                (
                    "skip",
                    reason.map_or(ERROR_MISSING_DATA, skip_error_code),
                    reason.map(ToString::to_string),
                )
            }
        };
        Some(Self {
            error_code: Some(code.to_string()),
            structure_id: Some(structure_id.to_string()),
            stage: Some(record.stage),
            detail,
            ..Self::new(trace_id, "structure_stage", outcome)
        })
    }
}

pub fn skip_error_code(reason: &SkipReason) -> &'static str {
    match reason {
        SkipReason::MissingData(missing) => match missing.reason {
            MissingReason::Absent => ERROR_MISSING_DATA,
            MissingReason::Unreadable | MissingReason::Corrupt => ERROR_CORRUPT_INPUT,
        },
        SkipReason::GeneratorFailed { .. } => ERROR_GENERATOR_FAILED,
        SkipReason::UpstreamFailed { .. } => ERROR_UPSTREAM_FAILED,
    }
}

pub fn to_jsonl(events: &[ValidationLogEvent]) -> io::Result<String> {
    let mut out = String::new();
    for event in events {
        out.push_str(&serde_json::to_string(event).map_err(io::Error::other)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn write_jsonl(path: &Path, events: &[ValidationLogEvent]) -> io::Result<()> {
    write_atomic(path, to_jsonl(events)?.as_bytes())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::record_loader::{MissingData, Side};
    use crate::stages::ComparisonCounts;

    fn skipped(reason: MissingReason) -> StructureStageRecord {
        StructureStageRecord {
            stage: StageId::HbondList,
            status: StageStatus::Skipped,
            skip_reason: Some(SkipReason::MissingData(MissingData {
                side: Side::Modern,
                reason,
                path: "modern/hbond_list/1EHZ.json".to_string(),
                detail: String::new(),
            })),
            counts: ComparisonCounts::default(),
            failure_count: 0,
            class_counts: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn skip_codes_separate_absent_from_corrupt() {
        let absent = ValidationLogEvent::for_stage_record("t", "1EHZ", &skipped(MissingReason::Absent))
            .expect("event");
        let corrupt =
            ValidationLogEvent::for_stage_record("t", "1EHZ", &skipped(MissingReason::Corrupt))
                .expect("event");
        assert_eq!(absent.error_code.as_deref(), Some(ERROR_MISSING_DATA));
        assert_eq!(corrupt.error_code.as_deref(), Some(ERROR_CORRUPT_INPUT));
        assert_eq!(absent.outcome, "skip");
    }

    #[test]
    fn jsonl_has_one_line_per_event() {
        let events = vec![
            ValidationLogEvent::new("t", "run_start", "pass"),
            ValidationLogEvent::new("t", "run_end", "fail"),
        ];
        let text = to_jsonl(&events).expect("jsonl");
        assert_eq!(text.lines().count(), 2);
        assert!(!text.contains("structure_id"));
        let first: ValidationLogEvent =
            serde_json::from_str(text.lines().next().expect("line")).expect("decode");
        assert_eq!(first.component, PARITY_COMPONENT);
    }
}
