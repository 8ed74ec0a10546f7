//! Per-stage comparators.
//!
//! Each submodule reads its stage's records through typed field accessors
//! and reports findings as [`Diagnostic`]s. A stage passes when none of its
//! diagnostics is a failure; record-level problems never abort the rest of
//! the comparison.

mod atoms;
mod base_pairs;
mod best_pair_selection;
mod distance_checks;
mod frames;
mod hbonds;
mod pair_validation;
mod residue_indices;
mod step_params;

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, push_capped};
use crate::field_compare::FieldMismatch;
use crate::record_keys::{IndexBase, KeyedEntry, KeyedRecords, RecordView, SideConventions};
use crate::record_loader::{RawRecord, Side, StageDocument};
use crate::stage_registry::StageId;
use crate::tolerances::ToleranceSet;

pub use best_pair_selection::{Selection, read_selection};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CompareContext {
    pub tolerances: ToleranceSet,
    pub conventions: SideConventions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComparisonCounts {
    pub legacy_total: usize,
    pub modern_total: usize,
    pub common: usize,
    pub missing_in_modern: usize,
    pub extra_in_modern: usize,
    pub mismatched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub stage: StageId,
    pub passed: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub counts: ComparisonCounts,
}

impl ComparisonResult {
    fn new(stage: StageId) -> Self {
        Self {
            stage,
            passed: true,
            diagnostics: Vec::new(),
            counts: ComparisonCounts::default(),
        }
    }

    fn finish(mut self) -> Self {
        self.passed = !self.diagnostics.iter().any(Diagnostic::is_failure);
        self
    }

    pub fn failures(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_failure())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_failure())
    }

    fn absorb(&mut self, checks: FieldChecks) {
        if checks.found.iter().any(Diagnostic::is_failure) {
            self.counts.mismatched += 1;
        }
        self.diagnostics.extend(checks.found);
    }
}

/// Compares one stage document pair.
pub fn compare_stage(
    stage: StageId,
    legacy: &StageDocument,
    modern: &StageDocument,
    ctx: &CompareContext,
) -> ComparisonResult {
    let mut result = ComparisonResult::new(stage);
    match stage {
        StageId::PdbAtoms => atoms::compare(legacy, modern, ctx, &mut result),
        StageId::ResidueIndices => residue_indices::compare(legacy, modern, ctx, &mut result),
        StageId::BaseFrameCalc | StageId::FrameCalc => {
            frames::compare(legacy, modern, ctx, false, &mut result);
        }
        StageId::LsFitting => frames::compare(legacy, modern, ctx, true, &mut result),
        StageId::PairValidation => pair_validation::compare(legacy, modern, ctx, &mut result),
        StageId::DistanceChecks => distance_checks::compare(legacy, modern, ctx, &mut result),
        StageId::HbondList => hbonds::compare(legacy, modern, ctx, &mut result),
        StageId::BasePair => base_pairs::compare(legacy, modern, ctx, &mut result),
        StageId::FindBestpairSelection => {
            best_pair_selection::compare(legacy, modern, ctx, &mut result);
        }
        StageId::BpstepParams => {
            step_params::compare(legacy, modern, ctx, step_params::BPSTEP_FIELDS, &mut result);
        }
        StageId::HelicalParams => {
            step_params::compare(legacy, modern, ctx, step_params::HELICAL_FIELDS, &mut result);
        }
    }
    report_rejected(&mut result, Side::Legacy, legacy);
    report_rejected(&mut result, Side::Modern, modern);
    result.finish()
}

fn report_rejected(result: &mut ComparisonResult, side: Side, document: &StageDocument) {
    let malformed = document
        .rejected_entries
        .iter()
        .map(|&position| Diagnostic::MalformedRecord {
            side,
            position,
            reason: "entry is not a JSON object".to_string(),
        });
    push_capped(&mut result.diagnostics, "malformed records", malformed);
}

// ---------------------------------------------------------------------------
// Shared matching helpers
// ---------------------------------------------------------------------------

/// Collects the field-level findings for one matched key.
struct FieldChecks {
    key: String,
    found: Vec<Diagnostic>,
}

impl FieldChecks {
    fn new(key: impl Display) -> Self {
        Self {
            key: key.to_string(),
            found: Vec::new(),
        }
    }

    /// Starts the checks for a matched key. A required field absent on both
    /// sides is reported once per side; field comparators only see one-sided
    /// absence.
    fn matched(key: impl Display, stage: StageId, legacy: &RawRecord, modern: &RawRecord) -> Self {
        let mut checks = Self::new(key);
        let views = [
            RecordView::new(legacy, IndexBase::One),
            RecordView::new(modern, IndexBase::One),
        ];
        for aliases in stage.definition().required_fields {
            if views.iter().any(|view| view.has_any(aliases)) {
                continue;
            }
            let field = aliases.first().copied().unwrap_or_default();
            for side in [Side::Legacy, Side::Modern] {
                checks.found.push(Diagnostic::MissingField {
                    key: checks.key.clone(),
                    field: field.to_string(),
                    side,
                });
            }
        }
        checks
    }

    fn check(&mut self, field: &str, outcome: Option<FieldMismatch>) {
        if let Some(mismatch) = outcome {
            self.found
                .push(Diagnostic::from_field(&self.key, field, mismatch));
        }
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        self.found.push(diagnostic);
    }
}

#[derive(Debug, Clone, Copy)]
enum MissingKeys {
    /// Emit a `KeyNotFound` per missing or extra key, capped.
    Report { what: &'static str },
    /// Only count missing and extra keys.
    CountOnly,
}

/// Fills the comparison counts, reports unkeyed records, duplicate
/// conflicts and missing keys, and returns the keys present on both sides.
fn pair_up<'a, K>(
    result: &mut ComparisonResult,
    legacy: &KeyedRecords<'a, K>,
    modern: &KeyedRecords<'a, K>,
    missing: MissingKeys,
    label: impl Fn(&K) -> String,
) -> Vec<(String, KeyedEntry<'a>, KeyedEntry<'a>)>
where
    K: Ord + Clone,
{
    for (side, keyed) in [(Side::Legacy, legacy), (Side::Modern, modern)] {
        let malformed = keyed
            .unkeyed
            .iter()
            .map(|&position| Diagnostic::MalformedRecord {
                side,
                position,
                reason: "identity fields missing".to_string(),
            });
        push_capped(&mut result.diagnostics, "malformed records", malformed);
        result
            .diagnostics
            .extend(keyed.conflicts.iter().map(|key| Diagnostic::DuplicateConflict {
                key: label(key),
                side,
            }));
    }

    let mut common = Vec::new();
    let mut only_legacy = Vec::new();
    for (key, entry) in legacy.iter() {
        match modern.get(key) {
            Some(other) => common.push((label(key), *entry, *other)),
            None => only_legacy.push(label(key)),
        }
    }
    let only_modern: Vec<String> = modern
        .keys()
        .filter(|key| !legacy.contains(key))
        .map(&label)
        .collect();

    result.counts.legacy_total = legacy.len();
    result.counts.modern_total = modern.len();
    result.counts.common = common.len();
    result.counts.missing_in_modern = only_legacy.len();
    result.counts.extra_in_modern = only_modern.len();

    if let MissingKeys::Report { what } = missing {
        push_capped(
            &mut result.diagnostics,
            &format!("{what} missing in modern"),
            only_legacy.into_iter().map(|key| Diagnostic::KeyNotFound {
                key,
                side: Side::Modern,
            }),
        );
        push_capped(
            &mut result.diagnostics,
            &format!("{what} missing in legacy"),
            only_modern.into_iter().map(|key| Diagnostic::KeyNotFound {
                key,
                side: Side::Legacy,
            }),
        );
    }
    common
}

/// Positional fallback key: the 1-based position of the record.
fn position_ordinal(position: usize) -> Option<i64> {
    i64::try_from(position).ok().map(|position| position + 1)
}
