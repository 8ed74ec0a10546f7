use serde_json::Value;

use super::{CompareContext, ComparisonResult, FieldChecks, MissingKeys, pair_up, position_ordinal};
use crate::field_compare::compare_exact;
use crate::record_keys::{OrdinalKey, RecordView, key_last_write};
use crate::record_loader::StageDocument;

const START_ATOM: &[&str] = &["legacy_start_atom", "start_atom", "start"];
const END_ATOM: &[&str] = &["legacy_end_atom", "end_atom", "end"];

/// An atom-range bound in 1-based space. A non-integer value is passed
/// through unchanged so the comparison reports it.
fn bound(view: &RecordView<'_>, aliases: &[&str]) -> Option<Value> {
    view.index(aliases)
        .map(Value::from)
        .or_else(|| view.get(aliases).cloned())
}

pub(super) fn compare(
    legacy: &StageDocument,
    modern: &StageDocument,
    ctx: &CompareContext,
    result: &mut ComparisonResult,
) {
    let (legacy_base, modern_base) = (ctx.conventions.legacy, ctx.conventions.modern);
    let fallback = |position| position_ordinal(position).map(OrdinalKey);
    let legacy_keyed = key_last_write(
        &legacy.records,
        legacy_base,
        RecordView::residue_ordinal,
        fallback,
    );
    let modern_keyed = key_last_write(
        &modern.records,
        modern_base,
        RecordView::residue_ordinal,
        fallback,
    );

    let common = pair_up(
        result,
        &legacy_keyed,
        &modern_keyed,
        MissingKeys::Report { what: "residues" },
        |key| format!("residue {key}"),
    );
    for (key, legacy_entry, modern_entry) in common {
        let a = RecordView::new(legacy_entry.record, legacy_base);
        let b = RecordView::new(modern_entry.record, modern_base);
        let mut checks =
            FieldChecks::matched(key, result.stage, legacy_entry.record, modern_entry.record);
        checks.check(
            "start_atom",
            compare_exact(bound(&a, START_ATOM).as_ref(), bound(&b, START_ATOM).as_ref()),
        );
        checks.check(
            "end_atom",
            compare_exact(bound(&a, END_ATOM).as_ref(), bound(&b, END_ATOM).as_ref()),
        );
        result.absorb(checks);
    }
}
