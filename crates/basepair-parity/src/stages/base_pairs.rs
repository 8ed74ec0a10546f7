use serde_json::Value;

use super::{CompareContext, ComparisonResult, FieldChecks, MissingKeys, pair_up};
use crate::diagnostics::Diagnostic;
use crate::field_compare::{compare_matrix, compare_text_ignore_case, compare_vector};
use crate::record_keys::{RecordView, key_pairs};
use crate::record_loader::StageDocument;

/// A label carrying this marker means base identity could not be resolved.
fn is_unresolved(label: Option<&Value>) -> bool {
    label.and_then(Value::as_str).is_some_and(|text| {
        text.contains('?') || text.to_ascii_lowercase().contains("unknown")
    })
}

/// Per-base geometry, named relative to the record's stored order.
struct BaseGeometry<'a> {
    orien: Option<&'a Value>,
    org: Option<&'a Value>,
}

fn geometry<'a>(view: &RecordView<'a>, member: char) -> BaseGeometry<'a> {
    let (orien, org) = (format!("orien_{member}"), format!("org_{member}"));
    BaseGeometry {
        orien: view.get(&[orien.as_str()]),
        org: view.get(&[org.as_str()]),
    }
}

pub(super) fn compare(
    legacy: &StageDocument,
    modern: &StageDocument,
    ctx: &CompareContext,
    result: &mut ComparisonResult,
) {
    let (legacy_base, modern_base) = (ctx.conventions.legacy, ctx.conventions.modern);
    let legacy_keyed = key_pairs(&legacy.records, legacy_base);
    let modern_keyed = key_pairs(&modern.records, modern_base);
    // Pair-count divergence belongs to the selection stage; here only the
    // pairs both sides report are compared.
    let common = pair_up(
        result,
        &legacy_keyed,
        &modern_keyed,
        MissingKeys::CountOnly,
        ToString::to_string,
    );
    if common.is_empty() && (!legacy_keyed.is_empty() || !modern_keyed.is_empty()) {
        result.diagnostics.push(Diagnostic::NoCommonRecords {
            legacy: legacy_keyed.len(),
            modern: modern_keyed.len(),
        });
        return;
    }

    let tolerance = ctx.tolerances.resolve(result.stage.definition().tolerance);
    for (key, legacy_entry, modern_entry) in common {
        let a = RecordView::new(legacy_entry.record, legacy_base);
        let b = RecordView::new(modern_entry.record, modern_base);
        let mut checks =
            FieldChecks::matched(key, result.stage, legacy_entry.record, modern_entry.record);

        let (label_a, label_b) = (a.get(&["bp_type"]), b.get(&["bp_type"]));
        if !is_unresolved(label_a) && !is_unresolved(label_b) {
            checks.check("bp_type", compare_text_ignore_case(label_a, label_b));
        }

        // When the two sides stored the pair in opposite orders, legacy's
        // first base is modern's second.
        let swapped = legacy_entry.reversed != modern_entry.reversed;
        for member in ['i', 'j'] {
            let other = match (member, swapped) {
                ('i', true) => 'j',
                ('j', true) => 'i',
                (same, _) => same,
            };
            let (x, y) = (geometry(&a, member), geometry(&b, other));
            checks.check(
                &format!("orien_{member}"),
                compare_matrix(x.orien, y.orien, tolerance),
            );
            checks.check(
                &format!("org_{member}"),
                compare_vector(x.org, y.org, tolerance),
            );
        }
        result.absorb(checks);
    }
}
