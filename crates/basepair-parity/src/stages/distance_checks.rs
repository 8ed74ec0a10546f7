use serde_json::{Map, Value};

use super::{CompareContext, ComparisonResult, FieldChecks, MissingKeys, pair_up};
use crate::diagnostics::Diagnostic;
use crate::field_compare::compare_scalar;
use crate::record_keys::{RecordView, key_pairs};
use crate::record_loader::{Side, StageDocument};

const VALUE_FIELDS: &[&str] = &["dorg", "dNN", "plane_angle", "d_v", "overlap_area"];

fn values<'a>(view: &RecordView<'a>) -> Option<&'a Map<String, Value>> {
    view.get(&["values"]).and_then(Value::as_object)
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
    let common = pair_up(
        result,
        &legacy_keyed,
        &modern_keyed,
        MissingKeys::Report { what: "pairs" },
        ToString::to_string,
    );

    let tolerance = ctx.tolerances.resolve(result.stage.definition().tolerance);
    for (key, legacy_entry, modern_entry) in common {
        let a = values(&RecordView::new(legacy_entry.record, legacy_base));
        let b = values(&RecordView::new(modern_entry.record, modern_base));
        let mut checks =
            FieldChecks::matched(&key, result.stage, legacy_entry.record, modern_entry.record);
        let (Some(a), Some(b)) = (a, b) else {
            // A missing values object is never read as all-zero. Absence on
            // both sides was already reported as a missing required field.
            let either = a.is_some() || b.is_some();
            for (side, present) in [(Side::Legacy, a.is_some()), (Side::Modern, b.is_some())] {
                if either && !present {
                    checks.push(Diagnostic::MissingField {
                        key: key.clone(),
                        field: "values".to_string(),
                        side,
                    });
                }
            }
            result.absorb(checks);
            continue;
        };
        for field in VALUE_FIELDS {
            checks.check(
                &format!("values.{field}"),
                compare_scalar(a.get(*field), b.get(*field), tolerance),
            );
        }
        result.absorb(checks);
    }
}
