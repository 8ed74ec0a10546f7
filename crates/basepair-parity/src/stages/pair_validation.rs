use super::{CompareContext, ComparisonResult, FieldChecks, MissingKeys, pair_up};
use crate::field_compare::{compare_exact, compare_flag, compare_scalar};
use crate::record_keys::{RecordView, key_pairs};
use crate::record_loader::StageDocument;

const CALCULATED: &[&str] = &["calculated_values"];
const CALCULATED_FIELDS: &[&str] = &["dorg", "d_v", "plane_angle", "dNN", "quality_score"];
const CHECKS: &[&str] = &["validation_checks"];
const CHECK_FIELDS: &[&str] = &["distance_check", "d_v_check", "plane_angle_check", "dNN_check"];

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
        let a = RecordView::new(legacy_entry.record, legacy_base);
        let b = RecordView::new(modern_entry.record, modern_base);
        let mut checks =
            FieldChecks::matched(key, result.stage, legacy_entry.record, modern_entry.record);
        checks.check(
            "is_valid",
            compare_flag(a.get(&["is_valid"]), b.get(&["is_valid"])),
        );
        checks.check(
            "bp_type_id",
            compare_exact(a.get(&["bp_type_id"]), b.get(&["bp_type_id"])),
        );
        // Every diverging sub-field is reported, not just the first.
        for field in CALCULATED_FIELDS {
            checks.check(
                &format!("calculated_values.{field}"),
                compare_scalar(
                    a.nested(CALCULATED, field),
                    b.nested(CALCULATED, field),
                    tolerance,
                ),
            );
        }
        for field in CHECK_FIELDS {
            checks.check(
                &format!("validation_checks.{field}"),
                compare_flag(a.nested(CHECKS, field), b.nested(CHECKS, field)),
            );
        }
        result.absorb(checks);
    }
}
