use super::{CompareContext, ComparisonResult, FieldChecks, MissingKeys, pair_up, position_ordinal};
use crate::field_compare::compare_scalar;
use crate::record_keys::{RecordView, StepKey, key_last_write};
use crate::record_loader::StageDocument;

pub(super) const BPSTEP_FIELDS: &[&str] = &["shift", "slide", "rise", "tilt", "roll", "twist"];
pub(super) const HELICAL_FIELDS: &[&str] = &[
    "x_displacement",
    "y_displacement",
    "h_rise",
    "inclination",
    "tip",
    "h_twist",
];

const PARAMS: &[&str] = &["params", "parameters"];

pub(super) fn compare(
    legacy: &StageDocument,
    modern: &StageDocument,
    ctx: &CompareContext,
    fields: &[&str],
    result: &mut ComparisonResult,
) {
    let (legacy_base, modern_base) = (ctx.conventions.legacy, ctx.conventions.modern);
    let fallback = |position| position_ordinal(position).map(StepKey);
    let legacy_keyed = key_last_write(&legacy.records, legacy_base, RecordView::step_key, fallback);
    let modern_keyed = key_last_write(&modern.records, modern_base, RecordView::step_key, fallback);

    let common = pair_up(
        result,
        &legacy_keyed,
        &modern_keyed,
        MissingKeys::Report { what: "steps" },
        ToString::to_string,
    );
    let tolerance = ctx.tolerances.resolve(result.stage.definition().tolerance);
    for (key, legacy_entry, modern_entry) in common {
        let a = RecordView::new(legacy_entry.record, legacy_base);
        let b = RecordView::new(modern_entry.record, modern_base);
        let mut checks =
            FieldChecks::matched(key, result.stage, legacy_entry.record, modern_entry.record);
        for field in fields {
            checks.check(
                field,
                compare_scalar(
                    a.nested(PARAMS, field),
                    b.nested(PARAMS, field),
                    tolerance,
                ),
            );
        }
        result.absorb(checks);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::diagnostics::{Diagnostic, MAX_LISTED_KEYS};
    use crate::record_loader::Side;
    use crate::stage_registry::StageId;
    use crate::stages::tests::doc;
    use crate::stages::{CompareContext, compare_stage};

    fn step(index: i64, twist: f64) -> Value {
        json!({
            "step_index": index,
            "shift": 0.1, "slide": -1.5, "rise": 3.3,
            "tilt": 0.2, "roll": 4.0, "twist": twist,
        })
    }

    #[test]
    fn twist_beyond_step_tolerance_fails() {
        let legacy = doc(StageId::BpstepParams, json!([step(1, 32.0), step(2, 35.0)]));
        let modern = doc(
            StageId::BpstepParams,
            json!({"steps": [step(1, 32.00005), step(2, 35.01)]}),
        );
        let result = compare_stage(StageId::BpstepParams, &legacy, &modern, &CompareContext::default());
        assert!(!result.passed);
        assert_eq!(result.counts.mismatched, 1);
        assert!(matches!(
            result.diagnostics.as_slice(),
            [Diagnostic::ToleranceExceeded { key, field, .. }] if key == "step 2" && field == "twist"
        ));
    }

    #[test]
    fn missing_steps_are_capped() {
        let legacy_steps: Vec<Value> = (1..=15).map(|idx| step(idx, 30.0)).collect();
        let legacy = doc(StageId::BpstepParams, Value::Array(legacy_steps));
        let modern = doc(StageId::BpstepParams, json!([step(1, 30.0)]));
        let result = compare_stage(StageId::BpstepParams, &legacy, &modern, &CompareContext::default());
        assert_eq!(result.counts.missing_in_modern, 14);
        let listed = result
            .diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::KeyNotFound { side: Side::Modern, .. }))
            .count();
        assert_eq!(listed, MAX_LISTED_KEYS);
        assert!(matches!(
            result.diagnostics.last(),
            Some(Diagnostic::Omitted { count: 4, .. })
        ));
    }

    #[test]
    fn helical_parameters_may_be_nested() {
        let legacy = doc(
            StageId::HelicalParams,
            json!([{"step_index": 1, "params": {
                "x_displacement": -4.0, "y_displacement": 0.1, "h_rise": 2.8,
                "inclination": 18.0, "tip": 0.4, "h_twist": 33.0
            }}]),
        );
        let modern = doc(
            StageId::HelicalParams,
            json!([{"step_index": 1,
                "x_displacement": -4.0, "y_displacement": 0.1, "h_rise": 2.8,
                "inclination": 18.0, "tip": 0.4, "h_twist": 33.0
            }]),
        );
        let result = compare_stage(StageId::HelicalParams, &legacy, &modern, &CompareContext::default());
        assert!(result.passed, "{:?}", result.diagnostics);
    }
}
