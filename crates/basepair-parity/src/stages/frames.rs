//! Base-frame fit, least-squares fit and reference-frame stages. The three
//! stages refine the same per-residue fit, so they share one comparator.

use serde_json::Value;

use super::{CompareContext, ComparisonResult, FieldChecks, MissingKeys, pair_up};
use crate::field_compare::{compare_exact, compare_matrix, compare_name_set, compare_scalar, compare_vector};
use crate::record_keys::{RecordView, key_last_write};
use crate::record_loader::StageDocument;

struct FrameFields<'a> {
    base_type: Option<&'a Value>,
    rms_fit: Option<&'a Value>,
    num_matched_atoms: Option<&'a Value>,
    matched_atoms: Option<&'a Value>,
    rotation_matrix: Option<&'a Value>,
    translation: Option<&'a Value>,
}

impl<'a> FrameFields<'a> {
    fn read(view: &RecordView<'a>) -> Self {
        Self {
            base_type: view.get(&["base_type", "residue_type"]),
            rms_fit: view.get(&["rms_fit", "rms"]),
            num_matched_atoms: view.get(&["num_matched_atoms", "num_matched"]),
            matched_atoms: view.get(&["matched_atoms", "matched_atom_names"]),
            rotation_matrix: view.get(&["rotation_matrix", "rotation"]),
            translation: view.get(&["translation", "translation_vector"]),
        }
    }
}

pub(super) fn compare(
    legacy: &StageDocument,
    modern: &StageDocument,
    ctx: &CompareContext,
    least_squares: bool,
    result: &mut ComparisonResult,
) {
    let (legacy_base, modern_base) = (ctx.conventions.legacy, ctx.conventions.modern);
    let legacy_keyed =
        key_last_write(&legacy.records, legacy_base, RecordView::residue_key, |_| None);
    let modern_keyed =
        key_last_write(&modern.records, modern_base, RecordView::residue_key, |_| None);

    let common = pair_up(
        result,
        &legacy_keyed,
        &modern_keyed,
        MissingKeys::Report { what: "residues" },
        ToString::to_string,
    );
    let tol = &ctx.tolerances;
    for (key, legacy_entry, modern_entry) in common {
        let a = FrameFields::read(&RecordView::new(legacy_entry.record, legacy_base));
        let b = FrameFields::read(&RecordView::new(modern_entry.record, modern_base));
        let mut checks =
            FieldChecks::matched(key, result.stage, legacy_entry.record, modern_entry.record);
        checks.check("base_type", compare_exact(a.base_type, b.base_type));
        checks.check("rms_fit", compare_scalar(a.rms_fit, b.rms_fit, tol.rms_fit));
        checks.check(
            "num_matched_atoms",
            compare_exact(a.num_matched_atoms, b.num_matched_atoms),
        );
        checks.check(
            "matched_atoms",
            compare_name_set(a.matched_atoms, b.matched_atoms),
        );
        if least_squares {
            checks.check(
                "rotation_matrix",
                compare_matrix(a.rotation_matrix, b.rotation_matrix, tol.matrix),
            );
            checks.check(
                "translation",
                compare_vector(a.translation, b.translation, tol.coordinate),
            );
        }
        result.absorb(checks);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::diagnostics::Diagnostic;
    use crate::stage_registry::StageId;
    use crate::stages::tests::doc;
    use crate::stages::{CompareContext, compare_stage};

    fn frame(seq: i64, rms: f64, matched: &[&str]) -> Value {
        json!({
            "chain_id": "A",
            "residue_seq": seq,
            "insertion": " ",
            "base_type": "G",
            "rms_fit": rms,
            "num_matched_atoms": matched.len(),
            "matched_atoms": matched,
            "rotation_matrix": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            "translation": [0.5, 1.5, 2.5],
        })
    }

    #[test]
    fn matched_atom_sets_report_symmetric_difference() {
        let legacy = doc(
            StageId::BaseFrameCalc,
            json!([frame(1, 0.02, &["N1", "C2", "N3"])]),
        );
        let modern = doc(
            StageId::BaseFrameCalc,
            json!([frame(1, 0.02, &["N1", "C2", "N4"])]),
        );
        let result = compare_stage(
            StageId::BaseFrameCalc,
            &legacy,
            &modern,
            &CompareContext::default(),
        );
        assert!(!result.passed);
        let sets: Vec<_> = result
            .diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::SetMismatch {
                    only_legacy,
                    only_modern,
                    ..
                } => Some((only_legacy.clone(), only_modern.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(sets, vec![(vec!["N3".to_string()], vec!["N4".to_string()])]);
    }

    #[test]
    fn rms_uses_fit_tolerance() {
        let legacy = doc(StageId::FrameCalc, json!([frame(1, 0.0200, &["N1"])]));
        let modern = doc(StageId::FrameCalc, json!([frame(1, 0.0205, &["N1"])]));
        let result = compare_stage(StageId::FrameCalc, &legacy, &modern, &CompareContext::default());
        assert!(result.passed, "{:?}", result.diagnostics);
    }

    #[test]
    fn least_squares_stage_checks_rotation_matrix() {
        let legacy = doc(StageId::LsFitting, json!([frame(1, 0.02, &["N1"])]));
        let mut rotated = frame(1, 0.02, &["N1"]);
        rotated["rotation_matrix"][0][1] = json!(0.01);
        let modern = doc(StageId::LsFitting, json!([rotated]));
        let result = compare_stage(StageId::LsFitting, &legacy, &modern, &CompareContext::default());
        assert!(!result.passed);
        assert!(result.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::ToleranceExceeded { field, .. } if field == "rotation_matrix[0][1]"
        )));

        let frame_only = compare_stage(StageId::FrameCalc, &legacy, &modern, &CompareContext::default());
        assert!(frame_only.passed);
    }

    #[test]
    fn unkeyed_residue_is_malformed_not_fatal() {
        let legacy = doc(
            StageId::BaseFrameCalc,
            json!([frame(1, 0.02, &["N1"]), {"rms_fit": 0.1}]),
        );
        let modern = doc(StageId::BaseFrameCalc, json!([frame(1, 0.02, &["N1"])]));
        let result = compare_stage(
            StageId::BaseFrameCalc,
            &legacy,
            &modern,
            &CompareContext::default(),
        );
        assert_eq!(result.counts.common, 1);
        assert!(matches!(
            result.diagnostics.as_slice(),
            [Diagnostic::MalformedRecord { position: 1, .. }]
        ));
    }
}
