use serde_json::Value;

use super::{CompareContext, ComparisonResult, FieldChecks, MissingKeys, pair_up, position_ordinal};
use crate::diagnostics::Diagnostic;
use crate::field_compare::{compare_exact, compare_vector};
use crate::record_keys::{CHAIN, OrdinalKey, RecordView, key_last_write};
use crate::record_loader::StageDocument;

struct AtomFields<'a> {
    atom_name: Option<&'a Value>,
    xyz: Option<&'a Value>,
    residue_name: Option<&'a Value>,
    chain_id: Option<&'a Value>,
}

impl<'a> AtomFields<'a> {
    fn read(view: &RecordView<'a>) -> Self {
        Self {
            atom_name: view.get(&["atom_name", "name"]),
            xyz: view.get(&["xyz", "coords", "coordinates"]),
            residue_name: view.get(&["residue_name", "res_name"]),
            chain_id: view.get(CHAIN),
        }
    }
}

pub(super) fn compare(
    legacy: &StageDocument,
    modern: &StageDocument,
    ctx: &CompareContext,
    result: &mut ComparisonResult,
) {
    // A count divergence points at an upstream parsing difference; it goes
    // first so it is the first thing a reader sees.
    if legacy.records.len() != modern.records.len() {
        result.diagnostics.push(Diagnostic::CountMismatch {
            what: "atom".to_string(),
            legacy: legacy.records.len(),
            modern: modern.records.len(),
        });
    }

    let (legacy_base, modern_base) = (ctx.conventions.legacy, ctx.conventions.modern);
    let fallback = |position| position_ordinal(position).map(OrdinalKey);
    let legacy_keyed =
        key_last_write(&legacy.records, legacy_base, RecordView::atom_ordinal, fallback);
    let modern_keyed =
        key_last_write(&modern.records, modern_base, RecordView::atom_ordinal, fallback);

    let common = pair_up(
        result,
        &legacy_keyed,
        &modern_keyed,
        MissingKeys::Report { what: "atoms" },
        |key| format!("atom {key}"),
    );
    let tolerance = ctx.tolerances.resolve(result.stage.definition().tolerance);
    for (key, legacy_entry, modern_entry) in common {
        let a = AtomFields::read(&RecordView::new(legacy_entry.record, legacy_base));
        let b = AtomFields::read(&RecordView::new(modern_entry.record, modern_base));
        let mut checks =
            FieldChecks::matched(key, result.stage, legacy_entry.record, modern_entry.record);
        checks.check(
            "xyz",
            compare_vector(a.xyz, b.xyz, tolerance),
        );
        checks.check("atom_name", compare_exact(a.atom_name, b.atom_name));
        checks.check("residue_name", compare_exact(a.residue_name, b.residue_name));
        checks.check("chain_id", compare_exact(a.chain_id, b.chain_id));
        result.absorb(checks);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::diagnostics::Diagnostic;
    use crate::stage_registry::StageId;
    use crate::stages::tests::doc;
    use crate::stages::{CompareContext, compare_stage};

    fn atom(idx: i64, name: &str, xyz: [f64; 3]) -> serde_json::Value {
        json!({
            "legacy_atom_idx": idx,
            "atom_name": name,
            "residue_name": "  G",
            "chain_id": "A",
            "xyz": xyz,
        })
    }

    #[test]
    fn identical_atoms_pass() {
        let records = json!([atom(1, " N9 ", [1.0, 2.0, 3.0]), atom(2, " C8 ", [2.0, 2.0, 3.0])]);
        let legacy = doc(StageId::PdbAtoms, records.clone());
        let modern = doc(StageId::PdbAtoms, json!({"num_atoms": 2, "atoms": records}));
        let result = compare_stage(StageId::PdbAtoms, &legacy, &modern, &CompareContext::default());
        assert!(result.passed, "{:?}", result.diagnostics);
        assert_eq!(result.counts.common, 2);
    }

    #[test]
    fn count_mismatch_is_reported_first() {
        let legacy = doc(
            StageId::PdbAtoms,
            json!([atom(1, "N9", [0.0; 3]), atom(2, "C8", [0.0; 3])]),
        );
        let modern = doc(StageId::PdbAtoms, json!([atom(1, "N9", [0.5, 0.0, 0.0])]));
        let result = compare_stage(StageId::PdbAtoms, &legacy, &modern, &CompareContext::default());
        assert!(!result.passed);
        assert!(matches!(
            result.diagnostics.first(),
            Some(Diagnostic::CountMismatch { legacy: 2, modern: 1, .. })
        ));
        assert_eq!(result.counts.missing_in_modern, 1);
        assert_eq!(result.counts.mismatched, 1);
    }
}
