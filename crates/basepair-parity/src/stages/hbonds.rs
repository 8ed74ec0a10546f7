//! H-bond list comparison.
//!
//! Donor and acceptor order is not stable between implementations, so each
//! bond is identified by its sorted atom pair plus bond type and the two
//! lists are compared as multisets. A bond whose identity matches but whose
//! distance differs is reported separately from a bond that is absent.

use std::fmt;

use serde_json::{Map, Value};

use super::{CompareContext, ComparisonResult, FieldChecks, MissingKeys, pair_up};
use crate::diagnostics::Diagnostic;
use crate::field_compare::compare_exact;
use crate::record_keys::{RecordView, key_pairs};
use crate::record_loader::{Side, StageDocument};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct BondIdentity {
    atoms: (String, String),
    kind: String,
}

impl fmt::Display for BondIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.atoms.0, self.atoms.1)?;
        if !self.kind.is_empty() {
            write!(f, " ({})", self.kind)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Bond {
    identity: BondIdentity,
    distance: Option<f64>,
}

fn text_field(bond: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|name| match bond.get(*name)? {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn parse_bond(value: &Value) -> Option<Bond> {
    let bond = value.as_object()?;
    let donor = text_field(bond, &["donor_atom", "donor"])?;
    let acceptor = text_field(bond, &["acceptor_atom", "acceptor"])?;
    let atoms = if donor <= acceptor {
        (donor, acceptor)
    } else {
        (acceptor, donor)
    };
    Some(Bond {
        identity: BondIdentity {
            atoms,
            kind: text_field(bond, &["type", "hbond_type", "bond_type"]).unwrap_or_default(),
        },
        distance: ["distance", "dist"]
            .iter()
            .find_map(|name| bond.get(*name).and_then(Value::as_f64)),
    })
}

/// Parses a bond list; entries that cannot be read are returned by position.
fn parse_bonds(list: &[Value]) -> (Vec<Bond>, Vec<usize>) {
    let mut bonds = Vec::with_capacity(list.len());
    let mut unreadable = Vec::new();
    for (idx, value) in list.iter().enumerate() {
        match parse_bond(value) {
            Some(bond) => bonds.push(bond),
            None => unreadable.push(idx),
        }
    }
    (bonds, unreadable)
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
        let a = RecordView::new(legacy_entry.record, legacy_base);
        let b = RecordView::new(modern_entry.record, modern_base);
        let mut checks =
            FieldChecks::matched(&key, result.stage, legacy_entry.record, modern_entry.record);
        checks.check(
            "num_hbonds",
            compare_exact(a.get(&["num_hbonds"]), b.get(&["num_hbonds"])),
        );

        let lists = (
            a.get(&["hbonds", "hbond_list"]).and_then(Value::as_array),
            b.get(&["hbonds", "hbond_list"]).and_then(Value::as_array),
        );
        let (legacy_list, modern_list) = match lists {
            (Some(x), Some(y)) => (x, y),
            (None, None) => {
                result.absorb(checks);
                continue;
            }
            (x, _) => {
                let side = if x.is_none() { Side::Legacy } else { Side::Modern };
                checks.push(Diagnostic::MissingField {
                    key: key.clone(),
                    field: "hbonds".to_string(),
                    side,
                });
                result.absorb(checks);
                continue;
            }
        };

        // A length mismatch makes a one-to-one mapping meaningless.
        if legacy_list.len() != modern_list.len() {
            checks.push(Diagnostic::LengthMismatch {
                key: key.clone(),
                field: "hbonds".to_string(),
                legacy: legacy_list.len(),
                modern: modern_list.len(),
            });
            result.absorb(checks);
            continue;
        }

        let (legacy_bonds, legacy_bad) = parse_bonds(legacy_list);
        let (modern_bonds, modern_bad) = parse_bonds(modern_list);
        for (side, bad) in [(Side::Legacy, legacy_bad), (Side::Modern, modern_bad)] {
            let position = match side {
                Side::Legacy => legacy_entry.position,
                Side::Modern => modern_entry.position,
            };
            for idx in bad {
                checks.push(Diagnostic::MalformedRecord {
                    side,
                    position,
                    reason: format!("{key} hbond #{idx} has no donor/acceptor atoms"),
                });
            }
        }
        match_bonds(&key, &legacy_bonds, &modern_bonds, tolerance, &mut checks);
        result.absorb(checks);
    }
}

/// Pairs bonds of equal identity, closest distance first, then reports
/// distance drift on matched bonds and absence on unmatched ones.
fn match_bonds(
    key: &str,
    legacy: &[Bond],
    modern: &[Bond],
    tolerance: f64,
    checks: &mut FieldChecks,
) {
    let mut used = vec![false; modern.len()];
    for bond in legacy {
        let candidate = modern
            .iter()
            .enumerate()
            .filter(|(idx, other)| !used[*idx] && other.identity == bond.identity)
            .min_by(|(_, x), (_, y)| {
                distance_gap(bond, x).total_cmp(&distance_gap(bond, y))
            })
            .map(|(idx, _)| idx);
        let Some(idx) = candidate else {
            checks.push(Diagnostic::HbondMissing {
                key: key.to_string(),
                bond: bond.identity.to_string(),
                side: Side::Modern,
            });
            continue;
        };
        used[idx] = true;
        let other = &modern[idx];
        match (bond.distance, other.distance) {
            (Some(x), Some(y)) => {
                let diff = (x - y).abs();
                if diff > tolerance {
                    checks.push(Diagnostic::HbondDistanceMismatch {
                        key: key.to_string(),
                        bond: bond.identity.to_string(),
                        legacy: x,
                        modern: y,
                        diff,
                        tolerance,
                    });
                }
            }
            (None, None) => {}
            (x, _) => checks.push(Diagnostic::MissingField {
                key: key.to_string(),
                field: format!("hbond {} distance", bond.identity),
                side: if x.is_none() { Side::Legacy } else { Side::Modern },
            }),
        }
    }
    for (idx, bond) in modern.iter().enumerate() {
        if !used[idx] {
            checks.push(Diagnostic::HbondMissing {
                key: key.to_string(),
                bond: bond.identity.to_string(),
                side: Side::Legacy,
            });
        }
    }
}

fn distance_gap(a: &Bond, b: &Bond) -> f64 {
    match (a.distance, b.distance) {
        (Some(x), Some(y)) => (x - y).abs(),
        _ => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::diagnostics::Diagnostic;
    use crate::record_loader::Side;
    use crate::stage_registry::StageId;
    use crate::stages::tests::doc;
    use crate::stages::{CompareContext, compare_stage};

    fn hbond(donor: &str, acceptor: &str, distance: f64) -> Value {
        json!({"donor_atom": donor, "acceptor_atom": acceptor, "distance": distance, "type": "-"})
    }

    fn pair(bonds: Vec<Value>) -> Value {
        json!([{"base_i": 3, "base_j": 45, "num_hbonds": bonds.len(), "hbonds": bonds}])
    }

    fn run(legacy: Value, modern: Value) -> crate::stages::ComparisonResult {
        compare_stage(
            StageId::HbondList,
            &doc(StageId::HbondList, legacy),
            &doc(StageId::HbondList, modern),
            &CompareContext::default(),
        )
    }

    #[test]
    fn bond_order_does_not_matter() {
        let legacy = pair(vec![hbond("O6", "N4", 2.9), hbond("N1", "N3", 2.8)]);
        let modern = pair(vec![hbond("N3", "N1", 2.8), hbond("N4", "O6", 2.9)]);
        let result = run(legacy, modern);
        assert!(result.passed, "{:?}", result.diagnostics);
    }

    #[test]
    fn changed_distance_is_a_single_distance_mismatch() {
        let legacy = pair(vec![hbond("O6", "N4", 2.9), hbond("N1", "N3", 2.8)]);
        let modern = pair(vec![hbond("N1", "N3", 3.4), hbond("O6", "N4", 2.9)]);
        let result = run(legacy, modern);
        assert!(!result.passed);
        match result.diagnostics.as_slice() {
            [Diagnostic::HbondDistanceMismatch { bond, legacy, modern, .. }] => {
                assert_eq!(bond, "N1-N3 (-)");
                assert_eq!((*legacy, *modern), (2.8, 3.4));
            }
            other => panic!("expected one distance mismatch, got {other:?}"),
        }
    }

    #[test]
    fn length_mismatch_stops_per_bond_comparison() {
        let legacy = pair(vec![hbond("O6", "N4", 2.9), hbond("N1", "N3", 2.8)]);
        let modern = pair(vec![hbond("O6", "N4", 2.9)]);
        let result = run(legacy, modern);
        let kinds: Vec<_> = result.diagnostics.iter().map(Diagnostic::class).collect();
        assert_eq!(
            kinds,
            vec![
                crate::diagnostics::MismatchClass::ValueMismatch,
                crate::diagnostics::MismatchClass::LengthMismatch
            ]
        );
    }

    #[test]
    fn different_identity_is_missing_and_extra() {
        let legacy = pair(vec![hbond("O6", "N4", 2.9)]);
        let modern = pair(vec![hbond("O6", "N3", 2.9)]);
        let result = run(legacy, modern);
        let sides: Vec<Side> = result
            .diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::HbondMissing { side, .. } => Some(*side),
                _ => None,
            })
            .collect();
        assert_eq!(sides, vec![Side::Modern, Side::Legacy]);
    }
}
