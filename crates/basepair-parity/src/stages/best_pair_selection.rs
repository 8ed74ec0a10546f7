//! Best-pair selection: the pipeline's actual output. One aggregate record
//! per structure, compared as a count plus a set of pair keys.

use std::collections::BTreeSet;

use serde_json::Value;

use super::{CompareContext, ComparisonResult};
use crate::diagnostics::{Diagnostic, cap_list};
use crate::record_keys::{IndexBase, PairKey, RecordView, as_integer};
use crate::record_loader::{RawRecord, Side, StageDocument};

const PAIRS: &[&str] = &["pairs", "selected_pairs"];
const DECLARED_COUNT: &[&str] = &["num_bp", "num_pairs"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    pub declared_count: Option<usize>,
    /// Pair entries as listed, before de-duplication.
    pub listed: usize,
    pub pairs: BTreeSet<PairKey>,
    /// Positions of entries that are not a readable pair.
    pub unreadable: Vec<usize>,
}

impl Selection {
    pub fn count(&self) -> usize {
        self.declared_count.unwrap_or(self.listed)
    }
}

fn pair_entry(entry: &Value, base: IndexBase) -> Option<PairKey> {
    match entry {
        Value::Array(items) => match items.as_slice() {
            [i, j] => Some(PairKey::new(
                base.to_one_based(as_integer(i)?),
                base.to_one_based(as_integer(j)?),
            )),
            _ => None,
        },
        Value::Object(record) => RecordView::new(record, base).pair_key(),
        _ => None,
    }
}

fn aggregate_record(document: &StageDocument) -> Option<&RawRecord> {
    match document.records.as_slice() {
        [record] if PAIRS.iter().any(|name| record.get(*name).is_some_and(Value::is_array)) => {
            Some(record)
        }
        _ => None,
    }
}

/// Reads a selection either from one aggregate record carrying a `pairs`
/// list, or from one record per selected pair.
pub fn read_selection(document: &StageDocument, base: IndexBase) -> Selection {
    let mut selection = Selection::default();
    if let Some(record) = aggregate_record(document) {
        let view = RecordView::new(record, base);
        let entries = view
            .get(PAIRS)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        selection.declared_count = view
            .get(DECLARED_COUNT)
            .and_then(as_integer)
            .and_then(|count| usize::try_from(count).ok());
        selection.listed = entries.len();
        for (position, entry) in entries.iter().enumerate() {
            match pair_entry(entry, base) {
                Some(key) => {
                    selection.pairs.insert(key);
                }
                None => selection.unreadable.push(position),
            }
        }
        return selection;
    }

    selection.listed = document.records.len();
    for (position, record) in document.records.iter().enumerate() {
        match RecordView::new(record, base).pair_key() {
            Some(key) => {
                selection.pairs.insert(key);
            }
            None => selection.unreadable.push(position),
        }
    }
    selection
}

pub(super) fn compare(
    legacy: &StageDocument,
    modern: &StageDocument,
    ctx: &CompareContext,
    result: &mut ComparisonResult,
) {
    let a = read_selection(legacy, ctx.conventions.legacy);
    let b = read_selection(modern, ctx.conventions.modern);

    for (side, selection) in [(Side::Legacy, &a), (Side::Modern, &b)] {
        result
            .diagnostics
            .extend(selection.unreadable.iter().map(|&position| Diagnostic::MalformedRecord {
                side,
                position,
                reason: "selected pair entry has no readable (i, j)".to_string(),
            }));
    }

    if a.count() != b.count() {
        result.diagnostics.push(Diagnostic::CountMismatch {
            what: "selected pair".to_string(),
            legacy: a.count(),
            modern: b.count(),
        });
    }

    let mut missing: Vec<String> = a.pairs.difference(&b.pairs).map(ToString::to_string).collect();
    let mut extra: Vec<String> = b.pairs.difference(&a.pairs).map(ToString::to_string).collect();
    result.counts.legacy_total = a.pairs.len();
    result.counts.modern_total = b.pairs.len();
    result.counts.common = a.pairs.intersection(&b.pairs).count();
    result.counts.missing_in_modern = missing.len();
    result.counts.extra_in_modern = extra.len();

    if missing.is_empty() && extra.is_empty() {
        return;
    }
    result.counts.mismatched = 1;
    let dropped = cap_list(&mut missing) + cap_list(&mut extra);
    result.diagnostics.push(Diagnostic::SetMismatch {
        key: "selection".to_string(),
        field: "pairs".to_string(),
        only_legacy: missing,
        only_modern: extra,
    });
    if dropped > 0 {
        result.diagnostics.push(Diagnostic::Omitted {
            what: "selected pairs".to_string(),
            count: dropped,
        });
    }
}
