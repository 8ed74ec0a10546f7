//! Record identity: key builders and alias resolution.
//!
//! Legacy and modern outputs name the same field differently and may count
//! indices from 0 or 1. [`RecordView`] is the only place that knows about
//! field aliases and index bases; every comparator reads records through it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record_loader::{RawRecord, Side};

// ---------------------------------------------------------------------------
// Field aliases, preferred name first
// ---------------------------------------------------------------------------

pub const ATOM_INDEX: &[&str] = &["legacy_atom_idx", "atom_idx", "atom_index"];
pub const RESIDUE_ORDINAL: &[&str] = &["legacy_residue_idx", "residue_idx", "residue_index"];
pub const CHAIN: &[&str] = &["chain_id", "chain"];
pub const RESIDUE_SEQ: &[&str] = &["residue_seq", "seq_num", "residue_number"];
pub const INSERTION: &[&str] = &["insertion", "insertion_code", "icode"];
pub const PAIR_I: &[&str] = &["legacy_base_i", "base_i", "residue_i"];
pub const PAIR_J: &[&str] = &["legacy_base_j", "base_j", "residue_j"];
pub const STEP_INDEX: &[&str] = &["step_index", "step_idx", "bp_idx1"];

const LEGACY_PREFIX: &str = "legacy_";

// ---------------------------------------------------------------------------
// Index conventions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBase {
    Zero,
    #[default]
    One,
}

impl IndexBase {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "0" => Some(Self::Zero),
            "1" => Some(Self::One),
            _ => None,
        }
    }

    /// Converts a raw index into 1-based space.
    pub const fn to_one_based(self, raw: i64) -> i64 {
        match self {
            Self::Zero => raw + 1,
            Self::One => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SideConventions {
    pub legacy: IndexBase,
    pub modern: IndexBase,
}

impl SideConventions {
    pub const fn for_side(self, side: Side) -> IndexBase {
        match side {
            Side::Legacy => self.legacy,
            Side::Modern => self.modern,
        }
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResidueKey {
    pub chain: String,
    pub seq: i64,
    pub insertion: String,
}

impl fmt::Display for ResidueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain = if self.chain.is_empty() { "-" } else { &self.chain };
        if self.insertion.is_empty() {
            write!(f, "{chain}:{}", self.seq)
        } else {
            write!(f, "{chain}:{}^{}", self.seq, self.insertion)
        }
    }
}

/// Unordered residue pair, stored as `(min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub low: i64,
    pub high: i64,
}

impl PairKey {
    pub fn new(i: i64, j: i64) -> Self {
        Self {
            low: i.min(j),
            high: i.max(j),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.low, self.high)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepKey(pub i64);

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}", self.0)
    }
}

/// Per-atom or per-residue ordinal in 1-based space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrdinalKey(pub i64);

impl fmt::Display for OrdinalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RecordView
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    record: &'a RawRecord,
    base: IndexBase,
}

impl<'a> RecordView<'a> {
    pub fn new(record: &'a RawRecord, base: IndexBase) -> Self {
        Self { record, base }
    }

    pub fn record(&self) -> &'a RawRecord {
        self.record
    }

    /// First present, non-null value among `aliases`.
    pub fn get(&self, aliases: &[&str]) -> Option<&'a Value> {
        aliases
            .iter()
            .filter_map(|name| self.record.get(*name))
            .find(|value| !value.is_null())
    }

    /// Field `name` inside the first nested object among `parents`, falling
    /// back to a top-level field of the same name.
    pub fn nested(&self, parents: &[&str], name: &str) -> Option<&'a Value> {
        self.get(parents)
            .and_then(Value::as_object)
            .and_then(|inner| inner.get(name))
            .filter(|value| !value.is_null())
            .or_else(|| self.get(&[name]))
    }

    /// Whether any alias resolves to a non-null value. A `parent.field`
    /// alias is read one level down.
    pub fn has_any(&self, aliases: &[&str]) -> bool {
        aliases.iter().any(|alias| match alias.split_once('.') {
            Some((parent, field)) => self
                .get(&[parent])
                .and_then(Value::as_object)
                .and_then(|inner| inner.get(field))
                .is_some_and(|value| !value.is_null()),
            None => self.get(&[*alias]).is_some(),
        })
    }

    pub fn text(&self, aliases: &[&str]) -> Option<&'a str> {
        self.get(aliases).and_then(Value::as_str)
    }

    /// An index field in 1-based space. `legacy_`-prefixed fields are
    /// always 1-based; other fields are shifted by the side's base.
    pub fn index(&self, aliases: &[&str]) -> Option<i64> {
        aliases.iter().find_map(|name| {
            let raw = self.record.get(*name).and_then(as_integer)?;
            if name.starts_with(LEGACY_PREFIX) {
                Some(raw)
            } else {
                Some(self.base.to_one_based(raw))
            }
        })
    }

    pub fn atom_ordinal(&self) -> Option<OrdinalKey> {
        self.index(ATOM_INDEX).map(OrdinalKey)
    }

    pub fn residue_ordinal(&self) -> Option<OrdinalKey> {
        self.index(RESIDUE_ORDINAL).map(OrdinalKey)
    }

    pub fn residue_key(&self) -> Option<ResidueKey> {
        let chain = self.text(CHAIN)?.trim().to_string();
        let seq = self.get(RESIDUE_SEQ).and_then(as_integer)?;
        let insertion = self
            .text(INSERTION)
            .map(|value| value.trim().to_string())
            .unwrap_or_default();
        Some(ResidueKey {
            chain,
            seq,
            insertion,
        })
    }

    /// Raw `(i, j)` in 1-based space, in stored order.
    pub fn pair_indices(&self) -> Option<(i64, i64)> {
        Some((self.index(PAIR_I)?, self.index(PAIR_J)?))
    }

    pub fn pair_key(&self) -> Option<PairKey> {
        self.pair_indices().map(|(i, j)| PairKey::new(i, j))
    }

    pub fn step_key(&self) -> Option<StepKey> {
        self.index(STEP_INDEX).map(StepKey)
    }
}

/// Integer value of a JSON number, accepting floats with no fractional part.
pub fn as_integer(value: &Value) -> Option<i64> {
    if let Some(int) = value.as_i64() {
        return Some(int);
    }
    let float = value.as_f64()?;
    (float.fract() == 0.0 && float.abs() < 9.0e15).then_some(float as i64)
}

// ---------------------------------------------------------------------------
// KeyedRecords
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyedEntry<'a> {
    pub record: &'a RawRecord,
    pub position: usize,
    /// The record was stored as `(j, i)` with `i < j`.
    pub reversed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRecords<'a, K> {
    entries: BTreeMap<K, KeyedEntry<'a>>,
    /// Positions of records whose identity fields could not be read.
    pub unkeyed: Vec<usize>,
    /// Keys that more than one record mapped to.
    pub duplicates: Vec<K>,
    /// Duplicate pair keys whose non-identity fields disagree.
    pub conflicts: Vec<K>,
}

impl<'a, K: Ord + Clone> KeyedRecords<'a, K> {
    fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            unkeyed: Vec::new(),
            duplicates: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&KeyedEntry<'a>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &KeyedEntry<'a>)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}

/// Keys records with a last-write-wins collision rule. When `key_for`
/// returns `None`, `fallback` (given the record position) is tried before
/// the record is counted as unkeyed.
pub fn key_last_write<'a, K, F, G>(
    records: &'a [RawRecord],
    base: IndexBase,
    key_for: F,
    fallback: G,
) -> KeyedRecords<'a, K>
where
    K: Ord + Clone,
    F: Fn(&RecordView<'a>) -> Option<K>,
    G: Fn(usize) -> Option<K>,
{
    let mut keyed = KeyedRecords::empty();
    for (position, record) in records.iter().enumerate() {
        let view = RecordView::new(record, base);
        let Some(key) = key_for(&view).or_else(|| fallback(position)) else {
            keyed.unkeyed.push(position);
            continue;
        };
        let entry = KeyedEntry {
            record,
            position,
            reversed: false,
        };
        if keyed.entries.insert(key.clone(), entry).is_some() && !keyed.duplicates.contains(&key)
        {
            keyed.duplicates.push(key);
        }
    }
    keyed
}

/// Keys pair records by [`PairKey`]. On collision the first record in
/// canonical `i <= j` order is kept; if the colliding records disagree on
/// anything besides their identity fields, once both are read in canonical
/// orientation, the key is recorded as a conflict.
pub fn key_pairs(records: &[RawRecord], base: IndexBase) -> KeyedRecords<'_, PairKey> {
    let mut keyed = KeyedRecords::empty();
    for (position, record) in records.iter().enumerate() {
        let view = RecordView::new(record, base);
        let Some((i, j)) = view.pair_indices() else {
            keyed.unkeyed.push(position);
            continue;
        };
        let key = PairKey::new(i, j);
        let candidate = KeyedEntry {
            record,
            position,
            reversed: i > j,
        };
        let Some(existing) = keyed.entries.get(&key).copied() else {
            keyed.entries.insert(key, candidate);
            continue;
        };
        if !keyed.duplicates.contains(&key) {
            keyed.duplicates.push(key);
        }
        if non_identity_fields_differ(&existing, &candidate) && !keyed.conflicts.contains(&key) {
            keyed.conflicts.push(key);
        }
        if existing.reversed && !candidate.reversed {
            keyed.entries.insert(key, candidate);
        }
    }
    keyed
}

fn is_identity_field(name: &str) -> bool {
    PAIR_I.contains(&name) || PAIR_J.contains(&name)
}

/// Member-relative field name as seen from the other base of the pair:
/// `org_i` becomes `org_j`, a donor becomes an acceptor.
fn mirrored_name(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("_i") {
        return format!("{stem}_j");
    }
    if let Some(stem) = name.strip_suffix("_j") {
        return format!("{stem}_i");
    }
    match name {
        "donor" => "acceptor",
        "acceptor" => "donor",
        "donor_atom" => "acceptor_atom",
        "acceptor_atom" => "donor_atom",
        other => other,
    }
    .to_string()
}

/// `CG` read from the other base is `GC`; `C-G` is `G-C`.
fn mirrored_label(label: &str) -> String {
    if let Some((first, second)) = label.split_once('-') {
        return format!("{second}-{first}");
    }
    let chars: Vec<char> = label.chars().collect();
    if chars.len() == 2 {
        chars.into_iter().rev().collect()
    } else {
        label.to_string()
    }
}

fn mirrored_value(name: &str, value: &Value) -> Value {
    match value {
        Value::String(label) if name == "bp_type" => Value::String(mirrored_label(label)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(inner, value)| (mirrored_name(inner), mirrored_value(inner, value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| mirrored_value(name, item))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Non-identity fields of `entry` in canonical `i <= j` orientation.
fn canonical_fields(entry: &KeyedEntry<'_>) -> BTreeMap<String, Value> {
    entry
        .record
        .iter()
        .filter(|(name, _)| !is_identity_field(name))
        .map(|(name, value)| {
            if entry.reversed {
                (mirrored_name(name), mirrored_value(name, value))
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

fn non_identity_fields_differ(left: &KeyedEntry<'_>, right: &KeyedEntry<'_>) -> bool {
    canonical_fields(left) != canonical_fields(right)
}
