//! Loading of one stage document from the legacy or modern JSON tree.
//!
//! Both trees share the layout `<root>/<stage_id>/<structure_id>.json`. The
//! documents have been written in several shapes over time; all of them are
//! normalized here into a flat list of JSON objects.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stage_registry::{StageDefinition, StageFamily, StageId};

pub type RawRecord = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Legacy,
    Modern,
}

impl Side {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Modern => "modern",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized stage document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StageDocument {
    pub records: Vec<RawRecord>,
    /// Positions of list entries that were not JSON objects.
    pub rejected_entries: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// No file for this structure and stage.
    Absent,
    /// The file exists but could not be read.
    Unreadable,
    /// The file is not valid JSON, or has no recognizable record list.
    Corrupt,
}

impl MissingReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Unreadable => "unreadable",
            Self::Corrupt => "corrupt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingData {
    pub side: Side,
    pub reason: MissingReason,
    pub path: String,
    pub detail: String,
}

impl fmt::Display for MissingData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            MissingReason::Absent => write!(f, "{} file not found: {}", self.side, self.path),
            MissingReason::Unreadable => write!(
                f,
                "{} file unreadable: {} ({})",
                self.side, self.path, self.detail
            ),
            MissingReason::Corrupt => write!(
                f,
                "{} file corrupt: {} ({})",
                self.side, self.path, self.detail
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded(StageDocument),
    Missing(MissingData),
}

pub fn stage_path(tree_root: &Path, structure_id: &str, stage: StageId) -> PathBuf {
    tree_root
        .join(stage.as_str())
        .join(format!("{structure_id}.json"))
}

pub fn load(tree_root: &Path, structure_id: &str, stage: StageId, side: Side) -> LoadOutcome {
    let path = stage_path(tree_root, structure_id, stage);
    let missing = |reason, detail: String| {
        LoadOutcome::Missing(MissingData {
            side,
            reason,
            path: path.display().to_string(),
            detail,
        })
    };

    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return missing(MissingReason::Absent, String::new());
        }
        Err(err) => return missing(MissingReason::Unreadable, err.to_string()),
    };

    match parse_document(&raw, stage.definition()) {
        Ok(document) => LoadOutcome::Loaded(document),
        Err(detail) => missing(MissingReason::Corrupt, detail),
    }
}

/// Parses and normalizes a document body. `Err` carries a human-readable
/// reason for a corrupt document.
pub fn parse_document(raw: &str, stage: &StageDefinition) -> Result<StageDocument, String> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| format!("invalid JSON: {err}"))?;
    normalize_document(value, stage)
}

pub fn normalize_document(value: Value, stage: &StageDefinition) -> Result<StageDocument, String> {
    let entries = match value {
        Value::Array(items) => unwrap_singleton_wrapper(items, stage),
        Value::Object(map) => match take_collection(map, stage) {
            Ok(items) => items,
            // Only the aggregate selection stage may be a bare record object.
            Err(map) if stage.family == StageFamily::Selection => vec![Value::Object(map)],
            Err(map) => {
                let keys: Vec<&str> = std::iter::once("records")
                    .chain(stage.collection_keys.iter().copied())
                    .collect();
                return Err(format!(
                    "no record list: expected an array or one of [{}], found an object with keys [{}]",
                    keys.join(", "),
                    map.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
                ));
            }
        },
        other => {
            return Err(format!(
                "expected a JSON array or object, found {}",
                json_type_name(&other)
            ));
        }
    };

    let mut document = StageDocument::default();
    for (idx, entry) in entries.into_iter().enumerate() {
        match entry {
            Value::Object(record) => document.records.push(record),
            _ => document.rejected_entries.push(idx),
        }
    }
    Ok(document)
}

/// `[{"num_atoms": 3, "atoms": [...]}]` is a legacy quirk: a list holding one
/// wrapper object whose own collection field is the real list.
fn unwrap_singleton_wrapper(mut items: Vec<Value>, stage: &StageDefinition) -> Vec<Value> {
    let is_wrapper = items.len() == 1
        && items[0]
            .as_object()
            .is_some_and(|map| collection_key(map, stage).is_some());
    if !is_wrapper {
        return items;
    }
    match items.pop() {
        Some(Value::Object(map)) => match take_collection(map, stage) {
            Ok(inner) => inner,
            Err(map) => vec![Value::Object(map)],
        },
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

fn take_collection(
    mut map: Map<String, Value>,
    stage: &StageDefinition,
) -> Result<Vec<Value>, Map<String, Value>> {
    let Some(key) = collection_key(&map, stage) else {
        return Err(map);
    };
    match map.remove(&key) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => {
            map.insert(key, other);
            Err(map)
        }
        None => Err(map),
    }
}

fn collection_key(map: &Map<String, Value>, stage: &StageDefinition) -> Option<String> {
    std::iter::once("records")
        .chain(stage.collection_keys.iter().copied())
        .find(|key| map.get(*key).is_some_and(Value::is_array))
        .map(str::to_string)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Structure ids with a document for `stage` in `tree_root`, sorted.
pub fn list_structure_ids(tree_root: &Path, stage: StageId) -> io::Result<BTreeSet<String>> {
    let dir = tree_root.join(stage.as_str());
    let mut ids = BTreeSet::new();
    let iter = match fs::read_dir(&dir) {
        Ok(iter) => iter,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ids),
        Err(err) => return Err(err),
    };
    for entry in iter {
        let path = entry?.path();
        let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
        if !is_json {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            ids.insert(stem.to_string());
        }
    }
    Ok(ids)
}
