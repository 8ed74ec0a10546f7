use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field_compare::FieldMismatch;
use crate::record_loader::Side;

/// Upper bound on individually listed missing/extra keys per diagnostic.
pub const MAX_LISTED_KEYS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchClass {
    CountMismatch,
    KeyNotFound,
    MissingField,
    ToleranceExceeded,
    ValueMismatch,
    LengthMismatch,
    ShapeMismatch,
    SetMismatch,
    HbondDistance,
    HbondMissing,
    MalformedRecord,
    NoCommonRecords,
    DuplicateConflict,
    Omitted,
    WorkerPanic,
}

impl MismatchClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CountMismatch => "count_mismatch",
            Self::KeyNotFound => "key_not_found",
            Self::MissingField => "missing_field",
            Self::ToleranceExceeded => "tolerance_exceeded",
            Self::ValueMismatch => "value_mismatch",
            Self::LengthMismatch => "length_mismatch",
            Self::ShapeMismatch => "shape_mismatch",
            Self::SetMismatch => "set_mismatch",
            Self::HbondDistance => "hbond_distance",
            Self::HbondMissing => "hbond_missing",
            Self::MalformedRecord => "malformed_record",
            Self::NoCommonRecords => "no_common_records",
            Self::DuplicateConflict => "duplicate_conflict",
            Self::Omitted => "omitted",
            Self::WorkerPanic => "worker_panic",
        }
    }
}

impl fmt::Display for MismatchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Failure,
    Warning,
}

/// One finding from a stage comparison. `key` is the rendered record key
/// (residue, pair, step or ordinal) the finding belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    CountMismatch {
        what: String,
        legacy: usize,
        modern: usize,
    },
    /// `key` exists on the other side but not on `side`.
    KeyNotFound { key: String, side: Side },
    MissingField {
        key: String,
        field: String,
        side: Side,
    },
    ToleranceExceeded {
        key: String,
        field: String,
        legacy: f64,
        modern: f64,
        diff: f64,
        tolerance: f64,
    },
    ValueMismatch {
        key: String,
        field: String,
        legacy: String,
        modern: String,
    },
    LengthMismatch {
        key: String,
        field: String,
        legacy: usize,
        modern: usize,
    },
    ShapeMismatch {
        key: String,
        field: String,
        legacy: String,
        modern: String,
    },
    SetMismatch {
        key: String,
        field: String,
        only_legacy: Vec<String>,
        only_modern: Vec<String>,
    },
    /// Same bond identity on both sides, different recorded distance.
    HbondDistanceMismatch {
        key: String,
        bond: String,
        legacy: f64,
        modern: f64,
        diff: f64,
        tolerance: f64,
    },
    /// Bond identity present on the other side but not on `side`.
    HbondMissing { key: String, bond: String, side: Side },
    MalformedRecord {
        side: Side,
        position: usize,
        reason: String,
    },
    NoCommonRecords { legacy: usize, modern: usize },
    /// Both orderings of a pair were present on `side` with different
    /// non-identity fields; the canonical record was kept.
    DuplicateConflict { key: String, side: Side },
    /// `count` further findings of the same kind were not listed.
    Omitted { what: String, count: usize },
    WorkerPanic { message: String },
}

impl Diagnostic {
    /// Lifts a field-level mismatch into a keyed diagnostic.
    pub fn from_field(key: &str, field: &str, mismatch: FieldMismatch) -> Self {
        let key = key.to_string();
        match mismatch {
            FieldMismatch::Absent { side } => Self::MissingField {
                key,
                field: field.to_string(),
                side,
            },
            FieldMismatch::Exceeded {
                element,
                legacy,
                modern,
                diff,
                tolerance,
            } => Self::ToleranceExceeded {
                key,
                field: format!("{field}{}", element.unwrap_or_default()),
                legacy,
                modern,
                diff,
                tolerance,
            },
            FieldMismatch::Differs { legacy, modern } => Self::ValueMismatch {
                key,
                field: field.to_string(),
                legacy,
                modern,
            },
            FieldMismatch::Length { legacy, modern } => Self::LengthMismatch {
                key,
                field: field.to_string(),
                legacy,
                modern,
            },
            FieldMismatch::Shape { legacy, modern } => Self::ShapeMismatch {
                key,
                field: field.to_string(),
                legacy,
                modern,
            },
            FieldMismatch::Set {
                only_legacy,
                only_modern,
            } => Self::SetMismatch {
                key,
                field: field.to_string(),
                only_legacy,
                only_modern,
            },
        }
    }

    pub const fn class(&self) -> MismatchClass {
        match self {
            Self::CountMismatch { .. } => MismatchClass::CountMismatch,
            Self::KeyNotFound { .. } => MismatchClass::KeyNotFound,
            Self::MissingField { .. } => MismatchClass::MissingField,
            Self::ToleranceExceeded { .. } => MismatchClass::ToleranceExceeded,
            Self::ValueMismatch { .. } => MismatchClass::ValueMismatch,
            Self::LengthMismatch { .. } => MismatchClass::LengthMismatch,
            Self::ShapeMismatch { .. } => MismatchClass::ShapeMismatch,
            Self::SetMismatch { .. } => MismatchClass::SetMismatch,
            Self::HbondDistanceMismatch { .. } => MismatchClass::HbondDistance,
            Self::HbondMissing { .. } => MismatchClass::HbondMissing,
            Self::MalformedRecord { .. } => MismatchClass::MalformedRecord,
            Self::NoCommonRecords { .. } => MismatchClass::NoCommonRecords,
            Self::DuplicateConflict { .. } => MismatchClass::DuplicateConflict,
            Self::Omitted { .. } => MismatchClass::Omitted,
            Self::WorkerPanic { .. } => MismatchClass::WorkerPanic,
        }
    }

    pub const fn severity(&self) -> Severity {
        match self {
            Self::DuplicateConflict { .. } | Self::Omitted { .. } => Severity::Warning,
            _ => Severity::Failure,
        }
    }

    pub const fn is_failure(&self) -> bool {
        matches!(self.severity(), Severity::Failure)
    }
}

fn absent_from(side: Side) -> &'static str {
    match side {
        Side::Legacy => "missing in legacy",
        Side::Modern => "missing in modern",
    }
}

fn list(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountMismatch {
                what,
                legacy,
                modern,
            } => write!(f, "{what} count mismatch: legacy={legacy} modern={modern}"),
            Self::KeyNotFound { key, side } => write!(f, "{key}: {}", absent_from(*side)),
            Self::MissingField { key, field, side } => {
                write!(f, "{key} {field}: field {}", absent_from(*side))
            }
            Self::ToleranceExceeded {
                key,
                field,
                legacy,
                modern,
                diff,
                tolerance,
            } => write!(
                f,
                "{key} {field}: legacy={legacy} modern={modern} diff={diff:.3e} (tol {tolerance:e})"
            ),
            Self::ValueMismatch {
                key,
                field,
                legacy,
                modern,
            } => write!(f, "{key} {field}: legacy={legacy:?} modern={modern:?}"),
            Self::LengthMismatch {
                key,
                field,
                legacy,
                modern,
            } => write!(
                f,
                "{key} {field}: length mismatch legacy={legacy} modern={modern}"
            ),
            Self::ShapeMismatch {
                key,
                field,
                legacy,
                modern,
            } => write!(
                f,
                "{key} {field}: shape mismatch legacy={legacy} modern={modern}"
            ),
            Self::SetMismatch {
                key,
                field,
                only_legacy,
                only_modern,
            } => write!(
                f,
                "{key} {field}: only_legacy={} only_modern={}",
                list(only_legacy),
                list(only_modern)
            ),
            Self::HbondDistanceMismatch {
                key,
                bond,
                legacy,
                modern,
                diff,
                tolerance,
            } => write!(
                f,
                "{key} hbond {bond}: distance mismatch legacy={legacy} modern={modern} diff={diff:.3e} (tol {tolerance:e})"
            ),
            Self::HbondMissing { key, bond, side } => {
                write!(f, "{key} hbond {bond}: {}", absent_from(*side))
            }
            Self::MalformedRecord {
                side,
                position,
                reason,
            } => write!(f, "{side} record #{position} skipped: {reason}"),
            Self::NoCommonRecords { legacy, modern } => write!(
                f,
                "no records in common (legacy={legacy} modern={modern})"
            ),
            Self::DuplicateConflict { key, side } => write!(
                f,
                "{key}: {side} has both orderings with different values; kept canonical order"
            ),
            Self::Omitted { what, count } => write!(f, "... and {count} more {what}"),
            Self::WorkerPanic { message } => write!(f, "worker panicked: {message}"),
        }
    }
}

/// Appends `items` as diagnostics, listing at most [`MAX_LISTED_KEYS`] and
/// summarizing the rest.
pub fn push_capped<I>(out: &mut Vec<Diagnostic>, what: &str, items: I)
where
    I: IntoIterator<Item = Diagnostic>,
{
    let mut omitted = 0;
    for (idx, diagnostic) in items.into_iter().enumerate() {
        if idx < MAX_LISTED_KEYS {
            out.push(diagnostic);
        } else {
            omitted += 1;
        }
    }
    if omitted > 0 {
        out.push(Diagnostic::Omitted {
            what: what.to_string(),
            count: omitted,
        });
    }
}

/// Truncates a list to [`MAX_LISTED_KEYS`], returning how many were dropped.
pub fn cap_list(items: &mut Vec<String>) -> usize {
    let dropped = items.len().saturating_sub(MAX_LISTED_KEYS);
    items.truncate(MAX_LISTED_KEYS);
    dropped
}
