//! Pure comparison primitives over JSON field values.
//!
//! Every primitive takes the legacy and modern value as `Option<&Value>` and
//! returns `None` when they agree. A field that is present on exactly one
//! side is always a mismatch; a field absent on both sides is not.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record_loader::Side;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldMismatch {
    /// Present on one side only; `side` is the side that lacks it.
    Absent { side: Side },
    Exceeded {
        /// Element path inside a vector or matrix, e.g. `[2]` or `[0][1]`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        element: Option<String>,
        legacy: f64,
        modern: f64,
        diff: f64,
        tolerance: f64,
    },
    Differs { legacy: String, modern: String },
    Length { legacy: usize, modern: usize },
    Shape { legacy: String, modern: String },
    Set {
        only_legacy: Vec<String>,
        only_modern: Vec<String>,
    },
}

fn presence<'v>(
    legacy: Option<&'v Value>,
    modern: Option<&'v Value>,
) -> Result<Option<(&'v Value, &'v Value)>, FieldMismatch> {
    match (legacy, modern) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(FieldMismatch::Absent { side: Side::Modern }),
        (None, Some(_)) => Err(FieldMismatch::Absent { side: Side::Legacy }),
        (Some(a), Some(b)) => Ok(Some((a, b))),
    }
}

fn type_mismatch(legacy: &Value, modern: &Value) -> FieldMismatch {
    FieldMismatch::Differs {
        legacy: render(legacy),
        modern: render(modern),
    }
}

pub fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// Numeric equality within `tolerance`, inclusive.
pub fn compare_scalar(
    legacy: Option<&Value>,
    modern: Option<&Value>,
    tolerance: f64,
) -> Option<FieldMismatch> {
    let (a, b) = match presence(legacy, modern) {
        Ok(Some(pair)) => pair,
        Ok(None) => return None,
        Err(mismatch) => return Some(mismatch),
    };
    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Some(type_mismatch(a, b));
    };
    within(x, y, tolerance, None)
}

fn within(legacy: f64, modern: f64, tolerance: f64, element: Option<String>) -> Option<FieldMismatch> {
    let diff = (legacy - modern).abs();
    if diff <= tolerance {
        return None;
    }
    Some(FieldMismatch::Exceeded {
        element,
        legacy,
        modern,
        diff,
        tolerance,
    })
}

/// Exact equality for categorical fields. Numbers compare numerically,
/// strings compare after trimming.
pub fn compare_exact(legacy: Option<&Value>, modern: Option<&Value>) -> Option<FieldMismatch> {
    let (a, b) = match presence(legacy, modern) {
        Ok(Some(pair)) => pair,
        Ok(None) => return None,
        Err(mismatch) => return Some(mismatch),
    };
    let equal = match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => x.trim() == y.trim(),
        _ => a == b,
    };
    (!equal).then(|| type_mismatch(a, b))
}

/// Case-insensitive text comparison (after trimming).
pub fn compare_text_ignore_case(
    legacy: Option<&Value>,
    modern: Option<&Value>,
) -> Option<FieldMismatch> {
    let (a, b) = match presence(legacy, modern) {
        Ok(Some(pair)) => pair,
        Ok(None) => return None,
        Err(mismatch) => return Some(mismatch),
    };
    match (a.as_str(), b.as_str()) {
        (Some(x), Some(y)) if x.trim().eq_ignore_ascii_case(y.trim()) => None,
        _ => Some(type_mismatch(a, b)),
    }
}

/// Boolean flags, which legacy often writes as `0`/`1`.
pub fn compare_flag(legacy: Option<&Value>, modern: Option<&Value>) -> Option<FieldMismatch> {
    let (a, b) = match presence(legacy, modern) {
        Ok(Some(pair)) => pair,
        Ok(None) => return None,
        Err(mismatch) => return Some(mismatch),
    };
    match (as_flag(a), as_flag(b)) {
        (Some(x), Some(y)) if x == y => None,
        _ => Some(type_mismatch(a, b)),
    }
}

pub fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_f64() {
            Some(x) if x == 0.0 => Some(false),
            Some(x) if x == 1.0 => Some(true),
            _ => None,
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Vectors and matrices
// ---------------------------------------------------------------------------

fn numbers(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(Value::as_f64).collect()
}

/// Element-wise comparison of numeric arrays; reports the worst element.
pub fn compare_vector(
    legacy: Option<&Value>,
    modern: Option<&Value>,
    tolerance: f64,
) -> Option<FieldMismatch> {
    let (a, b) = match presence(legacy, modern) {
        Ok(Some(pair)) => pair,
        Ok(None) => return None,
        Err(mismatch) => return Some(mismatch),
    };
    let (Some(xs), Some(ys)) = (numbers(a), numbers(b)) else {
        return Some(FieldMismatch::Shape {
            legacy: shape_of(a),
            modern: shape_of(b),
        });
    };
    if xs.len() != ys.len() {
        return Some(FieldMismatch::Length {
            legacy: xs.len(),
            modern: ys.len(),
        });
    }
    worst_element(
        xs.iter()
            .zip(&ys)
            .enumerate()
            .map(|(idx, (x, y))| (format!("[{idx}]"), *x, *y)),
        tolerance,
    )
}

fn rows(value: &Value) -> Option<Vec<Vec<f64>>> {
    value.as_array()?.iter().map(numbers).collect()
}

/// Element-wise comparison of numeric matrices of matching shape.
pub fn compare_matrix(
    legacy: Option<&Value>,
    modern: Option<&Value>,
    tolerance: f64,
) -> Option<FieldMismatch> {
    let (a, b) = match presence(legacy, modern) {
        Ok(Some(pair)) => pair,
        Ok(None) => return None,
        Err(mismatch) => return Some(mismatch),
    };
    let (shape_a, shape_b) = (shape_of(a), shape_of(b));
    let (Some(xs), Some(ys)) = (rows(a), rows(b)) else {
        return Some(FieldMismatch::Shape {
            legacy: shape_a,
            modern: shape_b,
        });
    };
    if shape_a != shape_b {
        return Some(FieldMismatch::Shape {
            legacy: shape_a,
            modern: shape_b,
        });
    }
    worst_element(
        xs.iter().zip(&ys).enumerate().flat_map(|(r, (row_a, row_b))| {
            row_a
                .iter()
                .zip(row_b)
                .enumerate()
                .map(move |(c, (x, y))| (format!("[{r}][{c}]"), *x, *y))
        }),
        tolerance,
    )
}

fn worst_element(
    elements: impl Iterator<Item = (String, f64, f64)>,
    tolerance: f64,
) -> Option<FieldMismatch> {
    let mut worst: Option<(String, f64, f64, f64)> = None;
    for (element, x, y) in elements {
        let diff = (x - y).abs();
        if diff > tolerance && worst.as_ref().is_none_or(|(.., best)| diff > *best) {
            worst = Some((element, x, y, diff));
        }
    }
    let (element, legacy, modern, diff) = worst?;
    Some(FieldMismatch::Exceeded {
        element: Some(element),
        legacy,
        modern,
        diff,
        tolerance,
    })
}

/// Human-readable shape: `3`, `3x3`, `ragged`, or the JSON type name.
pub fn shape_of(value: &Value) -> String {
    let Some(items) = value.as_array() else {
        return match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "scalar",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
        .to_string();
    };
    let inner: Vec<usize> = items
        .iter()
        .filter_map(|item| item.as_array().map(Vec::len))
        .collect();
    if inner.is_empty() {
        return items.len().to_string();
    }
    if inner.len() != items.len() || inner.windows(2).any(|pair| pair[0] != pair[1]) {
        return "ragged".to_string();
    }
    format!("{}x{}", items.len(), inner[0])
}

// ---------------------------------------------------------------------------
// Name sets
// ---------------------------------------------------------------------------

fn name_set(value: &Value) -> Option<BTreeSet<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(|name| name.trim().to_string()))
        .collect()
}

/// Set equality over lists of names; reports the symmetric difference.
pub fn compare_name_set(legacy: Option<&Value>, modern: Option<&Value>) -> Option<FieldMismatch> {
    let (a, b) = match presence(legacy, modern) {
        Ok(Some(pair)) => pair,
        Ok(None) => return None,
        Err(mismatch) => return Some(mismatch),
    };
    let (Some(xs), Some(ys)) = (name_set(a), name_set(b)) else {
        return Some(FieldMismatch::Shape {
            legacy: shape_of(a),
            modern: shape_of(b),
        });
    };
    set_difference(&xs, &ys)
}

pub fn set_difference<T: Ord + ToString>(
    legacy: &BTreeSet<T>,
    modern: &BTreeSet<T>,
) -> Option<FieldMismatch> {
    if legacy == modern {
        return None;
    }
    Some(FieldMismatch::Set {
        only_legacy: legacy.difference(modern).map(ToString::to_string).collect(),
        only_modern: modern.difference(legacy).map(ToString::to_string).collect(),
    })
}
