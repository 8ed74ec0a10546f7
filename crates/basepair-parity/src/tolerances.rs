//! Numeric tolerances per physical quantity.
//!
//! Legacy and modern outputs are produced by independent floating-point code
//! paths, so equality is always judged against a bound chosen for the kind of
//! quantity being compared. A comparison passes when `|a - b| <= tolerance`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Atom coordinates, origins, translations and H-bond distances (Å).
pub const COORDINATE: f64 = 1e-6;

/// Rotation-matrix elements. Looser than [`COORDINATE`] because legacy and
/// modern normalize intermediate frames differently.
pub const MATRIX: f64 = 1e-4;

/// RMS of the least-squares base fit.
pub const RMS_FIT: f64 = 1e-3;

/// Pair-validation and distance-check scalars derived through trigonometry.
pub const RELAXED_SCALAR: f64 = 1e-4;

/// Base-pair step and helical parameters (Å and degrees).
pub const STEP_PARAMETER: f64 = 1e-4;

/// Categorical fields: type codes, booleans, counts.
pub const EXACT: f64 = 0.0;

/// The kind of quantity a stage is primarily judged on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceClass {
    Coordinate,
    Matrix,
    RmsFit,
    RelaxedScalar,
    StepParameter,
    Exact,
}

impl ToleranceClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Coordinate => "coordinate",
            Self::Matrix => "matrix",
            Self::RmsFit => "rms_fit",
            Self::RelaxedScalar => "relaxed_scalar",
            Self::StepParameter => "step_parameter",
            Self::Exact => "exact",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceSet {
    pub coordinate: f64,
    pub matrix: f64,
    pub rms_fit: f64,
    pub relaxed_scalar: f64,
    pub step_parameter: f64,
}

impl ToleranceSet {
    pub const DEFAULT: Self = Self {
        coordinate: COORDINATE,
        matrix: MATRIX,
        rms_fit: RMS_FIT,
        relaxed_scalar: RELAXED_SCALAR,
        step_parameter: STEP_PARAMETER,
    };

    /// Effective bound for `class`, honoring overrides.
    pub const fn resolve(&self, class: ToleranceClass) -> f64 {
        match class {
            ToleranceClass::Coordinate => self.coordinate,
            ToleranceClass::Matrix => self.matrix,
            ToleranceClass::RmsFit => self.rms_fit,
            ToleranceClass::RelaxedScalar => self.relaxed_scalar,
            ToleranceClass::StepParameter => self.step_parameter,
            ToleranceClass::Exact => EXACT,
        }
    }

    /// Loads a partial override; omitted fields keep their defaults.
    pub fn load_overrides(path: &Path) -> Result<Self, ToleranceError> {
        let raw = fs::read_to_string(path).map_err(|source| ToleranceError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let set: Self = serde_json::from_str(&raw).map_err(|source| ToleranceError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<(), ToleranceError> {
        let fields = [
            ("coordinate", self.coordinate),
            ("matrix", self.matrix),
            ("rms_fit", self.rms_fit),
            ("relaxed_scalar", self.relaxed_scalar),
            ("step_parameter", self.step_parameter),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ToleranceError::Invalid {
                    field: name,
                    value,
                });
            }
        }
        Ok(())
    }
}

impl Default for ToleranceSet {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Error)]
pub enum ToleranceError {
    #[error("failed to read tolerance overrides `{path}`: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse tolerance overrides `{path}`: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("tolerance `{field}` must be a finite non-negative number, got {value}")]
    Invalid { field: &'static str, value: f64 },
}
