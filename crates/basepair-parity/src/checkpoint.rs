//! Resumable checkpoint: the last known status of each structure, written
//! once at the end of a run. On resume, structures recorded as passed for
//! every currently selected stage are skipped.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::report::{now_utc, write_atomic};
use crate::stage_registry::StageId;
use crate::stage_runner::{StructureReport, StructureStatus};

pub const CHECKPOINT_SCHEMA_VERSION: &str = "basepair.parity.checkpoint.v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub status: StructureStatus,
    pub timestamp: String,
    /// Stages evaluated when the status was recorded.
    #[serde(default)]
    pub stages: Vec<StageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema_version: String,
    pub updated_at_utc: String,
    pub entries: BTreeMap<String, CheckpointEntry>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION.to_string(),
            updated_at_utc: String::new(),
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to read checkpoint `{path}`: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to parse checkpoint `{path}`: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("checkpoint `{path}` has schema `{found}`, expected `basepair.parity.checkpoint.v1`")]
    Schema { path: String, found: String },
    #[error("failed to write checkpoint `{path}`: {source}")]
    Write { path: String, source: io::Error },
}

impl Checkpoint {
    /// Loads a checkpoint; a missing file is an empty checkpoint.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        let checkpoint: Self =
            serde_json::from_str(&raw).map_err(|source| CheckpointError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        if checkpoint.schema_version != CHECKPOINT_SCHEMA_VERSION {
            return Err(CheckpointError::Schema {
                path: path.display().to_string(),
                found: checkpoint.schema_version,
            });
        }
        Ok(checkpoint)
    }

    /// Whether `structure_id` passed on a run covering all of `stages`.
    pub fn has_passed(&self, structure_id: &str, stages: &[StageId]) -> bool {
        self.entries.get(structure_id).is_some_and(|entry| {
            entry.status == StructureStatus::Passed
                && stages.iter().all(|stage| entry.stages.contains(stage))
        })
    }

    pub fn record(&mut self, report: &StructureReport, stages: &[StageId]) {
        self.entries.insert(
            report.structure_id.clone(),
            CheckpointEntry {
                status: report.status(),
                timestamp: now_utc(),
                stages: stages.to_vec(),
            },
        );
    }

    pub fn save(&mut self, path: &Path) -> Result<(), CheckpointError> {
        self.updated_at_utc = now_utc();
        let write_err = |source: io::Error| CheckpointError::Write {
            path: path.display().to_string(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(&*self)
            .map_err(|err| write_err(io::Error::other(err)))?;
        write_atomic(path, &bytes).map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::stage_runner::STRUCTURE_REPORT_SCHEMA_VERSION;

    fn report(id: &str) -> StructureReport {
        StructureReport {
            schema_version: STRUCTURE_REPORT_SCHEMA_VERSION.to_string(),
            worklist_index: 0,
            structure_id: id.to_string(),
            stages: Vec::new(),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = TempDir::new().expect("tempdir");
        let checkpoint = Checkpoint::load(&tmp.path().join("none.json")).expect("load");
        assert!(checkpoint.entries.is_empty());
    }

    #[test]
    fn passed_entries_cover_only_their_stages() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.entries.insert(
            "1EHZ".to_string(),
            CheckpointEntry {
                status: StructureStatus::Passed,
                timestamp: now_utc(),
                stages: vec![StageId::PdbAtoms, StageId::ResidueIndices],
            },
        );
        assert!(checkpoint.has_passed("1EHZ", &[StageId::PdbAtoms]));
        assert!(!checkpoint.has_passed("1EHZ", &[StageId::PdbAtoms, StageId::BasePair]));
        assert!(!checkpoint.has_passed("1H4S", &[StageId::PdbAtoms]));
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("state").join("checkpoint.json");
        let mut checkpoint = Checkpoint::default();
        checkpoint.record(&report("1EHZ"), &[StageId::BasePair]);
        checkpoint.save(&path).expect("save");

        let loaded = Checkpoint::load(&path).expect("load");
        assert_eq!(loaded.entries, checkpoint.entries);
        assert!(!loaded.updated_at_utc.is_empty());
        // No stage ran, so the structure was skipped rather than passed.
        assert!(!loaded.has_passed("1EHZ", &[StageId::BasePair]));
    }

    #[test]
    fn foreign_schema_is_rejected() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("checkpoint.json");
        fs::write(
            &path,
            r#"{"schema_version": "other.v9", "updated_at_utc": "", "entries": {}}"#,
        )
        .expect("write");
        assert!(matches!(
            Checkpoint::load(&path),
            Err(CheckpointError::Schema { .. })
        ));
    }
}
