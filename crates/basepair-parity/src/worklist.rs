//! Structure-id worklists: explicit ids, list files, or the set discovered
//! on both trees, optionally sampled into a seeded test set and capped.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record_loader::list_structure_ids;
use crate::stage_registry::StageId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorklistSource {
    Explicit { ids: Vec<String> },
    ListFile { path: PathBuf },
    /// Every id with a file for at least one selected stage on both trees.
    Discover,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorklistLimits {
    pub max: Option<usize>,
    pub test_set: Option<usize>,
    pub seed: u64,
}

#[derive(Debug, Error)]
pub enum WorklistError {
    #[error("failed to read structure list `{path}`: {source}")]
    ListFile {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to scan `{path}`: {source}")]
    Discover {
        path: String,
        source: std::io::Error,
    },
    #[error("worklist is empty")]
    Empty,
}

/// Xorshift generator used for test-set sampling.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    pub fn seeded(seed: u64) -> Self {
        let state = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform-enough index below `bound`; `bound` must be nonzero.
    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

/// Parses a list file: one id per line, blank lines and `#` comments
/// ignored, first occurrence wins.
pub fn parse_list(raw: &str) -> Vec<String> {
    dedup(
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ToString::to_string),
    )
}

fn dedup(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Ids present on both trees for any of `stages`, sorted.
pub fn discover(
    legacy_root: &Path,
    modern_root: &Path,
    stages: &[StageId],
) -> Result<Vec<String>, WorklistError> {
    let mut found = BTreeSet::new();
    for &stage in stages {
        let legacy = scan(legacy_root, stage)?;
        let modern = scan(modern_root, stage)?;
        found.extend(legacy.intersection(&modern).cloned());
    }
    Ok(found.into_iter().collect())
}

fn scan(root: &Path, stage: StageId) -> Result<BTreeSet<String>, WorklistError> {
    list_structure_ids(root, stage).map_err(|source| WorklistError::Discover {
        path: root.join(stage.as_str()).display().to_string(),
        source,
    })
}

/// Draws `size` ids with a partial Fisher-Yates shuffle and returns them
/// sorted. The same seed and input always give the same sample.
pub fn sample_test_set(ids: &[String], size: usize, seed: u64) -> Vec<String> {
    if size >= ids.len() {
        return ids.to_vec();
    }
    let mut pool = ids.to_vec();
    let mut rng = DeterministicRng::seeded(seed);
    for slot in 0..size {
        let pick = slot + rng.below(pool.len() - slot);
        pool.swap(slot, pick);
    }
    pool.truncate(size);
    pool.sort();
    pool
}

/// Builds the final worklist. Sampling applies before the max cap.
pub fn build(
    source: &WorklistSource,
    limits: &WorklistLimits,
    legacy_root: &Path,
    modern_root: &Path,
    stages: &[StageId],
) -> Result<Vec<String>, WorklistError> {
    let mut ids = match source {
        WorklistSource::Explicit { ids } => dedup(ids.iter().map(|id| id.trim().to_string()))
            .into_iter()
            .filter(|id| !id.is_empty())
            .collect(),
        WorklistSource::ListFile { path } => {
            let raw = fs::read_to_string(path).map_err(|source| WorklistError::ListFile {
                path: path.display().to_string(),
                source,
            })?;
            parse_list(&raw)
        }
        WorklistSource::Discover => discover(legacy_root, modern_root, stages)?,
    };
    if let Some(size) = limits.test_set {
        ids = sample_test_set(&ids, size, limits.seed);
    }
    if let Some(max) = limits.max {
        ids.truncate(max);
    }
    if ids.is_empty() {
        return Err(WorklistError::Empty);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn touch(root: &Path, stage: StageId, id: &str) {
        let dir = root.join(stage.as_str());
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(format!("{id}.json")), "[]").expect("write");
    }

    #[test]
    fn list_file_skips_comments_and_duplicates() {
        let parsed = parse_list("# smoke set\n1EHZ\n\n  1H4S \n1EHZ\n# end\n");
        assert_eq!(parsed, ids(&["1EHZ", "1H4S"]));
    }

    #[test]
    fn discovery_requires_both_trees() {
        let tmp = TempDir::new().expect("tempdir");
        let (legacy, modern) = (tmp.path().join("legacy"), tmp.path().join("modern"));
        touch(&legacy, StageId::PdbAtoms, "1EHZ");
        touch(&modern, StageId::PdbAtoms, "1EHZ");
        touch(&legacy, StageId::PdbAtoms, "ONLY_LEGACY");
        touch(&legacy, StageId::BasePair, "2PAIR");
        touch(&modern, StageId::BasePair, "2PAIR");

        let found = discover(&legacy, &modern, &[StageId::PdbAtoms, StageId::BasePair])
            .expect("discover");
        assert_eq!(found, ids(&["1EHZ", "2PAIR"]));
        let atoms_only = discover(&legacy, &modern, &[StageId::PdbAtoms]).expect("discover");
        assert_eq!(atoms_only, ids(&["1EHZ"]));
    }

    #[test]
    fn test_set_is_seeded_and_sorted() {
        let all: Vec<String> = (0..50).map(|n| format!("S{n:02}")).collect();
        let first = sample_test_set(&all, 10, 7);
        let again = sample_test_set(&all, 10, 7);
        assert_eq!(first, again);
        assert_eq!(first.len(), 10);
        assert!(first.windows(2).all(|pair| pair[0] < pair[1]));
        assert_ne!(first, sample_test_set(&all, 10, 8));
    }

    #[test]
    fn max_caps_after_sampling_and_empty_is_an_error() {
        let limits = WorklistLimits {
            max: Some(2),
            ..WorklistLimits::default()
        };
        let source = WorklistSource::Explicit {
            ids: ids(&["C", "A", "C", "B"]),
        };
        let built = build(&source, &limits, Path::new("l"), Path::new("m"), &[]).expect("build");
        assert_eq!(built, ids(&["C", "A"]));

        let empty = WorklistSource::Explicit { ids: Vec::new() };
        assert!(matches!(
            build(&empty, &WorklistLimits::default(), Path::new("l"), Path::new("m"), &[]),
            Err(WorklistError::Empty)
        ));
    }

    #[test]
    fn unreadable_list_file_is_reported_with_path() {
        let source = WorklistSource::ListFile {
            path: PathBuf::from("/nonexistent/ids.txt"),
        };
        let err = build(&source, &WorklistLimits::default(), Path::new("l"), Path::new("m"), &[])
            .expect_err("missing list");
        assert!(err.to_string().contains("/nonexistent/ids.txt"));
    }
}
