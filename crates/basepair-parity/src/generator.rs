//! Invocation of the external legacy and modern output generators.
//!
//! The modern generator is called as
//! `<exe> <structure_file> <modern_root> [--stage=<id>] [--legacy-mode]` and
//! the legacy generator as `<exe> <structure_file> <legacy_root>`. Both are
//! expected to populate the per-stage subdirectories of their root and exit
//! zero. A failure here never fails a comparison: the structure's stages are
//! skipped instead.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage_registry::StageId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Directory holding `<structure_id>.<structure_extension>` input files.
    pub structure_dir: PathBuf,
    pub structure_extension: String,
    pub modern_exe: PathBuf,
    pub legacy_exe: PathBuf,
    /// Pass `--legacy-mode` to the modern generator.
    pub legacy_mode: bool,
}

impl GeneratorSettings {
    pub fn new(structure_dir: PathBuf, modern_exe: PathBuf, legacy_exe: PathBuf) -> Self {
        Self {
            structure_dir,
            structure_extension: "pdb".to_string(),
            modern_exe,
            legacy_exe,
            legacy_mode: true,
        }
    }

    pub fn structure_file(&self, structure_id: &str) -> PathBuf {
        self.structure_dir
            .join(format!("{structure_id}.{}", self.structure_extension))
    }

    pub fn modern_args(
        &self,
        structure_file: &Path,
        modern_root: &Path,
        stage: Option<StageId>,
    ) -> Vec<OsString> {
        let mut args = vec![
            structure_file.as_os_str().to_os_string(),
            modern_root.as_os_str().to_os_string(),
        ];
        if let Some(stage) = stage {
            args.push(format!("--stage={stage}").into());
        }
        if self.legacy_mode {
            args.push("--legacy-mode".into());
        }
        args
    }

    pub fn legacy_args(&self, structure_file: &Path, legacy_root: &Path) -> Vec<OsString> {
        vec![
            structure_file.as_os_str().to_os_string(),
            legacy_root.as_os_str().to_os_string(),
        ]
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("structure file `{path}` not found")]
    MissingStructure { path: String },
    #[error("failed to spawn generator `{exe}`: {source}")]
    Spawn {
        exe: String,
        source: std::io::Error,
    },
    #[error("generator `{exe}` failed for {structure_id}: {detail}")]
    Failed {
        exe: String,
        structure_id: String,
        detail: String,
    },
}

/// Regenerates both trees for one structure. The modern generator is run
/// once for all stages, or once per stage for a partial selection.
pub fn regenerate(
    settings: &GeneratorSettings,
    structure_id: &str,
    legacy_root: &Path,
    modern_root: &Path,
    stages: &[StageId],
) -> Result<(), GeneratorError> {
    let structure_file = settings.structure_file(structure_id);
    if !structure_file.is_file() {
        return Err(GeneratorError::MissingStructure {
            path: structure_file.display().to_string(),
        });
    }

    run_generator(
        &settings.legacy_exe,
        &settings.legacy_args(&structure_file, legacy_root),
        structure_id,
    )?;

    if stages.len() == StageId::ALL.len() {
        return run_generator(
            &settings.modern_exe,
            &settings.modern_args(&structure_file, modern_root, None),
            structure_id,
        );
    }
    for stage in stages {
        run_generator(
            &settings.modern_exe,
            &settings.modern_args(&structure_file, modern_root, Some(*stage)),
            structure_id,
        )?;
    }
    Ok(())
}

fn run_generator(exe: &Path, args: &[OsString], structure_id: &str) -> Result<(), GeneratorError> {
    let output = Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| GeneratorError::Spawn {
            exe: exe.display().to_string(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(GeneratorError::Failed {
        exe: exe.display().to_string(),
        structure_id: structure_id.to_string(),
        detail: format!(
            "exited with status {}{}",
            output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string()),
            if stderr.is_empty() {
                String::new()
            } else {
                format!("; stderr={stderr}")
            }
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> GeneratorSettings {
        GeneratorSettings::new(
            PathBuf::from("data/pdb"),
            PathBuf::from("build/generate_modern_json"),
            PathBuf::from("org/build/bin/find_pair_analyze"),
        )
    }

    #[test]
    fn modern_invocation_carries_stage_and_legacy_mode() {
        let settings = settings();
        let file = settings.structure_file("1EHZ");
        assert_eq!(file, PathBuf::from("data/pdb/1EHZ.pdb"));
        let args = settings.modern_args(&file, Path::new("data/json"), Some(StageId::LsFitting));
        let rendered: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "data/pdb/1EHZ.pdb",
                "data/json",
                "--stage=ls_fitting",
                "--legacy-mode"
            ]
        );
    }

    #[test]
    fn legacy_invocation_is_file_and_root() {
        let settings = settings();
        let file = settings.structure_file("1EHZ");
        assert_eq!(
            settings.legacy_args(&file, Path::new("data/json_legacy")).len(),
            2
        );
    }

    #[test]
    fn missing_structure_file_is_reported_before_spawning() {
        let err = regenerate(
            &settings(),
            "NOPE",
            Path::new("legacy"),
            Path::new("modern"),
            &StageId::ALL,
        )
        .expect_err("no structure file");
        assert!(matches!(err, GeneratorError::MissingStructure { .. }));
    }
}
