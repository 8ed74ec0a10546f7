//! Static registry of the twelve pipeline stages.
//!
//! Stage numbers are a total order that follows pipeline dependencies: a
//! stage only ever depends on lower-numbered stages. The registry is pure
//! data; selection strings from the command line are resolved here into an
//! explicit, sorted, de-duplicated list of [`StageId`]s.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tolerances::ToleranceClass;

// ---------------------------------------------------------------------------
// StageId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    PdbAtoms,
    ResidueIndices,
    BaseFrameCalc,
    LsFitting,
    FrameCalc,
    PairValidation,
    DistanceChecks,
    HbondList,
    BasePair,
    FindBestpairSelection,
    BpstepParams,
    HelicalParams,
}

impl StageId {
    pub const ALL: [Self; 12] = [
        Self::PdbAtoms,
        Self::ResidueIndices,
        Self::BaseFrameCalc,
        Self::LsFitting,
        Self::FrameCalc,
        Self::PairValidation,
        Self::DistanceChecks,
        Self::HbondList,
        Self::BasePair,
        Self::FindBestpairSelection,
        Self::BpstepParams,
        Self::HelicalParams,
    ];

    pub const fn number(self) -> u8 {
        match self {
            Self::PdbAtoms => 1,
            Self::ResidueIndices => 2,
            Self::BaseFrameCalc => 3,
            Self::LsFitting => 4,
            Self::FrameCalc => 5,
            Self::PairValidation => 6,
            Self::DistanceChecks => 7,
            Self::HbondList => 8,
            Self::BasePair => 9,
            Self::FindBestpairSelection => 10,
            Self::BpstepParams => 11,
            Self::HelicalParams => 12,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.number() == number)
    }

    /// On-disk directory name and record-type name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PdbAtoms => "pdb_atoms",
            Self::ResidueIndices => "residue_indices",
            Self::BaseFrameCalc => "base_frame_calc",
            Self::LsFitting => "ls_fitting",
            Self::FrameCalc => "frame_calc",
            Self::PairValidation => "pair_validation",
            Self::DistanceChecks => "distance_checks",
            Self::HbondList => "hbond_list",
            Self::BasePair => "base_pair",
            Self::FindBestpairSelection => "find_bestpair_selection",
            Self::BpstepParams => "bpstep_params",
            Self::HelicalParams => "helical_params",
        }
    }

    pub fn definition(self) -> &'static StageDefinition {
        &STAGES[usize::from(self.number() - 1)]
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StageFamily / StageDefinition
// ---------------------------------------------------------------------------

/// How records of a stage are keyed for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFamily {
    Atom,
    ResidueOrdinal,
    Residue,
    Pair,
    Selection,
    Step,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageDefinition {
    pub id: StageId,
    pub number: u8,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Wrapper keys that may hold the record list, besides `records`.
    pub collection_keys: &'static [&'static str],
    /// Fields every matched record must carry on at least one side, each as
    /// an alias list with the reported name first. `parent.field` names a
    /// field one level down.
    pub required_fields: &'static [&'static [&'static str]],
    pub depends_on: &'static [StageId],
    pub family: StageFamily,
    pub tolerance: ToleranceClass,
    pub pipeline_defining: bool,
}

pub static STAGES: [StageDefinition; 12] = [
    StageDefinition {
        id: StageId::PdbAtoms,
        number: 1,
        name: "Atom parsing",
        aliases: &["atoms", "atom"],
        collection_keys: &["atoms"],
        required_fields: &[&["atom_name", "name"], &["xyz", "coords", "coordinates"]],
        depends_on: &[],
        family: StageFamily::Atom,
        tolerance: ToleranceClass::Coordinate,
        pipeline_defining: false,
    },
    StageDefinition {
        id: StageId::ResidueIndices,
        number: 2,
        name: "Residue indexing",
        aliases: &["seidx", "residues", "residue_index"],
        collection_keys: &["seidx", "residues"],
        required_fields: &[
            &["start_atom", "legacy_start_atom", "start"],
            &["end_atom", "legacy_end_atom", "end"],
        ],
        depends_on: &[StageId::PdbAtoms],
        family: StageFamily::ResidueOrdinal,
        tolerance: ToleranceClass::Exact,
        pipeline_defining: false,
    },
    StageDefinition {
        id: StageId::BaseFrameCalc,
        number: 3,
        name: "Base frame fit",
        aliases: &["base_frame", "frame_fit"],
        collection_keys: &[],
        required_fields: &[
            &["base_type", "residue_type"],
            &["rms_fit", "rms"],
            &["num_matched_atoms", "num_matched"],
        ],
        depends_on: &[StageId::ResidueIndices],
        family: StageFamily::Residue,
        tolerance: ToleranceClass::RmsFit,
        pipeline_defining: false,
    },
    StageDefinition {
        id: StageId::LsFitting,
        number: 4,
        name: "Least-squares fitting",
        aliases: &["ls_fit", "lsfit"],
        collection_keys: &[],
        required_fields: &[
            &["rms_fit", "rms"],
            &["rotation_matrix", "rotation"],
            &["translation", "translation_vector"],
        ],
        depends_on: &[StageId::BaseFrameCalc],
        family: StageFamily::Residue,
        tolerance: ToleranceClass::Matrix,
        pipeline_defining: false,
    },
    StageDefinition {
        id: StageId::FrameCalc,
        number: 5,
        name: "Reference frames",
        aliases: &["frame", "ref_frames"],
        collection_keys: &[],
        required_fields: &[&["rms_fit", "rms"], &["num_matched_atoms", "num_matched"]],
        depends_on: &[StageId::BaseFrameCalc],
        family: StageFamily::Residue,
        tolerance: ToleranceClass::RmsFit,
        pipeline_defining: false,
    },
    StageDefinition {
        id: StageId::PairValidation,
        number: 6,
        name: "Pair validation",
        aliases: &["validation"],
        collection_keys: &[],
        required_fields: &[
            &["is_valid"],
            &["calculated_values.dorg"],
            &["calculated_values.d_v"],
            &["calculated_values.plane_angle"],
            &["calculated_values.dNN"],
        ],
        depends_on: &[StageId::FrameCalc],
        family: StageFamily::Pair,
        tolerance: ToleranceClass::RelaxedScalar,
        pipeline_defining: false,
    },
    StageDefinition {
        id: StageId::DistanceChecks,
        number: 7,
        name: "Distance checks",
        aliases: &["distances"],
        collection_keys: &[],
        required_fields: &[&["values"]],
        depends_on: &[StageId::FrameCalc],
        family: StageFamily::Pair,
        tolerance: ToleranceClass::RelaxedScalar,
        pipeline_defining: false,
    },
    StageDefinition {
        id: StageId::HbondList,
        number: 8,
        name: "Hydrogen bonds",
        aliases: &["hbond", "h_bonds"],
        collection_keys: &[],
        required_fields: &[&["hbonds", "hbond_list"]],
        depends_on: &[StageId::PairValidation],
        family: StageFamily::Pair,
        tolerance: ToleranceClass::Coordinate,
        pipeline_defining: false,
    },
    StageDefinition {
        id: StageId::BasePair,
        number: 9,
        name: "Base pair geometry",
        aliases: &["basepair", "bp"],
        collection_keys: &[],
        required_fields: &[&["bp_type"]],
        depends_on: &[StageId::PairValidation, StageId::HbondList],
        family: StageFamily::Pair,
        tolerance: ToleranceClass::Matrix,
        pipeline_defining: false,
    },
    StageDefinition {
        id: StageId::FindBestpairSelection,
        number: 10,
        name: "Best-pair selection",
        aliases: &["bestpair", "selection", "best_pairs"],
        collection_keys: &["selection"],
        // Either one aggregate record or one record per pair; entries are
        // checked for readable pair indices instead.
        required_fields: &[],
        depends_on: &[
            StageId::PairValidation,
            StageId::HbondList,
            StageId::BasePair,
        ],
        family: StageFamily::Selection,
        tolerance: ToleranceClass::Exact,
        pipeline_defining: true,
    },
    StageDefinition {
        id: StageId::BpstepParams,
        number: 11,
        name: "Step parameters",
        aliases: &["bpstep", "step"],
        collection_keys: &["steps"],
        required_fields: &[
            &["shift", "params.shift", "parameters.shift"],
            &["slide", "params.slide", "parameters.slide"],
            &["rise", "params.rise", "parameters.rise"],
            &["tilt", "params.tilt", "parameters.tilt"],
            &["roll", "params.roll", "parameters.roll"],
            &["twist", "params.twist", "parameters.twist"],
        ],
        depends_on: &[StageId::FindBestpairSelection],
        family: StageFamily::Step,
        tolerance: ToleranceClass::StepParameter,
        pipeline_defining: false,
    },
    StageDefinition {
        id: StageId::HelicalParams,
        number: 12,
        name: "Helical parameters",
        aliases: &["helical", "helix"],
        collection_keys: &["steps"],
        required_fields: &[
            &["x_displacement", "params.x_displacement", "parameters.x_displacement"],
            &["y_displacement", "params.y_displacement", "parameters.y_displacement"],
            &["h_rise", "params.h_rise", "parameters.h_rise"],
            &["inclination", "params.inclination", "parameters.inclination"],
            &["tip", "params.tip", "parameters.tip"],
            &["h_twist", "params.h_twist", "parameters.h_twist"],
        ],
        depends_on: &[StageId::FindBestpairSelection],
        family: StageFamily::Step,
        tolerance: ToleranceClass::StepParameter,
        pipeline_defining: false,
    },
];

// ---------------------------------------------------------------------------
// Groups and selection
// ---------------------------------------------------------------------------

pub const GROUPS: &[(&str, &[StageId])] = &[
    ("atoms", &[StageId::PdbAtoms, StageId::ResidueIndices]),
    (
        "frames",
        &[StageId::BaseFrameCalc, StageId::LsFitting, StageId::FrameCalc],
    ),
    (
        "pairs",
        &[
            StageId::PairValidation,
            StageId::DistanceChecks,
            StageId::BasePair,
            StageId::FindBestpairSelection,
        ],
    ),
    ("hbonds", &[StageId::HbondList]),
    ("steps", &[StageId::BpstepParams, StageId::HelicalParams]),
    ("all", &StageId::ALL),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown stage `{0}` (expected 1-12, a stage name, or one of: atoms, frames, pairs, hbonds, steps, all)")]
    UnknownStage(String),
    #[error("stage selection is empty")]
    EmptySelection,
}

/// Looks up a single stage by number, identifier, human name or alias.
pub fn lookup(identifier: &str) -> Result<&'static StageDefinition, RegistryError> {
    let token = normalize_token(identifier);
    if let Ok(number) = token.parse::<u8>() {
        return StageId::from_number(number)
            .map(StageId::definition)
            .ok_or_else(|| RegistryError::UnknownStage(identifier.trim().to_string()));
    }
    STAGES
        .iter()
        .find(|def| {
            def.id.as_str() == token
                || normalize_token(def.name) == token
                || def.aliases.contains(&token.as_str())
        })
        .ok_or_else(|| RegistryError::UnknownStage(identifier.trim().to_string()))
}

/// Expands a group name into its member stages.
pub fn group(name: &str) -> Option<&'static [StageId]> {
    let token = normalize_token(name);
    GROUPS
        .iter()
        .find(|(group_name, _)| *group_name == token)
        .map(|(_, members)| *members)
}

/// Resolves a list of selection tokens (numbers, names, groups; each token may
/// itself be comma separated) into a sorted, de-duplicated stage list.
pub fn resolve_selection<I, S>(tokens: I) -> Result<Vec<StageId>, RegistryError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut selected = BTreeSet::new();
    for token in tokens {
        for part in token.as_ref().split(',') {
            if part.trim().is_empty() {
                continue;
            }
            // Group names win over stage aliases ("atoms" is both).
            if let Some(members) = group(part) {
                selected.extend(members.iter().copied());
                continue;
            }
            selected.insert(lookup(part)?.id);
        }
    }
    if selected.is_empty() {
        return Err(RegistryError::EmptySelection);
    }
    Ok(selected.into_iter().collect())
}

fn normalize_token(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|ch| if ch == '-' || ch == ' ' { '_' } else { ch })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_ordered_by_number() {
        for (idx, def) in STAGES.iter().enumerate() {
            assert_eq!(usize::from(def.number), idx + 1);
            assert_eq!(def.id.number(), def.number);
            assert_eq!(def.id.definition().id, def.id);
        }
    }

    #[test]
    fn dependencies_point_backwards() {
        for def in &STAGES {
            for dep in def.depends_on {
                assert!(dep.number() < def.number, "{} -> {}", def.id, dep);
            }
        }
    }

    #[test]
    fn lookup_accepts_number_identifier_and_name() {
        assert_eq!(lookup("4").expect("number").id, StageId::LsFitting);
        assert_eq!(lookup("hbond_list").expect("id").id, StageId::HbondList);
        assert_eq!(
            lookup("Best-pair selection").expect("name").id,
            StageId::FindBestpairSelection
        );
        assert_eq!(lookup("SEIDX").expect("alias").id, StageId::ResidueIndices);
    }

    #[test]
    fn unknown_stage_is_an_error() {
        assert_eq!(
            lookup("13"),
            Err(RegistryError::UnknownStage("13".to_string()))
        );
        assert!(matches!(
            resolve_selection(["frames", "bogus"]),
            Err(RegistryError::UnknownStage(token)) if token == "bogus"
        ));
    }

    #[test]
    fn groups_expand_sorted_and_deduplicated() {
        let stages = resolve_selection(["5", "frames", "3,1"]).expect("selection");
        assert_eq!(
            stages,
            vec![
                StageId::PdbAtoms,
                StageId::BaseFrameCalc,
                StageId::LsFitting,
                StageId::FrameCalc
            ]
        );
        assert_eq!(resolve_selection(["all"]).expect("all").len(), 12);
    }

    #[test]
    fn empty_selection_is_rejected() {
        assert_eq!(
            resolve_selection(Vec::<String>::new()),
            Err(RegistryError::EmptySelection)
        );
    }

    #[test]
    fn required_field_lists_are_never_empty() {
        for def in &STAGES {
            for aliases in def.required_fields {
                assert!(!aliases.is_empty(), "{} has an empty alias list", def.id);
            }
        }
        assert_eq!(StageId::BpstepParams.definition().required_fields.len(), 6);
        assert_eq!(
            StageId::PairValidation.definition().required_fields[1][0],
            "calculated_values.dorg"
        );
    }

    #[test]
    fn only_selection_is_pipeline_defining() {
        let defining: Vec<_> = STAGES
            .iter()
            .filter(|def| def.pipeline_defining)
            .map(|def| def.id)
            .collect();
        assert_eq!(defining, vec![StageId::FindBestpairSelection]);
    }
}
