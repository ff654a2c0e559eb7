//! The fixed, ordered set of pipeline stages.
//!
//! Stages are strictly sequential per work item and independent across work
//! items. Each stage's ledger columns share the `Step N` prefix.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One phase of the external reconstruction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Frame extraction from source video.
    Extraction,
    /// Alignment, dense reconstruction, and meshing.
    Reconstruction,
    /// Regrouping reconstructed items into consolidated containers.
    Consolidation,
    /// Scaling, texturing, and orthomosaic/model export.
    Finishing,
    /// Final deliverable export.
    Export,
}

impl Stage {
    const ALL: [Stage; 5] = [
        Stage::Extraction,
        Stage::Reconstruction,
        Stage::Consolidation,
        Stage::Finishing,
        Stage::Export,
    ];

    /// All stages in pipeline order.
    pub fn all() -> &'static [Stage] {
        &Self::ALL
    }

    /// Look up a stage by its number.
    pub fn from_number(number: u8) -> Result<Self> {
        Self::ALL.get(number as usize).copied().ok_or_else(|| {
            Error::invalid_input(format!(
                "invalid stage number {}; valid stages are 0-{}",
                number,
                Self::ALL.len() - 1
            ))
        })
    }

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Reconstruction => "reconstruction",
            Stage::Consolidation => "consolidation",
            Stage::Finishing => "finishing",
            Stage::Export => "export",
        }
    }

    /// The `Step N` prefix shared by this stage's ledger columns.
    pub fn label(self) -> String {
        format!("Step {}", self.number())
    }

    /// The stage that must be complete before this one may run.
    pub fn previous(self) -> Option<Stage> {
        self.number()
            .checked_sub(1)
            .and_then(|n| Self::ALL.get(n as usize).copied())
    }

    pub fn next(self) -> Option<Stage> {
        Self::ALL.get(self.number() as usize + 1).copied()
    }

    /// Stages strictly after this one.
    pub fn later(self) -> impl Iterator<Item = Stage> {
        Self::ALL.into_iter().filter(move |s| *s > self)
    }
}

impl std::str::FromStr for Stage {
    type Err = Error;

    /// Accepts either the stage number (`"1"`) or its name (`"reconstruction"`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return Self::from_number(n);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::invalid_input(format!("unknown stage: {}", s)))
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label(), self.name())
    }
}
