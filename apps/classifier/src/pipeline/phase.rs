use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classify::dimensions::{architecture_group, business_group, implementation_group, DimensionGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extraction,
    BusinessClustering,
    ArchitectureClassification,
    ImplementationClassification,
    SummaryGeneration,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Extraction,
        Phase::BusinessClustering,
        Phase::ArchitectureClassification,
        Phase::ImplementationClassification,
        Phase::SummaryGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Extraction => "extraction",
            Phase::BusinessClustering => "business",
            Phase::ArchitectureClassification => "architecture",
            Phase::ImplementationClassification => "implementation",
            Phase::SummaryGeneration => "summary",
        }
    }

    /// The phase whose checkpoint must exist before this one may run.
    pub fn predecessor(&self) -> Option<Phase> {
        match self {
            Phase::Extraction => None,
            Phase::BusinessClustering => Some(Phase::Extraction),
            Phase::ArchitectureClassification => Some(Phase::BusinessClustering),
            Phase::ImplementationClassification => Some(Phase::ArchitectureClassification),
            Phase::SummaryGeneration => Some(Phase::ImplementationClassification),
        }
    }

    /// Dimensions this phase classifies; `None` for the non-LLM phases.
    pub fn group(&self) -> Option<DimensionGroup> {
        match self {
            Phase::BusinessClustering => Some(business_group()),
            Phase::ArchitectureClassification => Some(architecture_group()),
            Phase::ImplementationClassification => Some(implementation_group()),
            Phase::Extraction | Phase::SummaryGeneration => None,
        }
    }

    /// Stem of the record artifact written when the phase completes.
    pub fn records_artifact(&self) -> Option<&'static str> {
        match self {
            Phase::Extraction => Some("raw_proposals"),
            Phase::BusinessClustering => Some("proposals_with_business"),
            Phase::ArchitectureClassification => Some("proposals_complete"),
            Phase::ImplementationClassification => Some("proposals_with_implementation"),
            Phase::SummaryGeneration => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Phase::Extraction => "EXTRACTING PROPOSALS",
            Phase::BusinessClustering => "BUSINESS USE CASE CLUSTERING",
            Phase::ArchitectureClassification => "TECHNICAL ARCHITECTURE CLASSIFICATION",
            Phase::ImplementationClassification => "IMPLEMENTATION COMPLEXITY CLASSIFICATION",
            Phase::SummaryGeneration => "GENERATING SUMMARY",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<&str> = Phase::ALL.iter().map(Phase::as_str).collect();
                format!("unknown phase '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}
