use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for document ids. Changing it re-keys every stored record.
const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b3d_4c51_8e07_d2a9_1f64_b8c3);

/// Stable identity of one proposal, derived from its company and proposal name.
///
/// `ordinal` disambiguates proposals that share a name within one company; it is
/// the 0-based position among same-named proposals in corpus order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn derive(company: &str, proposal_name: &str, ordinal: usize) -> Self {
        let key = format!("{}\u{1f}{}\u{1f}{}", company.trim(), proposal_name.trim(), ordinal);
        Self(Uuid::new_v5(&DOCUMENT_NAMESPACE, key.as_bytes()))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// One proposal extracted from the corpus. Immutable after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: DocumentId,
    pub company: String,
    pub title: String,
    pub target_persona: String,
    pub current_state: String,
    pub problem: String,
    pub impact: String,
    pub existing_tooling: String,
    pub functionality_description: String,
    pub problem_solving: String,
    pub risk_assessment: String,
}

impl Document {
    /// The subset of fields sent to the LLM for classification.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "document_id": self.document_id,
            "company": self.company,
            "title": self.title,
            "current_state": self.current_state,
            "problem": self.problem,
            "impact": self.impact,
            "functionality": self.functionality_description,
        })
    }
}
