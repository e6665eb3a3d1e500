//! Dimension catalog: the closed vocabularies each phase classifies against.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arity {
    Single,
    Multi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedValues {
    Closed(Vec<String>),
    /// Filled in by a discovery pass, then frozen into `Closed` for the run.
    Open,
}

/// One categorical classification axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub name: String,
    pub title: String,
    pub allowed_values: AllowedValues,
    pub arity: Arity,
    pub discovery_required: bool,
}

impl DimensionSpec {
    fn closed(name: &str, title: &str, arity: Arity, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            allowed_values: AllowedValues::Closed(values.iter().map(|v| v.to_string()).collect()),
            arity,
            discovery_required: false,
        }
    }

    fn open(name: &str, title: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            allowed_values: AllowedValues::Open,
            arity: Arity::Single,
            discovery_required: true,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.allowed_values, AllowedValues::Closed(_))
    }

    pub fn allowed(&self) -> &[String] {
        match &self.allowed_values {
            AllowedValues::Closed(values) => values,
            AllowedValues::Open => &[],
        }
    }

    /// Returns a copy whose vocabulary is fixed to `labels`.
    pub fn freeze(&self, labels: Vec<String>) -> Self {
        Self {
            allowed_values: AllowedValues::Closed(labels),
            ..self.clone()
        }
    }

    /// Maps a raw model value onto the vocabulary.
    ///
    /// Matching ignores surrounding whitespace and ASCII case; the stored label is
    /// always the canonical vocabulary spelling. The error string explains the
    /// rejection and is kept alongside the raw value.
    pub fn validate(&self, raw: &Value) -> Result<Label, String> {
        let AllowedValues::Closed(values) = &self.allowed_values else {
            return Err(format!("vocabulary for '{}' has not been frozen", self.name));
        };

        let canonical = |candidate: &str| -> Option<String> {
            let candidate = candidate.trim();
            values
                .iter()
                .find(|v| v.eq_ignore_ascii_case(candidate))
                .cloned()
        };

        match (self.arity, raw) {
            (Arity::Single, Value::String(s)) => canonical(s)
                .map(Label::Single)
                .ok_or_else(|| format!("'{s}' is not an allowed value")),
            (Arity::Single, other) => Err(format!("expected a single string, got {other}")),
            (Arity::Multi, Value::String(s)) => canonical(s)
                .map(|v| Label::Multi(BTreeSet::from([v])))
                .ok_or_else(|| format!("'{s}' is not an allowed value")),
            (Arity::Multi, Value::Array(items)) => {
                if items.is_empty() {
                    return Err("expected at least one value".to_string());
                }
                let mut set = BTreeSet::new();
                for item in items {
                    let Some(s) = item.as_str() else {
                        return Err(format!("expected strings, got {item}"));
                    };
                    set.insert(canonical(s).ok_or_else(|| format!("'{s}' is not an allowed value"))?);
                }
                Ok(Label::Multi(set))
            }
            (Arity::Multi, other) => Err(format!("expected a list of strings, got {other}")),
        }
    }
}

/// The dimensions one phase classifies together in a single request per batch.
#[derive(Debug, Clone)]
pub struct DimensionGroup {
    pub template: &'static str,
    pub dimensions: Vec<DimensionSpec>,
    pub batch_size: usize,
    pub max_tokens: u32,
}

impl DimensionGroup {
    pub fn names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name.as_str()).collect()
    }

    /// Human-readable schema block inserted into the classification prompt.
    pub fn schema_block(&self) -> String {
        self.dimensions
            .iter()
            .map(|d| {
                let shape = match d.arity {
                    Arity::Single => "exactly one of",
                    Arity::Multi => "a JSON array with one or more of",
                };
                let values = d
                    .allowed()
                    .iter()
                    .map(|v| format!("\"{v}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- \"{}\" ({}): {} [{}]", d.name, d.title, shape, values)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub const BUSINESS_USE_CASE: &str = "business_use_case";

const LEVELS: &[&str] = &["Low", "Medium", "High"];

pub fn business_group() -> DimensionGroup {
    DimensionGroup {
        template: "business_classify",
        dimensions: vec![DimensionSpec::open(BUSINESS_USE_CASE, "Business Use Case")],
        batch_size: 12,
        max_tokens: 4096,
    }
}

pub fn architecture_group() -> DimensionGroup {
    DimensionGroup {
        template: "architecture_classify",
        dimensions: vec![
            DimensionSpec::closed(
                "architecture_pattern",
                "System Architecture Pattern",
                Arity::Single,
                &[
                    "Single LLM Call",
                    "Prompt Chain",
                    "RAG Pipeline",
                    "Single Agent with Tools",
                    "Multi-Agent System",
                    "Workflow Orchestration",
                    "Classification/Routing",
                ],
            ),
            DimensionSpec::closed(
                "reasoning_pattern",
                "Reasoning Pattern",
                Arity::Single,
                &[
                    "Direct Generation",
                    "Chain-of-Thought",
                    "Plan-and-Execute",
                    "ReAct",
                    "Reflection/Self-Critique",
                    "Rule-Guided",
                ],
            ),
            DimensionSpec::closed(
                "execution_pattern",
                "Execution Pattern",
                Arity::Single,
                &[
                    "Batch",
                    "Real-time Synchronous",
                    "Event-Driven",
                    "Scheduled",
                    "Conversational",
                ],
            ),
            DimensionSpec::closed(
                "knowledge_representation",
                "Knowledge Representation",
                Arity::Single,
                &[
                    "Unstructured Documents",
                    "Structured Database",
                    "Knowledge Graph",
                    "Vector Index",
                    "Hybrid",
                    "None",
                ],
            ),
            DimensionSpec::closed(
                "input_modalities",
                "Input Modalities",
                Arity::Multi,
                &[
                    "Text",
                    "Documents/PDF",
                    "Tabular Data",
                    "Images",
                    "Audio",
                    "Email",
                    "API/Event Stream",
                ],
            ),
            DimensionSpec::closed(
                "tool_integration",
                "Tool Integration Level",
                Arity::Single,
                &[
                    "None",
                    "Read-Only Lookups",
                    "Read-Write Actions",
                    "Autonomous Tool Use",
                ],
            ),
            DimensionSpec::closed(
                "human_oversight",
                "Human Oversight Level",
                Arity::Single,
                &[
                    "Fully Automated",
                    "Human-on-the-Loop",
                    "Human-in-the-Loop",
                    "Human-Driven",
                ],
            ),
        ],
        batch_size: 10,
        max_tokens: 8192,
    }
}

pub fn implementation_group() -> DimensionGroup {
    DimensionGroup {
        template: "implementation_classify",
        dimensions: vec![
            DimensionSpec::closed("data_complexity", "Data Complexity", Arity::Single, LEVELS),
            DimensionSpec::closed(
                "integration_complexity",
                "Integration Complexity",
                Arity::Single,
                LEVELS,
            ),
            DimensionSpec::closed("prompt_complexity", "Prompt Complexity", Arity::Single, LEVELS),
            DimensionSpec::closed(
                "chain_depth",
                "Chain Depth",
                Arity::Single,
                &["Single Step", "2-3 Steps", "4+ Steps"],
            ),
            DimensionSpec::closed(
                "schema_complexity",
                "Schema Complexity",
                Arity::Single,
                &["Free Text", "Simple Structured", "Complex Nested"],
            ),
            DimensionSpec::closed(
                "state_management",
                "State Management",
                Arity::Single,
                &["Stateless", "Session State", "Persistent State"],
            ),
            DimensionSpec::closed(
                "error_handling",
                "Error Handling Requirements",
                Arity::Single,
                &["Basic", "Moderate", "Critical"],
            ),
            DimensionSpec::closed(
                "evaluation_complexity",
                "Evaluation Complexity",
                Arity::Single,
                LEVELS,
            ),
            DimensionSpec::closed(
                "domain_expertise",
                "Domain Expertise Depth",
                Arity::Single,
                &["General", "Specialized", "Expert"],
            ),
            DimensionSpec::closed(
                "latency_requirements",
                "Latency Requirements",
                Arity::Single,
                &["Batch (hours)", "Near Real-time (minutes)", "Real-time (seconds)"],
            ),
            DimensionSpec::closed(
                "regulatory_requirements",
                "Regulatory Requirements",
                Arity::Single,
                &["None", "Moderate", "Strict"],
            ),
            DimensionSpec::closed(
                "rerepresentation_type",
                "Rerepresentation Type",
                Arity::Single,
                &[
                    "Summarization",
                    "Extraction",
                    "Classification",
                    "Transformation",
                    "Generation",
                    "Synthesis",
                ],
            ),
        ],
        batch_size: 8,
        max_tokens: 8192,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn modalities() -> DimensionSpec {
        architecture_group()
            .dimensions
            .into_iter()
            .find(|d| d.name == "input_modalities")
            .unwrap()
    }

    #[test]
    fn test_only_input_modalities_is_multi_valued() {
        let multi: Vec<String> = [architecture_group(), implementation_group(), business_group()]
            .iter()
            .flat_map(|g| g.dimensions.iter())
            .filter(|d| d.arity == Arity::Multi)
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(multi, vec!["input_modalities".to_string()]);
    }

    #[test]
    fn test_dimension_names_are_unique() {
        let mut names: Vec<String> = [business_group(), architecture_group(), implementation_group()]
            .iter()
            .flat_map(|g| g.dimensions.iter().map(|d| d.name.clone()))
            .collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(total, 20);
    }

    #[test]
    fn test_single_value_canonicalised() {
        let spec = DimensionSpec::closed("d", "D", Arity::Single, LEVELS);
        assert_eq!(spec.validate(&json!(" high ")), Ok(Label::Single("High".to_string())));
    }

    #[test]
    fn test_single_value_outside_vocabulary_rejected() {
        let spec = DimensionSpec::closed("d", "D", Arity::Single, LEVELS);
        assert!(spec.validate(&json!("Extreme")).is_err());
        assert!(spec.validate(&json!(["High"])).is_err());
        assert!(spec.validate(&json!(null)).is_err());
    }

    #[test]
    fn test_multi_value_subset_accepted() {
        let label = modalities().validate(&json!(["Text", "images"])).unwrap();
        assert_eq!(
            label,
            Label::Multi(BTreeSet::from(["Images".to_string(), "Text".to_string()]))
        );
    }

    #[test]
    fn test_multi_value_with_one_unknown_rejected_whole() {
        assert!(modalities().validate(&json!(["Text", "Smell"])).is_err());
        assert!(modalities().validate(&json!([])).is_err());
    }

    #[test]
    fn test_open_dimension_cannot_validate_until_frozen() {
        let open = business_group().dimensions.remove(0);
        assert!(!open.is_closed());
        assert!(open.validate(&json!("Claims Processing")).is_err());

        let frozen = open.freeze(vec!["Claims Processing".to_string()]);
        assert!(frozen.is_closed());
        assert!(frozen.discovery_required);
        assert_eq!(
            frozen.validate(&json!("Claims Processing")),
            Ok(Label::Single("Claims Processing".to_string()))
        );
    }

    #[test]
    fn test_schema_block_lists_values() {
        let block = implementation_group().schema_block();
        assert!(block.contains("\"chain_depth\" (Chain Depth): exactly one of [\"Single Step\""));
        let arch = architecture_group().schema_block();
        assert!(arch.contains("\"input_modalities\" (Input Modalities): a JSON array"));
    }
}
