// Shared prompt fragments and the named template library.
// Classifier-specific templates live in classify/prompts.rs and are registered here.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::classify::prompts::BUILTIN_TEMPLATES;
use crate::errors::PipelineError;

/// Instruction appended to every batch prompt so entries can be matched back.
pub const IDENTIFIER_INSTRUCTION: &str = "\
    CRITICAL: Every object you return must carry the exact `document_id` of the \
    proposal it describes, copied verbatim from the input. Return exactly one \
    object per input proposal. Do NOT invent, shorten or renumber identifiers.";

/// Named prompt templates with `{placeholder}` substitution.
///
/// Built-in templates can be overridden per name by dropping `<name>.txt` into
/// the prompts directory, so prompt wording is versioned outside the binary.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self {
            templates: BUILTIN_TEMPLATES
                .iter()
                .map(|(name, body)| (name.to_string(), body.to_string()))
                .collect(),
        }
    }
}

impl PromptLibrary {
    /// Built-in templates, with any `<name>.txt` found in `dir` taking precedence.
    pub fn load(dir: Option<&Path>) -> Result<Self, PipelineError> {
        let mut library = Self::default();
        let Some(dir) = dir else {
            return Ok(library);
        };

        for (name, _) in BUILTIN_TEMPLATES {
            let path = dir.join(format!("{name}.txt"));
            if path.is_file() {
                let body = std::fs::read_to_string(&path)?;
                info!("Prompt template '{}' overridden from {}", name, path.display());
                library.templates.insert(name.to_string(), body);
            }
        }
        Ok(library)
    }

    pub fn render(&self, name: &str, variables: &[(&str, &str)]) -> Result<String, PipelineError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| PipelineError::Template(name.to_string()))?;

        // Single pass: substituted values are never rescanned for placeholders.
        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open + 1..];
            let value = tail.find('}').and_then(|close| {
                let key = &tail[..close];
                variables
                    .iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, value)| (*value, close))
            });
            match value {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = tail;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}
