// Classification prompt templates. Registered in llm_client::prompts::PromptLibrary
// under the names below; each can be overridden by `<name>.txt` in the prompts dir.

pub const DISCOVERY_SYSTEM: &str = "\
You are an analyst who organises business proposals for AI systems into a compact \
taxonomy of business use cases. You MUST respond with a JSON array only, with no markdown \
fences, no explanations.";

pub const CLASSIFY_SYSTEM: &str = "\
You are a meticulous classifier of AI system proposals. You assign each proposal to the \
allowed categories you are given and NEVER invent new categories. You MUST respond with a \
JSON array only, with no markdown fences, no explanations.";

/// Placeholders: `{sample_size}`, `{documents_json}`.
pub const BUSINESS_DISCOVERY_TEMPLATE: &str = r#"Below are {sample_size} proposals for AI systems written for different companies.

Propose a taxonomy of BUSINESS USE CASES that covers these proposals. Each use case should
describe the business job the system does (for example "Customer Support Triage" or
"Contract Review"), not the technology it uses.

PROPOSALS:
{documents_json}

RULES:
1. Return between 8 and 25 use cases.
2. Use short Title Case names (2-5 words). No duplicates, no near-synonyms.
3. Include a catch-all "Other" only if some proposals genuinely fit nothing else.
4. Return ONLY a JSON array of strings, e.g. ["Customer Support Triage", "Contract Review"]"#;

/// Placeholders: `{identifier_instruction}`, `{vocabulary_json}`, `{documents_json}`.
pub const BUSINESS_CLASSIFY_TEMPLATE: &str = r#"Classify each proposal below into exactly ONE business use case.

ALLOWED BUSINESS USE CASES (use the exact spelling):
{vocabulary_json}

PROPOSALS:
{documents_json}

{identifier_instruction}

OUTPUT SCHEMA (a JSON array, one object per proposal):
[
  {"document_id": "<copied from input>", "business_use_case": "<one allowed value>", "confidence": "high" | "medium" | "low", "rationale": "<one sentence>"}
]

Return ONLY the JSON array."#;

/// Placeholders: `{identifier_instruction}`, `{dimensions_block}`, `{documents_json}`.
pub const ARCHITECTURE_CLASSIFY_TEMPLATE: &str = r#"Classify the TECHNICAL ARCHITECTURE each proposal below would need.

For every proposal assign a value for each of these dimensions, using ONLY the listed values:
{dimensions_block}

PROPOSALS:
{documents_json}

{identifier_instruction}

OUTPUT SCHEMA (a JSON array, one object per proposal):
[
  {"document_id": "<copied from input>", "<dimension name>": <value as specified above>, "confidence": "high" | "medium" | "low", "rationale": "<one sentence>"}
]

Return ONLY the JSON array."#;

/// Placeholders: `{identifier_instruction}`, `{dimensions_block}`, `{documents_json}`.
pub const IMPLEMENTATION_CLASSIFY_TEMPLATE: &str = r#"Estimate the IMPLEMENTATION COMPLEXITY of each proposal below.

For every proposal assign a value for each of these dimensions, using ONLY the listed values:
{dimensions_block}

Judge from what the proposal describes; when it is silent on a dimension, choose the value a
typical production implementation would need.

PROPOSALS:
{documents_json}

{identifier_instruction}

OUTPUT SCHEMA (a JSON array, one object per proposal):
[
  {"document_id": "<copied from input>", "<dimension name>": <value as specified above>, "confidence": "high" | "medium" | "low"}
]

Return ONLY the JSON array."#;

pub const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("business_discovery", BUSINESS_DISCOVERY_TEMPLATE),
    ("business_classify", BUSINESS_CLASSIFY_TEMPLATE),
    ("architecture_classify", ARCHITECTURE_CLASSIFY_TEMPLATE),
    ("implementation_classify", IMPLEMENTATION_CLASSIFY_TEMPLATE),
];
