//! Persona documents: named, reusable agent configurations.

use serde::{Deserialize, Serialize};

/// Model selection and generation parameters handed to the reasoning provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// A persona stored at `.taskflow/personas/<persona_name>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub persona_name: String,
    #[serde(default)]
    pub model_config: ModelConfig,
    pub system_prompt: String,
    /// Capability names this persona may invoke.
    #[serde(default)]
    pub tools: Vec<String>,
}

impl Persona {
    pub fn is_authorized(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }
}

/// Reduce a persona reference to a bare file stem.
///
/// `"../x/writer.json"` and `"writer"` both become `"writer"`. Returns `None`
/// when nothing usable is left.
pub fn sanitize_persona_name(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = base.strip_suffix(".json").unwrap_or(base).trim();
    match stem {
        "" | "." | ".." => None,
        s => Some(s),
    }
}
