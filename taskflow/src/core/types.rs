//! Shared value types exchanged with the reasoning provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decision returned by the reasoning provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AgentDecision {
    /// Invoke an authorized capability; the result is fed back next round.
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    /// Work is finished. An empty `deliverable` means the agent already wrote
    /// the output file itself.
    Complete {
        #[serde(default)]
        deliverable: String,
        #[serde(default)]
        summary: String,
    },
    Fail { reason: String },
}

impl AgentDecision {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolCall { .. } => "tool_call",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
        }
    }
}

/// Capability advertised to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Result of a dispatched (or refused) tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub ok: bool,
    pub output: String,
}

/// One provider round: the decision and, for tool calls, what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub round: u32,
    pub decision: AgentDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decisions_parse_from_tagged_json() {
        let call: AgentDecision = serde_json::from_value(json!({
            "decision": "tool_call",
            "tool": "read_file",
            "arguments": {"path": "notes.md"}
        }))
        .expect("tool call");
        assert_eq!(call.kind(), "tool_call");

        let done: AgentDecision =
            serde_json::from_value(json!({"decision": "complete", "summary": "ok"}))
                .expect("complete");
        assert_eq!(
            done,
            AgentDecision::Complete {
                deliverable: String::new(),
                summary: "ok".to_string()
            }
        );
    }

    #[test]
    fn unknown_decision_is_rejected() {
        let err = serde_json::from_value::<AgentDecision>(json!({"decision": "shrug"}));
        assert!(err.is_err());
    }
}
