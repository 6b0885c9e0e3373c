//! Agent loops for task execution and review.
//!
//! Both agents share [`run_agent`]: ask the provider for a decision, dispatch
//! tool calls through the capability registry, feed results back, and stop on
//! `complete`, `fail`, an exhausted round budget, or cancellation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::retry::BackoffPolicy;
use crate::core::types::{AgentDecision, ToolOutcome, TranscriptEntry};
use crate::io::gateway_client::GatewayClient;
use crate::io::prompt::PromptEngine;
use crate::io::provider::{ProviderError, ProviderRequest, ReasoningProvider, invoke_with_retry};
use crate::persona::Persona;
use crate::task::Task;
use crate::tools::{CapabilityRegistry, ToolContext};

pub mod executor;
pub mod reviewer;

/// Collaborators shared by every agent run.
#[derive(Clone, Copy)]
pub struct AgentEnv<'a> {
    pub registry: &'a CapabilityRegistry,
    pub provider: &'a dyn ReasoningProvider,
    pub gateway: &'a dyn GatewayClient,
    pub prompts: &'a PromptEngine,
    pub backoff: BackoffPolicy,
    pub max_tool_rounds: u32,
}

/// What an agent run produced, plus the rounds that led there.
#[derive(Debug, Clone)]
pub struct AgentRun<T> {
    pub outcome: T,
    pub transcript: Vec<TranscriptEntry>,
    pub started_at: DateTime<Utc>,
}

impl<T> AgentRun<T> {
    pub fn rounds(&self) -> u32 {
        self.transcript.len() as u32
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> AgentRun<U> {
        AgentRun {
            outcome: f(self.outcome),
            transcript: self.transcript,
            started_at: self.started_at,
        }
    }
}

/// How the shared loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoopEnd {
    Complete { deliverable: String, summary: String },
    /// The agent gave up.
    Fail { reason: String },
    /// The loop could not continue (provider exhausted, round budget,
    /// security rejection).
    Aborted { reason: String },
    Cancelled,
}

/// Drive one agent conversation to a terminal decision.
#[instrument(skip_all, fields(task_id = %task.task_id, persona = %persona.persona_name))]
pub(crate) fn run_agent(
    env: &AgentEnv<'_>,
    task: &Task,
    persona: &Persona,
    message: String,
    cancel: &CancelToken,
) -> AgentRun<LoopEnd> {
    let started_at = Utc::now();
    let tools = env.registry.definitions_for(persona);
    let ctx = ToolContext {
        gateway: env.gateway,
        cancel,
    };
    let mut transcript: Vec<TranscriptEntry> = Vec::new();
    let mut tool_rounds = 0u32;

    let outcome = loop {
        if cancel.is_cancelled() {
            break LoopEnd::Cancelled;
        }
        let round = transcript.len() as u32 + 1;
        let request = ProviderRequest {
            task_id: task.task_id.clone(),
            round,
            system_prompt: persona.system_prompt.clone(),
            message: message.clone(),
            objective: task.objective.clone(),
            context: task.context.clone(),
            constraints: task.constraints.clone(),
            model: persona.model_config.clone(),
            tools: tools.clone(),
            transcript: transcript.clone(),
        };
        let decision = match invoke_with_retry(env.provider, &request, &env.backoff, cancel) {
            Ok(decision) => decision,
            Err(ProviderError::Cancelled) => break LoopEnd::Cancelled,
            Err(err) => {
                warn!(round, err = %err, "provider gave up");
                break LoopEnd::Aborted {
                    reason: err.to_string(),
                };
            }
        };
        debug!(round, decision = decision.kind(), "decision received");

        match decision {
            AgentDecision::ToolCall { tool, arguments } => {
                if tool_rounds >= env.max_tool_rounds {
                    transcript.push(TranscriptEntry {
                        round,
                        decision: AgentDecision::ToolCall { tool, arguments },
                        result: None,
                    });
                    break LoopEnd::Aborted {
                        reason: format!("exceeded {} tool rounds", env.max_tool_rounds),
                    };
                }
                tool_rounds += 1;
                let arguments = normalize_arguments(arguments);
                let result = env.registry.dispatch(persona, &tool, &arguments, &ctx);
                let (outcome, end) = match result {
                    Ok(output) => (ToolOutcome { ok: true, output }, None),
                    Err(err) if err.is_terminal() => {
                        warn!(round, tool = %tool, err = %err, "tool call rejected by gateway");
                        let reason = err.to_string();
                        (
                            ToolOutcome {
                                ok: false,
                                output: reason.clone(),
                            },
                            Some(LoopEnd::Aborted { reason }),
                        )
                    }
                    Err(_) if cancel.is_cancelled() => (
                        ToolOutcome {
                            ok: false,
                            output: "cancelled".to_string(),
                        },
                        Some(LoopEnd::Cancelled),
                    ),
                    Err(err) => {
                        debug!(round, tool = %tool, err = %err, "tool call failed");
                        (
                            ToolOutcome {
                                ok: false,
                                output: err.to_string(),
                            },
                            None,
                        )
                    }
                };
                transcript.push(TranscriptEntry {
                    round,
                    decision: AgentDecision::ToolCall { tool, arguments },
                    result: Some(outcome),
                });
                if let Some(end) = end {
                    break end;
                }
            }
            AgentDecision::Complete {
                deliverable,
                summary,
            } => {
                transcript.push(TranscriptEntry {
                    round,
                    decision: AgentDecision::Complete {
                        deliverable: deliverable.clone(),
                        summary: summary.clone(),
                    },
                    result: None,
                });
                break LoopEnd::Complete {
                    deliverable,
                    summary,
                };
            }
            AgentDecision::Fail { reason } => {
                transcript.push(TranscriptEntry {
                    round,
                    decision: AgentDecision::Fail {
                        reason: reason.clone(),
                    },
                    result: None,
                });
                let reason = if reason.trim().is_empty() {
                    "agent reported failure without a reason".to_string()
                } else {
                    reason
                };
                break LoopEnd::Fail { reason };
            }
        }
    };

    info!(rounds = transcript.len(), tool_rounds, "agent finished");
    AgentRun {
        outcome,
        transcript,
        started_at,
    }
}

/// Providers sometimes send `null` for a call without arguments.
fn normalize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}
