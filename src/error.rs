use thiserror::Error;

use crate::transcript::RoleId;

/// Errors raised by the orchestration core.
///
/// Everything except `InvalidMessage` halts the run. Tool failures never show
/// up here: they are rendered into the conversation as text.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// An append was rejected (blank text, unknown speaker name).
    #[error("invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// A policy picked a role that is not part of the roster.
    #[error("roster mismatch: {role} is not in the roster")]
    RosterMismatch { role: RoleId },

    /// Two agents were registered for the same role.
    #[error("duplicate role in roster: {role}")]
    DuplicateRole { role: RoleId },

    /// The agent's response call failed. Not retried.
    #[error("{role} failed to respond: {source:#}")]
    AgentInvocation {
        role: RoleId,
        #[source]
        source: anyhow::Error,
    },

    /// The caller aborted the run while an agent was working.
    #[error("run cancelled")]
    Cancelled,

    /// `run` was called on a session that is not ready to run.
    #[error("session is not in the seeded state")]
    NotSeeded,
}

impl OrchestrationError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }
}
