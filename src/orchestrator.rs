//! The turn-taking loop: select a speaker, let it respond, append, and ask
//! the termination policy whether the conversation is over.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::agent::Roster;
use crate::error::OrchestrationError;
use crate::selection::SelectionPolicy;
use crate::termination::{StopReason, TerminationPolicy};
use crate::transcript::{ChatRole, Message, RoleId, Speaker, Transcript};

/// Short identifier used to correlate the logs of one run.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string()[..8].to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Seeded,
    Running,
    Terminated(StopReason),
    Failed,
}

pub struct Orchestrator {
    roster: Roster,
    selection: SelectionPolicy,
    termination: TerminationPolicy,
}

impl Orchestrator {
    pub fn new(roster: Roster, selection: SelectionPolicy, termination: TerminationPolicy) -> Self {
        Self {
            roster,
            selection,
            termination,
        }
    }

    /// Start a session whose transcript holds only the task description.
    pub fn seed(&self, task: &str) -> Result<Session<'_>, OrchestrationError> {
        let mut transcript = Transcript::new();
        transcript.append(Speaker::Task, ChatRole::User, task.trim())?;
        Ok(Session {
            orchestrator: self,
            id: RunId::new(),
            transcript,
            state: SessionState::Seeded,
        })
    }
}

/// One orchestration run. Exclusively owns its transcript.
pub struct Session<'a> {
    orchestrator: &'a Orchestrator,
    id: RunId,
    transcript: Transcript,
    state: SessionState,
}

impl<'a> Session<'a> {
    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Text of the most recent Creator message.
    pub fn final_artifact(&self) -> Option<&str> {
        self.transcript.last_from(RoleId::Creator).map(|m| m.text())
    }

    /// Drive the conversation until the termination policy stops it.
    ///
    /// `on_turn` sees every appended message. On error the transcript keeps
    /// every message appended before the failure.
    pub async fn run<F>(
        &mut self,
        cancel: &CancellationToken,
        on_turn: F,
    ) -> Result<StopReason, OrchestrationError>
    where
        F: FnMut(&Message),
    {
        if self.state != SessionState::Seeded {
            return Err(OrchestrationError::NotSeeded);
        }
        self.state = SessionState::Running;
        let span = info_span!("run", id = %self.id);
        let result = self.turns(cancel, on_turn).instrument(span).await;
        self.state = match &result {
            Ok(reason) => SessionState::Terminated(*reason),
            Err(e) => {
                error!(run = %self.id, "Run halted: {e}");
                SessionState::Failed
            }
        };
        result
    }

    async fn turns<F>(
        &mut self,
        cancel: &CancellationToken,
        mut on_turn: F,
    ) -> Result<StopReason, OrchestrationError>
    where
        F: FnMut(&Message),
    {
        let orchestrator = self.orchestrator;
        let roles = orchestrator.roster.roles();
        let max_turns = orchestrator.termination.message_cap(orchestrator.roster.len());

        for turn in 1..=max_turns {
            let role = orchestrator.selection.next_speaker(&roles, &self.transcript)?;
            let agent = orchestrator
                .roster
                .get(role)
                .ok_or(OrchestrationError::RosterMismatch { role })?;
            info!("Turn {turn}: {} speaking", agent.name());

            let text = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
                reply = agent.respond(&self.transcript) => reply
                    .map_err(|source| OrchestrationError::AgentInvocation { role, source })?,
            };

            let message = self
                .transcript
                .append(Speaker::Agent(role), agent.chat_role(), text)?;
            on_turn(message);

            if let Some(reason) = orchestrator.termination.evaluate(&roles, &self.transcript) {
                info!("Conversation finished after {turn} turn(s): {reason:?}");
                return Ok(reason);
            }
        }

        info!("Turn limit of {max_turns} reached");
        Ok(StopReason::HardCap)
    }
}
