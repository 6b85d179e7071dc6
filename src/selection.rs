use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;
use crate::transcript::{RoleId, Speaker, Transcript};

/// Decides who speaks next from the speaker of the last message.
///
/// Stateless: everything is derived from the transcript on each call, so a
/// replayed transcript always yields the same speaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Fixed transition table: Creator → Validator → Reviewer → Creator.
    #[default]
    Table,
    /// Advance by roster position.
    RoundRobin,
}

impl SelectionPolicy {
    pub fn next_speaker(
        &self,
        roles: &[RoleId],
        transcript: &Transcript,
    ) -> Result<RoleId, OrchestrationError> {
        let last = transcript.last().map(|m| m.speaker());
        let next = match self {
            Self::Table => successor(last),
            Self::RoundRobin => round_robin(roles, last)?,
        };
        if !roles.contains(&next) {
            return Err(OrchestrationError::RosterMismatch { role: next });
        }
        Ok(next)
    }
}

fn successor(last: Option<Speaker>) -> RoleId {
    match last.and_then(|s| s.role()) {
        None | Some(RoleId::Reviewer) => RoleId::Creator,
        Some(RoleId::Creator) => RoleId::Validator,
        Some(RoleId::Validator) => RoleId::Reviewer,
    }
}

fn round_robin(roles: &[RoleId], last: Option<Speaker>) -> Result<RoleId, OrchestrationError> {
    let first = *roles.first().ok_or(OrchestrationError::RosterMismatch {
        role: RoleId::Creator,
    })?;
    let position = last
        .and_then(|s| s.role())
        .and_then(|role| roles.iter().position(|r| *r == role));
    Ok(match position {
        Some(i) => roles[(i + 1) % roles.len()],
        None => first,
    })
}
