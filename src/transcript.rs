use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::OrchestrationError;

/// The three roles of the cast.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize)]
pub enum RoleId {
    Creator,
    Validator,
    Reviewer,
}

impl RoleId {
    /// Canonical cycle order.
    pub const CYCLE: [RoleId; 3] = [RoleId::Creator, RoleId::Validator, RoleId::Reviewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "Creator",
            Self::Validator => "Validator",
            Self::Reviewer => "Reviewer",
        }
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleId {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Creator" | "TerraformCreationAgent" => Ok(Self::Creator),
            "Validator" | "TerraformValidationAgent" => Ok(Self::Validator),
            "Reviewer" | "UserAgent" => Ok(Self::Reviewer),
            other => Err(OrchestrationError::invalid(format!(
                "unknown speaker '{other}'"
            ))),
        }
    }
}

/// Who a message is attributed to.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize)]
pub enum Speaker {
    /// The synthetic speaker of the seeded task description.
    Task,
    Agent(RoleId),
}

impl Speaker {
    pub fn role(&self) -> Option<RoleId> {
        match self {
            Self::Task => None,
            Self::Agent(role) => Some(*role),
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => f.write_str("Task"),
            Self::Agent(role) => role.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One entry of the transcript. Fields are private so a message can't change
/// after it has been appended.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    speaker: Speaker,
    role: ChatRole,
    text: String,
    sequence_index: usize,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn role(&self) -> ChatRole {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }
}

/// Append-only, ordered message history of one run.
#[derive(Debug, Default, Serialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, assigning the next sequence index.
    pub fn append(
        &mut self,
        speaker: Speaker,
        role: ChatRole,
        text: impl Into<String>,
    ) -> Result<&Message, OrchestrationError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(OrchestrationError::invalid(format!(
                "empty text from {speaker}"
            )));
        }
        let sequence_index = self.messages.len();
        self.messages.push(Message {
            speaker,
            role,
            text,
            sequence_index,
            created_at: Utc::now(),
        });
        Ok(&self.messages[sequence_index])
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The last `n` messages in order (all of them if the history is shorter).
    pub fn tail(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Most recent message by `role`, scanning backward.
    pub fn last_from(&self, role: RoleId) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.speaker == Speaker::Agent(role))
    }
}
