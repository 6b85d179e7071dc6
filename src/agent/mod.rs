pub mod creator;
pub mod llm;
pub mod reviewer;
pub mod validator;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::OrchestrationError;
use crate::transcript::{ChatRole, RoleId, Transcript};

pub use creator::CreatorAgent;
pub use reviewer::ReviewerAgent;
pub use validator::ValidatorAgent;

/// One participant of the group conversation.
///
/// An agent reads the transcript and produces the text of its next message.
/// The orchestrator attributes and appends it; agents never mutate the
/// transcript themselves.
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> RoleId;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        self.role().as_str()
    }

    /// Chat role the reply is recorded under.
    fn chat_role(&self) -> ChatRole {
        ChatRole::Assistant
    }

    async fn respond(&self, transcript: &Transcript) -> Result<String>;
}

/// The fixed cast of one run, in registration order.
pub struct Roster {
    agents: Vec<Box<dyn Agent>>,
}

impl Roster {
    pub fn new(agents: Vec<Box<dyn Agent>>) -> Result<Self, OrchestrationError> {
        for (i, agent) in agents.iter().enumerate() {
            if agents[..i].iter().any(|a| a.role() == agent.role()) {
                return Err(OrchestrationError::DuplicateRole { role: agent.role() });
            }
        }
        Ok(Self { agents })
    }

    pub fn roles(&self) -> Vec<RoleId> {
        self.agents.iter().map(|a| a.role()).collect()
    }

    pub fn get(&self, role: RoleId) -> Option<&dyn Agent> {
        self.agents
            .iter()
            .find(|a| a.role() == role)
            .map(|a| &**a)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
