pub mod client;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use client::AnthropicClient;
pub use types::*;

/// The language-model backend an agent talks to.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send one request and return the complete assistant reply.
    async fn complete(&self, request: CreateMessageRequest) -> Result<AssistantTurn>;
}
