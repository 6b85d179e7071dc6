use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::ai::{ChatBackend, CreateMessageRequest, STOP_REASON_MAX_TOKENS};
use crate::protocol::{
    ContentBlock, Message, assistant_message, text_of, tool_result_block, user_message,
    user_message_with_tool_results,
};
use crate::tools::ToolSet;
use crate::transcript::{RoleId, Speaker, Transcript};

/// Upper bound on tool round-trips within a single agent turn.
const MAX_TOOL_ROUNDS: usize = 8;

/// Sampling parameters shared by every LLM-backed agent.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// One role's view of the model: a preamble, optional tools and the backend.
pub struct LlmSession {
    backend: Arc<dyn ChatBackend>,
    settings: ModelSettings,
    preamble: String,
    tools: Option<ToolSet>,
}

impl LlmSession {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        settings: ModelSettings,
        preamble: impl Into<String>,
        tools: Option<ToolSet>,
    ) -> Self {
        Self {
            backend,
            settings,
            preamble: preamble.into(),
            tools,
        }
    }

    /// Ask the model for `role`'s next message, running requested tools until
    /// it produces a final answer.
    pub async fn reply(&self, role: RoleId, transcript: &Transcript) -> Result<String> {
        let mut messages = conversation_for(role, transcript);
        let tool_defs = self.tools.as_ref().map(|t| t.definitions()).unwrap_or_default();
        let mut texts = Vec::new();

        for round in 0..=MAX_TOOL_ROUNDS {
            let request = CreateMessageRequest {
                model: self.settings.model.clone(),
                max_tokens: self.settings.max_tokens,
                messages: messages.clone(),
                tools: tool_defs.clone(),
                stream: true,
                system: Some(self.preamble.clone()),
                temperature: self.settings.temperature,
                top_p: self.settings.top_p,
            };
            let turn = self.backend.complete(request).await?;
            if turn.stop_reason.as_deref() == Some(STOP_REASON_MAX_TOKENS) {
                bail!(
                    "{role} reply was cut off at the {} token limit",
                    self.settings.max_tokens
                );
            }
            let text = text_of(&turn.content);
            if !text.trim().is_empty() {
                texts.push(text.clone());
            }

            let tools = match &self.tools {
                Some(t) if turn.wants_tools() => t,
                _ => return finish(role, text, texts),
            };
            if round == MAX_TOOL_ROUNDS {
                warn!("{role} still requesting tools after {MAX_TOOL_ROUNDS} rounds");
                return finish(role, text, texts);
            }

            messages.push(Message {
                role: "assistant".to_string(),
                content: turn.content.clone(),
            });

            let uses = turn.tool_uses();
            info!("{role} executing {} tool call(s)", uses.len());
            let mut results: Vec<ContentBlock> = Vec::with_capacity(uses.len());
            for (id, name, input) in &uses {
                let (output, is_error) = match tools.execute(name, input).await {
                    Ok(out) => {
                        debug!("Tool {name} succeeded, {} bytes", out.len());
                        (out, false)
                    }
                    Err(e) => {
                        warn!("Tool {name} failed: {e:#}");
                        (format!("Error: {e:#}"), true)
                    }
                };
                results.push(tool_result_block(id, &output, is_error));
            }
            messages.push(user_message_with_tool_results(results));
        }

        bail!("{role} produced no reply")
    }
}

fn finish(role: RoleId, last: String, texts: Vec<String>) -> Result<String> {
    if !last.trim().is_empty() {
        return Ok(last);
    }
    if texts.is_empty() {
        bail!("model returned an empty reply for {role}");
    }
    Ok(texts.join("\n\n"))
}

/// Render the transcript from `role`'s point of view: its own messages are
/// assistant turns, everything else is user input tagged with the speaker.
pub fn conversation_for(role: RoleId, transcript: &Transcript) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    for m in transcript.iter() {
        let msg = match m.speaker() {
            Speaker::Agent(r) if r == role => assistant_message(m.text()),
            Speaker::Task => user_message(m.text()),
            Speaker::Agent(r) => user_message(&format!("[{r}]\n{}", m.text())),
        };
        match messages.last_mut() {
            Some(prev) if prev.role == msg.role => prev.content.extend(msg.content),
            _ => messages.push(msg),
        }
    }
    if messages.first().is_none_or(|m| m.role != "user") {
        messages.insert(0, user_message("Begin."));
    }
    if messages.last().is_some_and(|m| m.role == "assistant") {
        messages.push(user_message("Continue."));
    }
    messages
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::ai::{AssistantTurn, STOP_REASON_END_TURN, STOP_REASON_TOOL_USE};

    /// Replays canned turns and records every request it receives.
    #[derive(Default)]
    pub struct ScriptedBackend {
        turns: Mutex<VecDeque<Result<AssistantTurn>>>,
        pub requests: Mutex<Vec<CreateMessageRequest>>,
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn text(self, text: &str) -> Self {
            self.push(Ok(AssistantTurn {
                content: vec![ContentBlock::Text { text: text.into() }],
                stop_reason: Some(STOP_REASON_END_TURN.into()),
            }))
        }

        pub fn tool(self, name: &str, input: serde_json::Value) -> Self {
            self.push(Ok(AssistantTurn {
                content: vec![ContentBlock::ToolUse {
                    id: format!("toolu_{name}"),
                    name: name.into(),
                    input,
                }],
                stop_reason: Some(STOP_REASON_TOOL_USE.into()),
            }))
        }

        pub fn truncated(self, text: &str) -> Self {
            self.push(Ok(AssistantTurn {
                content: vec![ContentBlock::Text { text: text.into() }],
                stop_reason: Some(STOP_REASON_MAX_TOKENS.into()),
            }))
        }

        pub fn failure(self, msg: &str) -> Self {
            self.push(Err(anyhow::anyhow!(msg.to_string())))
        }

        fn push(self, turn: Result<AssistantTurn>) -> Self {
            self.turns.lock().unwrap().push_back(turn);
            self
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, request: CreateMessageRequest) -> Result<AssistantTurn> {
            self.requests.lock().unwrap().push(request);
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }
    }

    pub fn settings() -> ModelSettings {
        ModelSettings {
            model: "test-model".into(),
            max_tokens: 1024,
            temperature: Some(0.7),
            top_p: Some(0.8),
        }
    }
}
