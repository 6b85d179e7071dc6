use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::tools::feedback::FeedbackChannel;
use crate::transcript::{ChatRole, RoleId, Transcript};

use super::Agent;

/// Recorded when the human just presses enter.
const IMPLICIT_APPROVAL: &str = "Approved.";

/// The human in the loop: shows the latest draft and validation report and
/// relays the feedback verbatim.
pub struct ReviewerAgent {
    channel: Arc<dyn FeedbackChannel>,
    cancel: CancellationToken,
}

impl ReviewerAgent {
    pub fn new(channel: Arc<dyn FeedbackChannel>, cancel: CancellationToken) -> Self {
        Self { channel, cancel }
    }
}

#[async_trait]
impl Agent for ReviewerAgent {
    fn role(&self) -> RoleId {
        RoleId::Reviewer
    }

    fn chat_role(&self) -> ChatRole {
        ChatRole::User
    }

    async fn respond(&self, transcript: &Transcript) -> Result<String> {
        let presented = presentation(transcript);
        let feedback = self
            .channel
            .request_feedback(&presented, &self.cancel)
            .await?;
        info!("Reviewer feedback received ({} chars)", feedback.len());
        if feedback.trim().is_empty() {
            Ok(IMPLICIT_APPROVAL.to_string())
        } else {
            Ok(feedback)
        }
    }
}

fn presentation(transcript: &Transcript) -> String {
    let draft = transcript
        .last_from(RoleId::Creator)
        .map(|m| m.text())
        .unwrap_or("(no configuration has been produced yet)");
    let mut out = format!("=== Configuration ===\n{draft}");
    if let Some(report) = transcript.last_from(RoleId::Validator) {
        out.push_str(&format!("\n\n=== Validation ===\n{}", report.text()));
    }
    out
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;

    /// Answers from a fixed list and remembers what it was shown.
    #[derive(Default)]
    pub struct ScriptedFeedback {
        answers: Mutex<VecDeque<String>>,
        pub presented: Mutex<Vec<String>>,
    }

    impl ScriptedFeedback {
        pub fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(|s| s.to_string()).collect()),
                presented: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FeedbackChannel for ScriptedFeedback {
        async fn request_feedback(
            &self,
            presented: &str,
            cancel: &CancellationToken,
        ) -> Result<String> {
            if cancel.is_cancelled() {
                bail!("Feedback request cancelled");
            }
            self.presented.lock().unwrap().push(presented.to_string());
            match self.answers.lock().unwrap().pop_front() {
                Some(answer) => Ok(answer),
                None => bail!("no more answers"),
            }
        }
    }
}
