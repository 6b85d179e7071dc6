use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A blocking request to a human, interruptible through `cancel`.
#[async_trait]
pub trait FeedbackChannel: Send + Sync {
    async fn request_feedback(&self, presented: &str, cancel: &CancellationToken)
        -> Result<String>;
}

/// Prompts on stderr and reads one line from stdin.
pub struct StdinFeedback {
    lines: Mutex<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
}

impl StdinFeedback {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinFeedback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedbackChannel for StdinFeedback {
    async fn request_feedback(
        &self,
        presented: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(
                format!(
                    "Please provide feedback on the Terraform configuration:\n\n{presented}\n\n> "
                )
                .as_bytes(),
            )
            .await?;
        stderr.flush().await?;

        let mut lines = self.lines.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => bail!("Feedback request cancelled"),
            line = lines.next_line() => match line? {
                Some(text) => Ok(text.trim().to_string()),
                None => bail!("stdin closed while waiting for feedback"),
            },
        }
    }
}
