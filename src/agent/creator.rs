use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::tools::files::TerraformFiles;
use crate::transcript::{RoleId, Transcript};

use super::Agent;
use super::llm::LlmSession;

pub const CREATOR_PREAMBLE: &str = "\
You are a Terraform expert responsible for writing high-quality Terraform configurations.\n\
Your responsibilities:\n\
1. Write Terraform with correct syntax and a clear structure\n\
2. Follow Terraform best practices\n\
3. Comment every block so a reviewer can follow it\n\
4. Use variables and locals to avoid repetition\n\
5. Apply security best practices\n\n\
You can create, read and list Terraform files and run `terraform validate` and \
`terraform fmt` through your tools.\n\n\
Always reply with the complete configuration in a single ```hcl code block. \
When the conversation contains validation errors or reviewer feedback, address \
every point in your next version.";

/// Writes the Terraform configuration and stores it as the artifact file.
pub struct CreatorAgent {
    llm: LlmSession,
    files: TerraformFiles,
    artifact_file: String,
}

impl CreatorAgent {
    pub fn new(llm: LlmSession, files: TerraformFiles, artifact_file: impl Into<String>) -> Self {
        Self {
            llm,
            files,
            artifact_file: artifact_file.into(),
        }
    }
}

#[async_trait]
impl Agent for CreatorAgent {
    fn role(&self) -> RoleId {
        RoleId::Creator
    }

    async fn respond(&self, transcript: &Transcript) -> Result<String> {
        let mut reply = self.llm.reply(RoleId::Creator, transcript).await?;
        // Without a fenced block the model may already have saved the file
        // through create_file; leave it alone.
        let Some(hcl) = extract_hcl(&reply) else {
            info!("Creator reply has no HCL block, {} left as is", self.artifact_file);
            return Ok(reply);
        };
        match self.files.create_file(&self.artifact_file, &hcl).await {
            Ok(path) => info!("Creator wrote {}", path.display()),
            Err(e) => {
                warn!("Creator could not write {}: {e:#}", self.artifact_file);
                reply.push_str(&format!(
                    "\n\nFailed to save {}: {e:#}",
                    self.artifact_file
                ));
            }
        }
        Ok(reply)
    }
}

/// Body of the first ```hcl / ```terraform / ```tf block of `reply`.
pub fn extract_hcl(reply: &str) -> Option<String> {
    let mut lines = reply.lines();
    while let Some(line) = lines.next() {
        let tag = match line.trim().strip_prefix("```") {
            Some(tag) => tag.trim().to_ascii_lowercase(),
            None => continue,
        };
        if !matches!(tag.as_str(), "hcl" | "terraform" | "tf") {
            continue;
        }
        let body: Vec<&str> = lines
            .by_ref()
            .take_while(|l| l.trim() != "```")
            .collect();
        let mut hcl = body.join("\n");
        hcl.push('\n');
        return Some(hcl);
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::llm::testing::{ScriptedBackend, settings};
    use crate::transcript::{ChatRole, Speaker};

    fn seeded() -> Transcript {
        let mut t = Transcript::new();
        t.append(Speaker::Task, ChatRole::User, "Create a VPC").unwrap();
        t
    }

    #[test]
    fn extracts_tagged_fence() {
        let reply = "Here you go:\n```hcl\nresource \"aws_vpc\" \"main\" {\n  cidr_block = \"10.0.0.0/16\"\n}\n```\nLet me know.";
        assert_eq!(
            extract_hcl(reply).as_deref(),
            Some("resource \"aws_vpc\" \"main\" {\n  cidr_block = \"10.0.0.0/16\"\n}\n")
        );
    }

    #[test]
    fn skips_untagged_fences() {
        let reply = "```bash\nterraform init\n```\n```Terraform\nlocals {}\n```";
        assert_eq!(extract_hcl(reply).as_deref(), Some("locals {}\n"));
    }

    #[test]
    fn prose_has_no_hcl() {
        assert_eq!(extract_hcl("I saved the configuration to main.tf."), None);
        assert_eq!(extract_hcl("```bash\nterraform fmt\n```"), None);
    }

    #[tokio::test]
    async fn prose_reply_keeps_tool_written_file() {
        use crate::tools::terraform::TerraformCli;
        use crate::tools::{Tool, ToolSet};
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let files = TerraformFiles::new(dir.path());
        let tools = ToolSet::new(
            files.clone(),
            TerraformCli::new("definitely-not-terraform-xyz", dir.path(), Duration::from_secs(5)),
            &[Tool::CreateFile],
        );
        let backend = Arc::new(
            ScriptedBackend::new()
                .tool(
                    "create_file",
                    serde_json::json!({
                        "filename": "main.tf",
                        "content": "resource \"aws_vpc\" \"main\" {}\n"
                    }),
                )
                .text("I saved the configuration to main.tf."),
        );
        let agent = CreatorAgent::new(
            LlmSession::new(backend, settings(), CREATOR_PREAMBLE, Some(tools)),
            files,
            "main.tf",
        );
        let reply = agent.respond(&seeded()).await.unwrap();
        assert_eq!(reply, "I saved the configuration to main.tf.");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.tf")).unwrap(),
            "resource \"aws_vpc\" \"main\" {}\n"
        );
    }

    #[tokio::test]
    async fn writes_artifact_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new().text("```hcl\nlocals {}\n```"));
        let agent = CreatorAgent::new(
            LlmSession::new(backend, settings(), CREATOR_PREAMBLE, None),
            TerraformFiles::new(dir.path()),
            "main.tf",
        );
        let reply = agent.respond(&seeded()).await.unwrap();
        assert_eq!(reply, "```hcl\nlocals {}\n```");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.tf")).unwrap(),
            "locals {}\n"
        );
    }

    #[tokio::test]
    async fn write_failure_becomes_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new().text("```tf\nlocals {}\n```"));
        let agent = CreatorAgent::new(
            LlmSession::new(backend, settings(), CREATOR_PREAMBLE, None),
            TerraformFiles::new(dir.path()),
            "../main.tf",
        );
        let reply = agent.respond(&seeded()).await.unwrap();
        assert!(reply.starts_with("```tf\nlocals {}\n```"));
        assert!(reply.contains("Failed to save ../main.tf"));
    }
}
