use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::tools::terraform::{Report, TerraformCli};
use crate::transcript::{RoleId, Transcript};

use super::Agent;
use super::llm::LlmSession;

pub const VALIDATOR_PREAMBLE: &str = "\
You are a Terraform validation expert. You check Terraform configurations for \
quality and correctness.\n\
Your responsibilities:\n\
1. Check syntax and structure\n\
2. Check compliance with best practices\n\
3. Make sure every required component is present\n\
4. Review the security configuration\n\
5. Point out potential issues\n\n\
You can read Terraform files and run `terraform validate` and `terraform fmt` \
through your tools. Reference the exact block and attribute for every problem \
you report and suggest a concrete fix.";

/// Reviews the latest configuration and runs `terraform validate` on it.
pub struct ValidatorAgent {
    llm: LlmSession,
    cli: TerraformCli,
}

impl ValidatorAgent {
    pub fn new(llm: LlmSession, cli: TerraformCli) -> Self {
        Self { llm, cli }
    }
}

#[async_trait]
impl Agent for ValidatorAgent {
    fn role(&self) -> RoleId {
        RoleId::Validator
    }

    async fn respond(&self, transcript: &Transcript) -> Result<String> {
        let mut reply = self.llm.reply(RoleId::Validator, transcript).await?;
        let report = run_validation(&self.cli).await;
        if report.success {
            info!("terraform validate succeeded");
        } else {
            warn!("terraform validate failed with exit code {}", report.exit_code);
            reply.push_str(&format!("\n\nValidation Result: {report}"));
        }
        Ok(reply)
    }
}

/// Validate, running `terraform init` first when the directory needs it.
pub async fn run_validation(cli: &TerraformCli) -> Report {
    let report = cli.validate().await;
    if report.success || !report.output.contains("terraform init") {
        return report;
    }
    let init = cli.init().await;
    if !init.success {
        return init;
    }
    cli.validate().await
}
