pub mod feedback;
pub mod files;
pub mod terraform;

use anyhow::Result;
use serde_json::{Value, json};

use crate::ai::ToolDef;
use files::TerraformFiles;
use terraform::TerraformCli;

/// Tools an LLM-backed agent may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    CreateFile,
    ReadFile,
    ListFiles,
    Validate,
    Format,
    Init,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateFile => "create_file",
            Self::ReadFile => "read_file",
            Self::ListFiles => "list_files",
            Self::Validate => "validate",
            Self::Format => "fmt",
            Self::Init => "init",
        }
    }

    fn definition(&self) -> ToolDef {
        let (description, input_schema) = match self {
            Self::CreateFile => (
                "Create a new Terraform file with the given content. \
                Overwrites the file if it already exists.",
                json!({
                    "type": "object",
                    "properties": {
                        "filename": {
                            "type": "string",
                            "description": "The name of the file to create (e.g. main.tf)"
                        },
                        "content": {
                            "type": "string",
                            "description": "The content of the file"
                        }
                    },
                    "required": ["filename", "content"]
                }),
            ),
            Self::ReadFile => (
                "Read the content of a Terraform file.",
                json!({
                    "type": "object",
                    "properties": {
                        "filename": {
                            "type": "string",
                            "description": "The name of the file to read"
                        }
                    },
                    "required": ["filename"]
                }),
            ),
            Self::ListFiles => (
                "List all Terraform files in the configuration directory.",
                json!({ "type": "object", "properties": {} }),
            ),
            Self::Validate => (
                "Run `terraform validate` on the configuration directory.",
                json!({ "type": "object", "properties": {} }),
            ),
            Self::Format => (
                "Run `terraform fmt` on the configuration directory.",
                json!({ "type": "object", "properties": {} }),
            ),
            Self::Init => (
                "Run `terraform init` to initialize the configuration directory.",
                json!({ "type": "object", "properties": {} }),
            ),
        };
        ToolDef {
            name: self.name().to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// A subset of the tools, bound to the handles that implement them.
#[derive(Debug, Clone)]
pub struct ToolSet {
    files: TerraformFiles,
    cli: TerraformCli,
    enabled: Vec<Tool>,
}

impl ToolSet {
    pub fn new(files: TerraformFiles, cli: TerraformCli, enabled: &[Tool]) -> Self {
        Self {
            files,
            cli,
            enabled: enabled.to_vec(),
        }
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.enabled.iter().map(Tool::definition).collect()
    }

    /// Execute a tool by name and return the result as a string.
    pub async fn execute(&self, name: &str, input: &Value) -> Result<String> {
        let tool = self
            .enabled
            .iter()
            .copied()
            .find(|t| t.name() == name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {name}"))?;

        match tool {
            Tool::CreateFile => {
                let filename = input["filename"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("create_file requires 'filename' string"))?;
                let content = input["content"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("create_file requires 'content' string"))?;
                let path = self.files.create_file(filename, content).await?;
                Ok(format!("Created Terraform file: {}", path.display()))
            }
            Tool::ReadFile => {
                let filename = input["filename"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("read_file requires 'filename' string"))?;
                self.files.read_file(filename).await
            }
            Tool::ListFiles => {
                let names = self.files.list_files().await?;
                if names.is_empty() {
                    Ok("No Terraform files found.".to_string())
                } else {
                    Ok(names.join("\n"))
                }
            }
            Tool::Validate => Ok(self.cli.validate().await.to_string()),
            Tool::Format => Ok(self.cli.format().await.to_string()),
            Tool::Init => Ok(self.cli.init().await.to_string()),
        }
    }
}
