mod cmd_config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tfcrew::agent::llm::LlmSession;
use tfcrew::agent::{
    Agent, CreatorAgent, ReviewerAgent, Roster, ValidatorAgent, creator, validator,
};
use tfcrew::ai::{AnthropicClient, ChatBackend};
use tfcrew::config;
use tfcrew::orchestrator::Orchestrator;
use tfcrew::tools::feedback::StdinFeedback;
use tfcrew::tools::files::TerraformFiles;
use tfcrew::tools::terraform::TerraformCli;
use tfcrew::tools::{Tool, ToolSet};

const DEFAULT_TASK: &str = "\
Create a Terraform file to deploy a simple web application on AWS.
The Terraform file should include the following components:
1. VPC with public and private subnets
2. Security groups allowing HTTP/HTTPS access
3. EC2 instance running the web application
4. Load Balancer for traffic distribution
5. Auto Scaling Group for automatic scaling based on load

Requirements:
- Use Terraform best practices
- Include comprehensive comments explaining each part
- Include output variables for important information
- Include proper tags and metadata";

const CREATOR_TOOLS: &[Tool] = &[
    Tool::CreateFile,
    Tool::ReadFile,
    Tool::ListFiles,
    Tool::Validate,
    Tool::Format,
];
const VALIDATOR_TOOLS: &[Tool] = &[Tool::ReadFile, Tool::Validate, Tool::Format, Tool::Init];

#[derive(Parser)]
#[command(
    name = "tfcrew",
    about = "Creator, validator and human reviewer iterating on a Terraform configuration",
    version
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Task description (defaults to the AWS web application task)
    #[arg(short, long, conflicts_with = "task_file")]
    task: Option<String>,

    /// Read the task description from a file
    #[arg(long)]
    task_file: Option<PathBuf>,

    /// Directory the Terraform files are written to
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Override the number of cycles before the hard stop
    #[arg(long)]
    max_cycles: Option<usize>,

    /// Write the transcript as JSON to this path when the run ends
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Log at info level (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create default settings.json
    Init,
    /// Show current configuration (secrets masked)
    Show,
    /// Set a config value (dot notation: backend.api_key)
    Set {
        /// Config key path
        key: String,
        /// Value to set
        value: String,
    },
    /// Print config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    if let Some(Commands::Config { action }) = &cli.command {
        return cmd_config::run(action, &config_path);
    }

    // Logs go to stderr; stdout carries the conversation log and the artifact.
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = if config_path.exists() {
        config::AppConfig::load(&config_path)?.with_env_overrides()
    } else if config::AppConfig::has_required_env_vars() {
        config::AppConfig::default().with_env_overrides()
    } else {
        anyhow::bail!(
            "No config at {} and {} is not set. Run `tfcrew config init` to set up.",
            config_path.display(),
            config::ENV_API_KEY
        );
    };
    if let Some(dir) = cli.work_dir.clone() {
        config.terraform.work_dir = dir;
    }
    if let Some(n) = cli.max_cycles {
        config.orchestration.max_cycles = n;
    }
    info!("Config loaded");

    let task = match (&cli.task, &cli.task_file) {
        (Some(task), _) => task.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file {}", path.display()))?,
        (None, None) => DEFAULT_TASK.to_string(),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping the run");
                cancel.cancel();
            }
        });
    }

    let orchestrator = build_orchestrator(&config, &cancel)?;
    let mut session = orchestrator.seed(&task)?;
    info!(run = %session.id(), "Session seeded");

    let outcome = session
        .run(&cancel, |message| {
            println!("==== {} just responded ====", message.speaker());
        })
        .await;

    if let Some(path) = &cli.transcript {
        let json = serde_json::to_string_pretty(session.transcript())?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
        info!("Transcript written to {}", path.display());
    }

    let reason = outcome?;
    info!("Run finished: {reason:?}");

    println!("Final Terraform configuration:");
    match session.final_artifact() {
        Some(artifact) => println!("{artifact}"),
        None => println!("(none produced)"),
    }
    Ok(())
}

fn build_orchestrator(
    config: &config::AppConfig,
    cancel: &CancellationToken,
) -> Result<Orchestrator> {
    let backend: Arc<dyn ChatBackend> = Arc::new(AnthropicClient::new(
        &config.backend.api_key,
        &config.backend.base_url,
    ));
    let files = TerraformFiles::new(&config.terraform.work_dir);
    let cli = TerraformCli::new(
        &config.terraform.binary,
        &config.terraform.work_dir,
        config.terraform_timeout(),
    );
    let settings = config.model_settings();

    let creator = CreatorAgent::new(
        LlmSession::new(
            backend.clone(),
            settings.clone(),
            creator::CREATOR_PREAMBLE,
            Some(ToolSet::new(files.clone(), cli.clone(), CREATOR_TOOLS)),
        ),
        files.clone(),
        &config.terraform.artifact_file,
    );
    let validator = ValidatorAgent::new(
        LlmSession::new(
            backend,
            settings,
            validator::VALIDATOR_PREAMBLE,
            Some(ToolSet::new(files, cli.clone(), VALIDATOR_TOOLS)),
        ),
        cli,
    );
    let reviewer = ReviewerAgent::new(Arc::new(StdinFeedback::new()), cancel.clone());

    let agents: Vec<Box<dyn Agent>> =
        vec![Box::new(creator), Box::new(validator), Box::new(reviewer)];
    let roster = Roster::new(agents)?;
    Ok(Orchestrator::new(
        roster,
        config.orchestration.selection,
        config.termination_policy(),
    ))
}
