use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Maximum output size per stream (stdout/stderr) in bytes.
const MAX_OUTPUT_BYTES: usize = 512 * 1024; // 512 KiB

/// Exit code reported when a command times out.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Outcome of one terraform invocation. Failures are content, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\nExit code: {}", self.output, self.exit_code)
    }
}

/// Runs the terraform binary inside the configuration directory.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>, work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
            timeout,
        }
    }

    pub async fn init(&self) -> Report {
        self.run(&["init", "-input=false", "-no-color"]).await
    }

    pub async fn validate(&self) -> Report {
        self.run(&["validate", "-no-color"]).await
    }

    pub async fn format(&self) -> Report {
        self.run(&["fmt", "-no-color"]).await
    }

    async fn run(&self, args: &[&str]) -> Report {
        let subcommand = args.first().copied().unwrap_or_default();
        info!("terraform {subcommand} in {}", self.work_dir.display());

        if let Err(e) = tokio::fs::create_dir_all(&self.work_dir).await {
            return failure(format!(
                "Failed to prepare {}: {e}",
                self.work_dir.display()
            ));
        }

        let child = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.work_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to start {}: {e}", self.binary);
                return failure(format!("Failed to run {} {subcommand}: {e}", self.binary));
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let stdout = truncate_output(&output.stdout);
                let stderr = truncate_output(&output.stderr);

                let mut text = String::new();
                if !stdout.is_empty() {
                    text.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push_str("\n--- stderr ---\n");
                    }
                    text.push_str(&stderr);
                }
                if text.is_empty() {
                    text = "(no output)".to_string();
                }
                debug!("terraform {subcommand}: exit_code={exit_code}, output_len={}", text.len());
                Report {
                    success: output.status.success(),
                    exit_code,
                    output: text,
                }
            }
            Ok(Err(e)) => failure(format!("Failed to execute {} {subcommand}: {e}", self.binary)),
            Err(_) => {
                // kill_on_drop reaps the child
                warn!("terraform {subcommand} timed out after {:?}", self.timeout);
                Report {
                    success: false,
                    exit_code: TIMEOUT_EXIT_CODE,
                    output: format!("Command timed out after {}ms.", self.timeout.as_millis()),
                }
            }
        }
    }
}

fn failure(output: String) -> Report {
    Report {
        success: false,
        exit_code: -1,
        output,
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    if s.len() > MAX_OUTPUT_BYTES {
        let mut end = MAX_OUTPUT_BYTES;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n\n... (output truncated at {MAX_OUTPUT_BYTES} bytes)", &s[..end])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_reported_as_content() {
        let dir = tempfile::tempdir().unwrap();
        let cli = TerraformCli::new(
            "definitely-not-terraform-xyz",
            dir.path(),
            Duration::from_secs(5),
        );
        let report = cli.validate().await;
        assert!(!report.success);
        assert!(report.output.contains("Failed to run"));
        assert!(report.to_string().contains("Exit code: -1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_failed_report() {
        let dir = tempfile::tempdir().unwrap();
        // `false` ignores its arguments and exits 1.
        let cli = TerraformCli::new("false", dir.path(), Duration::from_secs(5));
        let report = cli.format().await;
        assert!(!report.success);
        assert_eq!(report.exit_code, 1);
        assert_eq!(report.output, "(no output)");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let cli = TerraformCli::new("echo", dir.path(), Duration::from_secs(5));
        let report = cli.validate().await;
        assert!(report.success);
        assert!(report.output.contains("validate -no-color"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out_with_124() {
        let dir = tempfile::tempdir().unwrap();
        // `sh validate -no-color` runs this file as a script.
        std::fs::write(dir.path().join("validate"), "sleep 5\n").unwrap();
        let cli = TerraformCli::new("sh", dir.path(), Duration::from_millis(100));
        let started = std::time::Instant::now();
        let report = cli.validate().await;
        assert!(!report.success);
        assert_eq!(report.exit_code, TIMEOUT_EXIT_CODE);
        assert!(report.output.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn truncates_large_output() {
        let big = vec![b'a'; MAX_OUTPUT_BYTES + 10];
        let out = truncate_output(&big);
        assert!(out.ends_with(&format!("(output truncated at {MAX_OUTPUT_BYTES} bytes)")));
    }
}
