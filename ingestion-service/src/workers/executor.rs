use std::path::Path;
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {0} seconds")]
    TimedOut(u64),

    #[error("command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Runs external tools with a hard timeout.
#[derive(Clone, Debug)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// `redacted` lists argument positions replaced by `***` in logs.
    pub async fn execute(
        &self,
        program: &str,
        args: &[&str],
        redacted: &[usize],
        working_dir: Option<&Path>,
    ) -> Result<Output, CommandError> {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let logged_args: Vec<&str> = args
            .iter()
            .enumerate()
            .map(|(i, arg)| if redacted.contains(&i) { "***" } else { *arg })
            .collect();

        tracing::debug!(
            program = %program,
            args = ?logged_args,
            timeout_secs = %self.timeout.as_secs(),
            "Executing command"
        );

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| CommandError::TimedOut(self.timeout.as_secs()))?
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(
                program = %program,
                args = ?logged_args,
                stderr = %stderr,
                "Command failed"
            );
            return Err(CommandError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        tracing::debug!(
            program = %program,
            output_size = output.stdout.len(),
            "Command succeeded"
        );

        Ok(output)
    }
}
