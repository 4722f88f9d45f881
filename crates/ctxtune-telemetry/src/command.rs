//! Bounded external command execution

use crate::{Result, TelemetryError};
use std::time::Duration;
use tokio::process::Command;

/// Captured output of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args...` and return its output, killing it after `timeout`
pub async fn run(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TelemetryError::ToolUnavailable(format!("{} not found", program)));
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(TelemetryError::Timeout(format!(
                "{} did not finish within {:?}",
                program, timeout
            )));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(TelemetryError::CommandFailed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    Ok(CommandOutput { stdout, stderr })
}
