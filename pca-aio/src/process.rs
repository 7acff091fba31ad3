// pca-aio/src/process.rs
use std::process::{Output, Stdio};

use pca_common::error::{PcaError, Result};
use tokio::process::Command;
use tracing::{debug, error};

/// Runs an external command and captures its output.
///
/// A non-zero exit status is not an error here; callers inspect `Output::status`.
pub async fn run_command_async(
    command: &str,
    args: &[String],
    envs: &[(&str, &str)],
) -> Result<Output> {
    debug!(
        "Running command: {} {:?} (envs: {:?})",
        command,
        args,
        envs.iter().map(|(k, _)| *k).collect::<Vec<_>>() // Log only keys for envs
    );

    let mut cmd = Command::new(command);
    cmd.args(args);
    cmd.kill_on_drop(true);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null()); // Prevent hanging on stdin

    match cmd.output().await {
        Ok(output) => {
            if !output.status.success() {
                debug!("Command failed with status: {}", output.status);
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.trim().is_empty() {
                    debug!("Stdout:\n{}", stdout.trim());
                }
                if !stderr.trim().is_empty() {
                    debug!("Stderr:\n{}", stderr.trim());
                }
            } else {
                debug!("Command {} finished successfully.", command);
            }
            Ok(output)
        }
        Err(e) => {
            error!("Failed to execute command {}: {}", command, e);
            Err(PcaError::CommandExecError(format!("{command}: {e}")))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_env() {
        let args = vec!["-c".to_string(), "printf %s \"$GREETING\"".to_string()];
        let out = run_command_async("sh", &args, &[("GREETING", "hi")])
            .await
            .unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hi");
    }

    #[tokio::test]
    async fn missing_binary_is_an_exec_error() {
        let err = run_command_async("pca-definitely-missing-binary", &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PcaError::CommandExecError(_)));
    }
}
