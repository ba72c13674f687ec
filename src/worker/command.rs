use std::future::Future;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use tokio::process::Command;

use crate::worker::job::JobContext;

/// Result of one shell command run.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `sh -c <command>`, killing the child if the context is cancelled.
pub async fn run_shell(ctx: &JobContext, command: &str) -> anyhow::Result<CommandOutput> {
    tracing::info!(job_id = %ctx.job_id, command, "Running shell command");

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn '{}'", command))?;

    let output = tokio::select! {
        out = child.wait_with_output() => out.context("failed to collect command output")?,
        _ = ctx.cancelled() => {
            return Err(anyhow!("cancelled while running '{}'", command));
        }
    };

    Ok(CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Job logic that runs `command` through the shell on every invocation.
///
/// A non-zero exit becomes an error carrying stderr (or the exit code when
/// stderr is empty).
pub fn shell_job(
    command: String,
) -> impl Fn(JobContext) -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
       + Send
       + Sync
       + 'static {
    move |ctx: JobContext| {
        let command = command.clone();
        Box::pin(async move {
            let out = run_shell(&ctx, &command).await?;
            if !out.stdout.is_empty() {
                tracing::info!(job_id = %ctx.job_id, output = %out.stdout.trim_end(), "Command output");
            }
            if out.success() {
                Ok(())
            } else if out.stderr.is_empty() {
                Err(anyhow!("exit code: {:?}", out.exit_code))
            } else {
                Err(anyhow!(out.stderr.trim_end().to_string()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> JobContext {
        JobContext::new("job-t".into(), "t".into(), CancellationToken::new())
    }

    #[tokio::test]
    async fn run_shell_captures_stdout() {
        let out = run_shell(&ctx(), "echo hello").await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
    }

    #[tokio::test]
    async fn shell_job_fails_with_stderr() {
        let job = shell_job("echo 'bad thing' >&2 && exit 3".to_string());
        let err = job(ctx()).await.unwrap_err();
        assert!(err.to_string().contains("bad thing"));
    }

    #[tokio::test]
    async fn shell_job_reports_exit_code_without_stderr() {
        let job = shell_job("exit 1".to_string());
        let err = job(ctx()).await.unwrap_err();
        assert!(err.to_string().contains("exit code"));
    }

    #[tokio::test]
    async fn cancellation_stops_long_command() {
        let token = CancellationToken::new();
        let ctx = JobContext::new("job-s".into(), "s".into(), token.clone());
        let handle = tokio::spawn(async move { run_shell(&ctx, "sleep 30").await });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        token.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("cancelled command should return promptly")
            .unwrap();
        assert!(result.is_err());
    }
}
