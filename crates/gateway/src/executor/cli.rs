//! Subprocess executor.
//!
//! Invokes the external CLI with `--print --output-format text`, an
//! optional `--resume <chat_handle>` and `--model <id>`, and the prompt as
//! the final argument.  Credentials travel via the subprocess environment,
//! never on the command line (argv is visible in the process list).  Exit
//! code and stderr classify failures.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout_at, Duration, Instant};

use cb_domain::config::ExecutorConfig;
use cb_domain::error::ExecutorFailureReason;
use cb_domain::stream::{BoxStream, ExecutorOptions, ExecutorScope, TextDelta};
use cb_domain::{Error, Result};

use super::Executor;

pub struct CliExecutor {
    config: ExecutorConfig,
}

impl CliExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[String], options: &ExecutorOptions) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args)
            .env("NO_COLOR", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // Credentials only via the environment.
        if let Ok(key) = std::env::var(&self.config.api_key_env) {
            if !key.is_empty() {
                cmd.env(&self.config.api_key_env, key);
            }
        }

        let cwd = options
            .working_dir
            .clone()
            .or_else(|| self.config.working_dir.clone());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Build the argv for one turn.  The prompt is always the final argument;
/// credentials never appear here.
fn build_args(
    prompt: &str,
    chat_handle: Option<&str>,
    options: &ExecutorOptions,
    default_model: Option<&str>,
) -> Vec<String> {
    let mut args = vec!["--print".to_owned(), "--output-format".to_owned(), "text".to_owned()];

    if options.scope == ExecutorScope::ReadOnly {
        args.push("--mode".to_owned());
        args.push("ask".to_owned());
    }

    if let Some(handle) = chat_handle {
        args.push("--resume".to_owned());
        args.push(handle.to_owned());
    }

    // Model priority: explicit option > configured default.
    if let Some(model) = options.model.as_deref().or(default_model) {
        args.push("--model".to_owned());
        args.push(model.to_owned());
    }

    args.push(prompt.to_owned());
    args
}

/// Classify a failed run from its exit code and stderr.
fn classify_failure(exit_code: Option<i32>, stderr: &str) -> ExecutorFailureReason {
    let stderr = stderr.to_ascii_lowercase();
    if stderr.contains("timed out") || stderr.contains("timeout") {
        return ExecutorFailureReason::Timeout;
    }
    if stderr.contains("unauthorized")
        || stderr.contains("401")
        || stderr.contains("invalid api key")
        || stderr.contains("authentication")
    {
        return ExecutorFailureReason::Unauthorized;
    }
    if stderr.contains("unavailable")
        || stderr.contains("connection")
        || stderr.contains("network")
        || exit_code.is_none()
    {
        return ExecutorFailureReason::Unavailable;
    }
    ExecutorFailureReason::Internal
}

#[async_trait]
impl Executor for CliExecutor {
    async fn create_chat(&self) -> Result<String> {
        let mut cmd = self.command(&["create-chat".to_owned()], &ExecutorOptions::default());
        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| Error::Timeout("create-chat timed out".into()))?
        .map_err(Error::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExecutorFailure {
                reason: classify_failure(output.status.code(), &stderr),
            });
        }

        let handle = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if handle.is_empty() {
            return Err(Error::ExecutorFailure {
                reason: ExecutorFailureReason::Internal,
            });
        }
        Ok(handle)
    }

    async fn run(
        &self,
        prompt: &str,
        chat_handle: Option<&str>,
        options: &ExecutorOptions,
    ) -> Result<BoxStream<'static, TextDelta>> {
        let args = build_args(prompt, chat_handle, options, self.config.model.as_deref());
        let mut child = self.command(&args, options).spawn().map_err(Error::Io)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Internal("executor stdout not captured".into())
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            Error::Internal("executor stderr not captured".into())
        })?;

        let deadline = Instant::now() + Duration::from_secs(self.config.timeout_secs);

        let stream = async_stream::stream! {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match timeout_at(deadline, lines.next_line()).await {
                    Ok(Ok(Some(line))) => {
                        let mut text = line;
                        text.push('\n');
                        yield TextDelta::text(text);
                    }
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        let _ = child.kill().await;
                        yield TextDelta::error(format!("executor read failed: {e}"));
                        return;
                    }
                    Err(_) => {
                        // Deadline passed mid-stream: kill and classify.
                        let _ = child.kill().await;
                        tracing::warn!("executor run timed out");
                        yield TextDelta::error("executor timed out");
                        return;
                    }
                }
            }

            // Stream drained; collect stderr and the exit code.
            let mut err_buf = String::new();
            let _ = stderr.read_to_string(&mut err_buf).await;

            match timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) if status.success() => {
                    yield TextDelta::done();
                }
                Ok(Ok(status)) => {
                    let reason = classify_failure(status.code(), &err_buf);
                    tracing::error!(
                        exit_code = status.code(),
                        %reason,
                        stderr_preview = %err_buf.chars().take(200).collect::<String>(),
                        "executor run failed"
                    );
                    yield TextDelta::error(format!("executor failed: {reason}"));
                }
                Ok(Err(e)) => {
                    yield TextDelta::error(format!("executor wait failed: {e}"));
                }
                Err(_) => {
                    let _ = child.kill().await;
                    yield TextDelta::error("executor timed out");
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
