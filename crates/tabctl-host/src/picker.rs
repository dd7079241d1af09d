use async_trait::async_trait;
use std::{io, process::Stdio, time::Duration};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, warn};

/// Runs fzf in its own terminal, since the host has no tty of its own.
pub const DEFAULT_PICKER_COMMAND: &str = "alacritty --title=tabctl-picker -e sh -c \
     'fzf --ansi --layout=reverse < \"$TABCTL_PICKER_INPUT\" > \"$TABCTL_PICKER_OUTPUT\"'";

pub const PICKER_INPUT_ENV: &str = "TABCTL_PICKER_INPUT";
pub const PICKER_OUTPUT_ENV: &str = "TABCTL_PICKER_OUTPUT";

#[derive(Debug, Error)]
pub enum PickerError {
    #[error("failed to prepare picker files: {0}")]
    Files(#[source] io::Error),
    #[error("failed to run picker: {0}")]
    Spawn(#[source] io::Error),
}

#[async_trait]
pub trait Picker: Send + Sync {
    /// Returns the chosen line, or `None` when the user made no choice.
    async fn pick(&self, lines: &[String]) -> Result<Option<String>, PickerError>;
}

/// Shell command picker. Lines are offered both on stdin and in the file
/// named by `TABCTL_PICKER_INPUT`; the answer is the first non-blank stdout
/// line, or the first non-blank line of `TABCTL_PICKER_OUTPUT` otherwise.
pub struct CommandPicker {
    command: String,
    timeout: Option<Duration>,
}

impl CommandPicker {
    pub fn new(command: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    async fn run(&self, input: String) -> Result<Option<String>, PickerError> {
        let input_file = NamedTempFile::new().map_err(PickerError::Files)?;
        let output_file = NamedTempFile::new().map_err(PickerError::Files)?;
        tokio::fs::write(input_file.path(), input.as_bytes())
            .await
            .map_err(PickerError::Files)?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(PICKER_INPUT_ENV, input_file.path())
            .env(PICKER_OUTPUT_ENV, output_file.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(PickerError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                // Pickers that read the input file close stdin early.
                if let Err(err) = stdin.write_all(input.as_bytes()).await {
                    debug!(event = "picker_stdin_closed", error = %err);
                }
            });
        }

        let output = child.wait_with_output().await.map_err(PickerError::Spawn)?;
        debug!(event = "picker_exited", status = %output.status);

        if let Some(line) = first_line(&String::from_utf8_lossy(&output.stdout)) {
            return Ok(Some(line));
        }
        let written = tokio::fs::read(output_file.path())
            .await
            .map_err(PickerError::Files)?;
        Ok(first_line(&String::from_utf8_lossy(&written)))
    }
}

#[async_trait]
impl Picker for CommandPicker {
    async fn pick(&self, lines: &[String]) -> Result<Option<String>, PickerError> {
        let mut input = lines.join("\n");
        input.push('\n');

        match self.timeout {
            None => self.run(input).await,
            Some(limit) => match tokio::time::timeout(limit, self.run(input)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(event = "picker_timeout", timeout_ms = limit.as_millis() as u64);
                    Ok(None)
                }
            },
        }
    }
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .find(|line| !line.trim().is_empty())
        .map(str::to_string)
}
