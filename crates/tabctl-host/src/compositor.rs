use async_trait::async_trait;
use serde::Deserialize;
use std::{io, process::ExitStatus};
use tabctl_core::tree::{ContainerId, Node};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("unreadable compositor reply: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("compositor rejected command: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Compositor: Send + Sync {
    async fn get_tree(&self) -> Result<Node, CompositorError>;
    async fn focus(&self, container: ContainerId) -> Result<(), CompositorError>;
}

/// Talks to sway (or i3) through its IPC client binary.
pub struct SwayCompositor {
    program: String,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SwayCompositor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, CompositorError> {
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CompositorError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(CompositorError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Compositor for SwayCompositor {
    async fn get_tree(&self) -> Result<Node, CompositorError> {
        let raw = self.run(&["-t", "get_tree", "-r"]).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn focus(&self, container: ContainerId) -> Result<(), CompositorError> {
        let criteria = format!("[con_id={container}] focus");
        let raw = self.run(&[criteria.as_str()]).await?;
        debug!(event = "compositor_focus", container);
        check_command_replies(&raw)
    }
}

fn check_command_replies(raw: &[u8]) -> Result<(), CompositorError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }
    let replies: Vec<CommandReply> = serde_json::from_slice(raw)?;
    match replies.into_iter().find(|reply| !reply.success) {
        Some(failed) => Err(CompositorError::Rejected(
            failed.error.unwrap_or_else(|| "unknown error".to_string()),
        )),
        None => Ok(()),
    }
}
