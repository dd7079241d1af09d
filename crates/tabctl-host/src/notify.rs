use async_trait::async_trait;
use std::{process::Stdio, time::Duration};
use tokio::process::Command;
use tracing::{debug, warn};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Operator-facing side channel for failures that never reach the controller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, summary: &str, body: &str);
}

/// Desktop notification through `notify-send`. Best effort.
#[derive(Clone, Debug)]
pub struct DesktopNotifier {
    program: String,
}

impl DesktopNotifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new("notify-send")
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, summary: &str, body: &str) {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--app-name=tabctl")
            .arg(summary)
            .arg(body)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(NOTIFY_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(event = "notify_sent", summary);
            }
            Ok(Ok(status)) => {
                warn!(event = "notify_failed", program = %self.program, status = %status);
            }
            Ok(Err(err)) => {
                warn!(event = "notify_spawn_error", program = %self.program, error = %err);
            }
            Err(_) => {
                warn!(event = "notify_timeout", program = %self.program);
            }
        }
    }
}
