use std::{
    io,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};
#[cfg(unix)]
use std::{fs, os::unix::fs::PermissionsExt};
#[cfg(unix)]
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::{UnixListener, UnixStream},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ListenerConfig {
    pub socket_path: PathBuf,
    /// When set, a client's first line must match before a run is triggered.
    pub auth_token: Option<String>,
    pub handshake_timeout: Duration,
}

/// One request for a focus run, tagged with the connection that asked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FocusTrigger {
    pub connection: u64,
}

#[cfg(not(unix))]
pub async fn run(
    _config: ListenerConfig,
    _triggers: mpsc::Sender<FocusTrigger>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let _ = shutdown.changed().await;
    Ok(())
}

#[cfg(unix)]
pub async fn run(
    config: ListenerConfig,
    triggers: mpsc::Sender<FocusTrigger>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    if let Some(parent) = config.socket_path.parent() {
        fs::create_dir_all(parent)?;
        let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
    }

    if config.socket_path.exists() {
        let _ = fs::remove_file(&config.socket_path);
    }

    let listener = UnixListener::bind(&config.socket_path)?;
    let _ = fs::set_permissions(&config.socket_path, fs::Permissions::from_mode(0o600));

    info!(
        event = "trigger_listener_start",
        socket = %config.socket_path.display(),
        auth = config.auth_token.is_some()
    );

    let config = Arc::new(config);
    let next_connection = AtomicU64::new(1);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        let connection = next_connection.fetch_add(1, Ordering::Relaxed);
                        let config = config.clone();
                        let triggers = triggers.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, connection, &config, triggers).await;
                        });
                    }
                    Err(err) => {
                        warn!(event = "trigger_accept_error", error = %err);
                    }
                }
            }
        }
    }

    let _ = fs::remove_file(&config.socket_path);
    info!(event = "trigger_listener_stop");
    Ok(())
}

#[cfg(unix)]
async fn handle_connection(
    stream: UnixStream,
    connection: u64,
    config: &ListenerConfig,
    triggers: mpsc::Sender<FocusTrigger>,
) {
    if let Some(expected) = config.auth_token.as_deref() {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        match tokio::time::timeout(config.handshake_timeout, reader.read_line(&mut line)).await {
            Ok(Ok(_)) if line.trim() == expected => {}
            Ok(Ok(_)) => {
                warn!(event = "trigger_auth_rejected", connection);
                return;
            }
            Ok(Err(err)) => {
                warn!(event = "trigger_read_error", connection, error = %err);
                return;
            }
            Err(_) => {
                warn!(event = "trigger_auth_timeout", connection);
                return;
            }
        }
    }

    debug!(event = "trigger_accepted", connection);
    if triggers.send(FocusTrigger { connection }).await.is_err() {
        warn!(event = "trigger_dropped", connection);
    }
}
