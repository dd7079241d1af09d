use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tabctl_core::paths::{default_socket_path, load_auth_token, AUTH_FILE_ENV, SOCKET_ENV};
use tokio::{io::AsyncWriteExt, net::UnixStream};

#[derive(Parser)]
#[command(name = "tabctl-trigger")]
#[command(about = "Ask the running tab host to open the tab picker", long_about = None)]
struct Cli {
    /// Host socket; defaults to $TABCTL_SOCKET or the runtime dir.
    #[arg(long, default_value = "")]
    socket: String,
    /// File holding the shared secret; defaults to $TABCTL_AUTH_FILE.
    #[arg(long, default_value = "")]
    auth_file: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = resolve(&cli.socket, SOCKET_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(default_socket_path);
    let token = match resolve(&cli.auth_file, AUTH_FILE_ENV) {
        Some(path) => Some(
            load_auth_token(Path::new(&path))
                .with_context(|| format!("Failed to read auth file {path}"))?,
        ),
        None => None,
    };
    send_trigger(&socket, token.as_deref()).await
}

fn resolve(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    std::env::var(env_key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

async fn send_trigger(socket: &Path, token: Option<&str>) -> Result<()> {
    let mut stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("Failed to connect to {}", socket.display()))?;
    if let Some(token) = token {
        stream
            .write_all(format!("{token}\n").as_bytes())
            .await
            .context("Failed to send auth token")?;
    }
    stream.shutdown().await.context("Failed to close connection")?;
    Ok(())
}
