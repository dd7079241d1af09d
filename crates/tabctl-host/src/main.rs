mod codec;
mod commander;
mod compositor;
mod display;
mod listener;
mod notify;
mod orchestrator;
mod picker;
#[cfg(test)]
mod testing;
mod windows;

use clap::Parser;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
    time::Duration,
};
use tabctl_core::paths::{default_socket_path, load_auth_token, AUTH_FILE_ENV, SOCKET_ENV};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

use crate::commander::Commander;
use crate::compositor::SwayCompositor;
use crate::listener::ListenerConfig;
use crate::notify::{DesktopNotifier, Notifier};
use crate::orchestrator::{serve_triggers, FocusOrchestrator};
use crate::picker::{CommandPicker, DEFAULT_PICKER_COMMAND};
use crate::windows::{watch_window_closures, ResolverConfig, WindowResolver};

const OUTBOUND_QUEUE_CAPACITY: usize = 64;
const TRIGGER_QUEUE_CAPACITY: usize = 8;
const AUTH_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const SHUTDOWN_SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
struct Config {
    socket_path: PathBuf,
    picker_command: String,
    picker_timeout: Option<Duration>,
    wm_msg: String,
    auth_file: Option<PathBuf>,
    debug: bool,
    log_dir: String,
    identify_attempts: u32,
    identify_delay: Duration,
    notify_focused: bool,
}

#[derive(Parser, Debug)]
#[command(name = "tabctl-host")]
struct Args {
    #[arg(long, default_value = "")]
    socket: String,
    #[arg(long, default_value = "")]
    picker: String,
    /// Seconds before an unanswered picker counts as cancelled; 0 waits forever.
    #[arg(long, default_value_t = 0)]
    picker_timeout: u64,
    #[arg(long, default_value = "")]
    wm_msg: String,
    #[arg(long, default_value = "")]
    auth_file: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = 5)]
    identify_attempts: u32,
    #[arg(long, default_value_t = 60)]
    identify_delay_ms: u64,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    notify_focused: bool,
    /// Manifest path and extension id appended by the browser.
    #[arg(hide = true)]
    browser_args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = load_config(Args::parse());
    let _log_guard = init_logging(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(event = "host_error", error = %err);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let auth_token = match &config.auth_file {
        Some(path) => Some(load_auth_token(path)?),
        None => None,
    };

    let notifier: Arc<dyn Notifier> = Arc::new(DesktopNotifier::default());
    let (commander, _writer) = Commander::spawn(
        tokio::io::stdout(),
        notifier.clone(),
        OUTBOUND_QUEUE_CAPACITY,
    );
    let compositor = Arc::new(SwayCompositor::new(config.wm_msg.clone()));
    let (resolver, _resolver_task) = WindowResolver::spawn(
        commander.clone(),
        compositor.clone(),
        ResolverConfig {
            identify_attempts: config.identify_attempts,
            identify_delay: config.identify_delay,
        },
    );

    let reader = tokio::spawn(commander.clone().run_reader(tokio::io::stdin()));

    if let Err(err) = watch_window_closures(&commander, resolver.clone()).await {
        warn!(event = "close_subscription_failed", error = %err);
    }

    let orchestrator = Arc::new(FocusOrchestrator::new(
        commander.clone(),
        resolver.clone(),
        compositor,
        Arc::new(CommandPicker::new(
            config.picker_command.clone(),
            config.picker_timeout,
        )),
        notifier,
        config.notify_focused,
    ));

    let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
    tokio::spawn(serve_triggers(orchestrator, trigger_rx));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener_task = tokio::spawn(listener::run(
        ListenerConfig {
            socket_path: config.socket_path.clone(),
            auth_token,
            handshake_timeout: AUTH_HANDSHAKE_TIMEOUT,
        },
        trigger_tx,
        shutdown_rx,
    ));

    info!(
        event = "host_start",
        socket = %config.socket_path.display(),
        wm_msg = %config.wm_msg,
        notify_focused = config.notify_focused
    );

    let result = tokio::select! {
        joined = reader => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(err) => Err(err.into()),
        },
        _ = tokio::signal::ctrl_c() => {
            info!(event = "host_interrupted");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    match listener_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(event = "trigger_listener_error", error = %err),
        Err(err) => warn!(event = "trigger_listener_panic", error = %err),
    }
    match tokio::time::timeout(SHUTDOWN_SNAPSHOT_TIMEOUT, resolver.snapshot()).await {
        Ok(Ok(known)) => info!(event = "host_stop", known_windows = known.len()),
        _ => info!(event = "host_stop", known_windows = "busy"),
    }
    result
}

fn load_config(args: Args) -> Config {
    let debug = args.debug || env_true("TABCTL_DEBUG");
    let picker_timeout = (args.picker_timeout > 0).then(|| Duration::from_secs(args.picker_timeout));
    let auth_file = resolve_flag(&args.auth_file, AUTH_FILE_ENV).map(PathBuf::from);
    Config {
        socket_path: resolve_socket_path(&args.socket),
        picker_command: resolve_flag(&args.picker, "TABCTL_PICKER")
            .unwrap_or_else(|| DEFAULT_PICKER_COMMAND.to_string()),
        picker_timeout,
        wm_msg: resolve_flag(&args.wm_msg, "TABCTL_WM_MSG").unwrap_or_else(|| "swaymsg".to_string()),
        auth_file,
        debug,
        log_dir: resolve_log_dir(&args.log_dir),
        identify_attempts: args.identify_attempts.max(1),
        identify_delay: Duration::from_millis(args.identify_delay_ms),
        notify_focused: args.notify_focused,
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("TABCTL_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// Log sink. Stdout carries the native messaging stream, so the console copy
/// goes to stderr.
struct MultiWriter {
    stderr: io::Stderr,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stderr: io::stderr(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stderr.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stderr.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("tabctl-host.log"))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

/// Flag value if set, else the environment variable, else `None`.
fn resolve_flag(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    match std::env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn resolve_socket_path(socket_flag: &str) -> PathBuf {
    resolve_flag(socket_flag, SOCKET_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(default_socket_path)
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    if let Some(dir) = resolve_flag(log_dir_flag, "TABCTL_LOG_DIR") {
        return dir;
    }
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join("tabctl").to_string_lossy().into_owned())
        .unwrap_or_default()
}
