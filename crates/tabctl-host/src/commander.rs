use crate::codec::{read_frame, write_raw_frame, StreamError};
use crate::notify::Notifier;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::{
    collections::HashMap,
    error::Error as StdError,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tabctl_core::wire::{
    decode_body, encode_frame, FrameError, Message, MessageKind, MAX_INBOUND_FRAME_BYTES,
    MAX_OUTBOUND_FRAME_BYTES,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub type HandlerResult = Result<(), Box<dyn StdError + Send + Sync>>;
pub type Callback = Arc<dyn Fn(Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

pub enum Handler {
    /// Single-use reply slot backing [`Commander::request`].
    Reply(oneshot::Sender<Message>),
    Callback(Callback),
}

impl Handler {
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Callback(Arc::new(
            move |message| -> BoxFuture<'static, HandlerResult> { Box::pin(f(message)) },
        ))
    }

    fn noop() -> Self {
        Handler::callback(|_| async { HandlerResult::Ok(()) })
    }
}

#[derive(Debug, Error)]
pub enum CommanderError {
    #[error("controller stream closed")]
    StreamClosed,
    #[error("reply for request {0} was dropped")]
    ReplyDropped(u64),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: u64,
    pub message: Message,
}

/// Correlates outbound commands with inbound `results` and `push` messages
/// on the controller stream. Each inbound message is handled on its own task.
pub struct Commander {
    next_id: AtomicU64,
    /// Set once the controller closes the stream; only changed under `pending`.
    closed: AtomicBool,
    pending: Mutex<HashMap<u64, Handler>>,
    outbound: mpsc::Sender<Vec<u8>>,
    notifier: Arc<dyn Notifier>,
}

impl Commander {
    /// Starts the writer task that owns `writer`.
    pub fn spawn<W>(
        writer: W,
        notifier: Arc<dyn Notifier>,
        queue_capacity: usize,
    ) -> (Arc<Self>, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(queue_capacity.max(1));
        let writer_task = tokio::spawn(writer_loop(writer, rx));
        let commander = Arc::new(Self {
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            outbound: tx,
            notifier,
        });
        (commander, writer_task)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Sends `name` with `args` and registers `handler` for every inbound
    /// message carrying the new id. Without a handler the reply is discarded.
    pub async fn send_command(
        &self,
        name: &str,
        args: Value,
        handler: Option<Handler>,
    ) -> Result<u64, CommanderError> {
        let id = self.next_id();
        let frame = encode_frame(&Message::command(id, name, args), MAX_OUTBOUND_FRAME_BYTES)?;

        {
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(CommanderError::StreamClosed);
            }
            pending.insert(id, handler.unwrap_or_else(Handler::noop));
        }

        if self.outbound.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(CommanderError::StreamClosed);
        }
        debug!(event = "command_sent", id, command = name);
        Ok(id)
    }

    /// Sends a command and waits for its terminal `results` message.
    pub async fn request(&self, name: &str, args: Value) -> Result<Reply, CommanderError> {
        let (tx, rx) = oneshot::channel();
        let id = self
            .send_command(name, args, Some(Handler::Reply(tx)))
            .await?;
        let message = rx.await.map_err(|_| CommanderError::ReplyDropped(id))?;
        Ok(Reply { id, message })
    }

    /// Registers `f` for every push carrying the id of this command.
    pub async fn subscribe<F, Fut>(
        &self,
        name: &str,
        args: Value,
        f: F,
    ) -> Result<u64, CommanderError>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.send_command(name, args, Some(Handler::callback(f)))
            .await
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Decodes inbound frames until the peer closes the stream. Orderly
    /// closure returns `Ok(())`. Either way every pending handler is dropped,
    /// so waiting requests fail with `ReplyDropped` and later sends with
    /// `StreamClosed`.
    pub async fn run_reader<R>(self: Arc<Self>, reader: R) -> Result<(), CommanderError>
    where
        R: AsyncRead + Unpin,
    {
        let result = self.read_loop(reader).await;
        let retired = self.close_pending().await;
        match &result {
            Ok(()) => info!(event = "controller_stream_closed", retired),
            Err(err) => warn!(event = "controller_stream_failed", retired, error = %err),
        }
        result
    }

    async fn close_pending(&self) -> usize {
        let mut pending = self.pending.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        pending.drain().count()
    }

    async fn read_loop<R>(self: &Arc<Self>, mut reader: R) -> Result<(), CommanderError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let Some(body) = read_frame(&mut reader, MAX_INBOUND_FRAME_BYTES).await? else {
                return Ok(());
            };
            let message = match decode_body::<Message>(&body) {
                Ok(message) => message,
                Err(err) => {
                    warn!(event = "controller_decode_error", error = %err, size = body.len());
                    continue;
                }
            };
            let commander = self.clone();
            tokio::spawn(async move {
                commander.dispatch(message).await;
            });
        }
    }

    async fn dispatch(&self, message: Message) {
        if message.kind == MessageKind::Command {
            debug!(
                event = "controller_command_ignored",
                command = message.command.as_deref().unwrap_or_default()
            );
            return;
        }
        let Some(id) = message.id else {
            debug!(event = "controller_message_without_id", kind = message.kind.as_str());
            return;
        };

        // Lookup and retirement happen under one lock, so a one-shot handler
        // can be taken by at most one terminal message.
        let handler = {
            let mut pending = self.pending.lock().await;
            if message.kind.is_terminal() {
                pending.remove(&id)
            } else {
                match pending.get(&id) {
                    Some(Handler::Callback(callback)) => Some(Handler::Callback(callback.clone())),
                    Some(Handler::Reply(_)) => {
                        debug!(event = "push_for_reply_ignored", id);
                        return;
                    }
                    None => None,
                }
            }
        };
        let Some(handler) = handler else {
            debug!(event = "unknown_correlation_id", id, kind = message.kind.as_str());
            return;
        };

        match handler {
            Handler::Reply(tx) => {
                if tx.send(message).is_err() {
                    debug!(event = "reply_receiver_gone", id);
                }
            }
            Handler::Callback(callback) => match tokio::spawn(callback(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.report_failure(id, &err.to_string()).await,
                Err(err) => self.report_failure(id, &format!("handler panicked: {err}")).await,
            },
        }
    }

    async fn report_failure(&self, id: u64, detail: &str) {
        warn!(event = "handler_failure", id, error = detail);
        self.notifier
            .notify("tabctl: message handler failed", &format!("request {id}: {detail}"))
            .await;
    }
}

async fn writer_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if let Err(err) = write_raw_frame(&mut writer, &frame).await {
            warn!(event = "controller_write_error", error = %err);
            break;
        }
    }
}
