use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use pitio::{JsonSocket, Listener, SocketError};
use pitproto::{self as proto, Event, Message};
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{PitError, PitResult};

/// Per-connection dispatch failures tolerated before the worker gives up.
pub const MAX_RECEIVE_EXCEPTIONS: u32 = 20;

/// Receives operator commands and events from a terminal connection.
///
/// Command handlers may block (e.g. `waitForFinish`), and several terminal
/// connections may issue commands concurrently, so implementations must be
/// reentrant-safe.
pub trait TerminalInterface: Send + Sync {
    /// Run one command and produce the report to send back.
    fn run_command(&self, command: Message) -> BoxFuture<'_, Message>;

    /// Queue an operator-injected game event; no response is sent.
    fn put_event(&self, event: Event);
}

/// The operator endpoint. Any number of terminals may connect; each gets its
/// own worker running the token handshake followed by the command loop.
#[derive(Clone)]
pub struct TerminalNetwork {
    inner: Arc<TermInner>,
}

struct TermInner {
    token: String,
    handler: RwLock<Option<Arc<dyn TerminalInterface>>>,
    listener: Mutex<Option<Listener>>,
    stop: watch::Sender<bool>,
}

impl TerminalNetwork {
    pub fn new(token: String) -> Self {
        Self {
            inner: Arc::new(TermInner {
                token,
                handler: RwLock::new(None),
                listener: Mutex::new(None),
                stop: watch::channel(false).0,
            }),
        }
    }

    pub async fn set_handler(&self, handler: Arc<dyn TerminalInterface>) {
        *self.inner.handler.write().await = Some(handler);
    }

    pub async fn listen(&self, port: u16) -> PitResult<SocketAddr> {
        let mut guard = self.inner.listener.lock().await;
        if guard.is_some() {
            return Err(PitError::InvalidState(
                "terminal endpoint is already listening",
            ));
        }
        self.inner.stop.send_replace(false);
        let terminal = self.clone();
        let listener = Listener::bind(port, move |socket| terminal.accept(socket))
            .await
            .map_err(pitio::SocketError::Io)?;
        let addr = listener.local_addr();
        *guard = Some(listener);
        info!(%addr, "terminal listening");
        Ok(addr)
    }

    pub async fn terminate(&self) {
        if let Some(listener) = self.inner.listener.lock().await.take() {
            listener.terminate();
        }
        self.inner.stop.send_replace(true);
    }

    fn accept(&self, socket: JsonSocket) {
        let inner = self.inner.clone();
        let mut stop = self.inner.stop.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.wait_for(|s| *s) => {}
                _ = connection_loop(inner, socket) => {}
            }
        });
    }
}

/// Handshake then command loop for one operator connection.
async fn connection_loop(inner: Arc<TermInner>, mut socket: JsonSocket) {
    let peer = socket.peer_addr();

    let first = match socket.recv::<Message>().await {
        Ok(msg) => msg,
        Err(e) => {
            debug!(%peer, err = %e, "terminal handshake failed");
            socket.close().await;
            return;
        }
    };
    let authed = first.name == proto::message::NAME_TOKEN
        && !first.args.is_empty()
        && first.arg_str(0) == Some(inner.token.as_str());
    if !authed {
        let _ = socket.send(&Message::wrong_token()).await;
        socket.close().await;
        debug!(%peer, "terminal rejected: wrong token");
        return;
    }

    // ack with `init` carrying a single empty list, as the console expects
    if socket
        .send(&Message::new(
            proto::message::NAME_INIT,
            vec![Value::Array(Vec::new())],
        ))
        .await
        .is_err()
    {
        socket.close().await;
        return;
    }
    info!(%peer, "terminal connected");

    let mut exceptions: u32 = 0;
    loop {
        let msg = match socket.recv::<Message>().await {
            Ok(msg) => msg,
            Err(SocketError::Decode(e)) => {
                debug!(%peer, err = %e, "undecodable terminal message");
                exceptions += 1;
                if exceptions > MAX_RECEIVE_EXCEPTIONS {
                    break;
                }
                continue;
            }
            Err(e) => {
                // socket-level failures close unconditionally
                debug!(%peer, err = %e, "terminal connection lost");
                break;
            }
        };

        if let Err(e) = dispatch(&inner, &mut socket, msg).await {
            debug!(%peer, err = %e, "terminal dispatch failure");
            exceptions += 1;
            if exceptions > MAX_RECEIVE_EXCEPTIONS {
                break;
            }
        }
    }
    socket.close().await;
}

async fn dispatch(
    inner: &Arc<TermInner>,
    socket: &mut JsonSocket,
    msg: Message,
) -> PitResult<()> {
    let handler = inner.handler.read().await.clone();
    let Some(handler) = handler else {
        socket
            .send(&Message::report(["Terminal interface is not registered."]))
            .await?;
        return Ok(());
    };

    match msg.name.as_str() {
        proto::message::NAME_COMMAND => {
            // args[0]: command name; args[1]: its string arguments
            let name = msg
                .arg_str(0)
                .ok_or(PitError::InvalidState("command without a name"))?
                .to_string();
            let cmd_args: Vec<String> = match msg.args.get(1) {
                Some(v) => serde_json::from_value(v.clone()).map_err(SocketError::Decode)?,
                None => Vec::new(),
            };
            let command =
                Message::new(name, cmd_args.into_iter().map(Value::String).collect());
            let report = handler.run_command(command).await;
            socket.send(&report).await?;
        }
        proto::message::NAME_EVENT => {
            let raw = msg.args.first().cloned().unwrap_or(Value::Null);
            let event: Event = serde_json::from_value(raw).map_err(SocketError::Decode)?;
            handler.put_event(event);
        }
        _ => {
            socket
                .send(&Message::report(["Message is not defined."]))
                .await?;
        }
    }
    Ok(())
}
