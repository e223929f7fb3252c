use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pitio::{JsonSocket, JsonWriter, Listener};
use pitproto::{self as proto, Message};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{PitError, PitResult};

/// How long a spectator may take to present its token.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

struct Envelope {
    msg: Message,
    done: Option<oneshot::Sender<()>>,
}

/// The spectator endpoint: one hot-swappable client slot fed from an
/// unbounded deque by a single sender worker.
///
/// Messages enqueued while no spectator is bound simply wait in the deque;
/// binding a new socket replaces (and closes) the previous one. Everything the
/// spectator sends after its token is ignored.
#[derive(Clone)]
pub struct UiNetwork {
    inner: Arc<UiInner>,
}

struct UiInner {
    token: String,
    verify_timeout: Duration,
    send_tx: mpsc::UnboundedSender<Envelope>,
    writer_tx: mpsc::UnboundedSender<JsonWriter>,
    connected: watch::Sender<bool>,
    /// Bumped on every successful bind; lets waiters ask for a *new* client.
    bound_gen: watch::Sender<u64>,
    listener: Mutex<Option<Listener>>,
    stop: watch::Sender<bool>,
}

impl UiNetwork {
    pub fn new(token: String) -> Self {
        Self::with_verify_timeout(token, VERIFY_TIMEOUT)
    }

    /// The verify deadline is injectable so tests don't sit through the full
    /// ten seconds.
    pub fn with_verify_timeout(token: String, verify_timeout: Duration) -> Self {
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(UiInner {
            token,
            verify_timeout,
            send_tx,
            writer_tx,
            connected: watch::channel(false).0,
            bound_gen: watch::channel(0).0,
            listener: Mutex::new(None),
            stop: watch::channel(false).0,
        });
        tokio::spawn(sender_loop(inner.clone(), send_rx, writer_rx));
        Self { inner }
    }

    pub async fn listen(&self, port: u16) -> PitResult<SocketAddr> {
        let mut guard = self.inner.listener.lock().await;
        if guard.is_some() {
            return Err(PitError::InvalidState("ui endpoint is already listening"));
        }
        self.inner.stop.send_replace(false);
        let ui = self.clone();
        let listener = Listener::bind(port, move |socket| ui.accept(socket))
            .await
            .map_err(pitio::SocketError::Io)?;
        let addr = listener.local_addr();
        *guard = Some(listener);
        info!(%addr, "ui endpoint listening");
        Ok(addr)
    }

    pub async fn terminate(&self) {
        if let Some(listener) = self.inner.listener.lock().await.take() {
            listener.terminate();
        }
        self.inner.stop.send_replace(true);
    }

    fn accept(&self, socket: JsonSocket) {
        let ui = self.clone();
        let mut stop = self.inner.stop.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.wait_for(|s| *s) => {}
                _ = ui.verify(socket) => {}
            }
        });
    }

    async fn verify(&self, mut socket: JsonSocket) {
        let peer = socket.peer_addr();
        let accepted = match tokio::time::timeout(
            self.inner.verify_timeout,
            socket.recv::<Message>(),
        )
        .await
        {
            Ok(Ok(msg)) => {
                msg.name == proto::message::NAME_TOKEN
                    && msg.arg_str(0) == Some(self.inner.token.as_str())
            }
            Ok(Err(e)) => {
                debug!(%peer, err = %e, "spectator rejected");
                socket.close().await;
                return;
            }
            Err(_) => {
                debug!(%peer, "spectator verification timed out");
                socket.close().await;
                return;
            }
        };

        if !accepted {
            let _ = socket.send(&Message::wrong_token()).await;
            socket.close().await;
            debug!(%peer, "spectator rejected: wrong token");
            return;
        }

        // reads are ignored on this endpoint; dropping the read half is fine
        let (_reader, writer) = socket.into_split();
        let _ = self.inner.writer_tx.send(writer);
        self.inner.connected.send_replace(true);
        self.inner.bound_gen.send_modify(|g| *g += 1);
        info!(%peer, "spectator bound");
    }

    /// Enqueue without waiting for delivery.
    pub fn send(&self, msg: Message) {
        let _ = self.inner.send_tx.send(Envelope { msg, done: None });
    }

    /// Enqueue and wait until the message has actually been written to a
    /// spectator. Fails with [`PitError::Interrupted`] if the endpoint shuts
    /// down, or if the caller's wait is abandoned and the write never lands.
    pub async fn send_blocking(&self, msg: Message) -> PitResult<()> {
        let (done, done_rx) = oneshot::channel();
        self.inner
            .send_tx
            .send(Envelope {
                msg,
                done: Some(done),
            })
            .map_err(|_| PitError::Interrupted)?;
        done_rx.await.map_err(|_| PitError::Interrupted)
    }

    pub fn has_client(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Block until a spectator is bound; returns immediately if one is.
    pub async fn wait_for_client(&self) {
        let mut rx = self.inner.connected.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }

    pub async fn wait_for_client_timeout(&self, timeout: Duration) -> bool {
        let _ = tokio::time::timeout(timeout, self.wait_for_client()).await;
        self.has_client()
    }

    /// Block until a *new* spectator binds, even if one is currently bound.
    pub async fn wait_for_new_client(&self) {
        let gen = *self.inner.bound_gen.borrow();
        let mut rx = self.inner.bound_gen.subscribe();
        let _ = rx.wait_for(|g| *g > gen).await;
    }

    pub async fn wait_for_new_client_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_for_new_client())
            .await
            .is_ok()
    }
}

/// Drains the deque onto whichever spectator is bound, parking while there is
/// none. A send whose blocking caller has already given up is skipped rather
/// than delivered late.
async fn sender_loop(
    inner: Arc<UiInner>,
    mut send_rx: mpsc::UnboundedReceiver<Envelope>,
    mut writer_rx: mpsc::UnboundedReceiver<JsonWriter>,
) {
    let mut stop = inner.stop.subscribe();
    let mut writer: Option<JsonWriter> = None;
    let mut pending: Option<Envelope> = None;

    loop {
        if writer.is_none() || pending.is_none() {
            tokio::select! {
                biased;
                _ = stop.wait_for(|s| *s) => break,
                w = writer_rx.recv() => match w {
                    Some(w) => writer = Some(w),
                    None => break,
                },
                env = send_rx.recv(), if pending.is_none() => match env {
                    Some(env) => pending = Some(env),
                    None => break,
                },
            }
            continue;
        }

        let env = match pending.take() {
            Some(env) => env,
            None => continue,
        };
        if env.done.as_ref().is_some_and(|d| d.is_closed()) {
            continue; // caller gave up; don't deliver late
        }
        let Some(w) = writer.as_mut() else {
            pending = Some(env);
            continue;
        };
        match w.send(&env.msg).await {
            Ok(()) => {
                if let Some(done) = env.done {
                    let _ = done.send(());
                }
            }
            Err(e) => {
                warn!(err = %e, "spectator send failed, dropping socket");
                writer = None;
            }
        }
    }
}
