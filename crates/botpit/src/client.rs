use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pitio::{JsonReader, JsonSocket, JsonWriter, SocketError};
use pitproto::Message;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, warn};

/// I/O failures tolerated before a handler terminates itself.
pub const MAX_EXCEPTIONS: u32 = 20;

/// One pre-declared client slot: an outbound queue with its sender worker, a
/// receiver worker, and the last-message caches.
///
/// Messages are staged with [`queue`] and promoted to the sender in one batch
/// by [`flush`], so the pool can scatter every slot's queue and then release
/// them simultaneously. Every completed read lands in `last_received`; it also
/// becomes `last_valid` iff the shared receive-window flag is up at that
/// moment. There is no timestamp check, only the flag.
///
/// [`queue`]: ClientHandler::queue
/// [`flush`]: ClientHandler::flush
#[derive(Clone)]
pub struct ClientHandler {
    inner: Arc<SlotInner>,
}

struct SlotInner {
    id: usize,
    staged_tx: mpsc::UnboundedSender<Message>,
    staged_rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    out_tx: mpsc::UnboundedSender<Message>,
    writer_tx: mpsc::UnboundedSender<JsonWriter>,
    reader_tx: mpsc::UnboundedSender<JsonReader>,
    last_received: Mutex<Option<Message>>,
    last_valid: Mutex<Option<Message>>,
    /// Receive-window gate, shared with the whole pool.
    window: Arc<AtomicBool>,
    connected: watch::Sender<bool>,
    message_seen: Notify,
    errors: AtomicU32,
    terminated: watch::Sender<bool>,
}

impl ClientHandler {
    /// Create the slot and start its sender and receiver workers.
    pub fn spawn(id: usize, window: Arc<AtomicBool>) -> Self {
        let (staged_tx, staged_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (reader_tx, reader_rx) = mpsc::unbounded_channel();
        let (connected, _) = watch::channel(false);
        let (terminated, _) = watch::channel(false);

        let inner = Arc::new(SlotInner {
            id,
            staged_tx,
            staged_rx: Mutex::new(staged_rx),
            out_tx,
            writer_tx,
            reader_tx,
            last_received: Mutex::new(None),
            last_valid: Mutex::new(None),
            window,
            connected,
            message_seen: Notify::new(),
            errors: AtomicU32::new(0),
            terminated,
        });

        tokio::spawn(sender_loop(inner.clone(), out_rx, writer_rx));
        tokio::spawn(receiver_loop(inner.clone(), reader_rx));

        Self { inner }
    }

    /// Stage a message; nothing goes out until [`flush`](Self::flush).
    pub fn queue(&self, msg: Message) {
        let _ = self.inner.staged_tx.send(msg);
    }

    /// Atomically promote the staged batch into the sender queue.
    pub async fn flush(&self) {
        let mut staged = self.inner.staged_rx.lock().await;
        while let Ok(msg) = staged.try_recv() {
            let _ = self.inner.out_tx.send(msg);
        }
    }

    /// Hand a freshly verified socket to this slot, replacing any prior one.
    /// Both workers pick the new socket up at their next suspension point;
    /// the previous socket is dropped (closed) in the process.
    pub fn bind(&self, socket: JsonSocket) {
        let (reader, writer) = socket.into_split();
        let _ = self.inner.reader_tx.send(reader);
        let _ = self.inner.writer_tx.send(writer);
        self.inner.connected.send_replace(true);
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    pub async fn clear_last_validated(&self) {
        *self.inner.last_valid.lock().await = None;
    }

    /// Last message whose read completed while the receive window was open,
    /// or `None` if nothing valid arrived since the window opened.
    pub async fn last_validated(&self) -> Option<Message> {
        self.inner.last_valid.lock().await.clone()
    }

    pub async fn last_received(&self) -> Option<Message> {
        self.inner.last_received.lock().await.clone()
    }

    /// Block until a socket is bound. Returns immediately if one already is.
    pub async fn wait_for_client(&self) {
        let mut rx = self.inner.connected.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }

    /// Like [`wait_for_client`](Self::wait_for_client), bounded by `timeout`.
    /// Returns whether a socket is bound.
    pub async fn wait_for_client_timeout(&self, timeout: Duration) -> bool {
        let _ = tokio::time::timeout(timeout, self.wait_for_client()).await;
        self.is_connected()
    }

    /// Block until the receiver completes any read.
    pub async fn wait_for_message(&self) {
        self.inner.message_seen.notified().await;
    }

    /// Stop both workers and drop any bound socket.
    pub fn terminate(&self) {
        let _ = self.inner.terminated.send(true);
        self.inner.connected.send_replace(false);
    }
}

fn count_error(inner: &SlotInner) {
    let n = inner.errors.fetch_add(1, Ordering::Relaxed) + 1;
    if n > MAX_EXCEPTIONS {
        warn!(slot = inner.id, errors = n, "error cap exceeded, terminating handler");
        let _ = inner.terminated.send(true);
    }
}

/// Dequeues outbound messages and writes them to whichever socket is bound.
/// With no socket bound it parks until `bind` delivers one.
async fn sender_loop(
    inner: Arc<SlotInner>,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
    mut writer_rx: mpsc::UnboundedReceiver<JsonWriter>,
) {
    let mut term = inner.terminated.subscribe();
    'bind: loop {
        if *term.borrow() {
            break 'bind;
        }
        let mut writer = tokio::select! {
            _ = term.changed() => continue 'bind,
            w = writer_rx.recv() => match w {
                Some(w) => w,
                None => break 'bind,
            },
        };

        loop {
            if *term.borrow() {
                break 'bind;
            }
            tokio::select! {
                biased;
                _ = term.changed() => continue 'bind,
                w = writer_rx.recv() => match w {
                    Some(w) => writer = w,
                    None => break 'bind,
                },
                msg = out_rx.recv() => {
                    let Some(msg) = msg else { break 'bind };
                    if let Err(e) = writer.send(&msg).await {
                        debug!(slot = inner.id, err = %e, "message sending failure");
                        count_error(&inner);
                        // wait for a rebind; the message is lost
                        continue 'bind;
                    }
                }
            }
        }
    }
}

/// Reads messages off whichever socket is bound, maintaining the caches.
async fn receiver_loop(inner: Arc<SlotInner>, mut reader_rx: mpsc::UnboundedReceiver<JsonReader>) {
    let mut term = inner.terminated.subscribe();
    'bind: loop {
        if *term.borrow() {
            break 'bind;
        }
        let mut reader = tokio::select! {
            _ = term.changed() => continue 'bind,
            r = reader_rx.recv() => match r {
                Some(r) => r,
                None => break 'bind,
            },
        };

        loop {
            if *term.borrow() {
                break 'bind;
            }
            tokio::select! {
                biased;
                _ = term.changed() => continue 'bind,
                r = reader_rx.recv() => match r {
                    Some(r) => reader = r,
                    None => break 'bind,
                },
                res = reader.recv::<Message>() => match res {
                    Ok(msg) => {
                        *inner.last_received.lock().await = Some(msg.clone());
                        if inner.window.load(Ordering::SeqCst) {
                            *inner.last_valid.lock().await = Some(msg);
                        }
                        inner.message_seen.notify_waiters();
                    }
                    Err(SocketError::Decode(e)) => {
                        debug!(slot = inner.id, err = %e, "undecodable client message");
                        count_error(&inner);
                    }
                    Err(e) => {
                        debug!(slot = inner.id, err = %e, "message receiving failure");
                        count_error(&inner);
                        continue 'bind;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn queue_stages_without_sending() {
        let handler = ClientHandler::spawn(0, Arc::new(AtomicBool::new(false)));
        handler.queue(Message::new("turn", vec![json!(1)]));
        handler.queue(Message::new("turn", vec![json!(2)]));

        let mut staged = handler.inner.staged_rx.lock().await;
        let mut names = Vec::new();
        while let Ok(msg) = staged.try_recv() {
            names.push(msg.args[0].clone());
        }
        assert_eq!(names, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn fresh_slot_has_no_state() {
        let handler = ClientHandler::spawn(3, Arc::new(AtomicBool::new(false)));
        assert!(!handler.is_connected());
        assert!(handler.last_received().await.is_none());
        assert!(handler.last_validated().await.is_none());
        assert!(!handler.wait_for_client_timeout(Duration::from_millis(20)).await);
    }
}
