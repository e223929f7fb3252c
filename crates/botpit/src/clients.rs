use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pitio::{JsonSocket, Listener};
use pitproto::{self as proto, Event, Message};
use tokio::sync::{watch, Barrier, Mutex, RwLock};
use tracing::{debug, info};

use crate::client::ClientHandler;
use crate::error::{PitError, PitResult};

/// How long an unverified connection may take to present its token.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(1000);

/// The game-client endpoint: N pre-declared slots, token admission, and
/// synchronized per-turn send/receive.
///
/// Slots are declared with [`define_client`] while the pool is not listening;
/// each connection is verified against the token map and bound to its slot.
/// The turn loop stages messages per slot, releases them together with
/// [`send_all_blocking`], and gates replies with the receive-window flag.
///
/// [`define_client`]: ClientNetwork::define_client
/// [`send_all_blocking`]: ClientNetwork::send_all_blocking
#[derive(Clone)]
pub struct ClientNetwork {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    tokens: RwLock<HashMap<String, usize>>,
    slots: RwLock<Vec<ClientHandler>>,
    window: Arc<AtomicBool>,
    listener: Mutex<Option<Listener>>,
    /// Raised by `terminate` to cut short in-flight verifications.
    stop: watch::Sender<bool>,
}

impl ClientNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                tokens: RwLock::new(HashMap::new()),
                slots: RwLock::new(Vec::new()),
                window: Arc::new(AtomicBool::new(false)),
                listener: Mutex::new(None),
                stop: watch::channel(false).0,
            }),
        }
    }

    /// Declare a slot for `token` and return its id (dense, in declaration
    /// order). Only legal while the pool is not listening.
    pub async fn define_client(&self, token: &str) -> PitResult<usize> {
        if self.is_listening().await {
            return Err(PitError::InvalidState(
                "defineClient called while the pool is listening",
            ));
        }
        let mut tokens = self.inner.tokens.write().await;
        if tokens.contains_key(token) {
            return Err(PitError::DuplicateToken(token.to_string()));
        }
        let mut slots = self.inner.slots.write().await;
        let id = slots.len();
        tokens.insert(token.to_string(), id);
        slots.push(ClientHandler::spawn(id, self.inner.window.clone()));
        Ok(id)
    }

    /// Terminate every slot and forget all declarations. Only legal while the
    /// pool is not listening.
    pub async fn omit_all_clients(&self) -> PitResult<()> {
        if self.is_listening().await {
            return Err(PitError::InvalidState(
                "omitAllClients called while the pool is listening",
            ));
        }
        let mut slots = self.inner.slots.write().await;
        for slot in slots.iter() {
            slot.terminate();
        }
        slots.clear();
        self.inner.tokens.write().await.clear();
        Ok(())
    }

    /// Start accepting connections. Returns the bound address (useful with
    /// port 0).
    pub async fn listen(&self, port: u16) -> PitResult<SocketAddr> {
        let mut guard = self.inner.listener.lock().await;
        if guard.is_some() {
            return Err(PitError::InvalidState("pool is already listening"));
        }
        self.inner.stop.send_replace(false);
        let pool = self.clone();
        let listener = Listener::bind(port, move |socket| pool.accept(socket))
            .await
            .map_err(pitio::SocketError::Io)?;
        let addr = listener.local_addr();
        *guard = Some(listener);
        info!(%addr, "client pool listening");
        Ok(addr)
    }

    /// Stop the accept loop and any in-flight verifications. Slot workers
    /// keep draining until their own error caps.
    pub async fn terminate(&self) {
        if let Some(listener) = self.inner.listener.lock().await.take() {
            listener.terminate();
        }
        self.inner.stop.send_replace(true);
    }

    pub async fn is_listening(&self) -> bool {
        self.inner.listener.lock().await.is_some()
    }

    fn accept(&self, socket: JsonSocket) {
        let pool = self.clone();
        let mut stop = self.inner.stop.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                // dropping the socket is the close
                _ = stop.wait_for(|s| *s) => {}
                _ = pool.verify(socket) => {}
            }
        });
    }

    /// Admission: exactly one message, which must be
    /// `{"name":"token","args":["<declared token>"]}`. Anything else closes
    /// the socket without feedback.
    async fn verify(&self, mut socket: JsonSocket) {
        let peer = socket.peer_addr();
        let msg = match tokio::time::timeout(VERIFY_TIMEOUT, socket.recv::<Message>()).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => {
                debug!(%peer, err = %e, "client rejected");
                socket.close().await;
                return;
            }
            Err(_) => {
                debug!(%peer, "client verification timed out");
                socket.close().await;
                return;
            }
        };

        let id = match (msg.name.as_str(), msg.arg_str(0)) {
            (proto::message::NAME_TOKEN, Some(token)) => {
                self.inner.tokens.read().await.get(token).copied()
            }
            _ => None,
        };

        match id {
            Some(id) => {
                let slot = { self.inner.slots.read().await[id].clone() };
                slot.bind(socket);
                info!(%peer, slot = id, "client bound");
            }
            None => {
                debug!(%peer, "client rejected: unknown token");
                socket.close().await;
            }
        }
    }

    /// Stage a message for slot `id`.
    ///
    /// Panics if `id` was never declared.
    pub async fn queue(&self, id: usize, msg: Message) {
        self.slot(id).await.queue(msg);
    }

    /// Release every slot's staged batch and return once all of them have
    /// been promoted to their senders.
    ///
    /// Each slot gets a task that waits on a rendezvous barrier, performs its
    /// flush, then waits again; the caller raises the barrier twice (start,
    /// then join). No slot's next round can begin before all slots finished
    /// the current one, and nothing staged at the moment of call leaks into
    /// the next round.
    pub async fn send_all_blocking(&self) {
        let slots: Vec<ClientHandler> = self.inner.slots.read().await.clone();
        let barrier = Arc::new(Barrier::new(slots.len() + 1));
        for slot in slots {
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                slot.flush().await;
                barrier.wait().await;
            });
        }
        barrier.wait().await; // release the round
        barrier.wait().await; // join it
    }

    /// Open the receive window: clear every slot's `last_valid`, then raise
    /// the shared flag.
    pub async fn start_receiving_all(&self) {
        let slots = self.inner.slots.read().await;
        for slot in slots.iter() {
            slot.clear_last_validated().await;
        }
        self.inner.window.store(true, Ordering::SeqCst);
    }

    /// Close the receive window. Reads completing after this are discarded.
    pub fn stop_receiving_all(&self) {
        self.inner.window.store(false, Ordering::SeqCst);
    }

    /// Last message of slot `id` received inside the current (or latest)
    /// window, if any.
    pub async fn received_message(&self, id: usize) -> Option<Message> {
        self.slot(id).await.last_validated().await
    }

    /// Decode slot `id`'s valid reply as a list of events. `None` means "no
    /// input this turn": nothing valid arrived, or it wasn't an event array.
    pub async fn received_event(&self, id: usize) -> Option<Vec<Event>> {
        let msg = self.received_message(id).await?;
        proto::event::events_from_args(&msg.args)
    }

    pub async fn wait_for_client(&self, id: usize) {
        self.slot(id).await.wait_for_client().await;
    }

    /// Returns whether the slot is bound when the wait ends.
    pub async fn wait_for_client_timeout(&self, id: usize, timeout: Duration) -> bool {
        self.slot(id).await.wait_for_client_timeout(timeout).await
    }

    pub async fn wait_for_all_clients(&self) {
        let slots: Vec<ClientHandler> = self.inner.slots.read().await.clone();
        for slot in slots {
            slot.wait_for_client().await;
        }
    }

    /// Wait for all slots, spending at most `budget` of wall-clock time in
    /// total: the elapsed time of each slot's wait is subtracted from what
    /// remains, and the walk stops as soon as the budget runs out.
    pub async fn wait_for_all_clients_timeout(&self, mut budget: Duration) {
        let slots: Vec<ClientHandler> = self.inner.slots.read().await.clone();
        for slot in slots {
            let started = tokio::time::Instant::now();
            slot.wait_for_client_timeout(budget).await;
            budget = budget.saturating_sub(started.elapsed());
            if budget.is_zero() {
                return;
            }
        }
    }

    pub async fn wait_for_client_message(&self, id: usize) {
        self.slot(id).await.wait_for_message().await;
    }

    pub async fn wait_for_client_message_timeout(&self, id: usize, timeout: Duration) {
        let slot = self.slot(id).await;
        let _ = tokio::time::timeout(timeout, slot.wait_for_message()).await;
    }

    pub async fn number_of_connected(&self) -> usize {
        let slots = self.inner.slots.read().await;
        slots.iter().filter(|s| s.is_connected()).count()
    }

    pub async fn is_connected(&self, id: usize) -> bool {
        self.slot(id).await.is_connected()
    }

    pub async fn number_of_clients(&self) -> usize {
        self.inner.slots.read().await.len()
    }

    async fn slot(&self, id: usize) -> ClientHandler {
        self.inner.slots.read().await[id].clone()
    }
}

impl Default for ClientNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn define_assigns_dense_ids() {
        let pool = ClientNetwork::new();
        assert_eq!(pool.define_client("a").await.unwrap(), 0);
        assert_eq!(pool.define_client("b").await.unwrap(), 1);
        assert_eq!(pool.define_client("c").await.unwrap(), 2);
        assert_eq!(pool.number_of_clients().await, 3);
    }

    #[tokio::test]
    async fn duplicate_tokens_are_rejected() {
        let pool = ClientNetwork::new();
        pool.define_client("same").await.unwrap();
        assert!(matches!(
            pool.define_client("same").await,
            Err(PitError::DuplicateToken(t)) if t == "same"
        ));
    }

    #[tokio::test]
    async fn define_requires_terminated_pool() {
        let pool = ClientNetwork::new();
        pool.define_client("a").await.unwrap();
        pool.listen(0).await.unwrap();
        assert!(matches!(
            pool.define_client("b").await,
            Err(PitError::InvalidState(_))
        ));
        assert!(matches!(
            pool.omit_all_clients().await,
            Err(PitError::InvalidState(_))
        ));
        pool.terminate().await;
        pool.define_client("b").await.unwrap();
        pool.omit_all_clients().await.unwrap();
        assert_eq!(pool.number_of_clients().await, 0);
    }

    #[tokio::test]
    async fn all_clients_wait_respects_budget() {
        let pool = ClientNetwork::new();
        for i in 0..8 {
            pool.define_client(&format!("t{i}")).await.unwrap();
        }
        let started = tokio::time::Instant::now();
        pool.wait_for_all_clients_timeout(Duration::from_millis(150)).await;
        // the budget is shared across slots, not multiplied by them
        assert!(started.elapsed() < Duration::from_millis(600));
    }
}
