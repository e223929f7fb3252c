use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use pitproto::{Event, Message};
use tokio::sync::RwLock;
use tracing::warn;

use crate::server::ServerInner;
use crate::terminal::TerminalInterface;

/// `newGame` waits this long for the spectator and for the client pool.
const NEW_GAME_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// One registered operator command.
pub type CommandFn = Arc<dyn Fn(Message) -> BoxFuture<'static, Message> + Send + Sync>;

/// Maps operator command names to handlers and carries terminal events into
/// the turn loop.
///
/// Holds only a weak reference to the supervisor: the router routes, it does
/// not keep the server alive.
pub struct CommandHandler {
    server: Weak<ServerInner>,
    handlers: RwLock<HashMap<String, CommandFn>>,
}

impl CommandHandler {
    pub(crate) async fn new(server: Weak<ServerInner>) -> Arc<Self> {
        let this = Arc::new(Self {
            server: server.clone(),
            handlers: RwLock::new(HashMap::new()),
        });
        this.define_command("status", cmd_status(server.clone())).await;
        this.define_command("newGame", cmd_new_game(server.clone())).await;
        this.define_command("startGame", cmd_start_game(server.clone())).await;
        this.define_command("exit", cmd_exit(server.clone())).await;
        this.define_command("waitForFinish", cmd_wait_for_finish(server)).await;
        this
    }

    /// Register (or replace) a command. Embedders can extend the built-ins.
    pub async fn define_command(&self, name: &str, handler: CommandFn) {
        self.handlers.write().await.insert(name.to_string(), handler);
    }
}

impl TerminalInterface for CommandHandler {
    fn run_command(&self, command: Message) -> BoxFuture<'_, Message> {
        Box::pin(async move {
            let handler = self.handlers.read().await.get(&command.name).cloned();
            match handler {
                Some(handler) => handler(command).await,
                None => Message::report(["This command is not defined."]),
            }
        })
    }

    fn put_event(&self, event: Event) {
        if let Some(server) = self.server.upgrade() {
            server.game().queue_event(event);
        }
    }
}

fn gone() -> Message {
    Message::report(["Server is shutting down."])
}

fn cmd_status(server: Weak<ServerInner>) -> CommandFn {
    Arc::new(move |_cmd| {
        let server = server.clone();
        Box::pin(async move {
            let Some(server) = server.upgrade() else { return gone() };
            let connected = server.game().client_network().number_of_connected().await;
            Message::report([format!("Number of connected clients: {connected}")])
        })
    })
}

fn cmd_new_game(server: Weak<ServerInner>) -> CommandFn {
    Arc::new(move |cmd| {
        let server = server.clone();
        Box::pin(async move {
            let Some(server) = server.upgrade() else { return gone() };
            let options: Vec<String> = cmd
                .args
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            match server
                .new_game(&options, NEW_GAME_TIMEOUT, NEW_GAME_TIMEOUT)
                .await
            {
                Ok(()) => Message::report(["ready"]),
                Err(e) => {
                    warn!(err = %e, "newGame failed");
                    Message::report(["failed"])
                }
            }
        })
    })
}

fn cmd_start_game(server: Weak<ServerInner>) -> CommandFn {
    Arc::new(move |_cmd| {
        let server = server.clone();
        Box::pin(async move {
            let Some(server) = server.upgrade() else { return gone() };
            match server.start_game().await {
                Ok(()) => Message::report(["Game started successfully!"]),
                Err(e) => {
                    warn!(err = %e, "startGame failed");
                    Message::report([format!("failed: {e}")])
                }
            }
        })
    })
}

fn cmd_exit(server: Weak<ServerInner>) -> CommandFn {
    Arc::new(move |_cmd| {
        let server = server.clone();
        Box::pin(async move {
            let Some(server) = server.upgrade() else { return gone() };
            server.shutdown().await;
            server.request_exit();
            Message::report(["Game exited successfully!"])
        })
    })
}

fn cmd_wait_for_finish(server: Weak<ServerInner>) -> CommandFn {
    Arc::new(move |_cmd| {
        let server = server.clone();
        Box::pin(async move {
            let Some(server) = server.upgrade() else { return gone() };
            server.game().wait_for_finish().await;
            Message::report(["Game finished!"])
        })
    })
}
