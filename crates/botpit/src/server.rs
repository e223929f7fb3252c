use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::command::CommandHandler;
use crate::config::Configs;
use crate::error::{PitError, PitResult};
use crate::game::GameHandler;
use crate::logic::GameFactory;
use crate::terminal::TerminalNetwork;

/// The process supervisor: owns the three endpoints and the turn loop, wires
/// tokens and ports from configuration, and executes operator commands.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
    commands: Arc<CommandHandler>,
}

pub(crate) struct ServerInner {
    configs: Configs,
    factory: Box<dyn GameFactory>,
    terminal: TerminalNetwork,
    game: GameHandler,
    /// `newGame` and `startGame` serialize on this.
    game_lock: Mutex<()>,
    exit: watch::Sender<bool>,
}

impl Server {
    /// Validate the configuration, build the endpoints and register the
    /// command router.
    pub async fn new(configs: Configs, factory: Box<dyn GameFactory>) -> PitResult<Self> {
        configs.validate()?;
        let game = GameHandler::new(&configs);
        game.init().await;
        let terminal = TerminalNetwork::new(configs.terminal.token.clone());

        let inner = Arc::new(ServerInner {
            configs,
            factory,
            terminal,
            game,
            game_lock: Mutex::new(()),
            exit: watch::channel(false).0,
        });
        let commands = CommandHandler::new(Arc::downgrade(&inner)).await;
        inner.terminal.set_handler(commands.clone()).await;

        Ok(Self { inner, commands })
    }

    /// The operator command registry; custom commands go through
    /// [`CommandHandler::define_command`].
    pub fn command_handler(&self) -> &Arc<CommandHandler> {
        &self.commands
    }

    /// Make the terminal endpoint listen; the server is now commandable.
    pub async fn start(&self) -> PitResult<SocketAddr> {
        let addr = self
            .inner
            .terminal
            .listen(self.inner.configs.terminal.port)
            .await?;
        info!(%addr, "server started");
        Ok(addr)
    }

    pub async fn new_game(
        &self,
        options: &[String],
        ui_timeout: Duration,
        client_timeout: Duration,
    ) -> anyhow::Result<()> {
        self.inner.new_game(options, ui_timeout, client_timeout).await
    }

    pub fn game_handler(&self) -> &GameHandler {
        &self.inner.game
    }

    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Resolves when an operator issues `exit`.
    pub async fn wait_for_exit(&self) {
        let mut rx = self.inner.exit.subscribe();
        let _ = rx.wait_for(|e| *e).await;
    }
}

impl ServerInner {
    pub(crate) fn game(&self) -> &GameHandler {
        &self.game
    }

    /// Prepare a match: fetch the game logic, declare its client slots, open
    /// the game-facing endpoints and deliver the initial messages.
    pub(crate) async fn new_game(
        &self,
        options: &[String],
        ui_timeout: Duration,
        client_timeout: Duration,
    ) -> anyhow::Result<()> {
        let _guard = self.game_lock.lock().await;

        let mut logic = self
            .factory
            .game_logic(options)
            .context("game factory refused the options")?;
        logic.init();

        let mut infos = logic.client_info();
        let pool = self.game.client_network();
        for (index, info) in infos.iter_mut().enumerate() {
            let id = pool.define_client(&info.token).await?;
            if id != index {
                return Err(PitError::IdMismatch {
                    expected: index,
                    declared: id,
                }
                .into());
            }
            info.id = id;
        }
        self.game.set_clients_info(infos).await;

        if self.configs.ui.enable {
            let ui = self.game.ui_network();
            ui.listen(self.configs.ui.port).await?;
            pool.listen(self.configs.client.port).await?;

            if !ui.wait_for_client_timeout(ui_timeout).await {
                anyhow::bail!("no spectator connected within the timeout");
            }
            pool.wait_for_all_clients_timeout(client_timeout).await;

            ui.send_blocking(logic.ui_initial_message()).await?;
        } else {
            pool.listen(self.configs.client.port).await?;
            pool.wait_for_all_clients_timeout(client_timeout).await;
        }

        for (id, msg) in logic.client_initial_messages().into_iter().enumerate() {
            pool.queue(id, msg).await;
        }
        pool.send_all_blocking().await;

        self.game.set_game_logic(logic).await;
        info!("new game ready");
        Ok(())
    }

    pub(crate) async fn start_game(&self) -> PitResult<()> {
        let _guard = self.game_lock.lock().await;
        self.game.start().await
    }

    pub(crate) async fn shutdown(&self) {
        self.game.shutdown().await;
        self.terminal.terminate().await;
    }

    pub(crate) fn request_exit(&self) {
        self.exit.send_replace(true);
    }
}
