use std::sync::Arc;
use std::time::Duration;

use pitproto::{Event, Message};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::clients::ClientNetwork;
use crate::config::Configs;
use crate::error::PitResult;
use crate::logic::{ClientInfo, GameLogic};
use crate::output::OutputController;
use crate::ui::UiNetwork;

/// Externally observable state of the turn loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Starting,
    Running,
    Turn,
    Draining,
    Stopped,
}

/// Owns the client pool, the spectator endpoint, the output pipeline and the
/// turn loop of the current match.
///
/// A match runs as: [`init`], [`set_game_logic`] + [`set_clients_info`] (done
/// by the supervisor's `newGame`), then [`start`]. The loop then repeats the
/// fixed per-turn sequence (simulate, fan out, receive window, collect)
/// until the logic reports the game finished or [`shutdown`] is requested.
///
/// [`init`]: GameHandler::init
/// [`set_game_logic`]: GameHandler::set_game_logic
/// [`set_clients_info`]: GameHandler::set_clients_info
/// [`start`]: GameHandler::start
/// [`shutdown`]: GameHandler::shutdown
#[derive(Clone)]
pub struct GameHandler {
    inner: Arc<GameInner>,
}

struct GameInner {
    configs: Configs,
    client_network: ClientNetwork,
    ui_network: UiNetwork,
    output: Mutex<Option<OutputController>>,
    logic: Mutex<Option<Box<dyn GameLogic>>>,
    clients_info: Mutex<Vec<ClientInfo>>,
    terminal_tx: mpsc::UnboundedSender<Event>,
    terminal_rx: Mutex<mpsc::UnboundedReceiver<Event>>,
    state: watch::Sender<LoopState>,
    shutdown: watch::Sender<bool>,
    finished: watch::Sender<bool>,
}

impl GameHandler {
    pub fn new(configs: &Configs) -> Self {
        let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(GameInner {
                configs: configs.clone(),
                client_network: ClientNetwork::new(),
                ui_network: UiNetwork::new(configs.ui.token.clone()),
                output: Mutex::new(None),
                logic: Mutex::new(None),
                clients_info: Mutex::new(Vec::new()),
                terminal_tx,
                terminal_rx: Mutex::new(terminal_rx),
                state: watch::channel(LoopState::Idle).0,
                shutdown: watch::channel(false).0,
                finished: watch::channel(false).0,
            }),
        }
    }

    /// Build the output pipeline from configuration.
    pub async fn init(&self) {
        let controller =
            OutputController::new(&self.inner.configs.output_handler, self.inner.ui_network.clone());
        *self.inner.output.lock().await = Some(controller);
    }

    pub fn client_network(&self) -> &ClientNetwork {
        &self.inner.client_network
    }

    pub fn ui_network(&self) -> &UiNetwork {
        &self.inner.ui_network
    }

    pub async fn set_game_logic(&self, logic: Box<dyn GameLogic>) {
        *self.inner.logic.lock().await = Some(logic);
    }

    pub async fn set_clients_info(&self, infos: Vec<ClientInfo>) {
        *self.inner.clients_info.lock().await = infos;
    }

    /// Queue a terminal-originated event for the next turn.
    pub fn queue_event(&self, event: Event) {
        let _ = self.inner.terminal_tx.send(event);
    }

    /// Start the turn loop and the output pipeline workers.
    pub async fn start(&self) -> PitResult<()> {
        let logic = self
            .inner
            .logic
            .lock()
            .await
            .take()
            .ok_or(crate::error::PitError::InvalidState(
                "startGame without a prepared game",
            ))?;
        self.inner.shutdown.send_replace(false);
        self.inner.finished.send_replace(false);
        self.inner.state.send_replace(LoopState::Starting);
        if let Some(output) = self.inner.output.lock().await.clone() {
            output.run().await;
        }
        tokio::spawn(turn_loop(self.inner.clone(), logic));
        Ok(())
    }

    /// Ask the loop to exit after the current turn, and wind the pipeline down.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        if let Some(output) = self.inner.output.lock().await.clone() {
            output.shutdown().await;
        }
    }

    /// Block until the loop has completed.
    pub async fn wait_for_finish(&self) {
        let mut rx = self.inner.finished.subscribe();
        let _ = rx.wait_for(|f| *f).await;
    }

    pub fn state(&self) -> LoopState {
        *self.inner.state.borrow()
    }
}

/// The per-turn state machine. One iteration is one turn:
///
/// 1. simulate last turn's events, 2. generate outputs, 3. finish check,
/// 4. UI + status into the pipeline, 5. fan out client messages,
/// 6-7. receive window (environment events overlap client think time),
/// 8. collect client events, 9. drain terminal events, 10. cadence sleep.
async fn turn_loop(inner: Arc<GameInner>, mut logic: Box<dyn GameLogic>) {
    let slots = inner.clients_info.lock().await.len();
    let pool = &inner.client_network;
    let times = &inner.configs.turn_timeout;
    let response_time = Duration::from_millis(times.client_response_time);
    let turn_timeout = Duration::from_millis(times.turn_timeout);
    let simulate_budget = Duration::from_millis(times.simulate_timeout);
    let output = inner.output.lock().await.clone();

    let mut shutdown = inner.shutdown.subscribe();
    let mut terminal_events: Vec<Event> = Vec::new();
    let mut environment_events: Vec<Event> = Vec::new();
    let mut client_events: Vec<Vec<Event>> = vec![Vec::new(); slots];
    let mut turn: u64 = 0;

    info!(slots, "turn loop started");
    inner.state.send_replace(LoopState::Running);

    while !*shutdown.borrow() {
        let turn_started = Instant::now();
        inner.state.send_replace(LoopState::Turn);

        // 1-2: advance the game
        let sim_started = Instant::now();
        logic.simulate_events(&terminal_events, &environment_events, &client_events);
        logic.generate_outputs();
        let sim_elapsed = sim_started.elapsed();
        if sim_elapsed > simulate_budget {
            warn!(turn, elapsed_ms = sim_elapsed.as_millis() as u64, "simulate overran its budget");
        }

        // 3: finish check; complete this turn, then exit
        if logic.is_game_finished() {
            info!(turn, "game finished");
            logic.terminate();
            for id in 0..slots {
                pool.queue(id, Message::shutdown()).await;
            }
            inner.shutdown.send_replace(true);
            if let Some(output) = &output {
                output.shutdown().await;
            }
        }

        // 4: spectator + status messages
        if let Some(output) = &output {
            let fatal = output.put_message(logic.ui_message()).await.is_err()
                || output.put_message(logic.status_message()).await.is_err();
            if fatal {
                error!(turn, "output pipeline rejected a message, draining");
                break;
            }
        }

        // 5: fan out, synchronized across slots
        for (id, msg) in logic.client_messages().into_iter().enumerate().take(slots) {
            pool.queue(id, msg).await;
        }
        pool.send_all_blocking().await;

        // 6-7: receive window; environment events overlap client think time
        pool.start_receiving_all().await;
        let window_started = Instant::now();
        environment_events = logic.make_environment_events();
        if let Some(remaining) = response_time.checked_sub(window_started.elapsed()) {
            tokio::time::sleep(remaining).await;
        }
        pool.stop_receiving_all();

        // 8: collect; an absent or undecodable reply means no input this turn
        for (id, events) in client_events.iter_mut().enumerate() {
            *events = pool.received_event(id).await.unwrap_or_default();
        }

        // 9: drain the terminal queue exactly once per turn
        terminal_events.clear();
        {
            let mut rx = inner.terminal_rx.lock().await;
            while let Ok(event) = rx.try_recv() {
                terminal_events.push(event);
            }
        }

        // 10: hold the cadence
        let spent = turn_started.elapsed();
        if let Some(remaining) = turn_timeout.checked_sub(spent) {
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = shutdown.wait_for(|s| *s) => {
                    inner.state.send_replace(LoopState::Draining);
                    break;
                }
            }
        } else {
            warn!(turn, elapsed_ms = spent.as_millis() as u64, "turn overran its cadence");
        }

        inner.state.send_replace(LoopState::Running);
        turn += 1;
    }

    inner.state.send_replace(LoopState::Stopped);
    inner.finished.send_replace(true);
    info!(turn, "turn loop stopped");
}
