//! A full match: supervisor, client pool, scripted game logic, turn cadence,
//! receive windows and the end-of-game shutdown fan-out.

use std::time::Duration;

use botpit::config::{ClientConfig, Configs, OutputHandlerConfig, TerminalConfig, TimeConfig, UiConfig};
use botpit::{ClientInfo, GameFactory, GameLogic, Server};
use pitio::JsonSocket;
use pitproto::{Event, Message};
use serde_json::{json, Value};
use tokio::sync::mpsc;

const TERMINAL_TOKEN: &str = "00000000000000000000000000000000";

fn configs() -> Configs {
    Configs {
        output_handler: OutputHandlerConfig {
            send_to_ui: false,
            time_interval: 0,
            send_to_file: false,
            file_path: String::new(),
            buffer_size: 0,
        },
        turn_timeout: TimeConfig {
            client_response_time: 150,
            simulate_timeout: 100,
            turn_timeout: 250,
        },
        client: ClientConfig { port: 47912 },
        terminal: TerminalConfig {
            token: TERMINAL_TOKEN.into(),
            port: 47911,
        },
        ui: UiConfig {
            enable: false,
            token: "11111111111111111111111111111111".into(),
            port: 1,
        },
    }
}

/// What the logic saw when one turn was simulated.
#[derive(Debug)]
struct TurnRecord {
    turn: u64,
    terminal_kinds: Vec<String>,
    environment_count: usize,
    client_kinds: Vec<Vec<String>>,
}

struct ScriptedLogic {
    max_turns: u64,
    turn: u64,
    tokens: Vec<String>,
    observed: mpsc::UnboundedSender<TurnRecord>,
}

impl GameLogic for ScriptedLogic {
    fn init(&mut self) {}

    fn client_info(&self) -> Vec<ClientInfo> {
        self.tokens
            .iter()
            .enumerate()
            .map(|(id, token)| ClientInfo {
                id,
                name: format!("bot{id}"),
                token: token.clone(),
            })
            .collect()
    }

    fn ui_initial_message(&self) -> Message {
        Message::named("init")
    }

    fn client_initial_messages(&self) -> Vec<Message> {
        self.tokens
            .iter()
            .enumerate()
            .map(|(id, _)| Message::new("init", vec![json!(id)]))
            .collect()
    }

    fn simulate_events(
        &mut self,
        terminal_events: &[Event],
        environment_events: &[Event],
        client_events: &[Vec<Event>],
    ) {
        let _ = self.observed.send(TurnRecord {
            turn: self.turn,
            terminal_kinds: terminal_events.iter().map(|e| e.kind.clone()).collect(),
            environment_count: environment_events.len(),
            client_kinds: client_events
                .iter()
                .map(|events| events.iter().map(|e| e.kind.clone()).collect())
                .collect(),
        });
        self.turn += 1;
    }

    fn generate_outputs(&mut self) {}

    fn ui_message(&self) -> Message {
        Message::new("turn", vec![json!(self.turn)])
    }

    fn status_message(&self) -> Message {
        Message::new("status", vec![json!(self.turn)])
    }

    fn client_messages(&self) -> Vec<Message> {
        self.tokens
            .iter()
            .map(|_| Message::new("turn", vec![json!(self.turn)]))
            .collect()
    }

    fn make_environment_events(&mut self) -> Vec<Event> {
        vec![Event::new("env", Vec::new())]
    }

    fn is_game_finished(&self) -> bool {
        self.turn >= self.max_turns
    }

    fn terminate(&mut self) {}
}

struct ScriptedFactory {
    max_turns: u64,
    tokens: Vec<String>,
    observed: mpsc::UnboundedSender<TurnRecord>,
}

impl GameFactory for ScriptedFactory {
    fn game_logic(&self, _options: &[String]) -> anyhow::Result<Box<dyn GameLogic>> {
        Ok(Box::new(ScriptedLogic {
            max_turns: self.max_turns,
            turn: 0,
            tokens: self.tokens.clone(),
            observed: self.observed.clone(),
        }))
    }
}

/// Connects a game client that answers every `turn` with one echo event and
/// stops at `shutdown`. Returns how many turn messages it saw.
async fn game_client(port: u16, token: String, id: usize) -> anyhow::Result<usize> {
    // the pool only starts listening inside newGame; retry until it does
    let mut socket = loop {
        match JsonSocket::connect(("127.0.0.1", port)).await {
            Ok(socket) => break socket,
            Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    };
    socket
        .send(&Message::new("token", vec![Value::String(token)]))
        .await?;

    let mut turns_seen = 0;
    loop {
        let msg: Message = socket.recv().await?;
        match msg.name.as_str() {
            "init" => {}
            "turn" => {
                turns_seen += 1;
                // land inside the receive window, not on its leading edge
                tokio::time::sleep(Duration::from_millis(30)).await;
                socket
                    .send(&Message::new(
                        "events",
                        vec![json!([{"type": "echo", "args": [id]}])],
                    ))
                    .await?;
            }
            "shutdown" => return Ok(turns_seen),
            other => anyhow::bail!("unexpected message {other}"),
        }
    }
}

#[tokio::test]
async fn full_match_runs_to_completion() {
    let (observed_tx, mut observed) = mpsc::unbounded_channel();
    let tokens = vec!["token-alpha".to_string(), "token-beta".to_string()];
    let factory = ScriptedFactory {
        max_turns: 6,
        tokens: tokens.clone(),
        observed: observed_tx,
    };

    let server = Server::new(configs(), Box::new(factory)).await.unwrap();
    let terminal_addr = server.start().await.unwrap();

    let clients: Vec<_> = tokens
        .iter()
        .enumerate()
        .map(|(id, token)| tokio::spawn(game_client(47912, token.clone(), id)))
        .collect();

    server
        .new_game(&[], Duration::from_secs(5), Duration::from_secs(5))
        .await
        .unwrap();

    // an operator waiting on the match before it even starts
    let waiter = tokio::spawn(async move {
        let mut terminal = JsonSocket::connect(("127.0.0.1", terminal_addr.port()))
            .await
            .unwrap();
        terminal
            .send(&Message::new(
                "token",
                vec![Value::String(TERMINAL_TOKEN.into())],
            ))
            .await
            .unwrap();
        let _init: Message = terminal.recv().await.unwrap();
        terminal
            .send(&Message::new(
                "command",
                vec![json!("waitForFinish"), json!([])],
            ))
            .await
            .unwrap();
        let report: Message = terminal.recv().await.unwrap();
        report
    });

    server.game_handler().start().await.unwrap();

    // inject one operator event mid-game
    tokio::time::sleep(Duration::from_millis(400)).await;
    server
        .game_handler()
        .queue_event(Event::new("pause-request", Vec::new()));

    tokio::time::timeout(Duration::from_secs(10), server.game_handler().wait_for_finish())
        .await
        .expect("match must finish");

    let report = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waitForFinish must unblock")
        .unwrap();
    assert_eq!(report.args[0], json!(["Game finished!"]));

    // every client saw turns and then the shutdown message
    for client in clients {
        let turns_seen = tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .expect("client must stop")
            .unwrap()
            .unwrap();
        assert!(turns_seen >= 2, "client saw only {turns_seen} turns");
    }

    // inspect what the logic observed, turn by turn
    let mut records = Vec::new();
    while let Ok(rec) = observed.try_recv() {
        records.push(rec);
    }
    assert_eq!(records.len(), 6);
    assert_eq!(records[0].turn, 0);
    assert!(records[0].terminal_kinds.is_empty());
    assert_eq!(records[0].environment_count, 0);
    assert!(records[0].client_kinds.iter().all(Vec::is_empty));

    // after the first window both clients echo every turn, and the
    // environment events made during turn N arrive at turn N+1
    for rec in &records[1..] {
        assert_eq!(rec.environment_count, 1, "turn {}", rec.turn);
        for kinds in &rec.client_kinds {
            assert_eq!(kinds.as_slice(), ["echo"], "turn {}", rec.turn);
        }
    }

    // the injected terminal event was delivered exactly once
    let deliveries: usize = records
        .iter()
        .map(|r| r.terminal_kinds.iter().filter(|k| *k == "pause-request").count())
        .sum();
    assert_eq!(deliveries, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn id_mismatch_is_impossible_with_dense_declaration() {
    // defineClient hands out dense ids in declaration order; the supervisor
    // cross-checks them against the ClientInfo indices on every newGame
    let (observed_tx, _observed) = mpsc::unbounded_channel();
    let factory = ScriptedFactory {
        max_turns: 1,
        tokens: vec!["x".into(), "y".into(), "z".into()],
        observed: observed_tx,
    };
    let mut cfg = configs();
    cfg.client.port = 47922;
    cfg.terminal.port = 47921;

    let server = Server::new(cfg, Box::new(factory)).await.unwrap();
    server.start().await.unwrap();

    let clients: Vec<_> = ["x", "y", "z"]
        .iter()
        .enumerate()
        .map(|(id, token)| tokio::spawn(game_client(47922, token.to_string(), id)))
        .collect();

    server
        .new_game(&[], Duration::from_secs(5), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(server.game_handler().client_network().number_of_connected().await, 3);

    server.game_handler().start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), server.game_handler().wait_for_finish())
        .await
        .expect("match must finish");

    for client in clients {
        let _ = tokio::time::timeout(Duration::from_secs(5), client).await;
    }
    server.shutdown().await;
}
