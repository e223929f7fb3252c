//! A minimal built-in game so the daemon can run a match end-to-end without
//! an external game crate: every turn broadcasts the countdown and tallies
//! whatever events the clients sent back.

use botpit::{ClientInfo, GameFactory, GameLogic};
use pitproto::{Event, Message};
use serde_json::json;
use tracing::info;

const DEFAULT_TOKENS: [&str; 2] = [
    "demo-client-token-000000000000001",
    "demo-client-token-000000000000002",
];

pub struct CountdownFactory {
    tokens: Vec<String>,
    turns: u64,
}

impl CountdownFactory {
    pub fn from_env() -> Self {
        let tokens = std::env::var("BOTPIT_CLIENT_TOKENS")
            .map(|raw| {
                raw.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let tokens = if tokens.is_empty() {
            DEFAULT_TOKENS.iter().map(|t| t.to_string()).collect()
        } else {
            tokens
        };
        let turns = std::env::var("BOTPIT_DEMO_TURNS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);
        Self { tokens, turns }
    }
}

impl GameFactory for CountdownFactory {
    /// `newGame <turns>` overrides the configured match length.
    fn game_logic(&self, options: &[String]) -> anyhow::Result<Box<dyn GameLogic>> {
        let turns = match options.first() {
            Some(raw) => raw
                .parse()
                .map_err(|_| anyhow::anyhow!("bad turn count: {raw}"))?,
            None => self.turns,
        };
        Ok(Box::new(Countdown {
            tokens: self.tokens.clone(),
            remaining: turns,
            turn: 0,
            events_seen: 0,
        }))
    }
}

struct Countdown {
    tokens: Vec<String>,
    remaining: u64,
    turn: u64,
    events_seen: u64,
}

impl GameLogic for Countdown {
    fn init(&mut self) {
        info!(clients = self.tokens.len(), turns = self.remaining, "countdown match prepared");
    }

    fn client_info(&self) -> Vec<ClientInfo> {
        self.tokens
            .iter()
            .enumerate()
            .map(|(id, token)| ClientInfo {
                id,
                name: format!("demo{id}"),
                token: token.clone(),
            })
            .collect()
    }

    fn ui_initial_message(&self) -> Message {
        Message::new("init", vec![json!({"turns": self.remaining})])
    }

    fn client_initial_messages(&self) -> Vec<Message> {
        self.tokens
            .iter()
            .enumerate()
            .map(|(id, _)| Message::new("init", vec![json!(id), json!(self.remaining)]))
            .collect()
    }

    fn simulate_events(
        &mut self,
        terminal_events: &[Event],
        environment_events: &[Event],
        client_events: &[Vec<Event>],
    ) {
        self.events_seen += (terminal_events.len()
            + environment_events.len()
            + client_events.iter().map(Vec::len).sum::<usize>()) as u64;
        self.turn += 1;
        self.remaining = self.remaining.saturating_sub(1);
    }

    fn generate_outputs(&mut self) {}

    fn ui_message(&self) -> Message {
        Message::new(
            "turn",
            vec![json!(self.turn), json!(self.remaining), json!(self.events_seen)],
        )
    }

    fn status_message(&self) -> Message {
        Message::new("status", vec![json!(self.remaining)])
    }

    fn client_messages(&self) -> Vec<Message> {
        self.tokens
            .iter()
            .map(|_| Message::new("turn", vec![json!(self.turn), json!(self.remaining)]))
            .collect()
    }

    fn make_environment_events(&mut self) -> Vec<Event> {
        Vec::new()
    }

    fn is_game_finished(&self) -> bool {
        self.remaining == 0
    }

    fn terminate(&mut self) {
        info!(turns = self.turn, events = self.events_seen, "countdown match over");
    }
}
