//! botpit: the core of a turn-based game server.
//!
//! Three token-guarded TCP endpoints share one framed-JSON transport: the
//! operator terminal, a single spectator UI slot, and a pool of pre-declared
//! game client slots. A fixed-cadence turn loop fans messages out to all
//! clients, opens a receive window for their replies, and drives a pluggable
//! [`GameLogic`]. Spectator delivery and on-disk logging are decoupled from
//! the loop by a bounded output pipeline.
//!
//! The [`Server`] supervisor wires everything together from a [`Configs`]
//! value; games are started and stopped by operator commands.

pub mod client;
pub mod clients;
pub mod command;
pub mod config;
pub mod error;
pub mod game;
pub mod logic;
pub mod output;
pub mod server;
pub mod terminal;
pub mod ui;

pub use clients::ClientNetwork;
pub use command::CommandHandler;
pub use config::Configs;
pub use error::{PitError, PitResult};
pub use game::{GameHandler, LoopState};
pub use logic::{ClientInfo, GameFactory, GameLogic};
pub use server::Server;
pub use terminal::TerminalInterface;
pub use ui::UiNetwork;
