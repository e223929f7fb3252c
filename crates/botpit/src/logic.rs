use pitproto::{Event, Message};

/// Identity of one pre-declared game client slot.
#[derive(Clone, Debug)]
pub struct ClientInfo {
    /// Assigned by the client pool; equals the slot's index.
    pub id: usize,
    pub name: String,
    /// Opaque admission token the client must present on connect.
    pub token: String,
}

/// The pluggable game engine driven by the turn loop.
///
/// Per turn the loop calls, in order: [`simulate_events`], [`generate_outputs`],
/// the message getters, then [`make_environment_events`] while the client
/// receive window is open (so its wall-clock cost overlaps client think time).
///
/// [`simulate_events`]: GameLogic::simulate_events
/// [`generate_outputs`]: GameLogic::generate_outputs
/// [`make_environment_events`]: GameLogic::make_environment_events
pub trait GameLogic: Send {
    /// Prepare for a match.
    fn init(&mut self);

    /// Declare the client slots and their admission tokens.
    fn client_info(&self) -> Vec<ClientInfo>;

    fn ui_initial_message(&self) -> Message;

    /// Initial message per slot, indexed by slot id.
    fn client_initial_messages(&self) -> Vec<Message>;

    /// Advance the game by one turn's worth of events.
    fn simulate_events(
        &mut self,
        terminal_events: &[Event],
        environment_events: &[Event],
        client_events: &[Vec<Event>],
    );

    fn generate_outputs(&mut self);

    fn ui_message(&self) -> Message;

    fn status_message(&self) -> Message;

    /// Outbound message per slot, indexed by slot id.
    fn client_messages(&self) -> Vec<Message>;

    /// Invoked during the receive window.
    fn make_environment_events(&mut self) -> Vec<Event>;

    fn is_game_finished(&self) -> bool;

    fn terminate(&mut self);
}

/// Produces the game logic for a new match.
pub trait GameFactory: Send + Sync {
    fn game_logic(&self, options: &[String]) -> anyhow::Result<Box<dyn GameLogic>>;
}
