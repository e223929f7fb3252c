use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One game event: operator-injected, environment-generated, or decoded from
/// a client reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Event {
    pub fn new(kind: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            kind: kind.into(),
            args,
        }
    }
}

/// Decode a client reply's `args[0]` as an array of events.
///
/// Returns `None` when the first argument is missing or is not an event
/// array; a client that sent garbage simply contributes no input this turn.
pub fn events_from_args(args: &[Value]) -> Option<Vec<Event>> {
    let first = args.first()?;
    serde_json::from_value(first.clone()).ok()
}
