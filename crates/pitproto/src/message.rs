use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// First message of every client connection.
pub const NAME_TOKEN: &str = "token";
/// Handshake acknowledgement and initial game payload.
pub const NAME_INIT: &str = "init";
pub const NAME_TURN: &str = "turn";
pub const NAME_STATUS: &str = "status";
/// Sent to every game client when the match ends.
pub const NAME_SHUTDOWN: &str = "shutdown";
pub const NAME_WRONG_TOKEN: &str = "wrong token";
/// Operator command envelope: `args[0]` the command name, `args[1]` its arguments.
pub const NAME_COMMAND: &str = "command";
/// Operator-injected game event: `args[0]` the event object.
pub const NAME_EVENT: &str = "event";
/// Standard reply envelope for operator commands.
pub const NAME_REPORT: &str = "report";

/// One wire message. Immutable once sent.
///
/// `args` tolerates `null` and absence on decode (older peers send
/// `"args": null`); it always serializes as an array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    #[serde(default, deserialize_with = "nullable_args")]
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// A message with no arguments.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// The standard operator reply: `{"name":"report","args":[[..lines]]}`.
    pub fn report<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<Value> = lines
            .into_iter()
            .map(|l| Value::String(l.into()))
            .collect();
        Self::new(NAME_REPORT, vec![Value::Array(lines)])
    }

    pub fn wrong_token() -> Self {
        Self::named(NAME_WRONG_TOKEN)
    }

    pub fn shutdown() -> Self {
        Self::named(NAME_SHUTDOWN)
    }

    /// `args[i]` if it is a string.
    pub fn arg_str(&self, i: usize) -> Option<&str> {
        self.args.get(i).and_then(Value::as_str)
    }
}

fn nullable_args<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Value>, D::Error> {
    Ok(Option::<Vec<Value>>::deserialize(d)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_args_decode_as_empty() {
        let m: Message = serde_json::from_value(json!({"name": "nothing", "args": null})).unwrap();
        assert_eq!(m.name, "nothing");
        assert!(m.args.is_empty());

        let m: Message = serde_json::from_value(json!({"name": "bare"})).unwrap();
        assert!(m.args.is_empty());
    }

    #[test]
    fn bare_string_is_not_a_message() {
        assert!(serde_json::from_value::<Message>(json!("some token")).is_err());
    }

    #[test]
    fn report_shape() {
        let r = Message::report(["a", "b"]);
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"name": "report", "args": [["a", "b"]]})
        );
    }

    #[test]
    fn round_trip_preserves_args() {
        let m = Message::new("turn", vec![json!(3), json!({"k": [1, 2]})]);
        let bytes = serde_json::to_vec(&m).unwrap();
        let back: Message = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, m);
    }
}
