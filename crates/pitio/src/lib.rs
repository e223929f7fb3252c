//! `pitio`: framed JSON transport for the botpit endpoints.
//!
//! Wire format: a `u32` big-endian byte length followed by exactly that many
//! bytes of UTF-8 JSON. Readers coalesce short reads until the frame is
//! complete. This layer carries no deadlines; timeouts belong to the endpoint
//! that owns the socket.

pub mod error;
pub mod listen;
pub mod socket;

pub use error::SocketError;
pub use listen::Listener;
pub use socket::{JsonReader, JsonSocket, JsonWriter};
