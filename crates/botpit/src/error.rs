use thiserror::Error;

/// Core failure taxonomy.
///
/// Transport failures are absorbed by the owning handler (counted, logged,
/// possibly terminating the worker); the variants below that escape to a
/// caller are the ones an operator sees as a failed command.
#[derive(Debug, Error)]
pub enum PitError {
    #[error(transparent)]
    Transport(#[from] pitio::SocketError),

    #[error("authentication rejected")]
    AuthRejected,

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("duplicate client token: {0}")]
    DuplicateToken(String),

    #[error("client id mismatch: slot {declared} assigned for index {expected}")]
    IdMismatch { expected: usize, declared: usize },

    #[error("config: {0}")]
    Config(String),

    #[error("output pipeline overflow")]
    QueueOverflow,

    #[error("wait interrupted")]
    Interrupted,
}

pub type PitResult<T> = Result<T, PitError>;
