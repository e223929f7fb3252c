/// Transport-level failures of a framed JSON socket.
#[derive(Debug)]
pub enum SocketError {
    /// The peer closed the stream, possibly in the middle of a frame.
    Closed,
    /// The underlying stream failed.
    Io(std::io::Error),
    /// A complete frame arrived but its payload is not the expected JSON.
    /// The socket stays usable.
    Decode(serde_json::Error),
}

impl SocketError {
    pub fn is_closed(&self) -> bool {
        matches!(self, SocketError::Closed)
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, SocketError::Decode(_))
    }
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketError::Closed => write!(f, "transport closed"),
            SocketError::Io(e) => write!(f, "transport i/o failure: {e}"),
            SocketError::Decode(e) => write!(f, "frame decode failure: {e}"),
        }
    }
}

impl std::error::Error for SocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SocketError::Closed => None,
            SocketError::Io(e) => Some(e),
            SocketError::Decode(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SocketError::Closed
        } else {
            SocketError::Io(e)
        }
    }
}
