use std::net::SocketAddr;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::SocketError;

/// Refuse frames larger than this rather than trying to buffer them.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Reads whole JSON values off a length-prefixed stream.
#[derive(Debug)]
pub struct JsonReader<R = OwnedReadHalf> {
    inner: R,
    buf: BytesMut,
}

impl<R> JsonReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }
}

impl<R: AsyncRead + Unpin> JsonReader<R> {
    /// Receive one value. Blocks until the whole frame has arrived.
    ///
    /// Short reads are coalesced by `read_exact`. EOF before the frame is
    /// complete yields [`SocketError::Closed`]; a malformed payload yields
    /// [`SocketError::Decode`] and leaves the stream open and aligned on the
    /// next frame boundary.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, SocketError> {
        let mut len_bytes = [0u8; 4];
        self.inner.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(SocketError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "frame too large",
            )));
        }

        self.buf.resize(len, 0);
        self.inner.read_exact(&mut self.buf).await?;
        serde_json::from_slice(&self.buf).map_err(SocketError::Decode)
    }
}

/// Writes whole JSON values onto a length-prefixed stream.
#[derive(Debug)]
pub struct JsonWriter<W = OwnedWriteHalf> {
    inner: W,
}

impl<W> JsonWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: AsyncWrite + Unpin> JsonWriter<W> {
    /// Send one value. The length prefix and payload go out as one buffer;
    /// partial writes of the underlying stream are looped by `write_all`.
    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), SocketError> {
        let payload = serde_json::to_vec(value).map_err(SocketError::Decode)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            SocketError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "frame too large",
            ))
        })?;

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&payload);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close the write direction. Safe to call more than once.
    pub async fn close(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

/// A bidirectional framed JSON socket over TCP.
#[derive(Debug)]
pub struct JsonSocket {
    reader: JsonReader<OwnedReadHalf>,
    writer: JsonWriter<OwnedWriteHalf>,
    peer: SocketAddr,
    closed: bool,
}

impl JsonSocket {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        let (rd, wr) = stream.into_split();
        Ok(Self {
            reader: JsonReader::new(rd),
            writer: JsonWriter::new(wr),
            peer,
            closed: false,
        })
    }

    pub async fn connect<A: ToSocketAddrs>(addr: A) -> std::io::Result<Self> {
        Self::new(TcpStream::connect(addr).await?)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, SocketError> {
        self.reader.recv().await
    }

    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), SocketError> {
        self.writer.send(value).await
    }

    /// Close the socket. Idempotent.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.writer.close().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Split into independently owned read and write halves, so a receiver
    /// loop and a sender loop can run concurrently.
    pub fn into_split(self) -> (JsonReader<OwnedReadHalf>, JsonWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}
