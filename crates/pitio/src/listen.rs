use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::socket::JsonSocket;

/// Accepts connections on a TCP port until terminated and hands each one,
/// wrapped in a [`JsonSocket`], to a role-specific acceptor callback.
///
/// The acceptor runs on the accept loop, so it should only stash the socket
/// or spawn a worker. A terminated listener stays terminated; re-listening
/// means binding a fresh `Listener`.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
}

impl Listener {
    pub async fn bind<F>(port: u16, accept: F) -> std::io::Result<Self>
    where
        F: Fn(JsonSocket) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        let (stop, mut stop_rx) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    res = listener.accept() => match res {
                        Ok((stream, _peer)) => {
                            if let Ok(socket) = JsonSocket::new(stream) {
                                accept(socket);
                            }
                        }
                        Err(_) => {
                            // transient accept failure (fd exhaustion etc.)
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    },
                }
            }
        });

        Ok(Self { local_addr, stop })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the accept loop. In-flight acceptor invocations complete.
    pub fn terminate(&self) {
        let _ = self.stop.send(true);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn accepts_and_terminates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = Listener::bind(0, move |sock| {
            let _ = tx.send(sock.peer_addr());
        })
        .await
        .unwrap();
        let addr = listener.local_addr();

        let _c1 = JsonSocket::connect(("127.0.0.1", addr.port())).await.unwrap();
        assert!(rx.recv().await.is_some());

        listener.terminate();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // the loop is gone; new connections are never handed to the acceptor
        if tokio::net::TcpStream::connect(("127.0.0.1", addr.port()))
            .await
            .is_ok()
        {
            let got = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
            assert!(got.is_err() || got.unwrap().is_none());
        }
    }
}
