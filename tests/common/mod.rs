//! A minimal WebSocket server for exercising `Transport` against a real
//! socket, instead of mocking the pool or connection layer directly.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Accepts any number of client connections, echoes pings, captures every
/// inbound text/binary frame, and can push frames to every connected client.
pub struct MockWsServer {
    addr: SocketAddr,
    push_tx: broadcast::Sender<Message>,
    captured_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    accept_task: JoinHandle<()>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("binding an ephemeral port should not fail in tests");
        let addr = listener.local_addr().expect("bound listener has a local addr");

        let (push_tx, _) = broadcast::channel(64);
        let (captured_tx, captured_rx) = mpsc::unbounded_channel();

        let push_tx_for_accept = push_tx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve_client(
                    stream,
                    captured_tx.clone(),
                    push_tx_for_accept.subscribe(),
                ));
            }
        });

        Self {
            addr,
            push_tx,
            captured_rx,
            accept_task,
        }
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Pushes `value` as a text frame to every currently connected client.
    pub fn push_json(&self, value: &serde_json::Value) {
        let _ = self.push_tx.send(Message::Text(value.to_string().into()));
    }

    /// Waits up to two seconds for the next captured inbound frame.
    pub async fn recv_client_frame(&mut self) -> Option<Vec<u8>> {
        timeout(Duration::from_secs(2), self.captured_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_client(
    stream: TcpStream,
    captured_tx: mpsc::UnboundedSender<Vec<u8>>,
    mut push_rx: broadcast::Receiver<Message>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let _ = captured_tx.send(bytes.into());
                    }
                    Some(Ok(Message::Text(text))) => {
                        let _ = captured_tx.send(text.as_bytes().to_vec());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            sent = push_rx.recv() => {
                match sent {
                    Ok(message) => {
                        if write.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
