//! WebSocket push channel from the detection backend.
//!
//! One connection attempt per session. Decode failures drop the message and
//! keep the connection; transport failures mark the channel unavailable until
//! the session is restarted.

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decoder;
use crate::error::ClientError;
use crate::session::Ingest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// No connection attempted yet
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connection failed or dropped; live data unavailable
    Unavailable,
    /// Closed by the client on teardown
    Closed,
}

/// Connect to `url` and forward decoded events until cancelled or closed
pub async fn run(url: String, tx: mpsc::Sender<Ingest>, cancel: CancellationToken) {
    let _ = tx.send(Ingest::Channel(ChannelStatus::Connecting)).await;

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = tx.send(Ingest::Channel(ChannelStatus::Closed)).await;
            return;
        }
        result = connect_async(url.as_str()) => result,
    };

    let mut socket = match connected {
        Ok((socket, _response)) => {
            info!(url = %url, "push channel connected");
            let _ = tx.send(Ingest::Channel(ChannelStatus::Connected)).await;
            socket
        }
        Err(e) => {
            warn!(url = %url, error = %e, "push channel connection failed");
            let _ = tx
                .send(Ingest::ChannelFailed(ClientError::Transport(e.to_string())))
                .await;
            return;
        }
    };

    let mut received: u64 = 0;
    let mut dropped: u64 = 0;

    let outcome = loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = socket.close(None).await {
                    debug!(error = %e, "push channel close handshake failed");
                }
                break Ok(ChannelStatus::Closed);
            }
            message = socket.next() => message,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    dropped += 1;
                    warn!("dropping non-UTF-8 binary push message");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                info!(frame = ?frame, "push channel closed by server");
                break Err(ClientError::Transport("closed by server".to_string()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(error = %e, "push channel read error");
                break Err(ClientError::Transport(e.to_string()));
            }
            None => break Err(ClientError::Transport("stream ended".to_string())),
        };

        match decoder::decode_or_drop(&text) {
            Some(event) => {
                received += 1;
                if tx.send(Ingest::Push(event)).await.is_err() {
                    break Ok(ChannelStatus::Closed);
                }
            }
            None => dropped += 1,
        }
    };

    info!(
        url = %url,
        received,
        dropped,
        ok = outcome.is_ok(),
        "push channel finished"
    );
    let message = match outcome {
        Ok(status) => Ingest::Channel(status),
        Err(error) => Ingest::ChannelFailed(error),
    };
    let _ = tx.send(message).await;
}
