use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn, Instrument};

use super::Hub;
use crate::error::Result;
use crate::relay::Outbound;
use crate::signaling::{ClientMessage, ServerMessage};

/// Accepts WebSocket connections forever, one task per connection.
pub async fn serve(listener: TcpListener, hub: Arc<Hub>) -> Result<()> {
    info!(addr = %listener.local_addr()?, "signaling relay listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, peer, hub).await {
                debug!(peer = %peer, error = %e, "connection ended with error");
            }
        });
    }
}

pub async fn serve_connection(stream: TcpStream, peer: SocketAddr, hub: Arc<Hub>) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn_id = hub.connect(tx.clone()).await;
    let span = tracing::info_span!("conn", id = %conn_id, peer = %peer);

    let mut writer = tokio::spawn(
        async move {
            while let Some(outbound) = rx.recv().await {
                match outbound {
                    Outbound::Message(msg) => {
                        let json = match serde_json::to_string(&msg) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "failed to encode server message");
                                continue;
                            }
                        };
                        if write.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = write.close().await;
        }
        .instrument(span.clone()),
    );

    async {
        loop {
            tokio::select! {
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => continue,
                    };
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => hub.handle(&conn_id, msg).await,
                        Err(e) => {
                            warn!(error = %e, "malformed client frame");
                            let _ = tx.send(Outbound::Message(ServerMessage::Error {
                                message: format!("malformed message: {e}"),
                            }));
                        }
                    }
                }
                _ = &mut writer => break,
            }
        }
        hub.disconnect(&conn_id).await;
    }
    .instrument(span)
    .await;

    writer.abort();
    Ok(())
}
