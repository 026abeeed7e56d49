use std::net::SocketAddr;
use std::sync::Arc;

use chanlink_frame::{decode_text, INTERNAL_API};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::cmd::{install_ctrlc_handler, EchoArgs};
use crate::exit::{io_error, CliResult, SUCCESS};

/// Frames a client sends before steady-state traffic: token, then metadata.
const HANDSHAKE_FRAMES: usize = 2;

pub async fn run(args: EchoArgs) -> CliResult<i32> {
    let listener = TcpListener::bind(args.addr.as_str())
        .await
        .map_err(|err| io_error(&format!("bind {} failed", args.addr), err))?;
    let local = listener
        .local_addr()
        .map_err(|err| io_error("local address lookup failed", err))?;
    tracing::info!(addr = %local, "echo server listening");
    eprintln!("listening on ws://{local}");

    let stop = Arc::new(Notify::new());
    install_ctrlc_handler(stop.clone())?;

    let mut served = 0usize;
    let mut connections = JoinSet::new();
    loop {
        let (stream, peer) = tokio::select! {
            _ = stop.notified() => break,
            accepted = listener.accept() => {
                accepted.map_err(|err| io_error("accept failed", err))?
            }
        };

        while connections.try_join_next().is_some() {}
        connections.spawn(async move {
            if let Err(err) = serve(stream, peer).await {
                tracing::warn!(%peer, error = %err, "connection failed");
            }
        });

        served = served.saturating_add(1);
        if args.max_connections.is_some_and(|max| served >= max) {
            break;
        }
    }

    while connections.join_next().await.is_some() {}
    Ok(SUCCESS)
}

async fn serve(stream: TcpStream, peer: SocketAddr) -> Result<(), tungstenite::Error> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    tracing::info!(%peer, "client connected");

    let mut handshake = 0usize;
    while let Some(message) = read.next().await {
        match message? {
            Message::Text(text) if handshake < HANDSHAKE_FRAMES => {
                if handshake == 0 {
                    tracing::debug!(%peer, token_len = text.len(), "token received");
                } else {
                    tracing::info!(%peer, metadata = %text, "handshake received");
                }
                handshake += 1;
            }
            Message::Text(text) => {
                if is_schema(&text) {
                    tracing::info!(%peer, "schema document received");
                    continue;
                }
                write.send(Message::Text(text)).await?;
            }
            Message::Binary(data) => write.send(Message::Binary(data)).await?,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    tracing::info!(%peer, "client disconnected");
    Ok(())
}

fn is_schema(text: &str) -> bool {
    decode_text(text.as_bytes()).is_ok_and(|message| message.channel == INTERNAL_API)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_internal_channel_is_swallowed() {
        assert!(is_schema(r#"{"channel":"__internal/api","payload":{}}"#));
        assert!(!is_schema(r#"{"channel":"player/health","payload":1}"#));
        assert!(!is_schema("not json"));
    }
}
