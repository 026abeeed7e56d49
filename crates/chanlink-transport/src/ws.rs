//! WebSocket transport over `tokio-tungstenite`.
//!
//! [`WsConnector`] opens one WebSocket per [`Connector::connect`] call and
//! splits it into a [`WsSink`] / [`WsSource`] pair so reads and writes can
//! proceed from different tasks.

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::chunk::PendingMessage;
use crate::error::{Result, TransportError};
use crate::traits::{Connector, FrameSink, FrameSource, MessageKind, ReceiveResult, WireMessage};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens WebSocket connections to a fixed URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Create a connector for a `ws://` or `wss://` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Sink = WsSink;
    type Source = WsSource;

    async fn connect(&self) -> Result<(WsSink, WsSource)> {
        let (stream, response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|err| TransportError::Connect {
                endpoint: self.url.clone(),
                source: Box::new(err),
            })?;
        tracing::debug!(url = %self.url, status = %response.status(), "websocket opened");

        let (sink, stream) = stream.split();
        Ok((
            WsSink { sink },
            WsSource {
                stream,
                pending: None,
            },
        ))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

impl FrameSink for WsSink {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let message = match message {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(data) => Message::Binary(data.to_vec()),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.sink.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Read half of a WebSocket connection.
///
/// Whole WebSocket messages are handed out in buffer-sized chunks.
#[derive(Debug)]
pub struct WsSource {
    stream: SplitStream<WsStream>,
    pending: Option<PendingMessage>,
}

impl WsSource {
    async fn next_message(&mut self) -> Result<Option<PendingMessage>> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                ))
                | None => return Ok(None),
                Some(Err(err)) => return Err(err.into()),
            };

            match message {
                Message::Text(text) => {
                    return Ok(Some(PendingMessage::new(
                        MessageKind::Text,
                        Bytes::from(text),
                        true,
                    )));
                }
                Message::Binary(data) => {
                    return Ok(Some(PendingMessage::new(
                        MessageKind::Binary,
                        Bytes::from(data),
                        true,
                    )));
                }
                Message::Close(frame) => {
                    tracing::debug!(?frame, "websocket close frame received");
                    return Ok(None);
                }
                // tungstenite answers pings itself on the next read/write.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

impl FrameSource for WsSource {
    async fn receive(&mut self, buf: &mut [u8]) -> Result<ReceiveResult> {
        if self.pending.is_none() {
            match self.next_message().await? {
                Some(message) => self.pending = Some(message),
                None => return Ok(ReceiveResult::close()),
            }
        }

        let Some(pending) = self.pending.as_mut() else {
            return Ok(ReceiveResult::close());
        };
        let read = pending.read_into(buf);
        if pending.is_drained() {
            self.pending = None;
        }
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn spawn_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(WsStream2) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            handler(ws).await;
        });
        format!("ws://{addr}")
    }

    type WsStream2 = WebSocketStream<tokio::net::TcpStream>;

    #[tokio::test]
    async fn text_and_binary_roundtrip() {
        let url = spawn_server(|mut ws| async move {
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() || message.is_binary() {
                    ws.send(message).await.unwrap();
                }
            }
        })
        .await;

        let (mut sink, mut source) = WsConnector::new(url).connect().await.unwrap();
        let mut buf = [0u8; 64];

        sink.send(WireMessage::Text("hello".into())).await.unwrap();
        let read = source.receive(&mut buf).await.unwrap();
        assert_eq!(read.kind, MessageKind::Text);
        assert!(read.end_of_message);
        assert_eq!(&buf[..read.count], b"hello");

        sink.send(WireMessage::Binary(Bytes::from_static(&[1, 2, 3])))
            .await
            .unwrap();
        let read = source.receive(&mut buf).await.unwrap();
        assert_eq!(read.kind, MessageKind::Binary);
        assert_eq!(&buf[..read.count], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn large_message_spans_reads() {
        let url = spawn_server(|mut ws| async move {
            ws.send(Message::Binary(vec![7u8; 10])).await.unwrap();
            let _ = ws.next().await;
        })
        .await;

        let (_sink, mut source) = WsConnector::new(url).connect().await.unwrap();
        let mut buf = [0u8; 4];
        let mut total = 0;
        let mut reads = 0;
        loop {
            let read = source.receive(&mut buf).await.unwrap();
            total += read.count;
            reads += 1;
            if read.end_of_message {
                break;
            }
        }
        assert_eq!(total, 10);
        assert_eq!(reads, 3);
    }

    #[tokio::test]
    async fn server_close_reports_close() {
        let url = spawn_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let (_sink, mut source) = WsConnector::new(url).connect().await.unwrap();
        let mut buf = [0u8; 8];
        let read = source.receive(&mut buf).await.unwrap();
        assert!(read.is_close());
    }

    #[tokio::test]
    async fn connect_failure_names_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("ws://{addr}");
        let err = WsConnector::new(url.clone()).connect().await.unwrap_err();
        match err {
            TransportError::Connect { endpoint, .. } => assert_eq!(endpoint, url),
            other => panic!("unexpected error: {other}"),
        }
    }
}
