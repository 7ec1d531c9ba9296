//! STOMP over WebSocket.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use accorcia_core::config::RealtimeSettings;

use super::stomp::Frame;
use super::{
    ConnectHeaders, Link, SubscriptionHandle, Transport, TransportConnection, TransportError,
    TransportEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Real-time transport speaking STOMP 1.2 over a WebSocket.
#[derive(Debug, Clone)]
pub struct StompTransport {
    url: String,
    connect_timeout: Duration,
}

impl StompTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        Self::new(
            settings.ws_url.clone(),
            Duration::from_secs(settings.connect_timeout_secs),
        )
    }

    /// Endpoint URL with the credential appended as the `token` query parameter.
    fn endpoint(&self, headers: &ConnectHeaders) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}token={}", self.url, headers.bearer.as_str())
    }

    async fn handshake(&self, headers: ConnectHeaders) -> Result<WsStream, TransportError> {
        let request = self.endpoint(&headers).into_client_request()?;
        let host = request.uri().host().unwrap_or("localhost").to_string();

        let (mut socket, _response) = connect_async(request).await?;
        let connect = Frame::connect(&host, &headers.bearer.header_value());
        socket.send(Message::text(connect.encode())).await?;

        loop {
            let frame = match socket.next().await {
                Some(Ok(msg)) => match frame_text(msg) {
                    Some(text) => Frame::decode(&text)?,
                    None => continue,
                },
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::Closed),
            };
            let Some(frame) = frame else { continue };
            match frame.command.as_str() {
                "CONNECTED" => {
                    debug!(
                        version = frame.header("version").unwrap_or("-"),
                        "STOMP session established"
                    );
                    return Ok(socket);
                }
                "ERROR" => {
                    let message = frame
                        .header("message")
                        .map_or_else(|| frame.body.clone(), ToString::to_string);
                    return Err(TransportError::Rejected(message));
                }
                other => {
                    return Err(TransportError::Connection(format!(
                        "Unexpected {other} frame before CONNECTED"
                    )));
                }
            }
        }
    }
}

impl Transport for StompTransport {
    type Connection = StompConnection;

    async fn connect(&self, headers: ConnectHeaders) -> Result<Link<StompConnection>, TransportError> {
        let socket = tokio::time::timeout(self.connect_timeout, self.handshake(headers))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;
        info!(url = %self.url, "Real-time connection open");

        let (sink, stream) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(sink, outbound_rx));
        let reader = tokio::spawn(read_frames(stream, events_tx));

        Ok(Link {
            connection: StompConnection {
                outbound: outbound_tx,
                reader,
                next_id: 0,
            },
            events: events_rx,
        })
    }
}

/// Control half of an open STOMP session.
pub struct StompConnection {
    outbound: mpsc::UnboundedSender<Frame>,
    reader: JoinHandle<()>,
    next_id: u64,
}

impl StompConnection {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }
}

impl TransportConnection for StompConnection {
    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionHandle, TransportError> {
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;
        self.send(Frame::subscribe(&id, topic))?;
        Ok(SubscriptionHandle::new(id))
    }

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), TransportError> {
        self.send(Frame::unsubscribe(handle.as_str()))
    }

    fn disconnect(self) {
        // The writer closes the socket once the DISCONNECT is flushed and the
        // sender is dropped.
        if self.send(Frame::disconnect()).is_err() {
            debug!("Connection already closed");
        }
    }
}

impl Drop for StompConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_frames(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(Message::text(frame.encode())).await {
            debug!(error = %e, "WebSocket write failed");
            return;
        }
    }
    let _ = sink.close().await;
}

async fn read_frames(mut stream: SplitStream<WsStream>, events: mpsc::UnboundedSender<TransportEvent>) {
    let reason = loop {
        let msg = match stream.next().await {
            Some(Ok(Message::Close(close))) => {
                break close.map_or_else(
                    || "closed by server".to_string(),
                    |c| c.reason.as_str().to_owned(),
                );
            }
            Some(Ok(msg)) => msg,
            Some(Err(e)) => break e.to_string(),
            None => break "stream ended".to_string(),
        };
        let Some(text) = frame_text(msg) else { continue };
        let frame = match Frame::decode(&text) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Dropping malformed STOMP frame");
                continue;
            }
        };
        match frame.command.as_str() {
            "MESSAGE" => {
                let (Some(handle), Some(topic)) =
                    (frame.header("subscription"), frame.header("destination"))
                else {
                    warn!("MESSAGE frame without subscription or destination");
                    continue;
                };
                let event = TransportEvent::Message {
                    handle: SubscriptionHandle::new(handle),
                    topic: topic.to_string(),
                    body: frame.body.clone(),
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            "ERROR" => {
                break frame
                    .header("message")
                    .map_or_else(|| frame.body.clone(), ToString::to_string);
            }
            "RECEIPT" => {}
            other => debug!(command = other, "Ignoring STOMP frame"),
        }
    };
    let _ = events.send(TransportEvent::Closed { reason });
}

/// Text payload of a data message; control frames yield `None`.
fn frame_text(msg: Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text.as_str().to_owned()),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::BearerToken;

    fn headers() -> ConnectHeaders {
        ConnectHeaders {
            bearer: BearerToken::new("a.b.c"),
        }
    }

    #[test]
    fn token_is_appended_as_query_parameter() {
        let transport = StompTransport::new("ws://localhost:8090/ws/websocket", Duration::from_secs(1));
        assert_eq!(
            transport.endpoint(&headers()),
            "ws://localhost:8090/ws/websocket?token=a.b.c"
        );

        let transport = StompTransport::new("ws://host/ws?x=1", Duration::from_secs(1));
        assert_eq!(transport.endpoint(&headers()), "ws://host/ws?x=1&token=a.b.c");
    }

    #[test]
    fn settings_drive_url_and_timeout() {
        let settings = RealtimeSettings::default();
        let transport = StompTransport::from_settings(&settings);
        assert_eq!(transport.url, settings.ws_url);
        assert_eq!(transport.connect_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_to_connect() {
        let transport = StompTransport::new("ws://127.0.0.1:9/ws", Duration::from_secs(5));
        let result = transport.connect(headers()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn subscribe_after_writer_exit_reports_closed() {
        let (outbound, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut connection = StompConnection {
            outbound,
            reader: tokio::spawn(async {}),
            next_id: 0,
        };
        assert!(matches!(
            connection.subscribe("/topic/url/abc"),
            Err(TransportError::Closed)
        ));
        assert_eq!(connection.next_id, 1);
    }
}
