//! WebSocket Hub Client
//!
//! [`WsHubConnector`] opens a hub connection over `tokio-tungstenite`:
//!
//! 1. Map `http(s)` to `ws(s)` and attach `Authorization: Bearer {token}`
//! 2. Send the protocol handshake and wait for the server's answer
//! 3. Hand both socket halves to a session actor task
//!
//! The actor owns the socket. [`WsHubSession`] talks to it over an `mpsc`
//! command channel; invocation results come back on `oneshot` channels and
//! stream items on a per-stream `mpsc` channel. When the socket goes away
//! every outstanding invocation and open stream is failed, then the
//! connection's `closed` signal resolves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{
    CodecError, EncodedMessage, HubCodec, HubMessage, HubValue, handshake_request,
    parse_handshake_response,
};
use super::keepalive::{KeepAliveConfig, KeepAliveEvent, KeepAliveMonitor, KeepAliveState};
use crate::application::ports::{
    CLOSE_CONNECTION, HubConnectRequest, HubConnection, HubConnector, HubError, HubSession,
    MessageStream, RENEW_TOKEN, RawFrame, RenewTokenResponse, START_STREAMING,
};
use crate::domain::connection::{AccessToken, HubProtocol, HubTransportType};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

type InvocationReply = oneshot::Sender<Result<Option<HubValue>, HubError>>;
type StreamItems = mpsc::Sender<Result<RawFrame, HubError>>;

/// Buffered items per open stream before the actor waits on the consumer.
const STREAM_BUFFER: usize = 1024;
const COMMAND_BUFFER: usize = 64;

/// Map an `http(s)` URL to `ws(s)`.
///
/// # Errors
///
/// Returns an error for any other scheme.
pub fn websocket_url(url: &str) -> Result<String, HubError> {
    if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if url.starts_with("wss://") || url.starts_with("ws://") {
        Ok(url.to_string())
    } else {
        Err(HubError::Connect(format!("unsupported URL scheme: {url}")))
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens hub connections over WebSockets.
#[derive(Debug, Clone, Default)]
pub struct WsHubConnector {
    keep_alive: KeepAliveConfig,
}

impl WsHubConnector {
    /// Create a connector with custom keep-alive timing.
    #[must_use]
    pub const fn new(keep_alive: KeepAliveConfig) -> Self {
        Self { keep_alive }
    }
}

#[async_trait]
impl HubConnector for WsHubConnector {
    fn supports(&self, transport_type: HubTransportType) -> bool {
        transport_type == HubTransportType::WebSockets
    }

    async fn connect(&self, request: HubConnectRequest) -> Result<HubConnection, HubError> {
        if !self.supports(request.transport_type) {
            return Err(HubError::UnsupportedTransport(request.transport_type));
        }

        let url = websocket_url(&request.url)?;
        let mut ws_request = url
            .as_str()
            .into_client_request()
            .map_err(|e| HubError::Connect(e.to_string()))?;
        if let Some(token) = &request.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                .map_err(|e| HubError::Connect(e.to_string()))?;
            ws_request.headers_mut().insert(AUTHORIZATION, value);
        }

        tracing::debug!(url = %url, protocol = request.protocol.name(), "Connecting to hub");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(ws_request)
            .await
            .map_err(|e| HubError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(handshake_request(request.protocol).into()))
            .await
            .map_err(websocket_error)?;
        let leftover = tokio::time::timeout(self.keep_alive.server_timeout, read_handshake(&mut read))
            .await
            .map_err(|_| HubError::Handshake("timed out waiting for handshake response".to_string()))??;

        tracing::debug!("Hub handshake complete");

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (closed_tx, closed_rx) = oneshot::channel();
        let actor = SessionActor {
            protocol: request.protocol,
            codec: HubCodec::for_protocol(request.protocol),
            write,
            read,
            commands: command_rx,
            keep_alive: self.keep_alive,
            pending: HashMap::new(),
            streams: HashMap::new(),
            next_invocation_id: 0,
            stop_reply: None,
        };
        tokio::spawn(actor.run(leftover, closed_tx));

        Ok(HubConnection {
            session: Arc::new(WsHubSession {
                commands: command_tx,
            }),
            closed: closed_rx,
        })
    }
}

fn websocket_error(e: tungstenite::Error) -> HubError {
    HubError::WebSocket(e.to_string())
}

/// Read until the handshake response is complete; returns the bytes that
/// followed it.
async fn read_handshake(read: &mut WsRead) -> Result<Vec<u8>, HubError> {
    let mut buffer = Vec::new();
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => buffer.extend_from_slice(text.as_bytes()),
            Some(Ok(Message::Binary(data))) => buffer.extend_from_slice(&data),
            Some(Ok(Message::Close(_))) | None => {
                return Err(HubError::Handshake(
                    "connection closed during handshake".to_string(),
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(websocket_error(e)),
        }

        match parse_handshake_response(&buffer) {
            Ok(consumed) => return Ok(buffer.split_off(consumed)),
            Err(CodecError::Incomplete) => {}
            Err(e) => return Err(HubError::Handshake(e.to_string())),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

enum Command {
    Invoke {
        target: &'static str,
        arguments: Vec<HubValue>,
        reply: InvocationReply,
    },
    Stream {
        target: &'static str,
        items: StreamItems,
        reply: oneshot::Sender<Result<String, HubError>>,
    },
    CancelStream {
        id: String,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a live WebSocket hub session.
#[derive(Clone)]
pub struct WsHubSession {
    commands: mpsc::Sender<Command>,
}

impl WsHubSession {
    async fn request<T: Send>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, HubError>>) -> Command + Send,
    ) -> Result<T, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| HubError::ConnectionClosed)?;
        reply_rx.await.map_err(|_| HubError::ConnectionClosed)?
    }
}

#[async_trait]
impl HubSession for WsHubSession {
    async fn start_streaming(&self) -> Result<MessageStream, HubError> {
        let (items_tx, items_rx) = mpsc::channel(STREAM_BUFFER);
        let id = self
            .request(|reply| Command::Stream {
                target: START_STREAMING,
                items: items_tx,
                reply,
            })
            .await?;
        Ok(MessageStream {
            id,
            frames: ReceiverStream::new(items_rx).boxed(),
        })
    }

    async fn cancel_stream(&self, stream_id: &str) -> Result<(), HubError> {
        let id = stream_id.to_string();
        self.request(|reply| Command::CancelStream { id, reply }).await
    }

    async fn renew_token(&self, token: &AccessToken) -> Result<RenewTokenResponse, HubError> {
        let arguments = vec![HubValue::from(token.as_str())];
        let result = self
            .request(|reply| Command::Invoke {
                target: RENEW_TOKEN,
                arguments,
                reply,
            })
            .await?;
        result
            .ok_or_else(|| HubError::Protocol("RenewToken returned no result".to_string()))?
            .into_renew_response()
            .map_err(|e| HubError::Protocol(e.to_string()))
    }

    async fn close_connection(&self) -> Result<(), HubError> {
        self.request(|reply| Command::Invoke {
            target: CLOSE_CONNECTION,
            arguments: Vec::new(),
            reply,
        })
        .await
        .map(|_| ())
    }

    async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Stop { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

// =============================================================================
// Actor
// =============================================================================

enum Flow {
    Continue,
    Close(Option<HubError>),
}

struct SessionActor {
    protocol: HubProtocol,
    codec: HubCodec,
    write: WsWrite,
    read: WsRead,
    commands: mpsc::Receiver<Command>,
    keep_alive: KeepAliveConfig,
    pending: HashMap<String, InvocationReply>,
    streams: HashMap<String, StreamItems>,
    next_invocation_id: u64,
    stop_reply: Option<oneshot::Sender<()>>,
}

impl SessionActor {
    async fn run(mut self, leftover: Vec<u8>, closed: oneshot::Sender<Option<HubError>>) {
        let keep_alive_state = Arc::new(KeepAliveState::new());
        let (keep_alive_tx, mut keep_alive_rx) = mpsc::channel(4);
        let keep_alive_cancel = CancellationToken::new();
        tokio::spawn(
            KeepAliveMonitor::new(
                self.keep_alive,
                Arc::clone(&keep_alive_state),
                keep_alive_tx,
                keep_alive_cancel.clone(),
            )
            .run(),
        );

        let mut flow = self.handle_leftover(leftover).await;
        while let Flow::Continue = flow {
            flow = tokio::select! {
                Some(command) = self.commands.recv() => self.handle_command(command).await,
                Some(event) = keep_alive_rx.recv() => match event {
                    KeepAliveEvent::SendPing => self.send(&HubMessage::Ping).await,
                    KeepAliveEvent::Timeout => Flow::Close(Some(HubError::ServerTimeout)),
                },
                frame = self.read.next() => {
                    keep_alive_state.record_received();
                    self.handle_frame(frame).await
                }
            };
        }
        keep_alive_cancel.cancel();

        let Flow::Close(reason) = flow else {
            return;
        };
        match &reason {
            Some(e) => tracing::warn!(error = %e, "Hub connection lost"),
            None => tracing::debug!("Hub connection closed"),
        }
        self.fail_outstanding(reason.as_ref());
        let _ = closed.send(reason);
        if let Some(reply) = self.stop_reply.take() {
            let _ = reply.send(());
        }
    }

    fn next_id(&mut self) -> String {
        let id = self.next_invocation_id.to_string();
        self.next_invocation_id += 1;
        id
    }

    async fn send(&mut self, message: &HubMessage) -> Flow {
        match self.try_send(message).await {
            Ok(()) => Flow::Continue,
            Err(e) => Flow::Close(Some(e)),
        }
    }

    async fn try_send(&mut self, message: &HubMessage) -> Result<(), HubError> {
        let encoded = self
            .codec
            .encode(message)
            .map_err(|e| HubError::Protocol(e.to_string()))?;
        let frame = match encoded {
            EncodedMessage::Text(text) => Message::Text(text.into()),
            EncodedMessage::Binary(data) => Message::Binary(data.into()),
        };
        self.write.send(frame).await.map_err(websocket_error)
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Invoke {
                target,
                arguments,
                reply,
            } => {
                let id = self.next_id();
                let message = HubMessage::Invocation {
                    invocation_id: Some(id.clone()),
                    target: target.to_string(),
                    arguments,
                };
                match self.try_send(&message).await {
                    Ok(()) => {
                        self.pending.insert(id, reply);
                        Flow::Continue
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.clone()));
                        Flow::Close(Some(e))
                    }
                }
            }
            Command::Stream {
                target,
                items,
                reply,
            } => {
                let id = self.next_id();
                let message = HubMessage::StreamInvocation {
                    invocation_id: id.clone(),
                    target: target.to_string(),
                    arguments: Vec::new(),
                };
                match self.try_send(&message).await {
                    Ok(()) => {
                        self.streams.insert(id.clone(), items);
                        let _ = reply.send(Ok(id));
                        Flow::Continue
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.clone()));
                        Flow::Close(Some(e))
                    }
                }
            }
            Command::CancelStream { id, reply } => {
                self.streams.remove(&id);
                let result = self
                    .try_send(&HubMessage::CancelInvocation { invocation_id: id })
                    .await;
                let _ = reply.send(result.clone());
                result.map_or_else(|e| Flow::Close(Some(e)), |()| Flow::Continue)
            }
            Command::Stop { reply } => {
                self.stop_reply = Some(reply);
                let _ = self.write.send(Message::Close(None)).await;
                Flow::Close(None)
            }
        }
    }

    async fn handle_leftover(&mut self, leftover: Vec<u8>) -> Flow {
        if leftover.is_empty() {
            return Flow::Continue;
        }
        let decoded = match self.protocol {
            HubProtocol::Json => match String::from_utf8(leftover) {
                Ok(text) => self.codec.decode_text(&text),
                Err(e) => return Flow::Close(Some(HubError::Protocol(e.to_string()))),
            },
            HubProtocol::MessagePack => self.codec.decode_binary(&leftover),
        };
        self.dispatch(decoded).await
    }

    async fn handle_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) -> Flow {
        match frame {
            Some(Ok(Message::Text(text))) => {
                let decoded = self.codec.decode_text(text.as_str());
                self.dispatch(decoded).await
            }
            Some(Ok(Message::Binary(data))) => {
                let decoded = self.codec.decode_binary(&data);
                self.dispatch(decoded).await
            }
            Some(Ok(Message::Ping(data))) => match self.write.send(Message::Pong(data)).await {
                Ok(()) => Flow::Continue,
                Err(e) => Flow::Close(Some(websocket_error(e))),
            },
            Some(Ok(Message::Close(_))) | None => Flow::Close(Some(HubError::ConnectionClosed)),
            Some(Ok(_)) => Flow::Continue,
            Some(Err(e)) => Flow::Close(Some(websocket_error(e))),
        }
    }

    async fn dispatch(&mut self, decoded: Result<Vec<HubMessage>, CodecError>) -> Flow {
        let messages = match decoded {
            Ok(messages) => messages,
            Err(e) => return Flow::Close(Some(HubError::Protocol(e.to_string()))),
        };

        for message in messages {
            match message {
                HubMessage::StreamItem {
                    invocation_id,
                    item,
                } => {
                    let Some(items) = self.streams.get(&invocation_id).cloned() else {
                        tracing::debug!(invocation_id, "Stream item for unknown stream");
                        continue;
                    };
                    let frame = stream_item_frame(item);
                    if items.send(frame).await.is_err() {
                        self.streams.remove(&invocation_id);
                    }
                }
                HubMessage::Completion {
                    invocation_id,
                    error,
                    result,
                } => {
                    if let Some(reply) = self.pending.remove(&invocation_id) {
                        let outcome = error.map_or(Ok(result), |e| Err(HubError::Invocation(e)));
                        let _ = reply.send(outcome);
                    } else if let Some(items) = self.streams.remove(&invocation_id)
                        && let Some(e) = error
                    {
                        let _ = items.send(Err(HubError::Invocation(e))).await;
                    }
                }
                HubMessage::Close { error, .. } => {
                    return Flow::Close(error.map(HubError::ServerClosed));
                }
                HubMessage::Ping => {}
                HubMessage::Invocation { target, .. } | HubMessage::StreamInvocation { target, .. } => {
                    tracing::debug!(method = %target, "Ignoring server invocation");
                }
                HubMessage::CancelInvocation { .. } => {}
            }
        }
        Flow::Continue
    }

    fn fail_outstanding(&mut self, reason: Option<&HubError>) {
        let error = reason.cloned().unwrap_or(HubError::ConnectionClosed);
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(error.clone()));
        }
        // Graceful closes end streams; abrupt ones fail them.
        for (_, items) in self.streams.drain() {
            if reason.is_some() {
                let _ = items.try_send(Err(error.clone()));
            }
        }
    }
}

/// Convert a stream item; an item that is not a frame is reported on the
/// stream without ending it.
fn stream_item_frame(item: HubValue) -> Result<RawFrame, HubError> {
    item.into_frame()
        .map_err(|e| HubError::InvalidItem(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("https://api.example.com/hub", "wss://api.example.com/hub")]
    #[test_case("http://localhost:5000/hub", "ws://localhost:5000/hub")]
    #[test_case("wss://api.example.com/hub", "wss://api.example.com/hub")]
    #[test_case("ws://localhost/hub", "ws://localhost/hub")]
    fn websocket_url_mapping(input: &str, expected: &str) {
        assert_eq!(websocket_url(input).unwrap(), expected);
    }

    #[test]
    fn websocket_url_rejects_other_schemes() {
        assert!(matches!(
            websocket_url("ftp://example.com"),
            Err(HubError::Connect(_))
        ));
    }

    #[test]
    fn connector_supports_websockets_only() {
        let connector = WsHubConnector::default();
        assert!(connector.supports(HubTransportType::WebSockets));
        assert!(!connector.supports(HubTransportType::LongPolling));
    }

    #[test]
    fn unconvertible_stream_item_is_not_terminal() {
        let item = HubValue::Json(serde_json::json!({
            "ReferenceId": "prices",
            "PayloadFormat": "json",
            "Payload": "e30=",
            "MessageId": "1",
        }));

        assert!(matches!(stream_item_frame(item), Err(HubError::InvalidItem(_))));
    }

    #[tokio::test]
    async fn long_polling_request_is_rejected() {
        let connector = WsHubConnector::default();
        let result = connector
            .connect(HubConnectRequest {
                url: "https://example.com/streaming?contextId=1".to_string(),
                access_token: None,
                protocol: HubProtocol::Json,
                transport_type: HubTransportType::LongPolling,
                skip_negotiation: false,
            })
            .await;

        assert!(matches!(
            result,
            Err(HubError::UnsupportedTransport(HubTransportType::LongPolling))
        ));
    }
}
