//! Socket.IO over WebSocket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::traits::{ConnectionEvent, EventSink, Link, RoutedEvent, Transport};
use crate::error::{Error, Result};
use crate::models::ChatId;
use crate::protocol::{ClientEvent, Handshake, Packet, ServerEvent, SocketPacket};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<Socket, Message>;
type Reader = SplitStream<Socket>;

/// Reconnection and timeout settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Reconnect attempts after a failure before a link gives up.
    pub reconnection_attempts: u32,
    /// Pause between reconnect attempts.
    pub reconnection_delay: Duration,
    /// Limit for one connect plus handshake.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnection_attempts: 5,
            reconnection_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(20_000),
        }
    }
}

/// Opens one Socket.IO connection per conversation.
#[derive(Debug, Clone)]
pub struct SocketIoTransport {
    url: Url,
    config: Arc<TransportConfig>,
}

impl SocketIoTransport {
    /// Create a transport for the server at `url`.
    ///
    /// `http`/`https` schemes are mapped to `ws`/`wss`.
    pub fn new(url: Url, config: TransportConfig) -> Self {
        Self {
            url,
            config: Arc::new(config),
        }
    }

    /// WebSocket endpoint for a conversation.
    pub fn endpoint(&self, chat_id: &ChatId) -> Result<Url> {
        let mut url = self.url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported socket scheme: {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::InvalidArgument(format!("cannot use scheme {scheme}")))?;

        let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair("EIO", "4")
            .append_pair("transport", "websocket")
            .append_pair("chat_id", chat_id.as_str());
        Ok(url)
    }
}

impl Transport for SocketIoTransport {
    fn open(&self, chat_id: &ChatId, link_id: u64, sink: EventSink) -> Box<dyn Link> {
        let (outbound, rx) = mpsc::unbounded_channel();
        let state = Arc::new(LinkState::default());
        let ctx = LinkContext {
            chat_id: chat_id.clone(),
            link_id,
            sink,
            state: state.clone(),
            config: self.config.clone(),
        };

        match self.endpoint(chat_id) {
            Ok(url) => {
                tokio::spawn(run_link(ctx, url, rx));
            }
            Err(e) => {
                warn!("Cannot open link for chat {chat_id}: {e}");
                ctx.report(ConnectionEvent::ConnectError(e.to_string()));
                state.closed.store(true, Ordering::SeqCst);
            }
        }

        Box::new(SocketIoLink {
            chat_id: chat_id.clone(),
            outbound: Some(outbound),
            state,
        })
    }
}

#[derive(Debug, Default)]
struct LinkState {
    connected: AtomicBool,
    closed: AtomicBool,
}

/// Handle to a background connection task.
///
/// Dropping the handle releases the task, which closes the socket and exits.
#[derive(Debug)]
struct SocketIoLink {
    chat_id: ChatId,
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    state: Arc<LinkState>,
}

impl Link for SocketIoLink {
    fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ClientEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.chat_id.clone()));
        }
        let outbound = self.outbound.as_ref().ok_or(Error::Closed)?;
        outbound.send(event).map_err(|_| Error::Closed)
    }

    fn close(&mut self) {
        // Dropping the sender lets the task send a close frame and exit.
        self.outbound = None;
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

struct LinkContext {
    chat_id: ChatId,
    link_id: u64,
    sink: EventSink,
    state: Arc<LinkState>,
    config: Arc<TransportConfig>,
}

impl LinkContext {
    fn report(&self, event: ConnectionEvent) {
        let routed = RoutedEvent {
            chat_id: self.chat_id.clone(),
            link_id: self.link_id,
            event,
        };
        if self.sink.send(routed).is_err() {
            trace!("Event sink for chat {} is gone", self.chat_id);
        }
    }

    fn dispatch(&self, name: &str, payload: Value) {
        match ServerEvent::decode(name, payload) {
            Ok(Some(event)) => self.report(ConnectionEvent::Server(event)),
            Ok(None) => debug!("Ignoring unknown event '{name}' on chat {}", self.chat_id),
            Err(e) => warn!(
                "Dropping malformed '{name}' event on chat {}: {e}",
                self.chat_id
            ),
        }
    }
}

/// How a session ended.
enum Ended {
    /// The server or network dropped the connection.
    Dropped,
    /// The owning link was closed.
    Released,
}

async fn run_link(ctx: LinkContext, url: Url, mut outbound: mpsc::UnboundedReceiver<ClientEvent>) {
    let mut failures = 0u32;
    info!("Connecting chat {} to {url}", ctx.chat_id);

    loop {
        let result = run_session(&ctx, &url, &mut outbound).await;
        let was_connected = ctx.state.connected.swap(false, Ordering::SeqCst);

        match result {
            Ok(Ended::Released) => break,
            Ok(Ended::Dropped) => {
                info!("Chat {} disconnected", ctx.chat_id);
                ctx.report(ConnectionEvent::Disconnected);
            }
            Err(e) if was_connected => {
                warn!("Chat {} connection lost: {e}", ctx.chat_id);
                ctx.report(ConnectionEvent::Disconnected);
            }
            Err(e) => {
                warn!("Chat {} connect failed: {e}", ctx.chat_id);
                ctx.report(ConnectionEvent::ConnectError(e.to_string()));
            }
        }

        if was_connected {
            failures = 0;
        }
        failures += 1;
        if failures > ctx.config.reconnection_attempts {
            warn!(
                "Chat {} giving up after {} reconnect attempts",
                ctx.chat_id, ctx.config.reconnection_attempts
            );
            break;
        }

        if !backoff(&ctx, &mut outbound).await {
            break;
        }
        debug!("Reconnecting chat {} (attempt {failures})", ctx.chat_id);
    }

    ctx.state.connected.store(false, Ordering::SeqCst);
    ctx.state.closed.store(true, Ordering::SeqCst);
}

/// Wait out the reconnect delay. Returns false if the link was released.
async fn backoff(ctx: &LinkContext, outbound: &mut mpsc::UnboundedReceiver<ClientEvent>) -> bool {
    let delay = sleep(ctx.config.reconnection_delay);
    tokio::pin!(delay);
    loop {
        tokio::select! {
            _ = &mut delay => return true,
            event = outbound.recv() => match event {
                None => return false,
                Some(event) => debug!("Dropping '{}' queued while disconnected", event.name()),
            },
        }
    }
}

async fn run_session(
    ctx: &LinkContext,
    url: &Url,
    outbound: &mut mpsc::UnboundedReceiver<ClientEvent>,
) -> Result<Ended> {
    let (mut writer, mut reader, handshake) = timeout(ctx.config.connect_timeout, handshake(url))
        .await
        .map_err(|_| Error::protocol("connect timed out"))??;

    ctx.state.connected.store(true, Ordering::SeqCst);
    info!("Chat {} connected (sid {})", ctx.chat_id, handshake.sid);
    ctx.report(ConnectionEvent::Connected);

    // The server pings every interval; silence past interval + timeout means a dead peer.
    let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut deadline = Instant::now() + liveness;

    loop {
        tokio::select! {
            frame = reader.next() => {
                deadline = Instant::now() + liveness;
                let text = match frame {
                    None => return Ok(Ended::Dropped),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) => return Ok(Ended::Dropped),
                    Some(Ok(_)) => continue,
                };
                match Packet::decode(text.as_str()) {
                    Ok(Packet::Ping(data)) => send_packet(&mut writer, &Packet::Pong(data)).await?,
                    Ok(Packet::Message(SocketPacket::Event { name, payload })) => {
                        ctx.dispatch(&name, payload)
                    }
                    Ok(Packet::Close) | Ok(Packet::Message(SocketPacket::Disconnect)) => {
                        return Ok(Ended::Dropped)
                    }
                    Ok(Packet::Message(SocketPacket::ConnectError(data))) => {
                        return Err(Error::protocol(format!("server rejected connection: {data}")))
                    }
                    Ok(other) => trace!("Ignoring {other:?} on chat {}", ctx.chat_id),
                    Err(e) => warn!("Dropping malformed frame on chat {}: {e}", ctx.chat_id),
                }
            }
            event = outbound.recv() => match event {
                None => {
                    let _ = writer.send(Message::Close(None)).await;
                    return Ok(Ended::Released);
                }
                Some(event) => {
                    trace!("Emitting '{}' on chat {}", event.name(), ctx.chat_id);
                    send_packet(&mut writer, &event.to_packet()?).await?;
                }
            },
            _ = sleep_until(deadline) => {
                return Err(Error::protocol("ping timeout"));
            }
        }
    }
}

/// Open the socket, read the Engine.IO handshake and join the default namespace.
async fn handshake(url: &Url) -> Result<(Writer, Reader, Handshake)> {
    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut writer, mut reader) = socket.split();

    let handshake = loop {
        match next_packet(&mut reader).await? {
            Packet::Open(handshake) => break handshake,
            Packet::Noop => continue,
            other => return Err(Error::protocol(format!("expected open packet, got {other:?}"))),
        }
    };

    send_packet(&mut writer, &Packet::Message(SocketPacket::Connect(None))).await?;

    loop {
        match next_packet(&mut reader).await? {
            Packet::Message(SocketPacket::Connect(_)) => break,
            Packet::Message(SocketPacket::ConnectError(data)) => {
                return Err(Error::protocol(format!("server rejected connection: {data}")))
            }
            Packet::Ping(data) => send_packet(&mut writer, &Packet::Pong(data)).await?,
            other => trace!("Ignoring {other:?} during handshake"),
        }
    }

    Ok((writer, reader, handshake))
}

async fn next_packet(reader: &mut Reader) -> Result<Packet> {
    loop {
        match reader.next().await {
            None => return Err(Error::protocol("connection closed during handshake")),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => return Packet::decode(text.as_str()),
            Some(Ok(Message::Close(_))) => {
                return Err(Error::protocol("connection closed during handshake"))
            }
            Some(Ok(_)) => continue,
        }
    }
}

async fn send_packet(writer: &mut Writer, packet: &Packet) -> Result<()> {
    writer.send(Message::text(packet.encode()?)).await?;
    Ok(())
}
