//! Transport trait definitions.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::models::ChatId;
use crate::protocol::{ClientEvent, ServerEvent};

/// What a link reports about itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The server confirmed the connection.
    Connected,
    /// An established connection dropped.
    Disconnected,
    /// A connection attempt failed.
    ConnectError(String),
    /// An inbound server event.
    Server(ServerEvent),
}

/// A connection event tagged with the conversation and link it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub chat_id: ChatId,
    pub link_id: u64,
    pub event: ConnectionEvent,
}

/// Where links deliver their events.
pub type EventSink = mpsc::UnboundedSender<RoutedEvent>;

/// Factory for realtime links, one per conversation.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Open a link bound to `chat_id`.
    ///
    /// Returns immediately; connection progress and inbound events are
    /// reported to `sink` tagged with `link_id`.
    fn open(&self, chat_id: &ChatId, link_id: u64, sink: EventSink) -> Box<dyn Link>;
}

/// One realtime connection bound to a conversation.
pub trait Link: Send + fmt::Debug {
    /// Conversation this link is bound to.
    fn chat_id(&self) -> &ChatId;

    /// Whether the server has confirmed the connection.
    fn is_connected(&self) -> bool;

    /// Whether the link was closed or gave up reconnecting.
    fn is_closed(&self) -> bool;

    /// Queue an event for the server.
    fn emit(&self, event: ClientEvent) -> Result<()>;

    /// Close the link. Further events from it are not delivered.
    fn close(&mut self);
}
