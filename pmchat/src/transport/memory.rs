//! In-memory transport.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::traits::{ConnectionEvent, EventSink, Link, RoutedEvent, Transport};
use crate::error::{Error, Result};
use crate::models::ChatId;
use crate::protocol::{ClientEvent, ServerEvent};

/// Transport that keeps every link in memory.
///
/// Links never touch the network. The owner drives them by hand: mark a
/// conversation connected, push server events into it, inspect what was
/// emitted. Useful for tests and offline demos.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Debug, Default)]
struct Shared {
    endpoints: Vec<Endpoint>,
    auto_connect: bool,
    refuse_sends: bool,
}

#[derive(Debug)]
struct Endpoint {
    chat_id: ChatId,
    link_id: u64,
    sink: EventSink,
    connected: bool,
    closed: bool,
    emitted: Vec<ClientEvent>,
}

impl Endpoint {
    fn report(&self, event: ConnectionEvent) -> bool {
        self.sink
            .send(RoutedEvent {
                chat_id: self.chat_id.clone(),
                link_id: self.link_id,
                event,
            })
            .is_ok()
    }
}

impl Shared {
    fn live(&mut self, chat_id: &ChatId) -> Option<&mut Endpoint> {
        self.endpoints
            .iter_mut()
            .rev()
            .find(|e| !e.closed && &e.chat_id == chat_id)
    }
}

impl MemoryTransport {
    /// Create a transport whose links wait to be connected by hand.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make new links report `Connected` as soon as they open.
    pub fn auto_connect(self) -> Self {
        self.lock().auto_connect = true;
        self
    }

    /// Make every emit fail as if the socket refused the frame.
    pub fn refuse_sends(&self, refuse: bool) {
        self.lock().refuse_sends = refuse;
    }

    /// Mark the live link for `chat_id` connected.
    pub fn connect(&self, chat_id: &ChatId) -> bool {
        let mut shared = self.lock();
        match shared.live(chat_id) {
            Some(endpoint) => {
                endpoint.connected = true;
                endpoint.report(ConnectionEvent::Connected)
            }
            None => false,
        }
    }

    /// Drop the live link for `chat_id` without closing it.
    pub fn disconnect(&self, chat_id: &ChatId) -> bool {
        let mut shared = self.lock();
        match shared.live(chat_id) {
            Some(endpoint) => {
                endpoint.connected = false;
                endpoint.report(ConnectionEvent::Disconnected)
            }
            None => false,
        }
    }

    /// Fail the live link for `chat_id` the way a link that ran out of
    /// reconnect attempts does: one connect error, then closed for good.
    pub fn give_up(&self, chat_id: &ChatId) -> bool {
        let mut shared = self.lock();
        match shared.live(chat_id) {
            Some(endpoint) => {
                endpoint.connected = false;
                endpoint.closed = true;
                endpoint.report(ConnectionEvent::ConnectError("gave up".to_owned()))
            }
            None => false,
        }
    }

    /// Deliver a server event on the live link for `chat_id`.
    pub fn deliver(&self, chat_id: &ChatId, event: ServerEvent) -> bool {
        let mut shared = self.lock();
        match shared.live(chat_id) {
            Some(endpoint) => endpoint.report(ConnectionEvent::Server(event)),
            None => false,
        }
    }

    /// Deliver an event tagged with an arbitrary link id, as a link that
    /// has since been replaced would.
    pub fn deliver_from(&self, chat_id: &ChatId, link_id: u64, event: ServerEvent) -> bool {
        let shared = self.lock();
        shared
            .endpoints
            .iter()
            .find(|e| &e.chat_id == chat_id)
            .map(|e| {
                e.sink
                    .send(RoutedEvent {
                        chat_id: chat_id.clone(),
                        link_id,
                        event: ConnectionEvent::Server(event),
                    })
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Conversations with a live link, sorted.
    pub fn open_chats(&self) -> Vec<ChatId> {
        let shared = self.lock();
        let mut ids: Vec<ChatId> = shared
            .endpoints
            .iter()
            .filter(|e| !e.closed)
            .map(|e| e.chat_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Live links for `chat_id`.
    pub fn open_count(&self, chat_id: &ChatId) -> usize {
        self.lock()
            .endpoints
            .iter()
            .filter(|e| !e.closed && &e.chat_id == chat_id)
            .count()
    }

    /// Links ever opened, live or not.
    pub fn opened_total(&self) -> usize {
        self.lock().endpoints.len()
    }

    /// Link id of the live link for `chat_id`.
    pub fn link_id(&self, chat_id: &ChatId) -> Option<u64> {
        self.lock().live(chat_id).map(|e| e.link_id)
    }

    /// Everything emitted towards `chat_id`, across all its links.
    pub fn emitted(&self, chat_id: &ChatId) -> Vec<ClientEvent> {
        self.lock()
            .endpoints
            .iter()
            .filter(|e| &e.chat_id == chat_id)
            .flat_map(|e| e.emitted.iter().cloned())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn open(&self, chat_id: &ChatId, link_id: u64, sink: EventSink) -> Box<dyn Link> {
        let mut shared = self.lock();
        let endpoint = Endpoint {
            chat_id: chat_id.clone(),
            link_id,
            sink,
            connected: shared.auto_connect,
            closed: false,
            emitted: Vec::new(),
        };
        if endpoint.connected {
            endpoint.report(ConnectionEvent::Connected);
        }
        shared.endpoints.push(endpoint);
        Box::new(MemoryLink {
            chat_id: chat_id.clone(),
            index: shared.endpoints.len() - 1,
            shared: self.shared.clone(),
        })
    }
}

#[derive(Debug)]
struct MemoryLink {
    chat_id: ChatId,
    index: usize,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryLink {
    fn with<T>(&self, f: impl FnOnce(&mut Endpoint, bool) -> T) -> T {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let refuse = shared.refuse_sends;
        f(&mut shared.endpoints[self.index], refuse)
    }
}

impl Link for MemoryLink {
    fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    fn is_connected(&self) -> bool {
        self.with(|e, _| e.connected && !e.closed)
    }

    fn is_closed(&self) -> bool {
        self.with(|e, _| e.closed)
    }

    fn emit(&self, event: ClientEvent) -> Result<()> {
        self.with(|e, refuse| {
            if e.closed {
                return Err(Error::Closed);
            }
            if !e.connected {
                return Err(Error::NotConnected(e.chat_id.clone()));
            }
            if refuse {
                return Err(Error::protocol("frame refused"));
            }
            e.emitted.push(event);
            Ok(())
        })
    }

    fn close(&mut self) {
        self.with(|e, _| {
            e.closed = true;
            e.connected = false;
        });
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}
