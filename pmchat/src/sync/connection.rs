//! Per-conversation connection bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::models::ChatId;
use crate::protocol::ClientEvent;
use crate::transport::{EventSink, Link, RoutedEvent, Transport};

#[derive(Debug)]
struct Entry {
    link_id: u64,
    link: Box<dyn Link>,
}

/// Owns every realtime link, at most one per conversation.
///
/// The active conversation's link is never closed by background
/// reconciliation; switching away from it closes it unless the
/// conversation is also wanted in the background.
#[derive(Debug)]
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    sink: EventSink,
    entries: HashMap<ChatId, Entry>,
    background: HashSet<ChatId>,
    active: Option<ChatId>,
    next_link_id: u64,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, sink: EventSink) -> Self {
        Self {
            transport,
            sink,
            entries: HashMap::new(),
            background: HashSet::new(),
            active: None,
            next_link_id: 0,
        }
    }

    /// Open a link for `chat_id` unless a usable one exists.
    ///
    /// Returns true if a link was opened.
    pub fn ensure_connected(&mut self, chat_id: &ChatId) -> bool {
        if chat_id.is_empty() {
            return false;
        }
        if let Some(entry) = self.entries.get(chat_id) {
            if !entry.link.is_closed() {
                return false;
            }
            info!("Link for chat {chat_id} gave up, reopening");
        }

        self.next_link_id += 1;
        let link_id = self.next_link_id;
        let link = self.transport.open(chat_id, link_id, self.sink.clone());
        debug!("Opened link {link_id} for chat {chat_id}");
        // Replacing drops any closed predecessor.
        self.entries.insert(chat_id.clone(), Entry { link_id, link });
        true
    }

    /// Close and forget the link for `chat_id`.
    pub fn teardown(&mut self, chat_id: &ChatId) -> bool {
        match self.entries.remove(chat_id) {
            Some(mut entry) => {
                entry.link.close();
                debug!("Closed link {} for chat {chat_id}", entry.link_id);
                true
            }
            None => false,
        }
    }

    /// Make the background set exactly `desired`.
    ///
    /// Opens what is missing and closes what is no longer wanted, except
    /// the active conversation.
    pub fn reconcile(&mut self, desired: &HashSet<ChatId>) {
        self.background = desired.clone();

        for chat_id in desired {
            self.ensure_connected(chat_id);
        }

        let stale: Vec<ChatId> = self
            .entries
            .keys()
            .filter(|id| !desired.contains(*id) && self.active.as_ref() != Some(*id))
            .cloned()
            .collect();
        for chat_id in stale {
            self.teardown(&chat_id);
        }
    }

    /// Change the active conversation.
    pub fn set_active(&mut self, chat_id: Option<&ChatId>) {
        let previous = std::mem::replace(&mut self.active, chat_id.cloned());
        if let Some(previous) = previous {
            if Some(&previous) != chat_id && !self.background.contains(&previous) {
                self.teardown(&previous);
            }
        }
        if let Some(chat_id) = chat_id {
            self.ensure_connected(chat_id);
        }
    }

    pub fn active(&self) -> Option<&ChatId> {
        self.active.as_ref()
    }

    /// Whether `chat_id` has a connected link.
    pub fn is_connected(&self, chat_id: &ChatId) -> bool {
        self.entries
            .get(chat_id)
            .is_some_and(|e| e.link.is_connected())
    }

    /// Emit on the link of the event's conversation.
    pub fn emit(&self, event: ClientEvent) -> Result<()> {
        let chat_id = event.chat_id();
        match self.entries.get(chat_id) {
            Some(entry) if entry.link.is_connected() => entry.link.emit(event),
            _ => Err(Error::NotConnected(chat_id.clone())),
        }
    }

    /// Whether `event` comes from the link currently registered for its conversation.
    pub fn accepts(&self, event: &RoutedEvent) -> bool {
        self.entries
            .get(&event.chat_id)
            .is_some_and(|e| e.link_id == event.link_id)
    }

    /// Conversations with a registered link, sorted.
    pub fn open_chats(&self) -> Vec<ChatId> {
        let mut ids: Vec<ChatId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close everything.
    pub fn shutdown(&mut self) {
        let ids: Vec<ChatId> = self.entries.keys().cloned().collect();
        for chat_id in ids {
            self.teardown(&chat_id);
        }
        self.background.clear();
        self.active = None;
    }
}
