//! Ordered conversation list.

use std::collections::HashSet;

use crate::models::{ChatId, Contact, Placeholder, UserId};

/// Keeps the conversation list ordered by recent activity with unread counts.
#[derive(Debug, Clone, Default)]
pub struct ContactListCoordinator {
    contacts: Vec<Contact>,
    active: Option<ChatId>,
    placeholder: Option<Placeholder>,
}

impl ContactListCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn placeholder(&self) -> Option<&Placeholder> {
        self.placeholder.as_ref()
    }

    pub fn set_placeholder(&mut self, placeholder: Placeholder) {
        self.placeholder = Some(placeholder);
    }

    pub fn clear_placeholder(&mut self) {
        self.placeholder = None;
    }

    /// Replace the list with a fresh server snapshot.
    ///
    /// The active conversation keeps zero unread. A placeholder whose
    /// counterpart now has a real entry is dropped.
    pub fn replace(&mut self, contacts: Vec<Contact>) {
        self.contacts = contacts;
        if let Some(active) = self.active.clone() {
            self.clear_unread(&active);
        }
        let resolved = self
            .placeholder
            .as_ref()
            .is_some_and(|p| self.find_by_receiver(&p.receiver_id).is_some());
        if resolved {
            self.placeholder = None;
        }
    }

    /// A counterpart's message arrived on `chat_id`.
    ///
    /// Moves the entry to the front with the new preview. Unread grows by
    /// one unless the conversation is open. Unknown ids are ignored.
    pub fn on_incoming(&mut self, chat_id: &ChatId, text: &str) -> bool {
        let is_active = self.active.as_ref() == Some(chat_id);
        self.promote(chat_id, text, |contact| {
            contact.unread_count = if is_active {
                0
            } else {
                contact.unread_count.saturating_add(1)
            };
        })
    }

    /// The local user sent `text` on `chat_id`.
    pub fn on_outgoing(&mut self, chat_id: &ChatId, text: &str) -> bool {
        self.promote(chat_id, text, |contact| contact.unread_count = 0)
    }

    fn promote(&mut self, chat_id: &ChatId, text: &str, update: impl FnOnce(&mut Contact)) -> bool {
        let Some(index) = self.contacts.iter().position(|c| &c.chat_id == chat_id) else {
            return false;
        };
        let mut contact = self.contacts.remove(index);
        if !text.is_empty() {
            contact.last_message = text.to_owned();
        }
        update(&mut contact);
        self.contacts.insert(0, contact);
        true
    }

    /// `chat_id` became the open conversation.
    pub fn on_select(&mut self, chat_id: &ChatId) {
        self.active = Some(chat_id.clone());
        self.clear_unread(chat_id);
    }

    /// No conversation is open any more.
    pub fn clear_active(&mut self) {
        self.active = None;
    }

    fn clear_unread(&mut self, chat_id: &ChatId) {
        if let Some(contact) = self.contacts.iter_mut().find(|c| &c.chat_id == chat_id) {
            contact.unread_count = 0;
        }
    }

    pub fn find(&self, chat_id: &ChatId) -> Option<&Contact> {
        self.contacts.iter().find(|c| &c.chat_id == chat_id)
    }

    pub fn find_by_receiver(&self, receiver_id: &UserId) -> Option<&Contact> {
        self.contacts.iter().find(|c| &c.receiver_id == receiver_id)
    }

    /// Ids of every listed conversation.
    pub fn chat_ids(&self) -> HashSet<ChatId> {
        self.contacts
            .iter()
            .map(|c| c.chat_id.clone())
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub fn total_unread(&self) -> u32 {
        self.contacts
            .iter()
            .fold(0u32, |total, c| total.saturating_add(c.unread_count))
    }
}
