//! Event routing between links and engine components.

use std::collections::{HashMap, HashSet};

use crate::models::ChatId;
use crate::protocol::ServerEvent;
use crate::transport::ConnectionEvent;

/// Engine components that consume connection events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subscriber {
    ActiveSession,
    ContactList,
}

/// Which kinds of events a subscriber handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerSet {
    pub lifecycle: bool,
    pub messages: bool,
    pub history: bool,
    pub typing: bool,
    pub presence: bool,
}

impl HandlerSet {
    /// Everything.
    pub const ALL: HandlerSet = HandlerSet {
        lifecycle: true,
        messages: true,
        history: true,
        typing: true,
        presence: true,
    };

    /// New messages only.
    pub const MESSAGES: HandlerSet = HandlerSet {
        lifecycle: false,
        messages: true,
        history: false,
        typing: false,
        presence: false,
    };

    fn wants(&self, event: &ConnectionEvent) -> bool {
        match event {
            ConnectionEvent::Connected
            | ConnectionEvent::Disconnected
            | ConnectionEvent::ConnectError(_) => self.lifecycle,
            ConnectionEvent::Server(ServerEvent::ReceivedMessage(_)) => self.messages,
            ConnectionEvent::Server(ServerEvent::ChatHistory(_)) => self.history,
            ConnectionEvent::Server(
                ServerEvent::UserTyping { .. } | ServerEvent::UserStoppedTyping { .. },
            ) => self.typing,
            ConnectionEvent::Server(ServerEvent::UserDisconnected { .. }) => self.presence,
        }
    }
}

/// Subscription table: conversation to interested components.
///
/// Each subscriber holds at most one handler set per conversation, so
/// re-subscribing replaces rather than stacks.
#[derive(Debug, Default)]
pub struct Dispatcher {
    routes: HashMap<ChatId, HashMap<Subscriber, HandlerSet>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` for events of `chat_id`.
    pub fn subscribe(&mut self, chat_id: &ChatId, subscriber: Subscriber, handlers: HandlerSet) {
        self.routes
            .entry(chat_id.clone())
            .or_default()
            .insert(subscriber, handlers);
    }

    /// Remove `subscriber` from `chat_id`.
    pub fn unsubscribe(&mut self, chat_id: &ChatId, subscriber: Subscriber) {
        if let Some(subscribers) = self.routes.get_mut(chat_id) {
            subscribers.remove(&subscriber);
            if subscribers.is_empty() {
                self.routes.remove(chat_id);
            }
        }
    }

    /// Subscribe `subscriber` to exactly `chat_ids`.
    pub fn retain(&mut self, subscriber: Subscriber, chat_ids: &HashSet<ChatId>, handlers: HandlerSet) {
        let stale: Vec<ChatId> = self
            .routes
            .iter()
            .filter(|(id, subs)| subs.contains_key(&subscriber) && !chat_ids.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for chat_id in stale {
            self.unsubscribe(&chat_id, subscriber);
        }
        for chat_id in chat_ids {
            self.subscribe(chat_id, subscriber, handlers);
        }
    }

    /// Subscribers that handle `event` on `chat_id`, active session first.
    pub fn route(&self, chat_id: &ChatId, event: &ConnectionEvent) -> Vec<Subscriber> {
        let mut targets: Vec<Subscriber> = self
            .routes
            .get(chat_id)
            .map(|subs| {
                subs.iter()
                    .filter(|(_, handlers)| handlers.wants(event))
                    .map(|(subscriber, _)| *subscriber)
                    .collect()
            })
            .unwrap_or_default();
        targets.sort();
        targets
    }

    /// Conversations `subscriber` is registered for.
    pub fn subscriptions(&self, subscriber: Subscriber) -> Vec<ChatId> {
        let mut ids: Vec<ChatId> = self
            .routes
            .iter()
            .filter(|(_, subs)| subs.contains_key(&subscriber))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use pretty_assertions::assert_eq;

    fn typing() -> ConnectionEvent {
        ConnectionEvent::Server(ServerEvent::UserTyping {
            sender: UserId::new("u2"),
        })
    }

    #[test]
    fn test_route_by_interest() {
        let mut dispatcher = Dispatcher::new();
        let c1 = ChatId::new("c1");
        dispatcher.subscribe(&c1, Subscriber::ContactList, HandlerSet::MESSAGES);
        dispatcher.subscribe(&c1, Subscriber::ActiveSession, HandlerSet::ALL);

        assert_eq!(
            dispatcher.route(&c1, &typing()),
            vec![Subscriber::ActiveSession]
        );
        assert_eq!(
            dispatcher.route(&c1, &ConnectionEvent::Connected),
            vec![Subscriber::ActiveSession]
        );
        assert!(dispatcher.route(&ChatId::new("c2"), &typing()).is_empty());
    }

    #[test]
    fn test_resubscribe_replaces() {
        let mut dispatcher = Dispatcher::new();
        let c1 = ChatId::new("c1");
        dispatcher.subscribe(&c1, Subscriber::ActiveSession, HandlerSet::ALL);
        dispatcher.subscribe(&c1, Subscriber::ActiveSession, HandlerSet::ALL);
        assert_eq!(dispatcher.route(&c1, &typing()).len(), 1);

        dispatcher.unsubscribe(&c1, Subscriber::ActiveSession);
        assert!(dispatcher.route(&c1, &typing()).is_empty());
        assert!(dispatcher.subscriptions(Subscriber::ActiveSession).is_empty());
    }

    #[test]
    fn test_retain() {
        let mut dispatcher = Dispatcher::new();
        let keep: HashSet<ChatId> = ["a", "b"].iter().map(|s| ChatId::new(*s)).collect();
        dispatcher.subscribe(&ChatId::new("z"), Subscriber::ContactList, HandlerSet::MESSAGES);
        dispatcher.subscribe(&ChatId::new("z"), Subscriber::ActiveSession, HandlerSet::ALL);

        dispatcher.retain(Subscriber::ContactList, &keep, HandlerSet::MESSAGES);
        assert_eq!(
            dispatcher.subscriptions(Subscriber::ContactList),
            vec![ChatId::new("a"), ChatId::new("b")]
        );
        assert_eq!(
            dispatcher.subscriptions(Subscriber::ActiveSession),
            vec![ChatId::new("z")]
        );
    }
}
