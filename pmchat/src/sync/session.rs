//! The open conversation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use tokio::time::Instant;

use super::config::EngineConfig;
use super::connection::ConnectionManager;
use super::reconciler::{Applied, MessageReconciler};
use super::typing::{StopTypingDebounce, TypingIndicator};
use crate::error::{Error, Result, SendRejection};
use crate::models::{ChatId, MessageId, MessageRecord, UserId};
use crate::protocol::{ClientEvent, SendMessage};

/// Lifecycle of the open conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing selected.
    #[default]
    Idle,
    /// Selected, connection not confirmed.
    Connecting,
    /// Connected, history requested.
    HistoryPending,
    /// History received at least once.
    Ready,
}

impl SessionState {
    /// Whether messages are still loading.
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::HistoryPending)
    }
}

/// Work the controller wants done later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    /// Ask for the history of `chat_id`.
    RequestHistory { chat_id: ChatId },
    /// The counterpart typing notice ran out.
    TypingExpired { generation: u64 },
    /// The local user paused typing long enough.
    StopTyping { chat_id: ChatId, generation: u64 },
}

/// A timer to arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferred {
    pub after: Duration,
    pub timer: Timer,
}

/// A message that reached the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub chat_id: ChatId,
    pub temp_id: MessageId,
    pub text: String,
    /// History re-request that reconciles with the server.
    pub resync: Deferred,
}

/// State machine over the selected conversation.
#[derive(Debug)]
pub struct ActiveSessionController {
    user_id: UserId,
    settle_delay: Duration,
    resync_delay: Duration,
    stop_typing_delay: Duration,
    chat_id: Option<ChatId>,
    state: SessionState,
    history_loaded_for: Option<ChatId>,
    sending: bool,
    compose: String,
    reconciler: MessageReconciler,
    typing: TypingIndicator,
    stop_typing: StopTypingDebounce,
}

impl ActiveSessionController {
    pub fn new(user_id: UserId, config: &EngineConfig) -> Self {
        Self {
            reconciler: MessageReconciler::new(user_id.clone()),
            user_id,
            settle_delay: config.history_settle_delay,
            resync_delay: config.resync_delay,
            stop_typing_delay: config.stop_typing_delay,
            chat_id: None,
            state: SessionState::Idle,
            history_loaded_for: None,
            sending: false,
            compose: String::new(),
            typing: TypingIndicator::new(config.typing_timeout),
            stop_typing: StopTypingDebounce::default(),
        }
    }

    pub fn chat_id(&self) -> Option<&ChatId> {
        self.chat_id.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn reconciler(&self) -> &MessageReconciler {
        &self.reconciler
    }

    pub fn compose_text(&self) -> &str {
        &self.compose
    }

    pub fn is_typing(&self, now: Instant) -> bool {
        self.typing.is_typing(now)
    }

    fn is_current(&self, chat_id: &ChatId) -> bool {
        self.chat_id.as_ref() == Some(chat_id)
    }

    fn history_loaded(&self) -> bool {
        self.chat_id.is_some() && self.history_loaded_for == self.chat_id
    }

    /// Select a conversation, or clear the selection with `None`.
    ///
    /// Re-selecting the current conversation changes nothing.
    pub fn select(&mut self, chat_id: Option<ChatId>, conns: &mut ConnectionManager) -> Option<Deferred> {
        if self.chat_id == chat_id {
            return None;
        }

        self.reconciler.bind(chat_id.clone());
        self.typing.reset();
        self.stop_typing.cancel();
        self.compose.clear();
        self.sending = false;
        self.history_loaded_for = None;

        conns.set_active(chat_id.as_ref());
        self.chat_id = chat_id;

        match self.chat_id.clone() {
            None => {
                self.state = SessionState::Idle;
                None
            }
            Some(chat_id) => {
                self.state = SessionState::Connecting;
                if conns.is_connected(&chat_id) {
                    self.on_connected(&chat_id)
                } else {
                    None
                }
            }
        }
    }

    /// The link for `chat_id` came up.
    pub fn on_connected(&mut self, chat_id: &ChatId) -> Option<Deferred> {
        if !self.is_current(chat_id) || self.history_loaded() {
            return None;
        }
        Some(Deferred {
            after: self.settle_delay,
            timer: Timer::RequestHistory {
                chat_id: chat_id.clone(),
            },
        })
    }

    /// The link for `chat_id` went down.
    pub fn on_disconnected(&mut self, chat_id: &ChatId) {
        if self.is_current(chat_id) && self.state == SessionState::HistoryPending {
            self.state = SessionState::Connecting;
        }
    }

    /// Ask the server for the current conversation's history.
    ///
    /// No-op unless connected.
    pub fn request_history(&mut self, conns: &ConnectionManager) -> bool {
        let Some(chat_id) = self.chat_id.clone() else {
            return false;
        };
        if !conns.is_connected(&chat_id) {
            debug!("Skipping history request for chat {chat_id}: not connected");
            return false;
        }
        match conns.emit(ClientEvent::history(chat_id.clone())) {
            Ok(()) => {
                if self.state == SessionState::Connecting {
                    self.state = SessionState::HistoryPending;
                }
                true
            }
            Err(e) => {
                debug!("History request for chat {chat_id} failed: {e}");
                false
            }
        }
    }

    /// A history payload arrived on `chat_id`'s link.
    pub fn on_history(&mut self, chat_id: &ChatId, records: &[MessageRecord], now: DateTime<Utc>) -> bool {
        if !self.is_current(chat_id) {
            debug!("Discarding history for inactive chat {chat_id}");
            return false;
        }
        self.reconciler.apply_history(records, now);
        self.history_loaded_for = Some(chat_id.clone());
        self.state = SessionState::Ready;
        true
    }

    /// A live message arrived.
    pub fn on_message(&mut self, record: &MessageRecord, now: DateTime<Utc>) -> Applied {
        if !self.is_current(&record.chat_id) {
            return Applied::Ignored;
        }
        self.reconciler.apply_incoming(record, now)
    }

    /// A typing notice arrived. Own echoes are ignored.
    pub fn on_typing(&mut self, sender: &UserId, now: Instant) -> Option<Deferred> {
        if sender == &self.user_id || self.chat_id.is_none() {
            return None;
        }
        let generation = self.typing.on_typing(now);
        Some(Deferred {
            after: self.typing.timeout(),
            timer: Timer::TypingExpired { generation },
        })
    }

    /// A stopped-typing notice arrived.
    pub fn on_stopped_typing(&mut self, sender: &UserId) {
        if sender != &self.user_id {
            self.typing.on_stopped();
        }
    }

    /// A timer armed earlier fired.
    pub fn fire(&mut self, timer: Timer, conns: &ConnectionManager) {
        match timer {
            Timer::RequestHistory { chat_id } => {
                if self.is_current(&chat_id) {
                    self.request_history(conns);
                } else {
                    debug!("Dropping history timer for inactive chat {chat_id}");
                }
            }
            Timer::TypingExpired { generation } => {
                self.typing.expire(generation);
            }
            Timer::StopTyping { chat_id, generation } => {
                if self.stop_typing.fire(generation) && self.is_current(&chat_id) {
                    let event = ClientEvent::stopped_typing(chat_id, self.user_id.clone());
                    if let Err(e) = conns.emit(event) {
                        debug!("Stopped-typing signal not sent: {e}");
                    }
                }
            }
        }
    }

    /// Send `text` on the current conversation.
    ///
    /// The optimistic entry is visible before the emit result is known;
    /// a refused emit removes it again and restores the compose text.
    pub fn send(&mut self, text: &str, conns: &ConnectionManager, now: DateTime<Utc>) -> Result<Sent> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::SendRejected(SendRejection::EmptyText));
        }
        let chat_id = self
            .chat_id
            .clone()
            .ok_or(Error::SendRejected(SendRejection::NoConversation))?;
        if self.sending {
            return Err(Error::SendRejected(SendRejection::InFlight));
        }
        if !conns.is_connected(&chat_id) {
            return Err(Error::SendRejected(SendRejection::NotConnected));
        }

        self.sending = true;
        let previous_compose = std::mem::take(&mut self.compose);
        let temp_id = self.reconciler.apply_optimistic(text, now);
        let payload = SendMessage::text(chat_id.clone(), self.user_id.clone(), text)
            .with_client_ref(temp_id.as_str());
        let result = conns.emit(ClientEvent::SendMessage(payload));
        self.sending = false;

        if let Err(e) = result {
            warn!("Send on chat {chat_id} failed: {e}");
            self.reconciler.retract(&temp_id);
            self.compose = if previous_compose.is_empty() {
                text.to_owned()
            } else {
                previous_compose
            };
            return Err(Error::SendRejected(SendRejection::Transport));
        }

        Ok(Sent {
            resync: Deferred {
                after: self.resync_delay,
                timer: Timer::RequestHistory {
                    chat_id: chat_id.clone(),
                },
            },
            chat_id,
            temp_id,
            text: text.to_owned(),
        })
    }

    /// The compose text changed.
    ///
    /// Non-empty text signals typing; every change re-arms the stop timer.
    pub fn compose(&mut self, text: String, conns: &ConnectionManager) -> Option<Deferred> {
        let typing = !text.trim().is_empty();
        self.compose = text;
        let chat_id = self.chat_id.clone()?;

        if typing {
            if let Err(e) = conns.emit(ClientEvent::typing(chat_id.clone(), self.user_id.clone())) {
                debug!("Typing signal not sent: {e}");
            }
        }
        let generation = self.stop_typing.keystroke();
        Some(Deferred {
            after: self.stop_typing_delay,
            timer: Timer::StopTyping { chat_id, generation },
        })
    }

    /// Set or clear the message search.
    pub fn set_search(&mut self, query: Option<&str>) {
        self.reconciler.set_search(query);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, RoutedEvent};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const ME: &str = "me";

    struct Fixture {
        session: ActiveSessionController,
        conns: ConnectionManager,
        transport: MemoryTransport,
        _rx: mpsc::UnboundedReceiver<RoutedEvent>,
    }

    fn fixture() -> Fixture {
        let transport = MemoryTransport::new();
        let (sink, rx) = mpsc::unbounded_channel();
        Fixture {
            session: ActiveSessionController::new(UserId::new(ME), &EngineConfig::default()),
            conns: ConnectionManager::new(Arc::new(transport.clone()), sink),
            transport,
            _rx: rx,
        }
    }

    fn record(id: &str, chat: &str, sender: &str, text: &str) -> MessageRecord {
        MessageRecord {
            id: MessageId::new(id),
            chat_id: ChatId::new(chat),
            sender_id: UserId::new(sender),
            message: text.to_owned(),
            kind: "normal".to_owned(),
            image: None,
            status: None,
            created_at: None,
            client_ref: None,
        }
    }

    fn c1() -> ChatId {
        ChatId::new("c1")
    }

    #[test]
    fn test_state_machine() {
        let mut f = fixture();
        assert_eq!(f.session.state(), SessionState::Idle);

        assert_eq!(f.session.select(Some(c1()), &mut f.conns), None);
        assert_eq!(f.session.state(), SessionState::Connecting);
        assert_eq!(f.transport.open_count(&c1()), 1);

        f.transport.connect(&c1());
        let deferred = f.session.on_connected(&c1()).unwrap();
        assert_eq!(deferred.after, Duration::from_millis(500));
        assert_eq!(deferred.timer, Timer::RequestHistory { chat_id: c1() });

        f.session.fire(deferred.timer, &f.conns);
        assert_eq!(f.session.state(), SessionState::HistoryPending);
        assert_eq!(f.transport.emitted(&c1()), vec![ClientEvent::history(c1())]);

        assert!(f.session.on_history(&c1(), &[record("m1", "c1", "u2", "hi")], Utc::now()));
        assert_eq!(f.session.state(), SessionState::Ready);

        // Reconnect within the same selection does not re-fetch.
        f.session.on_disconnected(&c1());
        assert_eq!(f.session.state(), SessionState::Ready);
        assert_eq!(f.session.on_connected(&c1()), None);

        f.session.select(None, &mut f.conns);
        assert_eq!(f.session.state(), SessionState::Idle);
        assert!(f.session.reconciler().is_empty());
        assert_eq!(f.transport.open_count(&c1()), 0);
    }

    #[test]
    fn test_select_already_connected_schedules_history() {
        let mut f = fixture();
        f.conns.reconcile(&[c1()].into_iter().collect());
        f.transport.connect(&c1());

        let deferred = f.session.select(Some(c1()), &mut f.conns);
        assert_eq!(
            deferred.map(|d| d.timer),
            Some(Timer::RequestHistory { chat_id: c1() })
        );
    }

    #[test]
    fn test_stale_history_discarded() {
        let mut f = fixture();
        f.session.select(Some(c1()), &mut f.conns);
        f.session.select(Some(ChatId::new("c2")), &mut f.conns);

        assert!(!f.session.on_history(&c1(), &[record("m1", "c1", "u2", "old")], Utc::now()));
        assert!(f.session.reconciler().is_empty());
        assert_eq!(f.session.state(), SessionState::Connecting);

        // A timer armed for the old conversation does nothing.
        f.session.fire(Timer::RequestHistory { chat_id: c1() }, &f.conns);
        assert!(f.transport.emitted(&c1()).is_empty());
    }

    #[test]
    fn test_send_while_disconnected_leaves_list_unchanged() {
        let mut f = fixture();
        f.session.select(Some(c1()), &mut f.conns);

        let err = f.session.send("hello", &f.conns, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::SendRejected(SendRejection::NotConnected)));
        assert!(f.session.reconciler().is_empty());
    }

    #[test]
    fn test_send_rejections() {
        let mut f = fixture();
        let err = f.session.send("hello", &f.conns, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::SendRejected(SendRejection::NoConversation)));

        f.session.select(Some(c1()), &mut f.conns);
        f.transport.connect(&c1());
        let err = f.session.send("   ", &f.conns, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::SendRejected(SendRejection::EmptyText)));
        assert!(f.transport.emitted(&c1()).is_empty());
    }

    #[test]
    fn test_send_success() {
        let mut f = fixture();
        f.session.select(Some(c1()), &mut f.conns);
        f.transport.connect(&c1());
        f.session.compose("hello ".to_owned(), &f.conns);

        let sent = f.session.send(" hello ", &f.conns, Utc::now()).unwrap();
        assert_eq!(sent.text, "hello");
        assert_eq!(sent.resync.timer, Timer::RequestHistory { chat_id: c1() });
        assert_eq!(f.session.compose_text(), "");

        let messages = f.session.reconciler().messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_pending());

        let emitted = f.transport.emitted(&c1());
        let Some(ClientEvent::SendMessage(payload)) = emitted.last() else {
            panic!("expected a sendMessage, got {emitted:?}");
        };
        assert_eq!(payload.message, "hello");
        assert_eq!(payload.sender, UserId::new(ME));
        assert_eq!(payload.client_ref.as_deref(), Some(sent.temp_id.as_str()));

        let echo = record("m1", "c1", ME, "hello");
        assert_eq!(
            f.session.on_message(&echo, Utc::now()),
            Applied::Confirmed { replaced: sent.temp_id }
        );
        assert_eq!(f.session.reconciler().messages().len(), 1);
    }

    #[test]
    fn test_send_refused_rolls_back() {
        let mut f = fixture();
        f.session.select(Some(c1()), &mut f.conns);
        f.transport.connect(&c1());
        f.transport.refuse_sends(true);

        let err = f.session.send("keep me", &f.conns, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::SendRejected(SendRejection::Transport)));
        assert!(f.session.reconciler().is_empty());
        assert_eq!(f.session.compose_text(), "keep me");
    }

    #[test]
    fn test_own_typing_ignored() {
        let mut f = fixture();
        f.session.select(Some(c1()), &mut f.conns);
        let now = Instant::now();

        assert_eq!(f.session.on_typing(&UserId::new(ME), now), None);
        assert!(!f.session.is_typing(now));

        let deferred = f.session.on_typing(&UserId::new("u2"), now).unwrap();
        assert_eq!(deferred.after, Duration::from_millis(3000));
        assert!(f.session.is_typing(now));

        f.session.on_stopped_typing(&UserId::new("u2"));
        assert!(!f.session.is_typing(now));
    }

    #[test]
    fn test_compose_debounces_stop_signal() {
        let mut f = fixture();
        f.session.select(Some(c1()), &mut f.conns);
        f.transport.connect(&c1());

        let first = f.session.compose("h".to_owned(), &f.conns).unwrap();
        let second = f.session.compose("hi".to_owned(), &f.conns).unwrap();
        assert_eq!(second.after, Duration::from_millis(2000));

        f.session.fire(first.timer, &f.conns);
        f.session.fire(second.timer, &f.conns);

        let emitted = f.transport.emitted(&c1());
        assert_eq!(
            emitted,
            vec![
                ClientEvent::typing(c1(), UserId::new(ME)),
                ClientEvent::typing(c1(), UserId::new(ME)),
                ClientEvent::stopped_typing(c1(), UserId::new(ME)),
            ]
        );
    }

    #[test]
    fn test_switch_resets_transient_state() {
        let mut f = fixture();
        f.session.select(Some(c1()), &mut f.conns);
        f.session.compose("draft".to_owned(), &f.conns);
        f.session.set_search(Some("x"));
        f.session.on_typing(&UserId::new("u2"), Instant::now());

        f.session.select(Some(ChatId::new("c2")), &mut f.conns);
        assert_eq!(f.session.compose_text(), "");
        assert_eq!(f.session.reconciler().search(), None);
        assert!(!f.session.is_typing(Instant::now()));
        assert_eq!(f.session.state(), SessionState::Connecting);
    }
}
