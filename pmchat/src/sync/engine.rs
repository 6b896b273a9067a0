//! Event loop driving the chat engine.
//!
//! One task owns every component. User commands, link events, timer
//! firings and REST completions are consumed one at a time; each input
//! is a single state transition followed by one [`Snapshot`] publication.

use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::config::EngineConfig;
use super::connection::ConnectionManager;
use super::contacts::ContactListCoordinator;
use super::dispatch::{Dispatcher, HandlerSet, Subscriber};
use super::grouping::display_timestamp;
use super::session::{ActiveSessionController, Deferred, SessionState, Timer};
use crate::api::{SessionDirectory, SessionPage, SessionQuery};
use crate::error::{Error, Result};
use crate::models::{ChatId, Contact, Placeholder, UserId, UNKNOWN_USER};
use crate::protocol::ServerEvent;
use crate::transport::{ConnectionEvent, RoutedEvent, Transport};

/// A message as shown in the conversation view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayMessage {
    pub id: String,
    pub text: String,
    pub is_outgoing: bool,
    pub created_at: DateTime<Utc>,
    /// "Now" or a relative phrase.
    pub timestamp: String,
    /// Still awaiting server confirmation.
    pub pending: bool,
    /// Matches the active search.
    pub highlighted: bool,
    /// Byte ranges of search matches in `text`.
    pub highlights: Vec<Range<usize>>,
}

/// A run of messages from one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayGroup {
    pub key: String,
    pub label: String,
    pub messages: Vec<DisplayMessage>,
}

/// Everything a front end needs to render.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub user_id: UserId,
    /// Conversations, most recently active first.
    pub contacts: Vec<Contact>,
    /// Stand-in entry while a session is being created.
    pub placeholder: Option<Placeholder>,
    pub active: Option<ChatId>,
    pub state: SessionState,
    /// Whether the active conversation has a live connection.
    pub connected: bool,
    pub groups: Vec<DisplayGroup>,
    pub counterpart_typing: bool,
    pub compose: String,
    pub search: Option<String>,
    pub loading_contacts: bool,
    /// Last failure worth telling the user about.
    pub error: Option<String>,
    pub total_unread: u32,
    /// Conversations with a realtime link.
    pub open_links: Vec<ChatId>,
}

impl Snapshot {
    /// List entry of the active conversation.
    pub fn active_contact(&self) -> Option<&Contact> {
        let active = self.active.as_ref()?;
        self.contacts.iter().find(|c| &c.chat_id == active)
    }

    /// All displayed messages in order.
    pub fn messages(&self) -> impl Iterator<Item = &DisplayMessage> {
        self.groups.iter().flat_map(|g| g.messages.iter())
    }
}

#[derive(Debug)]
enum Command {
    Refresh { search: Option<String> },
    Select(Option<ChatId>),
    OpenWith { receiver_id: UserId, name: Option<String> },
    Send { text: String, reply: oneshot::Sender<Result<()>> },
    Compose(String),
    Search(Option<String>),
    Shutdown,
}

#[derive(Debug)]
enum Internal {
    Timer(Timer),
    ListLoaded { generation: u64, result: Result<SessionPage> },
    SessionCreated { receiver_id: UserId, result: Result<ChatId> },
}

type Reply = (oneshot::Sender<Result<()>>, Result<()>);

/// Owns the chat components and runs their event loop.
pub struct ChatEngine {
    user_id: UserId,
    config: EngineConfig,
    directory: Arc<dyn SessionDirectory>,
    connections: ConnectionManager,
    dispatcher: Dispatcher,
    session: ActiveSessionController,
    contacts: ContactListCoordinator,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<RoutedEvent>,
    internal: mpsc::UnboundedReceiver<Internal>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    state: watch::Sender<Snapshot>,
    list_generation: u64,
    loading_contacts: bool,
    /// Deep link waiting for the list in flight to land.
    pending_open: Option<(UserId, Option<String>)>,
    /// Counterpart whose session creation is in flight.
    creating: Option<UserId>,
    error: Option<String>,
}

impl ChatEngine {
    /// Start the engine on the current tokio runtime.
    pub fn spawn(
        user_id: UserId,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn SessionDirectory>,
        config: EngineConfig,
    ) -> ChatHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (internal_tx, internal) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(Snapshot {
            user_id: user_id.clone(),
            ..Snapshot::default()
        });

        let engine = ChatEngine {
            session: ActiveSessionController::new(user_id.clone(), &config),
            connections: ConnectionManager::new(transport, events_tx),
            dispatcher: Dispatcher::new(),
            contacts: ContactListCoordinator::new(),
            user_id,
            config,
            directory,
            commands,
            events,
            internal,
            internal_tx,
            state,
            list_generation: 0,
            loading_contacts: false,
            pending_open: None,
            creating: None,
            error: None,
        };
        tokio::spawn(engine.run());

        ChatHandle {
            commands: commands_tx,
            state: state_rx,
        }
    }

    async fn run(mut self) {
        info!("Chat engine started for user {}", self.user_id);
        self.publish();

        loop {
            let mut reply = None;
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => reply = self.handle_command(command),
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(internal) = self.internal.recv() => self.handle_internal(internal),
            }
            self.publish();
            if let Some((tx, result)) = reply {
                let _ = tx.send(result);
            }
        }

        self.connections.shutdown();
        self.publish();
        info!("Chat engine stopped");
    }

    fn handle_command(&mut self, command: Command) -> Option<Reply> {
        match command {
            Command::Refresh { search } => {
                self.error = None;
                self.refresh(search);
            }
            Command::Select(chat_id) => {
                self.pending_open = None;
                self.creating = None;
                self.contacts.clear_placeholder();
                self.select(chat_id);
            }
            Command::OpenWith { receiver_id, name } => {
                self.error = None;
                self.open_with(receiver_id, name);
            }
            Command::Send { text, reply } => {
                let result = self.send(&text);
                return Some((reply, result));
            }
            Command::Compose(text) => {
                let deferred = self.session.compose(text, &self.connections);
                self.schedule(deferred);
            }
            Command::Search(query) => self.session.set_search(query.as_deref()),
            Command::Shutdown => {}
        }
        None
    }

    fn refresh(&mut self, search: Option<String>) {
        self.list_generation += 1;
        let generation = self.list_generation;
        self.loading_contacts = true;

        let query = SessionQuery {
            sort_key: self.config.sort_key.clone(),
            sort_value: self.config.sort_value.clone(),
            page: 1,
            limit: self.config.page_size,
            search: search.unwrap_or_default(),
        };
        debug!("Refreshing conversation list (generation {generation})");

        let directory = self.directory.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = directory.list_sessions(&query).await;
            let _ = tx.send(Internal::ListLoaded { generation, result });
        });
    }

    fn select(&mut self, chat_id: Option<ChatId>) {
        if let Some(previous) = self.session.chat_id() {
            if Some(previous) != chat_id.as_ref() {
                let previous = previous.clone();
                self.dispatcher.unsubscribe(&previous, Subscriber::ActiveSession);
            }
        }
        match &chat_id {
            Some(id) => {
                self.dispatcher.subscribe(id, Subscriber::ActiveSession, HandlerSet::ALL);
                self.contacts.on_select(id);
            }
            None => self.contacts.clear_active(),
        }
        let deferred = self.session.select(chat_id, &mut self.connections);
        self.schedule(deferred);
    }

    fn open_with(&mut self, receiver_id: UserId, name: Option<String>) {
        if receiver_id.is_empty() {
            self.error = Some("Cannot open a conversation without a counterpart".to_owned());
            return;
        }
        if self.loading_contacts {
            debug!("Deferring conversation with {receiver_id} until the list loads");
            self.pending_open = Some((receiver_id, name));
            return;
        }
        self.pending_open = None;
        if let Some(contact) = self.contacts.find_by_receiver(&receiver_id) {
            let chat_id = contact.chat_id.clone();
            self.creating = None;
            self.contacts.clear_placeholder();
            self.select(Some(chat_id));
            return;
        }

        self.select(None);
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_USER.to_owned());
        self.contacts.set_placeholder(Placeholder::new(receiver_id.clone(), name));
        self.creating = Some(receiver_id.clone());
        info!("Creating chat session with {receiver_id}");

        let directory = self.directory.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = directory.create_session(&receiver_id).await;
            let _ = tx.send(Internal::SessionCreated { receiver_id, result });
        });
    }

    fn send(&mut self, text: &str) -> Result<()> {
        let sent = self.session.send(text, &self.connections, Utc::now());
        match sent {
            Ok(sent) => {
                self.contacts.on_outgoing(&sent.chat_id, &sent.text);
                self.schedule(Some(sent.resync));
                Ok(())
            }
            Err(e) => {
                debug!("Send rejected: {e}");
                Err(e)
            }
        }
    }

    fn handle_event(&mut self, routed: RoutedEvent) {
        if !self.connections.accepts(&routed) {
            debug!(
                "Discarding event from stale link {} for chat {}",
                routed.link_id, routed.chat_id
            );
            return;
        }

        let RoutedEvent { chat_id, event, .. } = routed;
        if let ConnectionEvent::ConnectError(reason) = &event {
            debug!("Chat {chat_id} connect error: {reason}");
        }

        for target in self.dispatcher.route(&chat_id, &event) {
            match target {
                Subscriber::ActiveSession => self.deliver_to_session(&chat_id, &event),
                Subscriber::ContactList => self.deliver_to_contacts(&event),
            }
        }
    }

    fn deliver_to_session(&mut self, chat_id: &ChatId, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                let deferred = self.session.on_connected(chat_id);
                self.schedule(deferred);
            }
            ConnectionEvent::Disconnected | ConnectionEvent::ConnectError(_) => {
                self.session.on_disconnected(chat_id)
            }
            ConnectionEvent::Server(ServerEvent::ReceivedMessage(record)) => {
                self.session.on_message(record, Utc::now());
            }
            ConnectionEvent::Server(ServerEvent::ChatHistory(records)) => {
                self.session.on_history(chat_id, records, Utc::now());
            }
            ConnectionEvent::Server(ServerEvent::UserTyping { sender }) => {
                let deferred = self.session.on_typing(sender, Instant::now());
                self.schedule(deferred);
            }
            ConnectionEvent::Server(ServerEvent::UserStoppedTyping { sender }) => {
                self.session.on_stopped_typing(sender)
            }
            ConnectionEvent::Server(ServerEvent::UserDisconnected { client_id }) => {
                info!("Peer {client_id} disconnected from chat {chat_id}")
            }
        }
    }

    fn deliver_to_contacts(&mut self, event: &ConnectionEvent) {
        if let ConnectionEvent::Server(ServerEvent::ReceivedMessage(record)) = event {
            if record.is_from(&self.user_id) {
                self.contacts.on_outgoing(&record.chat_id, &record.message);
            } else {
                self.contacts.on_incoming(&record.chat_id, &record.message);
            }
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Timer(timer) => self.session.fire(timer, &self.connections),
            Internal::ListLoaded { generation, result } => {
                if generation != self.list_generation {
                    debug!("Ignoring stale list result (generation {generation})");
                    return;
                }
                self.loading_contacts = false;
                match result {
                    Ok(page) => {
                        let contacts = page
                            .items
                            .iter()
                            .map(|summary| summary.to_contact(&self.user_id))
                            .collect();
                        self.contacts.replace(contacts);
                        self.sync_background();
                    }
                    Err(e) => {
                        warn!("Failed to load conversations: {e}");
                        self.error = Some(format!("Failed to load conversations: {e}"));
                    }
                }
                if let Some((receiver_id, name)) = self.pending_open.take() {
                    self.open_with(receiver_id, name);
                }
            }
            Internal::SessionCreated { receiver_id, result } => {
                if self.creating.as_ref() != Some(&receiver_id) {
                    debug!("Ignoring session created with {receiver_id}: no longer wanted");
                    return;
                }
                self.creating = None;
                match result {
                    Ok(chat_id) => {
                        info!("Chat session {chat_id} ready with {receiver_id}");
                        self.contacts.clear_placeholder();
                        self.select(Some(chat_id));
                        self.refresh(None);
                    }
                    Err(e) => {
                        warn!("Failed to create chat session with {receiver_id}: {e}");
                        self.error = Some(format!("Failed to create chat session: {e}"));
                        self.contacts.clear_placeholder();
                        self.select(None);
                    }
                }
            }
        }
    }

    /// Keep one background link and subscription per listed conversation.
    fn sync_background(&mut self) {
        let desired = self.contacts.chat_ids();
        self.connections.reconcile(&desired);
        self.dispatcher
            .retain(Subscriber::ContactList, &desired, HandlerSet::MESSAGES);
    }

    fn schedule(&self, deferred: Option<Deferred>) {
        let Some(Deferred { after, timer }) = deferred else {
            return;
        };
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Internal::Timer(timer));
        });
    }

    fn publish(&self) {
        let now = Utc::now();
        let local = Local::now();
        let reconciler = self.session.reconciler();

        let groups = reconciler
            .groups(&local)
            .into_iter()
            .map(|group| DisplayGroup {
                key: group.key(),
                label: group.label.to_string(),
                messages: group
                    .messages
                    .into_iter()
                    .map(|m| DisplayMessage {
                        id: m.id.to_string(),
                        text: m.text.clone(),
                        is_outgoing: m.is_outgoing,
                        created_at: m.created_at,
                        timestamp: display_timestamp(m.created_at, now, self.config.now_threshold),
                        pending: m.is_pending(),
                        highlighted: reconciler.is_highlighted(m),
                        highlights: reconciler.highlights(m),
                    })
                    .collect(),
            })
            .collect();

        let active = self.session.chat_id().cloned();
        let snapshot = Snapshot {
            user_id: self.user_id.clone(),
            contacts: self.contacts.contacts().to_vec(),
            placeholder: self.contacts.placeholder().cloned(),
            connected: active
                .as_ref()
                .is_some_and(|id| self.connections.is_connected(id)),
            active,
            state: self.session.state(),
            groups,
            counterpart_typing: self.session.is_typing(Instant::now()),
            compose: self.session.compose_text().to_owned(),
            search: reconciler.search().map(str::to_owned),
            loading_contacts: self.loading_contacts,
            error: self.error.clone(),
            total_unread: self.contacts.total_unread(),
            open_links: self.connections.open_chats(),
        };
        self.state.send_replace(snapshot);
    }
}

/// Cloneable handle to a running [`ChatEngine`].
#[derive(Debug, Clone)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<Snapshot>,
}

impl ChatHandle {
    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    /// Reload the conversation list, optionally filtered by name.
    pub fn refresh(&self, search: Option<String>) -> Result<()> {
        self.command(Command::Refresh { search })
    }

    /// Open a conversation.
    pub fn select(&self, chat_id: impl Into<ChatId>) -> Result<()> {
        self.command(Command::Select(Some(chat_id.into())))
    }

    /// Open the conversation with `receiver_id`, creating it if needed.
    pub fn open_with(&self, receiver_id: impl Into<UserId>, name: Option<String>) -> Result<()> {
        self.command(Command::OpenWith {
            receiver_id: receiver_id.into(),
            name,
        })
    }

    /// Leave the open conversation.
    pub fn close_conversation(&self) -> Result<()> {
        self.command(Command::Select(None))
    }

    /// Send a message on the open conversation.
    ///
    /// Resolves once the message is on its way or was refused; the
    /// published snapshot already reflects the outcome.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            text: text.into(),
            reply,
        })?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Update the compose text.
    pub fn compose(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::Compose(text.into()))
    }

    /// Highlight messages containing `query`; `None` clears.
    pub fn search(&self, query: Option<String>) -> Result<()> {
        self.command(Command::Search(query))
    }

    /// Current state.
    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state.clone()
    }

    /// Stop the engine and close every link.
    pub fn shutdown(&self) {
        let _ = self.command(Command::Shutdown);
    }
}
