//! Chat commands.

use std::collections::HashSet;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use pmchat::{ChatHandle, SessionState, Snapshot};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::build_authed_client;
use crate::handlers::chat as handlers;
use crate::output::{print_json_line, print_table, ContactRow, MessageRow, OutputFormat, PlainPrint};

#[derive(Subcommand)]
pub enum ChatAction {
    /// List conversations
    #[command(alias = "ls")]
    List {
        /// Filter by counterpart name
        #[arg(short, long)]
        search: Option<String>,
        /// Page number
        #[arg(short, long, default_value = "1")]
        page: u32,
        /// Page size
        #[arg(short, long, default_value = "100")]
        limit: u32,
    },

    /// Create (or look up) the conversation with a user
    Start {
        /// Counterpart user ID
        receiver_id: String,
    },

    /// Show the total unread count
    Unread,

    /// Open a conversation interactively
    Open {
        /// Conversation ID
        chat_id: String,
    },

    /// Open the conversation with a user, creating it if needed
    With {
        /// Counterpart user ID
        receiver_id: String,
        /// Display name while the conversation is created
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Keep every conversation connected and print list changes
    Watch,
}

pub async fn handle(action: ChatAction, format: OutputFormat, _verbose: bool) -> Result<()> {
    match action {
        ChatAction::List {
            search,
            page,
            limit,
        } => list_sessions(search.as_deref(), page, limit, format).await,
        ChatAction::Start { receiver_id } => start_session(&receiver_id, format).await,
        ChatAction::Unread => unread_count(format).await,
        ChatAction::Open { chat_id } => open_conversation(&chat_id, format).await,
        ChatAction::With { receiver_id, name } => open_with(&receiver_id, name, format).await,
        ChatAction::Watch => watch(format).await,
    }
}

async fn list_sessions(search: Option<&str>, page: u32, limit: u32, format: OutputFormat) -> Result<()> {
    let client = build_authed_client()?;
    let result = handlers::list_sessions(&client, search, page, limit).await?;

    if format == OutputFormat::Plain {
        println!(
            "Conversations (page {}/{}, {} total)\n",
            page,
            result.total_pages.max(1),
            result.total_count
        );
    }

    print_table(result.sessions, format);
    Ok(())
}

async fn start_session(receiver_id: &str, format: OutputFormat) -> Result<()> {
    let client = build_authed_client()?;
    let result = handlers::start_session(&client, receiver_id).await?;

    match format {
        OutputFormat::Json => print_json_line(&result),
        _ => println!(
            "Conversation with {} is {}",
            result.receiver_id.green(),
            result.chat_id.cyan()
        ),
    }
    Ok(())
}

async fn unread_count(format: OutputFormat) -> Result<()> {
    let client = build_authed_client()?;
    let result = handlers::unread_count(&client).await?;

    match format {
        OutputFormat::Json => print_json_line(&result),
        _ => println!("{} unread", result.unread),
    }
    Ok(())
}

async fn open_conversation(chat_id: &str, format: OutputFormat) -> Result<()> {
    let client = build_authed_client()?;
    let handle = client.connect()?;
    handle.refresh(None)?;
    handle.select(chat_id)?;
    run_conversation(handle, format).await
}

async fn open_with(receiver_id: &str, name: Option<String>, format: OutputFormat) -> Result<()> {
    let client = build_authed_client()?;
    let handle = client.connect()?;
    handle.refresh(None)?;
    handle.open_with(receiver_id, name)?;
    run_conversation(handle, format).await
}

/// A line typed in an open conversation.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Text(String),
    Search(String),
    ClearSearch,
    Quit,
    Empty,
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }
        match line.split_once(' ') {
            Some(("/search", query)) if !query.trim().is_empty() => {
                Input::Search(query.trim().to_owned())
            }
            _ => match line {
                "/quit" | "/q" => Input::Quit,
                "/clear" | "/search" => Input::ClearSearch,
                _ => Input::Text(line.to_owned()),
            },
        }
    }
}

async fn run_conversation(handle: ChatHandle, format: OutputFormat) -> Result<()> {
    if format != OutputFormat::Json {
        eprintln!("{}", "Type a message and press enter. /search <text>, /clear, /quit".dimmed());
    }

    let mut updates = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = ConversationView::default();
    render(view.update(&updates.borrow_and_update()), format);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                render(view.update(&snapshot), format);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match Input::parse(&line) {
                    Input::Quit => break,
                    Input::Empty => {}
                    Input::Search(query) => handle.search(Some(query))?,
                    Input::ClearSearch => handle.search(None)?,
                    Input::Text(text) => {
                        if let Err(e) = handle.send(text).await {
                            eprintln!("{} {}", "Not sent:".red(), e);
                        }
                    }
                }
            }
        }
    }

    handle.shutdown();
    Ok(())
}

/// Something new to show in an open conversation.
#[derive(Debug, Clone)]
enum ViewLine {
    Status(String),
    Error(String),
    Label(String),
    Message(MessageRow),
    Typing(String, bool),
    SearchResults(String, Vec<MessageRow>),
    SearchCleared,
}

/// Tracks what was already printed so each snapshot only prints news.
#[derive(Debug, Default)]
struct ConversationView {
    printed: HashSet<String>,
    pending_texts: Vec<String>,
    last_label: Option<String>,
    connected: bool,
    ready: bool,
    typing: bool,
    search: Option<String>,
    error: Option<String>,
}

impl ConversationView {
    fn update(&mut self, snapshot: &Snapshot) -> Vec<ViewLine> {
        let mut out = Vec::new();
        let counterpart = snapshot
            .active_contact()
            .map(|c| c.name.clone())
            .or_else(|| snapshot.placeholder.as_ref().map(|p| p.name.clone()))
            .unwrap_or_else(|| "Them".to_owned());

        if snapshot.error != self.error {
            if let Some(error) = &snapshot.error {
                out.push(ViewLine::Error(error.clone()));
            }
            self.error = snapshot.error.clone();
        }

        if snapshot.active.is_some() && snapshot.connected != self.connected {
            out.push(ViewLine::Status(if snapshot.connected {
                format!("Connected to {counterpart}")
            } else {
                "Disconnected, reconnecting...".to_owned()
            }));
            self.connected = snapshot.connected;
        }

        let ready = snapshot.state == SessionState::Ready;
        if ready && !self.ready && snapshot.messages().next().is_none() {
            out.push(ViewLine::Status("No messages yet".to_owned()));
        }
        self.ready = ready;

        for group in &snapshot.groups {
            for message in &group.messages {
                if self.printed.contains(&message.id) {
                    continue;
                }
                self.printed.insert(message.id.clone());

                if !message.pending && message.is_outgoing {
                    if let Some(i) = self.pending_texts.iter().position(|t| t == &message.text) {
                        // Already shown while it was being sent.
                        self.pending_texts.remove(i);
                        continue;
                    }
                }
                if self.last_label.as_ref() != Some(&group.label) {
                    out.push(ViewLine::Label(group.label.clone()));
                    self.last_label = Some(group.label.clone());
                }
                if message.pending {
                    self.pending_texts.push(message.text.clone());
                }
                out.push(ViewLine::Message(MessageRow::new(message, &counterpart)));
            }
        }
        // Drop sends that were rolled back.
        let still_pending: Vec<&str> = snapshot
            .messages()
            .filter(|m| m.pending)
            .map(|m| m.text.as_str())
            .collect();
        self.pending_texts
            .retain(|t| still_pending.contains(&t.as_str()));

        if snapshot.counterpart_typing != self.typing {
            self.typing = snapshot.counterpart_typing;
            out.push(ViewLine::Typing(counterpart.clone(), self.typing));
        }

        if snapshot.search != self.search {
            self.search = snapshot.search.clone();
            out.push(match &self.search {
                Some(query) => ViewLine::SearchResults(
                    query.clone(),
                    snapshot
                        .messages()
                        .filter(|m| m.highlighted)
                        .map(|m| MessageRow::new(m, &counterpart))
                        .collect(),
                ),
                None => ViewLine::SearchCleared,
            });
        }

        out
    }
}

fn render(lines: Vec<ViewLine>, format: OutputFormat) {
    for line in lines {
        match (line, format) {
            (ViewLine::Message(row), OutputFormat::Json) => print_json_line(&row),
            (ViewLine::Message(row), _) => row.plain_print(),
            (ViewLine::Label(label), OutputFormat::Json) => {
                eprintln!("-- {label} --");
            }
            (ViewLine::Label(label), _) => println!("\n{}", format!("-- {label} --").bold()),
            (ViewLine::Status(status), _) => eprintln!("{}", status.dimmed()),
            (ViewLine::Error(error), _) => eprintln!("{}", error.red()),
            (ViewLine::Typing(who, true), _) => eprintln!("{}", format!("{who} is typing...").italic()),
            (ViewLine::Typing(_, false), _) => {}
            (ViewLine::SearchResults(query, rows), OutputFormat::Json) => {
                eprintln!("{} match(es) for \"{query}\"", rows.len());
                for row in rows {
                    print_json_line(&row);
                }
            }
            (ViewLine::SearchResults(query, rows), _) => {
                println!("{}", format!("{} match(es) for \"{query}\"", rows.len()).yellow());
                for row in rows {
                    row.plain_print();
                }
            }
            (ViewLine::SearchCleared, _) => eprintln!("{}", "Search cleared".dimmed()),
        }
    }
}

async fn watch(format: OutputFormat) -> Result<()> {
    let client = build_authed_client()?;
    let handle = client.connect()?;
    handle.refresh(None)?;

    let mut updates = handle.subscribe();
    let mut last: Option<Vec<ContactRow>> = None;
    let mut last_error: Option<String> = None;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.error != last_error {
                    if let Some(error) = &snapshot.error {
                        eprintln!("{}", error.red());
                    }
                    last_error = snapshot.error.clone();
                }
                if snapshot.loading_contacts {
                    continue;
                }
                let rows: Vec<ContactRow> = snapshot.contacts.iter().map(ContactRow::from).collect();
                if last.as_ref() == Some(&rows) {
                    continue;
                }
                if format == OutputFormat::Plain {
                    println!(
                        "\n{} ({} unread, {} connected)",
                        "Conversations".bold(),
                        snapshot.total_unread,
                        snapshot.open_links.len()
                    );
                }
                print_table(rows.clone(), format);
                last = Some(rows);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pmchat::{ChatId, Contact, DisplayGroup, DisplayMessage};

    #[test]
    fn test_parse_input() {
        assert_eq!(Input::parse("  hello there "), Input::Text("hello there".to_owned()));
        assert_eq!(Input::parse("/search  invoice "), Input::Search("invoice".to_owned()));
        assert_eq!(Input::parse("/search"), Input::ClearSearch);
        assert_eq!(Input::parse("/clear"), Input::ClearSearch);
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("   "), Input::Empty);
    }

    fn message(id: &str, text: &str, outgoing: bool, pending: bool) -> DisplayMessage {
        DisplayMessage {
            id: id.to_owned(),
            text: text.to_owned(),
            is_outgoing: outgoing,
            created_at: Utc::now(),
            timestamp: "Now".to_owned(),
            pending,
            highlighted: false,
            highlights: Vec::new(),
        }
    }

    fn snapshot(messages: Vec<DisplayMessage>) -> Snapshot {
        Snapshot {
            active: Some(ChatId::new("c1")),
            contacts: vec![Contact {
                chat_id: ChatId::new("c1"),
                receiver_id: "u2".into(),
                name: "Kari".to_owned(),
                avatar: None,
                last_message: String::new(),
                unread_count: 0,
            }],
            connected: true,
            state: SessionState::Ready,
            groups: vec![DisplayGroup {
                key: "Today-x".to_owned(),
                label: "Today".to_owned(),
                messages,
            }],
            ..Snapshot::default()
        }
    }

    fn texts(lines: &[ViewLine]) -> Vec<String> {
        lines
            .iter()
            .filter_map(|l| match l {
                ViewLine::Message(row) => Some(format!("{}:{}", row.from, row.text)),
                ViewLine::Label(label) => Some(format!("#{label}")),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_view_prints_each_message_once() {
        let mut view = ConversationView::default();
        let first = view.update(&snapshot(vec![message("m1", "hei", false, false)]));
        assert_eq!(texts(&first), vec!["#Today", "Kari:hei"]);

        let second = view.update(&snapshot(vec![
            message("m1", "hei", false, false),
            message("temp-1", "hallo", true, true),
        ]));
        assert_eq!(texts(&second), vec!["You:hallo"]);

        // Confirmation replaces the pending entry without printing it again.
        let third = view.update(&snapshot(vec![
            message("m1", "hei", false, false),
            message("m2", "hallo", true, false),
        ]));
        assert!(texts(&third).is_empty());
    }

    #[test]
    fn test_view_reports_typing_and_search() {
        let mut view = ConversationView::default();
        view.update(&snapshot(vec![]));

        let mut typing = snapshot(vec![]);
        typing.counterpart_typing = true;
        let lines = view.update(&typing);
        assert!(matches!(lines.as_slice(), [ViewLine::Typing(who, true)] if who == "Kari"));

        let mut found = message("m1", "invoice", false, false);
        found.highlighted = true;
        let mut searched = snapshot(vec![found]);
        searched.search = Some("inv".to_owned());
        let lines = view.update(&searched);
        assert!(lines
            .iter()
            .any(|l| matches!(l, ViewLine::SearchResults(q, rows) if q == "inv" && rows.len() == 1)));
    }
}
