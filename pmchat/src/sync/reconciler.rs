//! Message reconciliation.
//!
//! Keeps one conversation's ordered message sequence consistent while
//! history snapshots, live events and optimistic local entries arrive in
//! any order.

use std::collections::HashSet;
use std::ops::Range;

use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use regex::{Regex, RegexBuilder};

use super::grouping::{group_by_day, DayGroup};
use crate::models::{ChatId, Message, MessageId, MessageRecord, UserId};

/// Outcome of applying a live message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A new entry was inserted.
    Inserted,
    /// The entry replaced an optimistic one.
    Confirmed { replaced: MessageId },
    /// An entry with the same id already existed.
    Duplicate,
    /// The record belongs to another conversation.
    Ignored,
}

#[derive(Debug, Clone)]
struct Search {
    query: String,
    pattern: Option<Regex>,
}

/// Reconciled message sequence for the active conversation.
#[derive(Debug, Clone)]
pub struct MessageReconciler {
    user_id: UserId,
    chat_id: Option<ChatId>,
    messages: Vec<Message>,
    search: Option<Search>,
    arrivals: u64,
}

impl MessageReconciler {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            chat_id: None,
            messages: Vec::new(),
            search: None,
            arrivals: 0,
        }
    }

    /// Switch to another conversation, discarding every entry.
    pub fn bind(&mut self, chat_id: Option<ChatId>) {
        self.chat_id = chat_id;
        self.messages.clear();
        self.search = None;
    }

    pub fn chat_id(&self) -> Option<&ChatId> {
        self.chat_id.as_ref()
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn next_arrival(&mut self) -> u64 {
        self.arrivals += 1;
        self.arrivals
    }

    fn belongs(&self, record: &MessageRecord) -> bool {
        self.chat_id.as_ref() == Some(&record.chat_id)
    }

    /// Replace the sequence with a server history snapshot.
    ///
    /// Optimistic entries the snapshot does not account for are kept so an
    /// in-flight send never disappears.
    pub fn apply_history(&mut self, records: &[MessageRecord], now: DateTime<Utc>) {
        let mut seen = HashSet::new();
        let mut next = Vec::with_capacity(records.len());

        for record in records {
            if !self.belongs(record) {
                debug!("Skipping history record {} for chat {}", record.id, record.chat_id);
                continue;
            }
            if !seen.insert(record.id.clone()) {
                continue;
            }
            let arrival = self.next_arrival();
            next.push(Message::from_record(record, &self.user_id, now, arrival));
        }

        let pending: Vec<Message> = std::mem::take(&mut self.messages)
            .into_iter()
            .filter(|m| m.is_pending())
            .collect();
        next.sort_by(|a, b| (a.created_at, a.arrival).cmp(&(b.created_at, b.arrival)));
        self.messages = next;

        for message in pending {
            let confirmed = records.iter().any(|r| {
                r.client_ref.as_deref() == Some(message.id.as_str())
                    || (r.is_from(&self.user_id) && r.message == message.text)
            });
            if !confirmed {
                self.insert_sorted(message);
            }
        }
    }

    /// Apply a live message.
    pub fn apply_incoming(&mut self, record: &MessageRecord, now: DateTime<Utc>) -> Applied {
        if !self.belongs(record) {
            return Applied::Ignored;
        }

        let replaced = self.take_optimistic(record);

        if self.messages.iter().any(|m| m.id == record.id) {
            return match replaced {
                Some(id) => Applied::Confirmed { replaced: id },
                None => Applied::Duplicate,
            };
        }

        let arrival = self.next_arrival();
        self.insert_sorted(Message::from_record(record, &self.user_id, now, arrival));
        match replaced {
            Some(id) => Applied::Confirmed { replaced: id },
            None => Applied::Inserted,
        }
    }

    /// Remove the optimistic entry `record` confirms, if any.
    ///
    /// Correlates by `client_ref` first, then by the oldest pending entry
    /// with the same text and direction.
    fn take_optimistic(&mut self, record: &MessageRecord) -> Option<MessageId> {
        let by_ref = record.client_ref.as_deref().and_then(|client_ref| {
            self.messages
                .iter()
                .position(|m| m.is_pending() && m.id.as_str() == client_ref)
        });
        let index = by_ref.or_else(|| {
            let outgoing = record.is_from(&self.user_id);
            self.messages
                .iter()
                .position(|m| m.is_pending() && m.is_outgoing == outgoing && m.text == record.message)
        })?;
        Some(self.messages.remove(index).id)
    }

    /// Insert a locally-originated entry. Returns its temporary id.
    pub fn apply_optimistic(&mut self, text: &str, now: DateTime<Utc>) -> MessageId {
        let arrival = self.next_arrival();
        let id = MessageId::temporary(now.timestamp_millis(), arrival);
        self.insert_sorted(Message::optimistic(id.clone(), text, now, arrival));
        id
    }

    /// Remove an entry by id.
    pub fn retract(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(index))
    }

    fn insert_sorted(&mut self, message: Message) {
        let key = (message.created_at, message.arrival);
        let index = self
            .messages
            .partition_point(|m| (m.created_at, m.arrival) <= key);
        self.messages.insert(index, message);
    }

    /// Set or clear the search query.
    pub fn set_search(&mut self, query: Option<&str>) {
        self.search = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| Search {
                query: q.to_owned(),
                pattern: RegexBuilder::new(&regex::escape(q))
                    .case_insensitive(true)
                    .build()
                    .ok(),
            });
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_ref().map(|s| s.query.as_str())
    }

    /// Whether `message` matches the active search.
    pub fn is_highlighted(&self, message: &Message) -> bool {
        self.search
            .as_ref()
            .and_then(|s| s.pattern.as_ref())
            .is_some_and(|pattern| pattern.is_match(&message.text))
    }

    /// Byte ranges of search matches within `message.text`.
    pub fn highlights(&self, message: &Message) -> Vec<Range<usize>> {
        match self.search.as_ref().and_then(|s| s.pattern.as_ref()) {
            Some(pattern) => pattern.find_iter(&message.text).map(|m| m.range()).collect(),
            None => Vec::new(),
        }
    }

    /// Messages grouped by local calendar day.
    pub fn groups<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<DayGroup<'_>> {
        group_by_day(&self.messages, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    const ME: &str = "me";
    const THEM: &str = "them";

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn record(id: &str, sender: &str, text: &str, at: i64) -> MessageRecord {
        MessageRecord {
            id: MessageId::new(id),
            chat_id: ChatId::new("c1"),
            sender_id: UserId::new(sender),
            message: text.to_owned(),
            kind: "normal".to_owned(),
            image: None,
            status: None,
            created_at: Some(t(at)),
            client_ref: None,
        }
    }

    fn bound() -> MessageReconciler {
        let mut reconciler = MessageReconciler::new(UserId::new(ME));
        reconciler.bind(Some(ChatId::new("c1")));
        reconciler
    }

    fn ids(reconciler: &MessageReconciler) -> Vec<&str> {
        reconciler.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_history_sorted_ascending() {
        let mut reconciler = bound();
        reconciler.apply_history(
            &[
                record("m3", THEM, "c", 30),
                record("m1", ME, "a", 10),
                record("m2", THEM, "b", 20),
            ],
            t(100),
        );
        assert_eq!(ids(&reconciler), vec!["m1", "m2", "m3"]);
        assert!(reconciler.messages()[0].is_outgoing);
        assert!(!reconciler.messages()[1].is_outgoing);
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let mut reconciler = bound();
        let m = record("m1", THEM, "hi", 10);
        assert_eq!(reconciler.apply_incoming(&m, t(11)), Applied::Inserted);
        assert_eq!(reconciler.apply_incoming(&m, t(12)), Applied::Duplicate);
        assert_eq!(ids(&reconciler), vec!["m1"]);

        reconciler.apply_history(&[m.clone(), m.clone()], t(13));
        assert_eq!(ids(&reconciler), vec!["m1"]);
    }

    #[test]
    fn test_echo_replaces_optimistic() {
        let mut reconciler = bound();
        let temp = reconciler.apply_optimistic("hello", t(5));
        assert!(temp.is_temporary());
        assert_eq!(reconciler.messages().len(), 1);

        let echo = record("m9", ME, "hello", 6);
        assert_eq!(
            reconciler.apply_incoming(&echo, t(6)),
            Applied::Confirmed { replaced: temp }
        );
        assert_eq!(ids(&reconciler), vec!["m9"]);
        assert!(!reconciler.messages()[0].is_pending());
    }

    #[test]
    fn test_echo_prefers_client_ref() {
        let mut reconciler = bound();
        let first = reconciler.apply_optimistic("ok", t(1));
        let second = reconciler.apply_optimistic("ok", t(2));

        let mut echo = record("m2", ME, "ok", 3);
        echo.client_ref = Some(second.as_str().to_owned());
        reconciler.apply_incoming(&echo, t(3));

        let remaining: Vec<&MessageId> = reconciler.messages().iter().map(|m| &m.id).collect();
        assert_eq!(remaining, vec![&first, &MessageId::new("m2")]);
    }

    #[test]
    fn test_repeated_text_confirms_oldest_first() {
        let mut reconciler = bound();
        let first = reconciler.apply_optimistic("ok", t(1));
        reconciler.apply_optimistic("ok", t(2));

        let echo = record("m1", ME, "ok", 1);
        assert_eq!(
            reconciler.apply_incoming(&echo, t(3)),
            Applied::Confirmed { replaced: first }
        );
        let pending = reconciler.messages().iter().filter(|m| m.is_pending()).count();
        assert_eq!(pending, 1);
        assert_eq!(reconciler.messages().len(), 2);
    }

    #[test]
    fn test_counterpart_text_does_not_confirm() {
        let mut reconciler = bound();
        reconciler.apply_optimistic("hi", t(1));
        let theirs = record("m1", THEM, "hi", 2);
        assert_eq!(reconciler.apply_incoming(&theirs, t(2)), Applied::Inserted);
        assert_eq!(reconciler.messages().len(), 2);
    }

    #[test]
    fn test_history_keeps_unconfirmed_optimistic() {
        let mut reconciler = bound();
        reconciler.apply_optimistic("sent", t(50));
        let pending = reconciler.apply_optimistic("still going", t(60));

        reconciler.apply_history(&[record("m1", THEM, "a", 10), record("m2", ME, "sent", 50)], t(61));
        assert_eq!(ids(&reconciler), vec!["m1", "m2", pending.as_str()]);
    }

    #[test]
    fn test_out_of_order_and_foreign() {
        let mut reconciler = bound();
        reconciler.apply_incoming(&record("m2", THEM, "b", 20), t(21));
        reconciler.apply_incoming(&record("m1", THEM, "a", 10), t(22));
        assert_eq!(ids(&reconciler), vec!["m1", "m2"]);

        let mut foreign = record("x", THEM, "other chat", 15);
        foreign.chat_id = ChatId::new("c2");
        assert_eq!(reconciler.apply_incoming(&foreign, t(23)), Applied::Ignored);
        assert_eq!(reconciler.messages().len(), 2);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut reconciler = bound();
        reconciler.apply_incoming(&record("b", THEM, "1", 10), t(11));
        reconciler.apply_incoming(&record("a", THEM, "2", 10), t(11));
        assert_eq!(ids(&reconciler), vec!["b", "a"]);
    }

    #[test]
    fn test_missing_timestamp_uses_receipt_time() {
        let mut reconciler = bound();
        let mut undated = record("m1", THEM, "a", 0);
        undated.created_at = None;
        reconciler.apply_incoming(&undated, t(42));
        assert_eq!(reconciler.messages()[0].created_at, t(42));
    }

    #[test]
    fn test_retract() {
        let mut reconciler = bound();
        let temp = reconciler.apply_optimistic("oops", t(1));
        assert!(reconciler.retract(&temp).is_some());
        assert!(reconciler.is_empty());
        assert!(reconciler.retract(&temp).is_none());
    }

    #[test]
    fn test_search_flags_and_ranges() {
        let mut reconciler = bound();
        reconciler.apply_history(
            &[record("m1", THEM, "Hello there, hello", 1), record("m2", ME, "bye", 2)],
            t(3),
        );
        reconciler.set_search(Some("HELLO"));

        let first = &reconciler.messages()[0];
        let second = &reconciler.messages()[1];
        assert!(reconciler.is_highlighted(first));
        assert!(!reconciler.is_highlighted(second));
        assert_eq!(reconciler.highlights(first), vec![0..5, 13..18]);
        assert_eq!(reconciler.messages().len(), 2);

        reconciler.set_search(Some("   "));
        assert_eq!(reconciler.search(), None);
        let first = &reconciler.messages()[0];
        assert!(!reconciler.is_highlighted(first));
    }

    #[test]
    fn test_highlight_flag_agrees_with_ranges() {
        let mut reconciler = bound();
        reconciler.apply_history(
            &[
                record("m1", THEM, "İstanbul", 1),
                record("m2", THEM, "KELVIN", 2),
                record("m3", THEM, "Straße", 3),
                record("m4", THEM, "ist", 4),
            ],
            t(5),
        );
        for query in ["i", "k", "ss", "ß", "İ", "IST"] {
            reconciler.set_search(Some(query));
            for message in reconciler.messages() {
                assert_eq!(
                    reconciler.is_highlighted(message),
                    !reconciler.highlights(message).is_empty(),
                    "query {query:?} on {:?}",
                    message.text
                );
            }
        }
    }

    #[test]
    fn test_search_escapes_pattern() {
        let mut reconciler = bound();
        reconciler.apply_history(&[record("m1", THEM, "price (approx.) 10$", 1)], t(2));
        reconciler.set_search(Some("(approx.)"));
        let message = &reconciler.messages()[0];
        assert_eq!(reconciler.highlights(message), vec![6..15]);
    }

    #[test]
    fn test_bind_clears() {
        let mut reconciler = bound();
        reconciler.apply_optimistic("x", t(1));
        reconciler.set_search(Some("x"));
        reconciler.bind(Some(ChatId::new("c2")));
        assert!(reconciler.is_empty());
        assert_eq!(reconciler.search(), None);
    }
}
