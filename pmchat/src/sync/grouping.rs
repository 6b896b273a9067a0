//! Day grouping and relative timestamps.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Serialize, Serializer};

use crate::models::Message;

/// Heading of a run of messages from the same calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayLabel {
    Today,
    Yesterday,
    On(NaiveDate),
}

impl DayLabel {
    /// Label for `date` relative to `today`.
    pub fn for_date(date: NaiveDate, today: NaiveDate) -> Self {
        if date == today {
            DayLabel::Today
        } else if today.pred_opt() == Some(date) {
            DayLabel::Yesterday
        } else {
            DayLabel::On(date)
        }
    }
}

impl fmt::Display for DayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayLabel::Today => f.write_str("Today"),
            DayLabel::Yesterday => f.write_str("Yesterday"),
            DayLabel::On(date) => write!(f, "{}", date.format("%d %b")),
        }
    }
}

impl Serialize for DayLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A contiguous run of messages sharing a day label.
#[derive(Debug, Clone, PartialEq)]
pub struct DayGroup<'a> {
    pub label: DayLabel,
    pub messages: Vec<&'a Message>,
}

impl DayGroup<'_> {
    /// Stable identity: label plus the first message id.
    pub fn key(&self) -> String {
        match self.messages.first() {
            Some(first) => format!("{}-{}", self.label, first.id),
            None => self.label.to_string(),
        }
    }
}

/// Group messages into contiguous runs by local calendar day.
///
/// Order is preserved. A label that reappears after a different one
/// starts a new group.
pub fn group_by_day<'a, Tz, I>(messages: I, now: &DateTime<Tz>) -> Vec<DayGroup<'a>>
where
    Tz: TimeZone,
    I: IntoIterator<Item = &'a Message>,
{
    let today = now.date_naive();
    let zone = now.timezone();
    let mut groups: Vec<DayGroup<'a>> = Vec::new();

    for message in messages {
        let date = message.created_at.with_timezone(&zone).date_naive();
        let label = DayLabel::for_date(date, today);
        match groups.last_mut() {
            Some(group) if group.label == label => group.messages.push(message),
            _ => groups.push(DayGroup {
                label,
                messages: vec![message],
            }),
        }
    }

    groups
}

/// Short timestamp shown beside a message.
///
/// "Now" below `threshold`, otherwise a relative phrase such as
/// "5 minutes ago".
pub fn display_timestamp(created_at: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> String {
    let elapsed = (now - created_at).num_seconds().max(0) as u64;
    if elapsed < threshold.as_secs() {
        return "Now".to_owned();
    }
    format!("{} ago", distance(elapsed))
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Approximate distance in words.
fn distance(seconds: u64) -> String {
    const MINUTES_IN_DAY: i64 = 1440;
    const MINUTES_IN_MONTH: i64 = 43_200;
    const MINUTES_IN_TWO_MONTHS: i64 = 86_400;

    let minutes = (seconds as f64 / 60.0).round() as i64;

    if minutes < 1 {
        "less than a minute".to_owned()
    } else if minutes < 45 {
        plural(minutes, "minute")
    } else if minutes < 90 {
        "about 1 hour".to_owned()
    } else if minutes < MINUTES_IN_DAY {
        let hours = (minutes as f64 / 60.0).round() as i64;
        format!("about {}", plural(hours, "hour"))
    } else if minutes < 2520 {
        "1 day".to_owned()
    } else if minutes < MINUTES_IN_MONTH {
        let days = (minutes as f64 / MINUTES_IN_DAY as f64).round() as i64;
        plural(days, "day")
    } else if minutes < MINUTES_IN_TWO_MONTHS {
        let months = (minutes as f64 / MINUTES_IN_MONTH as f64).round() as i64;
        format!("about {}", plural(months, "month"))
    } else {
        let months = minutes / MINUTES_IN_MONTH;
        if months < 12 {
            return plural(months, "month");
        }
        let years = months / 12;
        match months % 12 {
            0..=2 => format!("about {}", plural(years, "year")),
            3..=8 => format!("over {}", plural(years, "year")),
            _ => format!("almost {}", plural(years + 1, "year")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;
    use chrono::{Duration as Span, FixedOffset};
    use pretty_assertions::assert_eq;

    fn at(id: &str, created_at: DateTime<Utc>) -> Message {
        Message::optimistic(MessageId::new(id), id, created_at, 0)
    }

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_labels() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(DayLabel::for_date(today, today), DayLabel::Today);
        assert_eq!(
            DayLabel::for_date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(), today),
            DayLabel::Yesterday
        );
        let older = DayLabel::for_date(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(), today);
        assert_eq!(older.to_string(), "08 Jan");
    }

    #[test]
    fn test_contiguous_runs() {
        let now = utc(2024, 3, 1, 12);
        let messages = vec![
            at("a", utc(2024, 3, 1, 8)),
            at("b", utc(2024, 3, 1, 9)),
            at("c", utc(2024, 2, 29, 9)),
            at("d", utc(2024, 3, 1, 10)),
        ];

        let groups = group_by_day(&messages, &now);
        let shape: Vec<(String, usize)> = groups
            .iter()
            .map(|g| (g.label.to_string(), g.messages.len()))
            .collect();
        assert_eq!(
            shape,
            vec![
                ("Today".to_owned(), 2),
                ("Yesterday".to_owned(), 1),
                ("Today".to_owned(), 1),
            ]
        );
        assert_eq!(groups[0].key(), "Today-a");
        assert_eq!(groups[2].key(), "Today-d");
    }

    #[test]
    fn test_grouping_uses_local_day() {
        // 23:30 UTC on Feb 29 is already March 1 at UTC+2.
        let zone = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = zone.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let messages = vec![at("a", Utc.with_ymd_and_hms(2024, 2, 29, 23, 30, 0).unwrap())];

        let groups = group_by_day(&messages, &now);
        assert_eq!(groups[0].label, DayLabel::Today);
    }

    #[test]
    fn test_empty_input() {
        let groups = group_by_day(std::iter::empty(), &utc(2024, 3, 1, 12));
        assert!(groups.is_empty());
    }

    #[test]
    fn test_display_timestamp() {
        let now = utc(2024, 3, 1, 12);
        let threshold = Duration::from_secs(120);

        assert_eq!(display_timestamp(now, now, threshold), "Now");
        assert_eq!(display_timestamp(now - Span::seconds(119), now, threshold), "Now");
        assert_eq!(display_timestamp(now + Span::seconds(30), now, threshold), "Now");
        assert_eq!(
            display_timestamp(now - Span::seconds(120), now, threshold),
            "2 minutes ago"
        );
        assert_eq!(
            display_timestamp(now - Span::minutes(60), now, threshold),
            "about 1 hour ago"
        );
        assert_eq!(
            display_timestamp(now - Span::hours(5), now, threshold),
            "about 5 hours ago"
        );
        assert_eq!(display_timestamp(now - Span::hours(30), now, threshold), "1 day ago");
        assert_eq!(display_timestamp(now - Span::days(3), now, threshold), "3 days ago");
        assert_eq!(
            display_timestamp(now - Span::days(400), now, threshold),
            "about 1 year ago"
        );
    }
}
