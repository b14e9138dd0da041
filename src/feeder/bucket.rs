use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;

use crate::feeder::destination::DestinationStyle;
use crate::feeder::model::Message;
use crate::feeder::window::{SECONDS_PER_DAY, Window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Daily,
    Monthly,
}

/// Calendar day or month in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketKey {
    Day(NaiveDate),
    Month { year: i32, month: u32 },
}

impl BucketKey {
    /// `YYYYMMDD` for days, `YYYY-MM` for months.
    pub fn compact(&self) -> String {
        match self {
            Self::Day(date) => date.format("%Y%m%d").to_string(),
            Self::Month { year, month } => format!("{year:04}-{month:02}"),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Day(date) => date.format("%Y-%m-%d").to_string(),
            Self::Month { year, month } => format!("{year:04}-{month:02}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub key: BucketKey,
    pub messages: Vec<Message>,
}

fn key_for(message: &Message, granularity: Granularity) -> BucketKey {
    let date = message.ts.to_utc().date_naive();
    match granularity {
        Granularity::Daily => BucketKey::Day(date),
        Granularity::Monthly => BucketKey::Month {
            year: date.year(),
            month: date.month(),
        },
    }
}

/// Partition messages into chronological buckets, each ascending by timestamp.
pub fn group(messages: &[Message], granularity: Granularity) -> Vec<Bucket> {
    let mut buckets: BTreeMap<BucketKey, Vec<Message>> = BTreeMap::new();
    for message in messages {
        buckets
            .entry(key_for(message, granularity))
            .or_default()
            .push(message.clone());
    }
    buckets
        .into_iter()
        .map(|(key, mut messages)| {
            messages.sort_by_key(|m| m.ts);
            Bucket { key, messages }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub message_threshold: usize,
    pub date_range_days: u64,
}

/// Monthly buckets only for file-style destinations with large exports.
pub fn plan_granularity(
    style: DestinationStyle,
    messages: &[Message],
    window: &Window,
    policy: &ChunkPolicy,
) -> Granularity {
    if style == DestinationStyle::Doc || messages.is_empty() {
        return Granularity::Daily;
    }
    if messages.len() > policy.message_threshold {
        return Granularity::Monthly;
    }

    let span_days = window.span_days().or_else(|| {
        let first = messages.iter().map(|m| m.ts).min()?;
        let last = messages.iter().map(|m| m.ts).max()?;
        Some((last.micros() - first.micros()) as f64 / 1_000_000.0 / SECONDS_PER_DAY)
    });
    match span_days {
        Some(days) if days > policy.date_range_days as f64 => Granularity::Monthly,
        _ => Granularity::Daily,
    }
}

/// Deterministic artifact name for a bucket.
///
/// Doc-style days are stable so later runs find and append to them;
/// file-style names carry the write stamp and are never reused.
pub fn artifact_name(
    safe_name: &str,
    key: &BucketKey,
    style: DestinationStyle,
    write_stamp: &str,
) -> String {
    match (key, style) {
        (BucketKey::Day(_), DestinationStyle::Doc) => {
            format!("{safe_name} slack messages {}", key.compact())
        }
        (BucketKey::Day(_), DestinationStyle::File) => {
            format!("{safe_name} slack messages {}_{write_stamp}.txt", key.compact())
        }
        (BucketKey::Month { .. }, _) => {
            format!("{safe_name}_history_{}_{write_stamp}.txt", key.compact())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeder::model::Timestamp;
    use crate::feeder::testing::message;

    const POLICY: ChunkPolicy = ChunkPolicy {
        message_threshold: 10_000,
        date_range_days: 30,
    };

    #[test]
    fn midnight_splits_days_but_not_months_within_a_month() {
        // 2024-03-31T23:59:00Z and 2024-04-01T00:01:00Z
        let across_month = vec![message(1711929540, "late"), message(1711929660, "early")];
        assert_eq!(group(&across_month, Granularity::Daily).len(), 2);
        assert_eq!(group(&across_month, Granularity::Monthly).len(), 2);

        // 2024-04-14T23:59:00Z and 2024-04-15T00:01:00Z
        let mid_month = vec![message(1713139140, "late"), message(1713139260, "early")];
        assert_eq!(group(&mid_month, Granularity::Daily).len(), 2);
        let monthly = group(&mid_month, Granularity::Monthly);
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].key.compact(), "2024-04");
    }

    #[test]
    fn buckets_are_chronological_and_sorted_inside() {
        let msgs = vec![
            message(1711929660, "apr-b"),
            message(1711843200, "mar"),
            message(1711929600, "apr-a"),
        ];
        let buckets = group(&msgs, Granularity::Daily);
        assert_eq!(buckets[0].key.compact(), "20240331");
        assert_eq!(buckets[1].key.display(), "2024-04-01");
        let texts = buckets[1].messages.iter().map(|m| m.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["apr-a", "apr-b"]);
        assert!(group(&[], Granularity::Daily).is_empty());
    }

    #[test]
    fn doc_style_is_always_daily() {
        let msgs = (0..20_001).map(|i| message(1_700_000_000 + i, "x")).collect::<Vec<_>>();
        assert_eq!(
            plan_granularity(DestinationStyle::Doc, &msgs, &Window::default(), &POLICY),
            Granularity::Daily
        );
        assert_eq!(
            plan_granularity(DestinationStyle::File, &msgs, &Window::default(), &POLICY),
            Granularity::Monthly
        );
    }

    #[test]
    fn file_style_chunks_on_wide_ranges() {
        let msgs = vec![message(1_700_000_000, "a"), message(1_700_000_000 + 40 * 86_400, "b")];
        assert_eq!(
            plan_granularity(DestinationStyle::File, &msgs, &Window::default(), &POLICY),
            Granularity::Monthly
        );

        let narrow = Window {
            lower: Timestamp::from_secs(1_700_000_000),
            upper: Timestamp::from_secs(1_700_000_000 + 10 * 86_400),
        };
        assert_eq!(
            plan_granularity(DestinationStyle::File, &msgs[..1], &narrow, &POLICY),
            Granularity::Daily
        );
    }

    #[test]
    fn names_follow_the_destination_style() {
        let day = BucketKey::Day(NaiveDate::from_ymd_opt(2024, 4, 1).expect("date"));
        let month = BucketKey::Month { year: 2024, month: 4 };
        assert_eq!(
            artifact_name("general", &day, DestinationStyle::Doc, "20240402_101010"),
            "general slack messages 20240401"
        );
        assert_eq!(
            artifact_name("general", &day, DestinationStyle::File, "20240402_101010"),
            "general slack messages 20240401_20240402_101010.txt"
        );
        assert_eq!(
            artifact_name("general", &month, DestinationStyle::File, "20240402_101010"),
            "general_history_2024-04_20240402_101010.txt"
        );
    }
}
