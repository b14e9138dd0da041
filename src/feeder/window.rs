//! Time-window resolution and message filtering.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashSet;

use crate::error::{FeederError, FeederResult};
use crate::feeder::destination::{Destination, FolderRef};
use crate::feeder::metadata::{ExportMetadata, ExportMetadataStore};
use crate::feeder::model::{Message, RawMessage, Timestamp};
use crate::feeder::warn::{self, WarnEvent};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Inclusive bounds; `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub lower: Option<Timestamp>,
    pub upper: Option<Timestamp>,
}

impl Window {
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.lower.is_none_or(|lower| ts >= lower) && self.upper.is_none_or(|upper| ts <= upper)
    }

    /// Lower bound past the upper bound: nothing can fall inside.
    pub fn is_inverted(&self) -> bool {
        matches!((self.lower, self.upper), (Some(lower), Some(upper)) if lower > upper)
    }

    pub fn span_days(&self) -> Option<f64> {
        let (lower, upper) = (self.lower?, self.upper?);
        Some((upper.micros() - lower.micros()) as f64 / 1_000_000.0 / SECONDS_PER_DAY)
    }
}

/// Parse `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` as UTC.
///
/// A bare date used as an end bound covers the whole day.
pub fn parse_date_bound(raw: &str, end_of_day: bool) -> FeederResult<Timestamp> {
    let raw = raw.trim();
    let datetime = if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        dt
    } else {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            FeederError::validation(format!(
                "invalid date `{raw}`: use YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"
            ))
        })?;
        let time = if end_of_day {
            NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
        } else {
            NaiveTime::from_hms_opt(0, 0, 0)
        }
        .ok_or_else(|| FeederError::validation("invalid time of day"))?;
        date.and_time(time)
    };
    Ok(Timestamp::from_datetime(datetime.and_utc()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerBoundSource {
    Explicit,
    Metadata,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub lower: Option<Timestamp>,
    pub source: LowerBoundSource,
    /// Metadata as read, kept so the later write never regresses it.
    pub stored: Option<ExportMetadata>,
}

/// Picks the lower bound of the window to fetch on this run.
pub struct TimestampResolver<'a> {
    store: &'a ExportMetadataStore,
}

impl<'a> TimestampResolver<'a> {
    pub fn new(store: &'a ExportMetadataStore) -> Self {
        Self { store }
    }

    /// The later of `explicit_start` and the stored high-water mark wins.
    ///
    /// `bulk` is accepted for logging only; it lifts the range cap
    /// downstream and never changes the resolution itself. An unreadable
    /// marker is treated as no prior export.
    pub fn resolve(
        &self,
        destination: &mut dyn Destination,
        folder: &FolderRef,
        conversation: &str,
        explicit_start: Option<Timestamp>,
        bulk: bool,
    ) -> Resolution {
        let stored = match self.store.read(destination, folder, conversation) {
            Ok(found) => found,
            Err(err) => {
                warn::emit(WarnEvent {
                    code: err.code().as_str(),
                    stage: "metadata-read",
                    conversation,
                    action: "assume-no-prior-export",
                    reason: "export metadata unreadable",
                    err: &err.to_string(),
                });
                None
            }
        };
        let stored_ts = stored.as_ref().and_then(ExportMetadata::latest);

        let (lower, source) = match (explicit_start, stored_ts) {
            (Some(explicit), Some(mark)) if mark > explicit => (Some(mark), LowerBoundSource::Metadata),
            (Some(explicit), _) => (Some(explicit), LowerBoundSource::Explicit),
            (None, Some(mark)) => (Some(mark), LowerBoundSource::Metadata),
            (None, None) => (None, LowerBoundSource::None),
        };
        tracing::debug!(
            conversation,
            bulk,
            lower = lower.map(|t| t.to_string()).unwrap_or_default(),
            source = ?source,
            "resolved lower bound"
        );
        Resolution {
            lower,
            source,
            stored,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filtered {
    pub messages: Vec<Message>,
    pub invalid: usize,
    pub outside_window: usize,
}

pub struct MessageFilter {
    max_range_days: u64,
}

impl MessageFilter {
    pub fn new(max_range_days: u64) -> Self {
        Self { max_range_days }
    }

    /// Reject inverted windows always, oversized windows when `validate_range`.
    pub fn validate(&self, window: &Window, validate_range: bool) -> FeederResult<()> {
        if let (Some(lower), Some(upper)) = (window.lower, window.upper)
            && lower > upper
        {
            return Err(FeederError::validation(format!(
                "start {lower} is after end {upper}"
            )));
        }
        if !validate_range {
            return Ok(());
        }
        if let Some(days) = window.span_days()
            && days > self.max_range_days as f64
        {
            return Err(FeederError::RangeTooLarge {
                days,
                max_days: self.max_range_days,
            });
        }
        Ok(())
    }

    pub fn apply(
        &self,
        raw: Vec<RawMessage>,
        window: &Window,
        validate_range: bool,
    ) -> FeederResult<Filtered> {
        self.validate(window, validate_range)?;

        let mut out = Filtered::default();
        for message in raw {
            let Some(message) = message.into_message() else {
                out.invalid += 1;
                continue;
            };
            if window.contains(message.ts) {
                out.messages.push(message);
            } else {
                out.outside_window += 1;
            }
        }
        if out.invalid > 0 {
            tracing::warn!(dropped = out.invalid, "dropped messages without a parseable timestamp");
        }
        out.messages.sort_by_key(|m| m.ts);
        Ok(out)
    }
}

/// Keep the first message seen for each timestamp.
pub fn dedupe_by_timestamp(messages: Vec<Message>) -> (Vec<Message>, usize) {
    let mut seen = HashSet::with_capacity(messages.len());
    let before = messages.len();
    let kept = messages
        .into_iter()
        .filter(|m| seen.insert(m.ts))
        .collect::<Vec<_>>();
    let removed = before - kept.len();
    (kept, removed)
}
