use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const MICROS_PER_SEC: i64 = 1_000_000;

/// Message timestamp with exact microsecond precision.
///
/// Slack timestamps look like `1711929540.000100`; two messages may differ
/// only in the fractional part, so values are kept as integer microseconds
/// rather than floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    pub fn from_micros(micros: i64) -> Option<Self> {
        DateTime::from_timestamp_micros(micros)?;
        Some(Self { micros })
    }

    pub fn from_secs(secs: i64) -> Option<Self> {
        Self::from_micros(secs.checked_mul(MICROS_PER_SEC)?)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            micros: dt.timestamp_micros(),
        }
    }

    /// Parse `secs[.fraction]`. Digits past microseconds are truncated.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (secs_part, frac_part) = match raw.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (raw, ""),
        };
        if secs_part.is_empty() || !secs_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let secs: i64 = secs_part.parse().ok()?;
        let mut frac = String::with_capacity(6);
        frac.extend(frac_part.chars().take(6));
        while frac.len() < 6 {
            frac.push('0');
        }
        let micros: i64 = frac.parse().ok()?;
        Self::from_micros(secs.checked_mul(MICROS_PER_SEC)?.checked_add(micros)?)
    }

    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        Self::from_micros((value * MICROS_PER_SEC as f64).round() as i64)
    }

    /// Accepts either a JSON string or a JSON number.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => Self::from_f64(n.as_f64()?),
            _ => None,
        }
    }

    pub fn micros(self) -> i64 {
        self.micros
    }

    pub fn as_f64(self) -> f64 {
        self.micros as f64 / MICROS_PER_SEC as f64
    }

    pub fn to_utc(self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros).unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.micros.div_euclid(MICROS_PER_SEC),
            self.micros.rem_euclid(MICROS_PER_SEC)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReaction {
    pub name: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Message as delivered by a source, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub ts: Option<Value>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<Value>,
    #[serde(default)]
    pub reply_count: Option<u64>,
    #[serde(default)]
    pub reactions: Vec<RawReaction>,
    #[serde(default)]
    pub files: Vec<RawFile>,
}

impl RawMessage {
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.ts.as_ref().and_then(Timestamp::from_value)
    }

    /// `None` when the timestamp is missing or unparseable.
    pub fn into_message(self) -> Option<Message> {
        let ts = self.timestamp()?;
        let thread_ts = self.thread_ts.as_ref().and_then(Timestamp::from_value);
        let author = self
            .user
            .filter(|u| !u.trim().is_empty())
            .or(self.username)
            .unwrap_or_default();
        Some(Message {
            ts,
            author,
            text: self.text.unwrap_or_default(),
            thread_ts,
            reactions: self
                .reactions
                .into_iter()
                .map(|r| Reaction {
                    count: r.count.max(r.users.len() as u64),
                    name: r.name,
                    users: r.users,
                })
                .collect(),
            files: self
                .files
                .into_iter()
                .filter_map(|f| f.name.or(f.title))
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub name: String,
    pub count: u64,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub ts: Timestamp,
    /// Author id, or a display name when the source has no stable ids.
    pub author: String,
    pub text: String,
    pub thread_ts: Option<Timestamp>,
    pub reactions: Vec<Reaction>,
    pub files: Vec<String>,
}

impl Message {
    pub fn thread_key(&self) -> Timestamp {
        self.thread_ts.unwrap_or(self.ts)
    }

    pub fn is_reply(&self) -> bool {
        self.thread_ts.is_some_and(|parent| parent != self.ts)
    }

    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || !self.files.is_empty()
    }
}

/// A conversation ready to export: identity, resolved display name and sharing policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTarget {
    pub id: Option<String>,
    pub name: String,
    pub share: bool,
    pub share_members: Option<Vec<String>>,
}

impl ExportTarget {
    pub fn safe_name(&self) -> String {
        crate::feeder::util::sanitize_name(&self.name)
    }

    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}
