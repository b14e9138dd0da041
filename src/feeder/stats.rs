use serde::Serialize;
use std::ops::AddAssign;

/// Counters for one conversation, or summed over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub conversations: usize,
    pub fetched: usize,
    pub invalid: usize,
    pub duplicates: usize,
    /// Fetches the source cut short; the high-water mark was held back.
    pub truncated: usize,
    pub created: usize,
    pub appended: usize,
    pub noop: usize,
    pub messages_written: usize,
    pub failed: usize,
    pub granted: usize,
    pub notified: usize,
    pub revoked: usize,
    pub share_failed: usize,
    pub share_skipped: usize,
    pub metadata_written: usize,
}

impl RunStatistics {
    /// Artifacts created or appended.
    pub fn written(&self) -> usize {
        self.created + self.appended
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.share_failed > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "conversations={} fetched={} written={} (created={} appended={}) skipped={} failed={} shared={} revoked={} share_failed={} truncated={}",
            self.conversations,
            self.fetched,
            self.written(),
            self.created,
            self.appended,
            self.noop,
            self.failed,
            self.granted,
            self.revoked,
            self.share_failed,
            self.truncated,
        )
    }
}

impl AddAssign for RunStatistics {
    fn add_assign(&mut self, other: Self) {
        self.conversations += other.conversations;
        self.fetched += other.fetched;
        self.invalid += other.invalid;
        self.duplicates += other.duplicates;
        self.truncated += other.truncated;
        self.created += other.created;
        self.appended += other.appended;
        self.noop += other.noop;
        self.messages_written += other.messages_written;
        self.failed += other.failed;
        self.granted += other.granted;
        self.notified += other.notified;
        self.revoked += other.revoked;
        self.share_failed += other.share_failed;
        self.share_skipped += other.share_skipped;
        self.metadata_written += other.metadata_written;
    }
}
