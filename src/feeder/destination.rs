//! Seams to the artifact store and to the messaging platform.

use std::collections::BTreeSet;

use crate::error::FeederResult;
use crate::feeder::directory::{Person, PrincipalKey};
use crate::feeder::model::{RawMessage, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationStyle {
    /// Append-friendly documents, one per day.
    Doc,
    /// Always-fresh, timestamp-suffixed files.
    File,
}

impl DestinationStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Doc => "doc",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub id: String,
    pub name: String,
}

/// Where a conversation's artifacts and export metadata live.
pub trait Destination {
    fn style(&self) -> DestinationStyle;

    /// Find or create the per-conversation folder.
    fn ensure_folder(&mut self, name: &str) -> FeederResult<FolderRef>;

    fn find(&mut self, folder: &FolderRef, name: &str) -> FeederResult<Option<ArtifactRef>>;

    /// Create an artifact. `marker` records the newest message timestamp it holds.
    fn create(
        &mut self,
        folder: &FolderRef,
        name: &str,
        content: &str,
        marker: Option<Timestamp>,
    ) -> FeederResult<ArtifactRef>;

    fn read_text(&mut self, artifact: &ArtifactRef) -> FeederResult<String>;

    fn overwrite(&mut self, artifact: &ArtifactRef, content: &str) -> FeederResult<()>;

    /// `None` for destinations that can only write fresh artifacts.
    fn appender(&mut self) -> Option<&mut dyn Append>;

    /// `None` for destinations without per-folder permissions.
    fn access(&mut self) -> Option<&mut dyn AccessControl>;
}

pub trait Append {
    fn append(&mut self, artifact: &ArtifactRef, content: &str, marker: Timestamp)
    -> FeederResult<()>;

    /// Newest message timestamp already written to `artifact`, if recorded.
    fn read_marker(&mut self, artifact: &ArtifactRef) -> FeederResult<Option<Timestamp>>;
}

pub trait AccessControl {
    /// Principals currently holding access, excluding the owner.
    fn list_principals(&mut self, folder: &FolderRef) -> FeederResult<BTreeSet<PrincipalKey>>;

    fn grant(&mut self, folder: &FolderRef, principal: &PrincipalKey, notify: bool)
    -> FeederResult<()>;

    fn revoke(&mut self, folder: &FolderRef, principal: &PrincipalKey) -> FeederResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchBatch {
    pub messages: Vec<RawMessage>,
    /// More history exists beyond what was returned.
    pub has_more: bool,
}

pub trait MessageSource {
    fn fetch(
        &self,
        conversation_id: &str,
        since: Option<Timestamp>,
        until: Option<Timestamp>,
    ) -> FeederResult<FetchBatch>;
}

pub trait IdentityResolver {
    fn display_name(&self, author_id: &str) -> String;
}

/// Live membership of a conversation.
pub trait MemberSource {
    fn members(&self, conversation_id: &str) -> FeederResult<Vec<String>>;

    /// `Ok(None)` for bots and unknown users; `Err` when the lookup itself failed.
    fn person(&self, user_id: &str) -> FeederResult<Option<Person>>;
}
