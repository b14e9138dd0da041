//! In-memory collaborators for unit tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::json;

use crate::error::{FeederError, FeederResult};
use crate::feeder::destination::{
    AccessControl, Append, ArtifactRef, Destination, DestinationStyle, FetchBatch, FolderRef,
    IdentityResolver, MemberSource, MessageSource,
};
use crate::feeder::directory::{Person, PrincipalKey};
use crate::feeder::model::{Message, RawMessage, Timestamp};

pub fn raw(ts: &str, user: &str, text: &str) -> RawMessage {
    RawMessage {
        ts: Some(json!(ts)),
        user: Some(user.to_string()),
        text: Some(text.to_string()),
        ..RawMessage::default()
    }
}

pub fn message(secs: i64, text: &str) -> Message {
    Message {
        ts: Timestamp::from_secs(secs).expect("valid test timestamp"),
        author: "U0".to_string(),
        text: text.to_string(),
        thread_ts: None,
        reactions: Vec::new(),
        files: Vec::new(),
    }
}

#[derive(Default)]
pub struct FakeSource {
    messages: HashMap<String, Vec<RawMessage>>,
    failures: HashMap<String, fn() -> FeederError>,
    page_limits: HashMap<String, usize>,
    requests: RefCell<Vec<(String, Option<Timestamp>)>>,
}

impl FakeSource {
    pub fn with(mut self, conversation: &str, messages: Vec<RawMessage>) -> Self {
        self.messages.insert(conversation.to_string(), messages);
        self
    }

    pub fn failing_with(mut self, conversation: &str, err: fn() -> FeederError) -> Self {
        self.failures.insert(conversation.to_string(), err);
        self
    }

    /// Serve only the newest `keep` matches and report the rest as unfetched.
    pub fn newest_only(mut self, conversation: &str, keep: usize) -> Self {
        self.page_limits.insert(conversation.to_string(), keep);
        self
    }

    pub fn push(&mut self, conversation: &str, message: RawMessage) {
        self.messages
            .entry(conversation.to_string())
            .or_default()
            .push(message);
    }

    pub fn requested_since(&self, conversation: &str) -> Vec<Option<Timestamp>> {
        self.requests
            .borrow()
            .iter()
            .filter(|(id, _)| id == conversation)
            .map(|(_, since)| *since)
            .collect()
    }
}

impl MessageSource for FakeSource {
    fn fetch(
        &self,
        conversation_id: &str,
        since: Option<Timestamp>,
        until: Option<Timestamp>,
    ) -> FeederResult<FetchBatch> {
        self.requests
            .borrow_mut()
            .push((conversation_id.to_string(), since));
        if let Some(err) = self.failures.get(conversation_id) {
            return Err(err());
        }
        let mut messages: Vec<RawMessage> = self
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| match m.timestamp() {
                Some(ts) => since.is_none_or(|s| ts >= s) && until.is_none_or(|u| ts <= u),
                None => true,
            })
            .collect();
        let mut has_more = false;
        if let Some(&keep) = self.page_limits.get(conversation_id)
            && messages.len() > keep
        {
            messages.sort_by_key(|m| std::cmp::Reverse(m.timestamp()));
            messages.truncate(keep);
            has_more = true;
        }
        Ok(FetchBatch { messages, has_more })
    }
}

#[derive(Default)]
pub struct FakeMembers {
    people: HashMap<String, Person>,
    members: HashMap<String, Vec<String>>,
    fail: bool,
}

impl FakeMembers {
    pub fn with_person(mut self, id: &str, email: &str, name: &str) -> Self {
        self.people
            .insert(id.to_string(), Person::new(id, Some(email), name));
        self
    }

    pub fn with_members(mut self, conversation: &str, ids: &[&str]) -> Self {
        self.members.insert(
            conversation.to_string(),
            ids.iter().map(ToString::to_string).collect(),
        );
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl MemberSource for FakeMembers {
    fn members(&self, conversation_id: &str) -> FeederResult<Vec<String>> {
        if self.fail {
            return Err(FeederError::Transient("members unavailable".into()));
        }
        Ok(self.members.get(conversation_id).cloned().unwrap_or_default())
    }

    fn person(&self, user_id: &str) -> FeederResult<Option<Person>> {
        if self.fail {
            return Err(FeederError::Transient("users unavailable".into()));
        }
        Ok(self.people.get(user_id).cloned())
    }
}

pub struct FakeNames(HashMap<String, String>);

impl FakeNames {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
        )
    }
}

impl IdentityResolver for FakeNames {
    fn display_name(&self, author_id: &str) -> String {
        self.0
            .get(author_id)
            .cloned()
            .unwrap_or_else(|| author_id.to_string())
    }
}

#[derive(Debug, Default)]
struct MemoryArtifact {
    content: String,
    marker: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct MemoryFolder {
    artifacts: BTreeMap<String, MemoryArtifact>,
    grants: BTreeSet<PrincipalKey>,
}

/// Destination held entirely in memory; folder ids equal folder names.
pub struct MemoryDestination {
    style: DestinationStyle,
    folders: BTreeMap<String, MemoryFolder>,
    writes: usize,
    failing_folders: BTreeSet<String>,
    failing_creates: BTreeSet<String>,
    failing_grants: BTreeSet<PrincipalKey>,
    notifications: Vec<PrincipalKey>,
}

impl MemoryDestination {
    fn new(style: DestinationStyle) -> Self {
        Self {
            style,
            folders: BTreeMap::new(),
            writes: 0,
            failing_folders: BTreeSet::new(),
            failing_creates: BTreeSet::new(),
            failing_grants: BTreeSet::new(),
            notifications: Vec::new(),
        }
    }

    pub fn doc_style() -> Self {
        Self::new(DestinationStyle::Doc)
    }

    pub fn file_style() -> Self {
        Self::new(DestinationStyle::File)
    }

    fn artifact(&self, folder: &FolderRef, name: &str) -> Option<&MemoryArtifact> {
        self.folders.get(&folder.id)?.artifacts.get(name)
    }

    pub fn content(&self, folder: &FolderRef, name: &str) -> Option<String> {
        self.artifact(folder, name).map(|a| a.content.clone())
    }

    pub fn marker(&self, folder: &FolderRef, name: &str) -> Option<Timestamp> {
        self.artifact(folder, name).and_then(|a| a.marker)
    }

    pub fn names(&self, folder: &FolderRef) -> Vec<String> {
        self.folders
            .get(&folder.id)
            .map(|f| f.artifacts.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn artifact_count(&self, folder: &FolderRef) -> usize {
        self.names(folder).len()
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn notifications(&self) -> Vec<PrincipalKey> {
        self.notifications.clone()
    }

    pub fn grants(&self, folder: &FolderRef) -> BTreeSet<PrincipalKey> {
        self.folders
            .get(&folder.id)
            .map(|f| f.grants.clone())
            .unwrap_or_default()
    }

    pub fn seed_grant(&mut self, folder: &FolderRef, principal: PrincipalKey) {
        self.folders
            .entry(folder.id.clone())
            .or_default()
            .grants
            .insert(principal);
    }

    pub fn fail_folder(&mut self, name: &str) {
        self.failing_folders.insert(name.to_string());
    }

    pub fn fail_creates_named(&mut self, name: &str) {
        self.failing_creates.insert(name.to_string());
    }

    pub fn fail_grants_for(&mut self, principal: PrincipalKey) {
        self.failing_grants.insert(principal);
    }

    fn locate(&mut self, artifact: &ArtifactRef) -> FeederResult<&mut MemoryArtifact> {
        let (folder, name) = artifact
            .id
            .split_once('/')
            .ok_or_else(|| FeederError::validation("malformed artifact id"))?;
        self.folders
            .get_mut(folder)
            .and_then(|f| f.artifacts.get_mut(name))
            .ok_or_else(|| FeederError::Remote {
                status: 404,
                message: format!("{} not found", artifact.name),
            })
    }
}

impl Destination for MemoryDestination {
    fn style(&self) -> DestinationStyle {
        self.style
    }

    fn ensure_folder(&mut self, name: &str) -> FeederResult<FolderRef> {
        if self.failing_folders.contains(name) {
            return Err(FeederError::Transient(format!("cannot create folder {name}")));
        }
        self.folders.entry(name.to_string()).or_default();
        Ok(FolderRef {
            id: name.to_string(),
            name: name.to_string(),
        })
    }

    fn find(&mut self, folder: &FolderRef, name: &str) -> FeederResult<Option<ArtifactRef>> {
        Ok(self.artifact(folder, name).map(|_| ArtifactRef {
            id: format!("{}/{}", folder.id, name),
            name: name.to_string(),
        }))
    }

    fn create(
        &mut self,
        folder: &FolderRef,
        name: &str,
        content: &str,
        marker: Option<Timestamp>,
    ) -> FeederResult<ArtifactRef> {
        if self.failing_creates.contains(name) {
            return Err(FeederError::Transient(format!("cannot create {name}")));
        }
        self.folders.entry(folder.id.clone()).or_default().artifacts.insert(
            name.to_string(),
            MemoryArtifact {
                content: content.to_string(),
                marker,
            },
        );
        self.writes += 1;
        Ok(ArtifactRef {
            id: format!("{}/{}", folder.id, name),
            name: name.to_string(),
        })
    }

    fn read_text(&mut self, artifact: &ArtifactRef) -> FeederResult<String> {
        Ok(self.locate(artifact)?.content.clone())
    }

    fn overwrite(&mut self, artifact: &ArtifactRef, content: &str) -> FeederResult<()> {
        self.locate(artifact)?.content = content.to_string();
        self.writes += 1;
        Ok(())
    }

    fn appender(&mut self) -> Option<&mut dyn Append> {
        match self.style {
            DestinationStyle::Doc => Some(self),
            DestinationStyle::File => None,
        }
    }

    fn access(&mut self) -> Option<&mut dyn AccessControl> {
        Some(self)
    }
}

impl Append for MemoryDestination {
    fn append(&mut self, artifact: &ArtifactRef, content: &str, marker: Timestamp) -> FeederResult<()> {
        let stored = self.locate(artifact)?;
        stored.content.push_str(content);
        stored.marker = Some(marker);
        self.writes += 1;
        Ok(())
    }

    fn read_marker(&mut self, artifact: &ArtifactRef) -> FeederResult<Option<Timestamp>> {
        Ok(self.locate(artifact)?.marker)
    }
}

impl AccessControl for MemoryDestination {
    fn list_principals(&mut self, folder: &FolderRef) -> FeederResult<BTreeSet<PrincipalKey>> {
        Ok(self.grants(folder))
    }

    fn grant(&mut self, folder: &FolderRef, principal: &PrincipalKey, notify: bool) -> FeederResult<()> {
        if self.failing_grants.contains(principal) {
            return Err(FeederError::Remote {
                status: 400,
                message: format!("cannot share with {principal}"),
            });
        }
        self.seed_grant(folder, principal.clone());
        if notify {
            self.notifications.push(principal.clone());
        }
        Ok(())
    }

    fn revoke(&mut self, folder: &FolderRef, principal: &PrincipalKey) -> FeederResult<()> {
        if let Some(f) = self.folders.get_mut(&folder.id) {
            f.grants.remove(principal);
        }
        Ok(())
    }
}
