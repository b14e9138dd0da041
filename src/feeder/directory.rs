use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::FeederResult;
use crate::feeder::destination::{IdentityResolver, MemberSource};
use crate::feeder::model::ExportTarget;

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One entry of `channels.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        rename = "displayName",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub export: bool,
    #[serde(default = "default_true")]
    pub share: bool,
    #[serde(
        default,
        rename = "shareMembers",
        skip_serializing_if = "Option::is_none"
    )]
    pub share_members: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_im: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_mpim: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            display_name: None,
            export: true,
            share: true,
            share_members: None,
            is_im: false,
            is_mpim: false,
            user: None,
            members: Vec::new(),
        }
    }

    fn short_id(&self) -> String {
        self.id
            .as_deref()
            .unwrap_or("unknown")
            .chars()
            .take(8)
            .collect()
    }

    /// Display name: explicit, then participants for DMs, then channel name.
    pub fn resolve_name(
        &self,
        names: &dyn IdentityResolver,
        members: Option<&dyn MemberSource>,
    ) -> String {
        if let Some(display) = self.display_name.as_deref().filter(|d| !d.trim().is_empty()) {
            return display.trim().to_string();
        }

        if self.is_mpim {
            let mut ids = self.members.clone();
            if ids.is_empty()
                && let (Some(source), Some(id)) = (members, self.id.as_deref())
            {
                ids = source.members(id).unwrap_or_default();
            }
            let mut participants = ids
                .iter()
                .map(|id| names.display_name(id))
                .collect::<Vec<_>>();
            participants.sort();
            participants.dedup();
            if participants.is_empty() {
                return format!("group_dm_{}", self.short_id());
            }
            return participants.join(", ");
        }

        if self.is_im {
            return match self.user.as_deref() {
                Some(user) => names.display_name(user),
                None => format!("dm_{}", self.short_id()),
            };
        }

        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| "unknown_conversation".to_string())
    }

    pub fn to_target(
        &self,
        names: &dyn IdentityResolver,
        members: Option<&dyn MemberSource>,
    ) -> ExportTarget {
        ExportTarget {
            id: self.id.clone(),
            name: self.resolve_name(names, members),
            share: self.share,
            share_members: self.share_members.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsFile {
    #[serde(default)]
    pub channels: Vec<Conversation>,
}

/// One entry of `people.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(rename = "slackId")]
    pub slack_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(rename = "noNotifications", default, skip_serializing_if = "is_false")]
    pub no_notifications: bool,
    #[serde(rename = "noShare", default, skip_serializing_if = "is_false")]
    pub no_share: bool,
}

impl Person {
    pub fn new(slack_id: impl Into<String>, email: Option<&str>, display_name: &str) -> Self {
        Self {
            slack_id: slack_id.into(),
            email: email.map(ToOwned::to_owned),
            display_name: display_name.to_string(),
            no_notifications: false,
            no_share: false,
        }
    }

    pub fn principal(&self) -> Option<PrincipalKey> {
        self.email.as_deref().and_then(PrincipalKey::from_email)
    }

    /// Case-insensitive match against id, email or display name.
    pub fn matches(&self, identifier: &str) -> bool {
        let needle = identifier.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        needle == self.slack_id.to_lowercase()
            || self
                .email
                .as_deref()
                .is_some_and(|e| needle == e.trim().to_lowercase())
            || (!self.display_name.trim().is_empty()
                && needle == self.display_name.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeopleFile {
    #[serde(default)]
    pub people: Vec<Person>,
}

/// Canonical form of a principal: a trimmed, lowercased email address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrincipalKey(String);

impl PrincipalKey {
    pub fn from_email(email: &str) -> Option<Self> {
        let normalized = email.trim().to_lowercase();
        let (local, domain) = normalized.split_once('@')?;
        if local.is_empty() || domain.is_empty() {
            return None;
        }
        Some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// In-memory index over `people.json`.
#[derive(Debug, Clone, Default)]
pub struct PeopleDirectory {
    people: Vec<Person>,
    by_key: HashMap<String, usize>,
}

impl PeopleDirectory {
    pub fn new(people: Vec<Person>) -> Self {
        let mut by_key = HashMap::new();
        for (idx, person) in people.iter().enumerate() {
            by_key.entry(person.slack_id.to_lowercase()).or_insert(idx);
            if let Some(email) = person.email.as_deref() {
                by_key.entry(email.trim().to_lowercase()).or_insert(idx);
            }
            if !person.display_name.trim().is_empty() {
                by_key
                    .entry(person.display_name.trim().to_lowercase())
                    .or_insert(idx);
            }
        }
        Self { people, by_key }
    }

    pub fn people(&self) -> &[Person] {
        &self.people
    }

    pub fn lookup(&self, identifier: &str) -> Option<&Person> {
        let idx = self.by_key.get(&identifier.trim().to_lowercase())?;
        self.people.get(*idx)
    }

    /// Map an id, email or display name to its principal key without any I/O.
    pub fn canonical_principal(&self, identifier: &str) -> Option<PrincipalKey> {
        if let Some(person) = self.lookup(identifier)
            && let Some(key) = person.principal()
        {
            return Some(key);
        }
        PrincipalKey::from_email(identifier)
    }

    pub fn no_share(&self) -> BTreeSet<PrincipalKey> {
        self.people
            .iter()
            .filter(|p| p.no_share)
            .filter_map(Person::principal)
            .collect()
    }

    pub fn no_notify(&self) -> BTreeSet<PrincipalKey> {
        self.people
            .iter()
            .filter(|p| p.no_notifications)
            .filter_map(Person::principal)
            .collect()
    }

    /// Overlay directory details onto a person fetched from the platform.
    pub fn enrich(&self, fetched: Person) -> Person {
        let Some(known) = self.lookup(&fetched.slack_id) else {
            return fetched;
        };
        Person {
            email: fetched.email.or_else(|| known.email.clone()),
            display_name: if fetched.display_name.trim().is_empty() {
                known.display_name.clone()
            } else {
                fetched.display_name
            },
            no_notifications: known.no_notifications || fetched.no_notifications,
            no_share: known.no_share || fetched.no_share,
            slack_id: fetched.slack_id,
        }
    }
}

/// Display names from the directory first, then from the platform, then the raw id.
pub struct LayeredNames<'a> {
    directory: &'a PeopleDirectory,
    remote: Option<&'a dyn MemberSource>,
}

impl<'a> LayeredNames<'a> {
    pub fn new(directory: &'a PeopleDirectory, remote: Option<&'a dyn MemberSource>) -> Self {
        Self { directory, remote }
    }
}

impl IdentityResolver for LayeredNames<'_> {
    fn display_name(&self, author_id: &str) -> String {
        if author_id.trim().is_empty() {
            return "Unknown User".to_string();
        }
        if let Some(person) = self.directory.lookup(author_id)
            && !person.display_name.trim().is_empty()
        {
            return person.display_name.clone();
        }
        if let Some(remote) = self.remote
            && let Ok(Some(person)) = remote.person(author_id)
            && !person.display_name.trim().is_empty()
        {
            return person.display_name;
        }
        author_id.to_string()
    }
}

/// Authors are already display names (alternate-source imports).
pub struct PassthroughNames;

impl IdentityResolver for PassthroughNames {
    fn display_name(&self, author_id: &str) -> String {
        if author_id.trim().is_empty() {
            "Unknown User".to_string()
        } else {
            author_id.to_string()
        }
    }
}

/// Membership listed up front, resolved through the directory.
pub struct StaticMembers<'a> {
    members: Vec<String>,
    directory: &'a PeopleDirectory,
}

impl<'a> StaticMembers<'a> {
    pub fn new(members: Vec<String>, directory: &'a PeopleDirectory) -> Self {
        Self { members, directory }
    }
}

impl MemberSource for StaticMembers<'_> {
    fn members(&self, _conversation_id: &str) -> FeederResult<Vec<String>> {
        Ok(self.members.clone())
    }

    fn person(&self, user_id: &str) -> FeederResult<Option<Person>> {
        if let Some(person) = self.directory.lookup(user_id) {
            return Ok(Some(person.clone()));
        }
        Ok(self
            .directory
            .canonical_principal(user_id)
            .map(|key| Person::new(key.as_str(), Some(key.as_str()), key.as_str())))
    }
}

pub fn load_channels(path: &Path) -> Result<ChannelsFile> {
    if !path.exists() {
        return Ok(ChannelsFile::default());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    json5::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn load_people(path: &Path) -> Result<PeopleFile> {
    if !path.exists() {
        return Ok(PeopleFile::default());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    json5::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Replace `path` in one rename; a crash mid-save leaves the previous file intact.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let data = serde_json::to_string_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage {}", path.display()))?;
    tmp.write_all(format!("{data}\n").as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Refresh channel entries from the platform while keeping hand-set flags.
pub fn merge_channels(existing: &[Conversation], fetched: Vec<Conversation>) -> Vec<Conversation> {
    let previous = existing
        .iter()
        .filter_map(|c| c.id.clone().map(|id| (id, c)))
        .collect::<BTreeMap<_, _>>();

    fetched
        .into_iter()
        .map(|mut conv| {
            if let Some(old) = conv.id.as_ref().and_then(|id| previous.get(id)) {
                conv.export = old.export;
                conv.share = old.share;
                conv.share_members = old.share_members.clone();
                if conv.display_name.is_none() {
                    conv.display_name = old.display_name.clone();
                }
            }
            conv
        })
        .collect()
}

pub fn merge_people(existing: &[Person], fetched: Vec<Person>) -> Vec<Person> {
    let previous = existing
        .iter()
        .map(|p| (p.slack_id.clone(), p))
        .collect::<BTreeMap<_, _>>();

    let mut merged = fetched
        .into_iter()
        .map(|mut person| {
            if let Some(old) = previous.get(&person.slack_id) {
                person.no_notifications = old.no_notifications;
                person.no_share = old.no_share;
                if person.email.is_none() {
                    person.email = old.email.clone();
                }
            }
            person
        })
        .collect::<Vec<_>>();
    merged.sort_by(|a, b| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()));
    merged
}
