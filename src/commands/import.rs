use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::commands::{CommandReport, DestinationKind, open_destination};
use crate::error::FeederResult;
use crate::feeder::config::load_config;
use crate::feeder::destination::{FetchBatch, MemberSource, MessageSource};
use crate::feeder::directory::{PassthroughNames, PeopleDirectory, StaticMembers, load_people};
use crate::feeder::lock::RunLock;
use crate::feeder::model::{ExportTarget, RawMessage, Timestamp};
use crate::feeder::paths::resolve_paths;
use crate::feeder::pipeline::{Collaborators, ExportEngine, ExportOptions};
use crate::feeder::window::parse_date_bound;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct ImportedConversation {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default = "default_true")]
    share: bool,
    #[serde(default, rename = "shareMembers")]
    share_members: Option<Vec<String>>,
    /// Ids, emails or display names of the people in the conversation.
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ImportFile {
    conversation: ImportedConversation,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

/// Messages already extracted from another source, served from memory.
struct ExtractedMessages {
    messages: Vec<RawMessage>,
}

impl MessageSource for ExtractedMessages {
    fn fetch(
        &self,
        _conversation_id: &str,
        since: Option<Timestamp>,
        until: Option<Timestamp>,
    ) -> FeederResult<FetchBatch> {
        let messages = self
            .messages
            .iter()
            .filter(|m| {
                m.timestamp().is_none_or(|ts| {
                    since.is_none_or(|s| ts >= s) && until.is_none_or(|u| ts <= u)
                })
            })
            .cloned()
            .collect();
        Ok(FetchBatch {
            messages,
            has_more: false,
        })
    }
}

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    /// JSON file with a `conversation` object and a `messages` array.
    pub file: PathBuf,
    #[arg(long)]
    pub start_date: Option<String>,
    #[arg(long)]
    pub end_date: Option<String>,
    #[arg(long)]
    pub bulk: bool,
    #[arg(long, value_enum, default_value_t = DestinationKind::Docs)]
    pub destination: DestinationKind,
    #[arg(long)]
    pub no_share: bool,
}

fn read_import(path: &Path) -> Result<ImportFile> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn run(args: &ImportArgs) -> Result<CommandReport> {
    let mut report = CommandReport::new("import");
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let file = read_import(&args.file)?;

    let explicit_start = args
        .start_date
        .as_deref()
        .map(|raw| parse_date_bound(raw, false))
        .transpose()?;
    let explicit_end = args
        .end_date
        .as_deref()
        .map(|raw| parse_date_bound(raw, true))
        .transpose()?;

    let _lock = RunLock::acquire(&paths.lock_file)?;

    let directory = PeopleDirectory::new(load_people(&paths.people_file)?.people);
    let conv = file.conversation;
    let target = ExportTarget {
        id: conv.id.filter(|id| !id.trim().is_empty()),
        name: conv.name,
        share: conv.share,
        share_members: conv.share_members,
    };
    report.detail(format!("file={}", args.file.display()));
    report.detail(format!("messages_in_file={}", file.messages.len()));
    report.detail(format!("destination={}", args.destination.as_str()));

    let source = ExtractedMessages {
        messages: file.messages,
    };
    let members = (!conv.members.is_empty()).then(|| StaticMembers::new(conv.members, &directory));
    let mut destination = open_destination(args.destination, &paths, &cfg)?;
    let engine = ExportEngine::new(&cfg)?;
    let opts = ExportOptions {
        explicit_start,
        explicit_end,
        bulk: args.bulk,
        validate_range: false,
        share: !args.no_share,
        now: Utc::now(),
    };
    let mut collab = Collaborators {
        source: &source,
        names: &PassthroughNames,
        members: members.as_ref().map(|m| m as &dyn MemberSource),
        destination: destination.as_mut(),
        directory: &directory,
    };
    let run = engine.run(std::slice::from_ref(&target), &opts, &mut collab);
    report.absorb_run(&run);
    Ok(report)
}
