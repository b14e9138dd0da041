//! Per-conversation export: window, fetch, bucket, upsert, checkpoint, share.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use crate::error::{FeederError, FeederResult};
use crate::feeder::bucket::{self, ChunkPolicy};
use crate::feeder::config::FeederConfig;
use crate::feeder::destination::{Destination, FolderRef, IdentityResolver, MemberSource, MessageSource};
use crate::feeder::directory::{PeopleDirectory, Person, PrincipalKey};
use crate::feeder::metadata::ExportMetadataStore;
use crate::feeder::model::{ExportTarget, Timestamp};
use crate::feeder::render::{HeaderContext, Renderer};
use crate::feeder::share::{MembershipSynchronizer, ShareOutcome, ShareRequest};
use crate::feeder::stats::RunStatistics;
use crate::feeder::upsert::{ArtifactUpserter, WriteOutcome};
use crate::feeder::util::{is_valid_conversation_id, write_stamp};
use crate::feeder::warn::{self, WarnEvent};
use crate::feeder::window::{MessageFilter, TimestampResolver, Window, dedupe_by_timestamp};

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub explicit_start: Option<Timestamp>,
    pub explicit_end: Option<Timestamp>,
    /// Lifts the maximum date range regardless of `validate_range`.
    pub bulk: bool,
    /// Enforce the maximum date range. Off for alternate-source imports.
    pub validate_range: bool,
    pub share: bool,
    pub now: DateTime<Utc>,
}

/// The remote and static collaborators one run talks to.
pub struct Collaborators<'a> {
    pub source: &'a dyn MessageSource,
    pub names: &'a dyn IdentityResolver,
    pub members: Option<&'a dyn MemberSource>,
    pub destination: &'a mut dyn Destination,
    pub directory: &'a PeopleDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareStatus {
    Done(ShareOutcome),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationReport {
    pub name: String,
    pub id: Option<String>,
    pub stats: RunStatistics,
    pub high_water: Option<Timestamp>,
    pub share: ShareStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub conversations: Vec<ConversationReport>,
    pub totals: RunStatistics,
    /// Set when an authentication failure stopped the run early.
    pub aborted: Option<String>,
}

pub struct ExportEngine {
    filter: MessageFilter,
    renderer: Renderer,
    chunk_policy: ChunkPolicy,
    store: ExportMetadataStore,
    sharer: MembershipSynchronizer,
    conversation_delay: Duration,
}

impl ExportEngine {
    pub fn new(cfg: &FeederConfig) -> anyhow::Result<Self> {
        Ok(Self {
            filter: MessageFilter::new(cfg.export.max_date_range_days),
            renderer: Renderer::new(cfg.timezone()?)?,
            chunk_policy: cfg.chunk_policy(),
            store: ExportMetadataStore,
            sharer: MembershipSynchronizer::new(
                cfg.sharing.rate_limit_interval,
                Duration::from_millis(cfg.sharing.rate_limit_delay_ms),
            ),
            conversation_delay: Duration::from_millis(cfg.export.conversation_delay_ms),
        })
    }

    /// Export every target in order. Only an auth failure stops the loop.
    pub fn run(
        &self,
        targets: &[ExportTarget],
        opts: &ExportOptions,
        collab: &mut Collaborators<'_>,
    ) -> RunReport {
        let mut report = RunReport::default();
        for (idx, target) in targets.iter().enumerate() {
            if idx > 0 && !self.conversation_delay.is_zero() {
                thread::sleep(self.conversation_delay);
            }
            tracing::info!(conversation = %target.name, id = target.label(), "exporting conversation");

            let mut conv = ConversationReport {
                name: target.name.clone(),
                id: target.id.clone(),
                stats: RunStatistics {
                    conversations: 1,
                    ..RunStatistics::default()
                },
                high_water: None,
                share: ShareStatus::Skipped("not attempted".to_string()),
                error: None,
            };
            let outcome = self.export_conversation(target, opts, collab, &mut conv);
            if let Err(err) = outcome {
                warn::emit(WarnEvent {
                    code: err.code().as_str(),
                    stage: "conversation",
                    conversation: target.label(),
                    action: if err.is_fatal_for_run() { "abort-run" } else { "skip-conversation" },
                    reason: "conversation export failed",
                    err: &err.to_string(),
                });
                conv.stats.failed += 1;
                conv.error = Some(err.to_string());
                if err.is_fatal_for_run() {
                    report.aborted = Some(err.to_string());
                }
            }
            report.totals += conv.stats;
            report.conversations.push(conv);
            if report.aborted.is_some() {
                break;
            }
        }
        tracing::info!(summary = %report.totals.summary(), "run finished");
        report
    }

    pub fn export_conversation(
        &self,
        target: &ExportTarget,
        opts: &ExportOptions,
        collab: &mut Collaborators<'_>,
        conv: &mut ConversationReport,
    ) -> FeederResult<()> {
        if let Some(id) = target.id.as_deref()
            && !is_valid_conversation_id(id)
        {
            return Err(FeederError::validation(format!("invalid conversation id `{id}`")));
        }
        let requested = Window {
            lower: opts.explicit_start,
            upper: opts.explicit_end,
        };
        self.filter.validate(&requested, false)?;
        let validate_range = opts.validate_range && !opts.bulk;

        let safe_name = target.safe_name();
        let folder = collab.destination.ensure_folder(&safe_name)?;

        let resolution = TimestampResolver::new(&self.store).resolve(
            collab.destination,
            &folder,
            &safe_name,
            opts.explicit_start,
            opts.bulk,
        );
        let window = Window {
            lower: resolution.lower,
            upper: opts.explicit_end,
        };
        let messages = if window.is_inverted() {
            tracing::info!(
                conversation = %target.name,
                lower = %resolution.lower.map(|t| t.to_string()).unwrap_or_default(),
                "requested window is already exported"
            );
            Vec::new()
        } else {
            self.filter.validate(&window, validate_range)?;
            let batch = collab
                .source
                .fetch(target.id.as_deref().unwrap_or_default(), window.lower, window.upper)?;
            if batch.has_more {
                conv.stats.truncated += 1;
                warn::emit(WarnEvent {
                    code: "W001_TRUNCATED",
                    stage: "fetch",
                    conversation: target.label(),
                    action: "hold-high-water-mark",
                    reason: "source reported more history than was fetched",
                    err: "page limit reached",
                });
            }
            conv.stats.fetched = batch.messages.len();

            let filtered = self.filter.apply(batch.messages, &window, validate_range)?;
            conv.stats.invalid = filtered.invalid;
            let (messages, duplicates) = dedupe_by_timestamp(filtered.messages);
            conv.stats.duplicates = duplicates;
            messages
        };

        let floor = resolution.stored.as_ref().and_then(|m| m.latest());
        let style = collab.destination.style();
        let granularity = bucket::plan_granularity(style, &messages, &window, &self.chunk_policy);
        let buckets = bucket::group(&messages, granularity);
        let stamp = write_stamp(opts.now);
        let header = HeaderContext {
            conversation_name: &target.name,
            conversation_id: target.id.as_deref(),
            exported_at: opts.now,
        };
        let upserter = ArtifactUpserter::new(&self.renderer, collab.names, header);

        let mut high_water: Option<Timestamp> = None;
        // Unfetched history sits below what was fetched; keep the mark so the next run covers it.
        let mut blocked = conv.stats.truncated > 0;
        for bucket in &buckets {
            let name = bucket::artifact_name(&safe_name, &bucket.key, style, &stamp);
            match upserter.upsert(collab.destination, &folder, &name, bucket, floor) {
                Ok(outcome) => {
                    conv.stats.messages_written += outcome.written_messages();
                    match outcome {
                        WriteOutcome::Created { .. } => conv.stats.created += 1,
                        WriteOutcome::Appended { .. } => conv.stats.appended += 1,
                        WriteOutcome::NoOp => conv.stats.noop += 1,
                    }
                    tracing::debug!(conversation = %target.name, bucket = %bucket.key.display(), artifact = %name, "bucket written");
                    if !blocked {
                        high_water = high_water.max(bucket.messages.last().map(|m| m.ts));
                    }
                }
                Err(err) if err.is_fatal_for_run() => return Err(err),
                Err(err) => {
                    conv.stats.failed += 1;
                    blocked = true;
                    warn::emit(WarnEvent {
                        code: err.code().as_str(),
                        stage: "bucket-write",
                        conversation: target.label(),
                        action: "continue",
                        reason: &bucket.key.display(),
                        err: &err.to_string(),
                    });
                }
            }
        }

        if let Some(mark) = high_water
            && floor.is_none_or(|f| mark > f)
        {
            match self.store.write(
                collab.destination,
                &folder,
                &safe_name,
                mark,
                resolution.stored.as_ref(),
                opts.now,
            ) {
                Ok(_) => {
                    conv.stats.metadata_written += 1;
                    conv.high_water = Some(mark);
                }
                Err(err) if err.is_fatal_for_run() => return Err(err),
                Err(err) => {
                    conv.stats.failed += 1;
                    warn::emit(WarnEvent {
                        code: err.code().as_str(),
                        stage: "metadata-write",
                        conversation: target.label(),
                        action: "continue",
                        reason: "high-water mark not advanced",
                        err: &err.to_string(),
                    });
                }
            }
        } else {
            conv.high_water = floor;
        }

        conv.share = self.share(target, opts, collab, &folder)?;
        match &conv.share {
            ShareStatus::Done(outcome) => {
                conv.stats.granted = outcome.granted.len();
                conv.stats.notified = outcome.notified;
                conv.stats.revoked = outcome.revoked.len();
                conv.stats.share_failed = outcome.failed;
            }
            ShareStatus::Skipped(reason) => {
                conv.stats.share_skipped = 1;
                tracing::info!(conversation = %target.name, reason = %reason, "sharing skipped");
            }
        }
        Ok(())
    }

    fn share(
        &self,
        target: &ExportTarget,
        opts: &ExportOptions,
        collab: &mut Collaborators<'_>,
        folder: &FolderRef,
    ) -> FeederResult<ShareStatus> {
        if !opts.share {
            return Ok(ShareStatus::Skipped("sharing disabled for this run".into()));
        }
        if !target.share {
            return Ok(ShareStatus::Skipped("sharing disabled for conversation".into()));
        }
        let Some(members_source) = collab.members else {
            return Ok(ShareStatus::Skipped("no membership source".into()));
        };

        let members = match resolve_members(members_source, target, collab.directory) {
            Ok(members) => members,
            Err(err) if err.is_fatal_for_run() => return Err(err),
            Err(err) => {
                warn::emit(WarnEvent {
                    code: err.code().as_str(),
                    stage: "membership",
                    conversation: target.label(),
                    action: "skip-sharing",
                    reason: "membership could not be resolved",
                    err: &err.to_string(),
                });
                return Ok(ShareStatus::Skipped("membership lookup failed".into()));
            }
        };
        if members.is_empty() {
            return Ok(ShareStatus::Skipped("membership is empty".into()));
        }

        let Some(access) = collab.destination.access() else {
            return Ok(ShareStatus::Skipped("destination has no access control".into()));
        };

        let mut no_share = collab.directory.no_share();
        let mut no_notify = collab.directory.no_notify();
        extend_opt_outs(&members, &mut no_share, &mut no_notify);
        let request = ShareRequest {
            conversation: target.label(),
            members: &members,
            no_share: &no_share,
            no_notify: &no_notify,
            allow_list: target.share_members.as_deref(),
        };
        match self.sharer.synchronize(access, folder, &request) {
            Ok(outcome) => Ok(ShareStatus::Done(outcome)),
            Err(err) if err.is_fatal_for_run() => Err(err),
            Err(err) => {
                warn::emit(WarnEvent {
                    code: err.code().as_str(),
                    stage: "share-list",
                    conversation: target.label(),
                    action: "skip-sharing",
                    reason: "current grants unreadable",
                    err: &err.to_string(),
                });
                Ok(ShareStatus::Skipped("current grants unreadable".into()))
            }
        }
    }
}

/// Every lookup must succeed; one failed lookup makes the whole membership uncertain.
fn resolve_members(
    source: &dyn MemberSource,
    target: &ExportTarget,
    directory: &PeopleDirectory,
) -> FeederResult<Vec<Person>> {
    let ids = source.members(target.id.as_deref().unwrap_or_default())?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(person) = source.person(&id)? {
            out.push(directory.enrich(person));
        }
    }
    Ok(out)
}

fn extend_opt_outs(
    members: &[Person],
    no_share: &mut BTreeSet<PrincipalKey>,
    no_notify: &mut BTreeSet<PrincipalKey>,
) {
    for member in members {
        let Some(key) = member.principal() else {
            continue;
        };
        if member.no_share {
            no_share.insert(key.clone());
        }
        if member.no_notifications {
            no_notify.insert(key);
        }
    }
}
