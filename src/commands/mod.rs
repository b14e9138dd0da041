pub mod export;
pub mod import;
pub mod refs;
pub mod status;

use anyhow::{Result, anyhow};
use clap::ValueEnum;
use serde::Serialize;
use std::env;

use crate::drive::auth::resolve_access_token;
use crate::drive::{DriveDestination, LocalDestination};
use crate::feeder::config::FeederConfig;
use crate::feeder::destination::{Destination, DestinationStyle};
use crate::feeder::paths::FeederPaths;
use crate::feeder::pipeline::{RunReport, ShareStatus};
use crate::feeder::stats::RunStatistics;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<RunStatistics>,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            totals: None,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    /// Fold an engine run into the report: one detail per conversation, one issue per failure.
    pub fn absorb_run(&mut self, run: &RunReport) {
        for conv in &run.conversations {
            let label = conv.id.as_deref().unwrap_or(&conv.name);
            let mut line = format!(
                "{} ({label}): fetched={} created={} appended={} unchanged={} written_messages={}",
                conv.name,
                conv.stats.fetched,
                conv.stats.created,
                conv.stats.appended,
                conv.stats.noop,
                conv.stats.messages_written,
            );
            if let Some(mark) = conv.high_water {
                line.push_str(&format!(" high_water={mark}"));
            }
            match &conv.share {
                ShareStatus::Done(outcome) => line.push_str(&format!(
                    " granted={} revoked={} unchanged_access={}",
                    outcome.granted.len(),
                    outcome.revoked.len(),
                    outcome.unchanged
                )),
                ShareStatus::Skipped(reason) => line.push_str(&format!(" sharing=skipped ({reason})")),
            }
            self.detail(line);

            if conv.stats.truncated > 0 {
                self.issue(format!(
                    "{label}: history was cut short by the page limit (FEEDER_MAX_PAGES); the high-water mark was not advanced"
                ));
            }
            if let Some(err) = conv.error.as_deref() {
                self.issue(format!("{label}: {err}"));
            } else if conv.stats.has_failures() {
                self.issue(format!(
                    "{label}: {} write failure(s), {} sharing failure(s)",
                    conv.stats.failed, conv.stats.share_failed
                ));
            }
        }
        if let Some(reason) = run.aborted.as_deref() {
            self.issue(format!("run aborted: {reason}"));
        }
        self.detail(format!("summary: {}", run.totals.summary()));
        self.totals = Some(run.totals);
    }

    pub fn render_text(&self) -> String {
        let mut out = format!(
            "{} {}\n",
            self.command,
            if self.ok { "ok" } else { "completed with issues" }
        );
        for detail in &self.details {
            out.push_str(&format!("  - {detail}\n"));
        }
        for issue in &self.issues {
            out.push_str(&format!("  ! {issue}\n"));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DestinationKind {
    /// One Google Doc per day, appended in place.
    Docs,
    /// Timestamped plain-text files in Google Drive.
    DriveFiles,
    /// Timestamped plain-text files under the output directory.
    Local,
}

impl DestinationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Docs => "docs",
            Self::DriveFiles => "drive-files",
            Self::Local => "local",
        }
    }
}

pub fn drive_folder_id() -> Option<String> {
    env::var("GOOGLE_DRIVE_FOLDER_ID")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn open_destination(
    kind: DestinationKind,
    paths: &FeederPaths,
    cfg: &FeederConfig,
) -> Result<Box<dyn Destination>> {
    let style = match kind {
        DestinationKind::Local => {
            return Ok(Box::new(LocalDestination::new(&paths.output_dir)));
        }
        DestinationKind::Docs => DestinationStyle::Doc,
        DestinationKind::DriveFiles => DestinationStyle::File,
    };
    let folder = drive_folder_id().ok_or_else(|| anyhow!("GOOGLE_DRIVE_FOLDER_ID is not set"))?;
    let token = resolve_access_token(paths)?;
    Ok(Box::new(DriveDestination::new(
        token,
        folder,
        style,
        cfg.retry_policy(),
    )?))
}
