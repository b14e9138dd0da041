use anyhow::Result;
use chrono::Utc;
use clap::Args;

use crate::commands::{CommandReport, DestinationKind, open_destination};
use crate::feeder::config::load_config;
use crate::feeder::directory::{LayeredNames, PeopleDirectory, load_channels, load_people};
use crate::feeder::lock::RunLock;
use crate::feeder::model::ExportTarget;
use crate::feeder::paths::resolve_paths;
use crate::feeder::pipeline::{Collaborators, ExportEngine, ExportOptions};
use crate::feeder::window::parse_date_bound;
use crate::slack::SlackClient;

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    /// Start of the window (UTC), `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`.
    #[arg(long)]
    pub start_date: Option<String>,
    /// Inclusive end of the window (UTC). A bare date covers the whole day.
    #[arg(long)]
    pub end_date: Option<String>,
    /// Lift the maximum date-range cap.
    #[arg(long)]
    pub bulk: bool,
    #[arg(long, value_enum, default_value_t = DestinationKind::Docs)]
    pub destination: DestinationKind,
    /// Only export these conversation ids (repeatable).
    #[arg(long = "conversation")]
    pub conversations: Vec<String>,
    /// Skip permission sync for this run.
    #[arg(long)]
    pub no_share: bool,
}

pub fn run(args: &ExportArgs) -> Result<CommandReport> {
    let mut report = CommandReport::new("export");
    let paths = resolve_paths()?;
    let cfg = load_config()?;

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

    let channels = load_channels(&paths.channels_file)?;
    let directory = PeopleDirectory::new(load_people(&paths.people_file)?.people);
    let slack = SlackClient::from_env(&cfg)?;
    let names = LayeredNames::new(&directory, Some(&slack));

    let targets: Vec<ExportTarget> = channels
        .channels
        .iter()
        .filter(|c| c.export)
        .filter(|c| {
            args.conversations.is_empty()
                || c.id
                    .as_deref()
                    .is_some_and(|id| args.conversations.iter().any(|want| want == id))
        })
        .map(|c| c.to_target(&names, Some(&slack)))
        .collect();
    report.detail(format!("channels_file={}", paths.channels_file.display()));
    report.detail(format!("destination={}", args.destination.as_str()));
    if targets.is_empty() {
        report.issue(format!(
            "no conversations selected for export; check {} (export=true) and --conversation",
            paths.channels_file.display()
        ));
        return Ok(report);
    }

    let mut destination = open_destination(args.destination, &paths, &cfg)?;
    let engine = ExportEngine::new(&cfg)?;
    let opts = ExportOptions {
        explicit_start,
        explicit_end,
        bulk: args.bulk,
        validate_range: !args.bulk,
        share: !args.no_share,
        now: Utc::now(),
    };
    let mut collab = Collaborators {
        source: &slack,
        names: &names,
        members: Some(&slack),
        destination: destination.as_mut(),
        directory: &directory,
    };
    let run = engine.run(&targets, &opts, &mut collab);
    report.absorb_run(&run);
    Ok(report)
}
