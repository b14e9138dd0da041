use anyhow::{Result, bail};
use clap::{ArgAction, Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Debug, Parser)]
#[command(
    name = "slack-feeder",
    version,
    about = "Incremental Slack history export to per-day Google Drive documents"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Export configured conversations from Slack.
    Export(commands::export::ExportArgs),
    /// Export a pre-extracted message file from another source.
    Import(commands::import::ImportArgs),
    /// Regenerate channels.json and people.json from the workspace.
    Refs,
    /// Show resolved paths, configuration and credential presence.
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let report = match &cli.command {
        Command::Export(args) => commands::export::run(args)?,
        Command::Import(args) => commands::import::run(args)?,
        Command::Refs => commands::refs::run()?,
        Command::Status => commands::status::run()?,
    };
    print_report(&report, cli.json)?;

    if !report.ok {
        bail!(
            "{} finished with {} issue(s)",
            report.command,
            report.issues.len()
        );
    }
    Ok(())
}
