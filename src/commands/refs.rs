use anyhow::Result;

use crate::commands::CommandReport;
use crate::feeder::config::load_config;
use crate::feeder::directory::{
    ChannelsFile, PeopleFile, load_channels, load_people, merge_channels, merge_people, save_json,
};
use crate::feeder::paths::resolve_paths;
use crate::slack::SlackClient;

/// Regenerate `channels.json` and `people.json` from the workspace, keeping hand-set flags.
pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("refs");
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let slack = SlackClient::from_env(&cfg)?;

    let existing_channels = load_channels(&paths.channels_file)?;
    let existing_people = load_people(&paths.people_file)?;

    let conversations = slack.list_conversations()?;
    let users = slack.list_users()?;
    let without_email = users.iter().filter(|p| p.email.is_none()).count();

    let channels = ChannelsFile {
        channels: merge_channels(&existing_channels.channels, conversations),
    };
    let people = PeopleFile {
        people: merge_people(&existing_people.people, users),
    };
    save_json(&paths.channels_file, &channels)?;
    save_json(&paths.people_file, &people)?;

    let exported = channels.channels.iter().filter(|c| c.export).count();
    report.detail(format!(
        "channels_file={} conversations={} export_enabled={exported}",
        paths.channels_file.display(),
        channels.channels.len()
    ));
    report.detail(format!(
        "people_file={} people={}",
        paths.people_file.display(),
        people.people.len()
    ));
    if without_email > 0 {
        report.detail(format!(
            "{without_email} user(s) have no email; sharing skips them (check the users:read.email scope)"
        ));
    }
    Ok(report)
}
