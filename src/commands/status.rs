use anyhow::Result;
use std::env;

use crate::commands::{CommandReport, drive_folder_id};
use crate::drive::auth::credentials_present;
use crate::feeder::config::{load_config, resolve_config_path};
use crate::feeder::directory::{load_channels, load_people};
use crate::feeder::paths::resolve_paths;

include!(concat!(env!("OUT_DIR"), "/feeder_env_allowlist.rs"));

fn env_overrides_set() -> Vec<&'static str> {
    GENERATED_FEEDER_ENV_ALLOWLIST
        .iter()
        .copied()
        .filter(|key| env::var_os(key).is_some())
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build={}", env!("BUILD_UUID")));
    report.detail(format!("feeder_home={}", paths.feeder_home.display()));
    match resolve_config_path() {
        Some(path) if path.exists() => report.detail(format!("config_file={}", path.display())),
        Some(path) => report.detail(format!("config_file={} (absent, defaults in use)", path.display())),
        None => report.detail("config_file=unresolved (defaults in use)"),
    }
    report.detail(format!("channels_file={}", paths.channels_file.display()));
    report.detail(format!("people_file={}", paths.people_file.display()));
    report.detail(format!("output_dir={}", paths.output_dir.display()));
    report.detail(format!("lock_file={}", paths.lock_file.display()));
    report.detail(format!(
        "export: max_date_range_days={} chunk_message_threshold={} chunk_date_range_days={} page_size={} include_threads={} display_timezone={}",
        cfg.export.max_date_range_days,
        cfg.export.chunk_message_threshold,
        cfg.export.chunk_date_range_days,
        cfg.export.page_size,
        cfg.export.include_threads,
        cfg.export.display_timezone,
    ));
    report.detail(format!(
        "retry: max_attempts={} base_delay_ms={}",
        cfg.retry.max_attempts, cfg.retry.base_delay_ms
    ));
    report.detail(format!(
        "sharing: rate_limit_interval={} rate_limit_delay_ms={}",
        cfg.sharing.rate_limit_interval, cfg.sharing.rate_limit_delay_ms
    ));
    let overrides = env_overrides_set();
    if !overrides.is_empty() {
        report.detail(format!("env_overrides={}", overrides.join(",")));
    }

    match load_channels(&paths.channels_file) {
        Ok(file) => report.detail(format!(
            "conversations={} export_enabled={}",
            file.channels.len(),
            file.channels.iter().filter(|c| c.export).count()
        )),
        Err(err) => report.issue(format!("channels file unreadable: {err:#}")),
    }
    match load_people(&paths.people_file) {
        Ok(file) => report.detail(format!("people={}", file.people.len())),
        Err(err) => report.issue(format!("people file unreadable: {err:#}")),
    }

    if env::var("SLACK_BOT_TOKEN").is_ok_and(|t| !t.trim().is_empty()) {
        report.detail("slack_token=present");
    } else {
        report.issue("missing SLACK_BOT_TOKEN");
    }
    if drive_folder_id().is_some() {
        report.detail("drive_folder=present");
    } else {
        report.issue("missing GOOGLE_DRIVE_FOLDER_ID (only the local destination will work)");
    }
    if credentials_present(&paths) {
        report.detail("google_credentials=present");
    } else {
        report.issue(format!(
            "missing Google credentials: set GOOGLE_ACCESS_TOKEN or provide {}",
            paths.google_token.display()
        ));
    }

    Ok(report)
}
