use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct FeederPaths {
    pub feeder_home: PathBuf,
    pub channels_file: PathBuf,
    pub people_file: PathBuf,
    pub output_dir: PathBuf,
    pub google_credentials: PathBuf,
    pub google_token: PathBuf,
    pub lock_file: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<FeederPaths> {
    let feeder_home = match env::var("FEEDER_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join("slack-feeder"),
    };

    let config_dir = feeder_home.join("config");
    let channels_file = env_or_default_path("FEEDER_CHANNELS_FILE", config_dir.join("channels.json"));
    let people_file = env_or_default_path("FEEDER_PEOPLE_FILE", config_dir.join("people.json"));
    let output_dir = env_or_default_path("FEEDER_OUTPUT_DIR", feeder_home.join("out"));
    let google_credentials = env_or_default_path(
        "FEEDER_GOOGLE_CREDENTIALS",
        config_dir.join("credentials.json"),
    );
    let google_token = env_or_default_path("FEEDER_GOOGLE_TOKEN", config_dir.join("token.json"));
    let lock_file = feeder_home.join("feeder.lock");

    Ok(FeederPaths {
        feeder_home,
        channels_file,
        people_file,
        output_dir,
        google_credentials,
        google_token,
        lock_file,
    })
}
