use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::feeder::paths::FeederPaths;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
struct ClientSecret {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// `credentials.json` as downloaded from the Cloud console.
#[derive(Debug, Clone, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    installed: Option<ClientSecret>,
    #[serde(default)]
    web: Option<ClientSecret>,
}

/// `token.json` holding an authorized-user refresh token.
#[derive(Debug, Clone, Deserialize)]
struct TokenFile {
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RefreshGrant {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token_uri: String,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Client details come from `token.json` when it carries them, else from `credentials.json`.
fn refresh_grant(credentials: Option<CredentialsFile>, token: TokenFile) -> Result<RefreshGrant> {
    let refresh_token = token
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| anyhow!("token file has no refresh_token; re-authorize the Drive client"))?;
    let secret = credentials.and_then(|c| c.installed.or(c.web));

    let client_id = token
        .client_id
        .or_else(|| secret.as_ref().map(|s| s.client_id.clone()))
        .ok_or_else(|| anyhow!("no OAuth client_id in token or credentials file"))?;
    let client_secret = token
        .client_secret
        .or_else(|| secret.as_ref().map(|s| s.client_secret.clone()))
        .ok_or_else(|| anyhow!("no OAuth client_secret in token or credentials file"))?;
    let token_uri = token
        .token_uri
        .or_else(|| secret.and_then(|s| s.token_uri))
        .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());

    Ok(RefreshGrant {
        client_id,
        client_secret,
        refresh_token,
        token_uri,
    })
}

fn exchange(grant: &RefreshGrant) -> Result<String> {
    let client = Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()?;
    let response = client
        .post(&grant.token_uri)
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", grant.client_id.as_str()),
            ("client_secret", grant.client_secret.as_str()),
            ("refresh_token", grant.refresh_token.as_str()),
        ])
        .send()
        .context("token refresh request failed")?;
    if !response.status().is_success() {
        bail!(
            "google token refresh rejected with status {}",
            response.status()
        );
    }
    let json: Value = response.json()?;
    json.get("access_token")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| anyhow!("token refresh response had no access_token"))
}

/// `GOOGLE_ACCESS_TOKEN` if set, otherwise a refresh-token exchange.
pub fn resolve_access_token(paths: &FeederPaths) -> Result<String> {
    if let Ok(token) = env::var("GOOGLE_ACCESS_TOKEN")
        && !token.trim().is_empty()
    {
        return Ok(token.trim().to_string());
    }
    if !paths.google_token.exists() {
        bail!(
            "no Google credentials: set GOOGLE_ACCESS_TOKEN or provide {}",
            paths.google_token.display()
        );
    }
    let token: TokenFile = read_json(&paths.google_token)?;
    let credentials = if paths.google_credentials.exists() {
        Some(read_json::<CredentialsFile>(&paths.google_credentials)?)
    } else {
        None
    };
    let grant = refresh_grant(credentials, token)?;
    tracing::debug!(token_uri = %grant.token_uri, "refreshing google access token");
    exchange(&grant)
}

/// Whether either credential route is configured, without any network call.
pub fn credentials_present(paths: &FeederPaths) -> bool {
    env::var("GOOGLE_ACCESS_TOKEN").is_ok_and(|t| !t.trim().is_empty())
        || paths.google_token.exists()
}
