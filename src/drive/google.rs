use anyhow::{Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::error::{FeederError, FeederResult};
use crate::feeder::destination::{
    AccessControl, Append, ArtifactRef, Destination, DestinationStyle, FolderRef,
};
use crate::feeder::directory::PrincipalKey;
use crate::feeder::model::Timestamp;
use crate::feeder::retry::RetryPolicy;

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";
const DOCS_API: &str = "https://docs.googleapis.com/v1";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const DOCUMENT_MIME: &str = "application/vnd.google-apps.document";
const MULTIPART_BOUNDARY: &str = "slack_feeder_part_5d2c81f4";
const MARKER_PROPERTY: &str = "feederLastTs";
const REQUEST_TIMEOUT_SECS: u64 = 60;
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

/// Google Drive folder tree under one root folder.
///
/// Doc-style instances write Google Docs and append in place; file-style
/// instances upload fresh plain-text files. Both manage folder permissions.
pub struct DriveDestination {
    http: Client,
    token: String,
    root_folder: String,
    style: DestinationStyle,
    retry: RetryPolicy,
    folders: HashMap<String, FolderRef>,
    permission_ids: HashMap<(String, PrincipalKey), String>,
}

impl DriveDestination {
    pub fn new(
        token: impl Into<String>,
        root_folder: impl Into<String>,
        style: DestinationStyle,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let root_folder = root_folder.into().trim().to_string();
        if root_folder.is_empty() {
            bail!("GOOGLE_DRIVE_FOLDER_ID is not set");
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            token: token.into(),
            root_folder,
            style,
            retry,
            folders: HashMap::new(),
            permission_ids: HashMap::new(),
        })
    }

    /// Names ending in `.json` or `.txt` are always plain files, even in doc style.
    fn is_document(&self, name: &str) -> bool {
        self.style == DestinationStyle::Doc && !is_plain_file_name(name)
    }

    fn send(&self, label: &str, build: &impl Fn() -> RequestBuilder) -> FeederResult<String> {
        let response = build().bearer_auth(&self.token).send()?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text()?;
        if status.is_success() {
            return Ok(body);
        }
        Err(classify_response(label, status, &body, retry_after))
    }

    fn execute(&self, label: &str, build: impl Fn() -> RequestBuilder) -> FeederResult<String> {
        self.retry.run(label, || self.send(label, &build))
    }

    fn execute_json(&self, label: &str, build: impl Fn() -> RequestBuilder) -> FeederResult<Value> {
        parse_body(&self.execute(label, build)?)
    }

    /// Creates and appends: resent only after a rate limit, never after a 5xx.
    fn execute_write_json(
        &self,
        label: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> FeederResult<Value> {
        parse_body(&self.retry.run_unapplied(label, || self.send(label, &build))?)
    }

    fn query_first(&self, label: &str, query: &str) -> FeederResult<Option<String>> {
        let body = self.execute_json(label, || {
            self.http.get(format!("{DRIVE_API}/files")).query(&[
                ("q", query),
                ("fields", "files(id,name,modifiedTime)"),
                ("orderBy", "modifiedTime desc"),
                ("pageSize", "10"),
            ])
        })?;
        let files = body.get("files").and_then(Value::as_array);
        if let Some(files) = files
            && files.len() > 1
        {
            tracing::warn!(query, matches = files.len(), "several drive files match; using the most recent");
        }
        Ok(files
            .and_then(|f| f.first())
            .and_then(|f| f.get("id"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned))
    }

    fn upload(&self, metadata: &Value, content: &str) -> FeederResult<String> {
        let body = multipart_body(metadata, content);
        let created = self.execute_write_json("files.create", || {
            self.http
                .post(format!("{DRIVE_UPLOAD_API}/files"))
                .query(&[("uploadType", "multipart"), ("fields", "id")])
                .header(
                    CONTENT_TYPE,
                    format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
                )
                .body(body.clone())
        })?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| FeederError::Transient("files.create returned no id".into()))
    }

    fn set_marker(&self, artifact: &ArtifactRef, marker: Timestamp) -> FeederResult<()> {
        let patch = json!({ "appProperties": { MARKER_PROPERTY: marker.to_string() } });
        self.execute("files.update", || {
            self.http
                .patch(format!("{DRIVE_API}/files/{}", artifact.id))
                .query(&[("fields", "id")])
                .json(&patch)
        })?;
        Ok(())
    }

    fn list_permissions(&self, folder: &FolderRef) -> FeederResult<Vec<Value>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let body = self.execute_json("permissions.list", || {
                let mut req = self
                    .http
                    .get(format!("{DRIVE_API}/files/{}/permissions", folder.id))
                    .query(&[
                        ("fields", "nextPageToken,permissions(id,type,role,emailAddress)"),
                        ("pageSize", "100"),
                    ]);
                if let Some(token) = page_token.as_deref() {
                    req = req.query(&[("pageToken", token)]);
                }
                req
            })?;
            if let Some(perms) = body.get("permissions").and_then(Value::as_array) {
                out.extend(perms.iter().cloned());
            }
            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned);
            if page_token.is_none() {
                return Ok(out);
            }
        }
    }
}

impl Destination for DriveDestination {
    fn style(&self) -> DestinationStyle {
        self.style
    }

    fn ensure_folder(&mut self, name: &str) -> FeederResult<FolderRef> {
        if let Some(folder) = self.folders.get(name) {
            return Ok(folder.clone());
        }
        let query = format!(
            "name='{}' and '{}' in parents and mimeType='{FOLDER_MIME}' and trashed=false",
            escape_query(name),
            escape_query(&self.root_folder)
        );
        let id = match self.query_first("files.list", &query)? {
            Some(id) => id,
            None => {
                let metadata = json!({
                    "name": name,
                    "mimeType": FOLDER_MIME,
                    "parents": [self.root_folder],
                });
                let created = self.execute_write_json("files.create", || {
                    self.http
                        .post(format!("{DRIVE_API}/files"))
                        .query(&[("fields", "id")])
                        .json(&metadata)
                })?;
                let id = created
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| FeederError::Transient("folder create returned no id".into()))?
                    .to_string();
                tracing::info!(folder = name, id = %id, "created drive folder");
                id
            }
        };
        let folder = FolderRef {
            id,
            name: name.to_string(),
        };
        self.folders.insert(name.to_string(), folder.clone());
        Ok(folder)
    }

    fn find(&mut self, folder: &FolderRef, name: &str) -> FeederResult<Option<ArtifactRef>> {
        let mut query = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query(name),
            escape_query(&folder.id)
        );
        if self.is_document(name) {
            query.push_str(&format!(" and mimeType='{DOCUMENT_MIME}'"));
        }
        Ok(self.query_first("files.list", &query)?.map(|id| ArtifactRef {
            id,
            name: name.to_string(),
        }))
    }

    fn create(
        &mut self,
        folder: &FolderRef,
        name: &str,
        content: &str,
        marker: Option<Timestamp>,
    ) -> FeederResult<ArtifactRef> {
        let mime = if self.is_document(name) {
            DOCUMENT_MIME
        } else {
            plain_mime(name)
        };
        let mut metadata = json!({
            "name": name,
            "parents": [folder.id],
            "mimeType": mime,
        });
        if let Some(marker) = marker {
            metadata["appProperties"] = json!({ MARKER_PROPERTY: marker.to_string() });
        }
        let id = self.upload(&metadata, content)?;
        tracing::debug!(artifact = name, id = %id, "created drive artifact");
        Ok(ArtifactRef {
            id,
            name: name.to_string(),
        })
    }

    fn read_text(&mut self, artifact: &ArtifactRef) -> FeederResult<String> {
        if self.is_document(&artifact.name) {
            return self.execute("files.export", || {
                self.http
                    .get(format!("{DRIVE_API}/files/{}/export", artifact.id))
                    .query(&[("mimeType", "text/plain")])
            });
        }
        self.execute("files.get", || {
            self.http
                .get(format!("{DRIVE_API}/files/{}", artifact.id))
                .query(&[("alt", "media")])
        })
    }

    fn overwrite(&mut self, artifact: &ArtifactRef, content: &str) -> FeederResult<()> {
        let mime = plain_mime(&artifact.name);
        self.execute("files.update", || {
            self.http
                .patch(format!("{DRIVE_UPLOAD_API}/files/{}", artifact.id))
                .query(&[("uploadType", "media"), ("fields", "id")])
                .header(CONTENT_TYPE, format!("{mime}; charset=UTF-8"))
                .body(content.to_string())
        })?;
        Ok(())
    }

    fn appender(&mut self) -> Option<&mut dyn Append> {
        match self.style {
            DestinationStyle::Doc => Some(self),
            DestinationStyle::File => None,
        }
    }

    fn access(&mut self) -> Option<&mut dyn AccessControl> {
        Some(self)
    }
}

impl Append for DriveDestination {
    fn append(&mut self, artifact: &ArtifactRef, content: &str, marker: Timestamp) -> FeederResult<()> {
        let request = json!({
            "requests": [{
                "insertText": {
                    "endOfSegmentLocation": {},
                    "text": content,
                }
            }]
        });
        self.execute_write_json("documents.batchUpdate", || {
            self.http
                .post(format!("{DOCS_API}/documents/{}:batchUpdate", artifact.id))
                .json(&request)
        })?;
        // Text first, marker second: a lost marker write repeats messages, never drops them.
        self.set_marker(artifact, marker)
    }

    fn read_marker(&mut self, artifact: &ArtifactRef) -> FeederResult<Option<Timestamp>> {
        let body = self.execute_json("files.get", || {
            self.http
                .get(format!("{DRIVE_API}/files/{}", artifact.id))
                .query(&[("fields", "appProperties")])
        })?;
        Ok(body
            .get("appProperties")
            .and_then(|p| p.get(MARKER_PROPERTY))
            .and_then(Value::as_str)
            .and_then(Timestamp::parse))
    }
}

impl AccessControl for DriveDestination {
    fn list_principals(&mut self, folder: &FolderRef) -> FeederResult<BTreeSet<PrincipalKey>> {
        let mut out = BTreeSet::new();
        for perm in self.list_permissions(folder)? {
            let Some((key, id)) = user_permission(&perm) else {
                continue;
            };
            self.permission_ids
                .insert((folder.id.clone(), key.clone()), id);
            out.insert(key);
        }
        Ok(out)
    }

    fn grant(&mut self, folder: &FolderRef, principal: &PrincipalKey, notify: bool) -> FeederResult<()> {
        let body = json!({
            "type": "user",
            "role": "writer",
            "emailAddress": principal.as_str(),
        });
        let notify = if notify { "true" } else { "false" };
        let created = self.execute_json("permissions.create", || {
            self.http
                .post(format!("{DRIVE_API}/files/{}/permissions", folder.id))
                .query(&[("sendNotificationEmail", notify), ("fields", "id")])
                .json(&body)
        })?;
        if let Some(id) = created.get("id").and_then(Value::as_str) {
            self.permission_ids
                .insert((folder.id.clone(), principal.clone()), id.to_string());
        }
        Ok(())
    }

    fn revoke(&mut self, folder: &FolderRef, principal: &PrincipalKey) -> FeederResult<()> {
        let lookup = (folder.id.clone(), principal.clone());
        if !self.permission_ids.contains_key(&lookup) {
            self.list_principals(folder)?;
        }
        let Some(id) = self.permission_ids.remove(&lookup) else {
            return Ok(());
        };
        self.execute("permissions.delete", || {
            self.http
                .delete(format!("{DRIVE_API}/files/{}/permissions/{id}", folder.id))
        })?;
        Ok(())
    }
}

fn is_plain_file_name(name: &str) -> bool {
    name.ends_with(".json") || name.ends_with(".txt")
}

fn plain_mime(name: &str) -> &'static str {
    if name.ends_with(".json") {
        "application/json"
    } else {
        "text/plain"
    }
}

fn parse_body(body: &str) -> FeederResult<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(body)?)
}

/// Single-quoted Drive query literal.
fn escape_query(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

fn multipart_body(metadata: &Value, content: &str) -> String {
    format!(
        "--{MULTIPART_BOUNDARY}\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\r\n\
         {metadata}\r\n\
         --{MULTIPART_BOUNDARY}\r\n\
         Content-Type: text/plain; charset=UTF-8\r\n\r\n\
         {content}\r\n\
         --{MULTIPART_BOUNDARY}--\r\n"
    )
}

/// Only individual users count; the owner is never listed.
fn user_permission(perm: &Value) -> Option<(PrincipalKey, String)> {
    if perm.get("type").and_then(Value::as_str) != Some("user")
        || perm.get("role").and_then(Value::as_str) == Some("owner")
    {
        return None;
    }
    let key = PrincipalKey::from_email(perm.get("emailAddress")?.as_str()?)?;
    let id = perm.get("id")?.as_str()?.to_string();
    Some((key, id))
}

fn classify_response(
    label: &str,
    status: StatusCode,
    body: &str,
    retry_after: Option<u64>,
) -> FeederError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = parsed.get("error").unwrap_or(&Value::Null);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
        .to_string();
    let rate_limited = error
        .get("errors")
        .and_then(Value::as_array)
        .is_some_and(|errs| {
            errs.iter().any(|e| {
                e.get("reason")
                    .and_then(Value::as_str)
                    .is_some_and(|r| RATE_LIMIT_REASONS.contains(&r))
            })
        });

    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && rate_limited) {
        return FeederError::RateLimited {
            endpoint: label.to_string(),
            retry_after_secs: retry_after,
        };
    }
    if status == StatusCode::UNAUTHORIZED {
        return FeederError::Auth(format!("{label}: {message}"));
    }
    if status.is_server_error() {
        return FeederError::Transient(format!("{label} returned {status}: {message}"));
    }
    FeederError::Remote {
        status: status.as_u16(),
        message: format!("{label}: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_write_responses_parse_as_null() {
        assert_eq!(parse_body("  ").expect("empty"), Value::Null);
        assert_eq!(parse_body(r#"{"id":"f1"}"#).expect("json")["id"], "f1");
        assert!(parse_body("<html>").is_err());
    }

    #[test]
    fn query_literals_escape_quotes_and_backslashes() {
        assert_eq!(escape_query("Bob's chat"), "Bob\\'s chat");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
    }

    #[test]
    fn metadata_and_text_files_stay_plain_in_doc_style() {
        let dest = DriveDestination::new("t", "root", DestinationStyle::Doc, RetryPolicy::default())
            .expect("dest");
        assert!(dest.is_document("general slack messages 20240401"));
        assert!(!dest.is_document("general_last_export.json"));
        assert_eq!(plain_mime("general_last_export.json"), "application/json");

        let files = DriveDestination::new("t", "root", DestinationStyle::File, RetryPolicy::default())
            .expect("dest");
        assert!(!files.is_document("general slack messages 20240401_20240402_101500.txt"));
    }

    #[test]
    fn empty_root_folder_is_rejected() {
        assert!(DriveDestination::new("t", "  ", DestinationStyle::Doc, RetryPolicy::default()).is_err());
    }

    #[test]
    fn owner_and_non_user_permissions_are_skipped() {
        let owner = json!({"id": "p0", "type": "user", "role": "owner", "emailAddress": "me@example.com"});
        let domain = json!({"id": "p1", "type": "domain", "role": "reader", "domain": "example.com"});
        let writer = json!({"id": "p2", "type": "user", "role": "writer", "emailAddress": "Ann@Example.com"});
        assert!(user_permission(&owner).is_none());
        assert!(user_permission(&domain).is_none());
        let (key, id) = user_permission(&writer).expect("user permission");
        assert_eq!(key.as_str(), "ann@example.com");
        assert_eq!(id, "p2");
    }

    #[test]
    fn drive_errors_map_to_failure_classes() {
        let quota = r#"{"error":{"code":403,"message":"Rate Limit Exceeded","errors":[{"reason":"userRateLimitExceeded"}]}}"#;
        assert!(matches!(
            classify_response("files.list", StatusCode::FORBIDDEN, quota, Some(2)),
            FeederError::RateLimited {
                retry_after_secs: Some(2),
                ..
            }
        ));
        assert!(classify_response("files.list", StatusCode::UNAUTHORIZED, "", None).is_fatal_for_run());
        assert!(classify_response("files.list", StatusCode::BAD_GATEWAY, "", None).is_retryable());

        let denied = r#"{"error":{"code":403,"message":"Insufficient permissions for this file"}}"#;
        let err = classify_response("permissions.create", StatusCode::FORBIDDEN, denied, None);
        assert!(matches!(err, FeederError::Remote { status: 403, .. }));
        assert!(err.to_string().contains("Insufficient permissions"));
    }

    #[test]
    fn multipart_body_carries_metadata_then_content() {
        let body = multipart_body(&json!({"name": "a"}), "hello");
        let meta = body.find(r#"{"name":"a"}"#).expect("metadata part");
        let text = body.find("hello").expect("content part");
        assert!(meta < text);
        assert!(body.ends_with(&format!("--{MULTIPART_BOUNDARY}--\r\n")));
    }
}
