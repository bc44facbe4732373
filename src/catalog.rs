//! Blocking client for the civitai.com model catalog.
//!
//! Three endpoints are used: version-id lookup by file hash, version
//! detail lookup by id, and the file download endpoint. All requests
//! pass through a [`RequestGate`] that enforces the configured minimum
//! delay between calls.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::NetworkOptions;
use crate::error::FetchError;

const CATALOG_URL: &str = "https://civitai.com";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const GATE_POLL: Duration = Duration::from_millis(100);

static ILLEGAL_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[/\\?%*:|"<>\x7F\x00-\x1F]"#).unwrap());

/// Source of time for the request gate. Swapped out in tests.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time via [`Instant`] and [`thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Enforces a minimum delay between remote requests.
#[derive(Debug)]
pub struct RequestGate<C: Clock = MonotonicClock> {
    delay: Duration,
    last_request: Option<Instant>,
    clock: C,
}

impl RequestGate {
    pub fn new(delay_secs: f64) -> Self {
        Self::with_clock(delay_secs, MonotonicClock)
    }
}

impl<C: Clock> RequestGate<C> {
    pub fn with_clock(delay_secs: f64, clock: C) -> Self {
        Self {
            delay: Duration::from_secs_f64(delay_secs.max(0.0)),
            last_request: None,
            clock,
        }
    }

    /// Blocks until the delay has passed since the previous request,
    /// then marks the new request as started.
    pub fn wait(&mut self) {
        if let Some(last) = self.last_request {
            while self.clock.now().duration_since(last) < self.delay {
                self.clock.sleep(GATE_POLL);
            }
        }
        self.last_request = Some(self.clock.now());
    }
}

/// Catalog details for one model version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    /// Download filename, already passed through [`sanitize_filename`].
    pub filename: String,
    /// Display name of the model this version belongs to.
    pub name: String,
    /// Base model label, e.g. `SDXL 1.0`.
    pub base_model: String,
    /// Raw type label as reported by the catalog, e.g. `LORA` or
    /// `Checkpoint`.
    pub kind: String,
}

/// Result of a download request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { filename: String, bytes: u64 },
    /// The target file was already on disk, so no request was made for
    /// the body.
    AlreadyPresent { filename: String },
}

impl DownloadOutcome {
    pub fn filename(&self) -> &str {
        match self {
            Self::Downloaded { filename, .. } | Self::AlreadyPresent { filename } => filename,
        }
    }
}

/// Client for the civitai.com REST API.
pub struct CatalogClient {
    http: Client,
    gate: RequestGate,
    base_url: String,
    api_key: String,
    max_file_size: u64,
    retries: u32,
}

impl CatalogClient {
    pub fn new(options: &NetworkOptions) -> Result<Self, FetchError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            gate: RequestGate::new(options.request_delay),
            base_url: CATALOG_URL.to_string(),
            api_key: options.api_key.clone(),
            max_file_size: options.max_file_size,
            retries: options.retries,
        })
    }

    /// Looks up filename, display name, base model and type label for a
    /// model version id.
    pub fn version_info(&mut self, version_id: &str) -> Result<VersionInfo, FetchError> {
        info!("looking up model version id {version_id} on civitai.com");
        let url = format!("{}/api/v1/model-versions/{version_id}", self.base_url);
        let payload = self.get_json(&url)?;
        parse_version_payload(&payload, version_id)
    }

    /// Looks up the version id registered for a file hash.
    pub fn version_id_by_hash(&mut self, hash: &str) -> Result<String, FetchError> {
        info!("looking up model hash {hash} on civitai.com");
        let url = format!("{}/api/v1/model-versions/by-hash/{hash}", self.base_url);
        let payload = self.get_json(&url)?;
        parse_hash_payload(&payload, hash)
    }

    /// Downloads the file for a version id into `dir`.
    ///
    /// `expected` is the filename from an earlier version lookup; it may
    /// be empty, in which case the name announced by the server is
    /// used. A target file already on disk counts as downloaded and no
    /// request is made.
    pub fn download(
        &mut self,
        version_id: &str,
        dir: &Path,
        expected: &str,
    ) -> Result<DownloadOutcome, FetchError> {
        if !expected.is_empty() && dir.join(expected).is_file() {
            info!("{} already exists; skipping download", dir.join(expected).display());
            return Ok(DownloadOutcome::AlreadyPresent {
                filename: expected.to_string(),
            });
        }
        let mut attempts = 0;
        loop {
            match self.download_once(version_id, dir, expected) {
                Err(FetchError::Network(err)) if attempts < self.retries => {
                    attempts += 1;
                    warn!("download attempt failed ({err}); retry {attempts} of {}", self.retries);
                }
                result => return result,
            }
        }
    }

    fn download_once(
        &mut self,
        version_id: &str,
        dir: &Path,
        expected: &str,
    ) -> Result<DownloadOutcome, FetchError> {
        let url = format!("{}/api/download/models/{version_id}", self.base_url);
        self.gate.wait();
        let mut request = self.http.get(&url);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send()?;

        let status = response.status();
        if !status.is_success() {
            // auth failures redirect to a login page carrying this reason
            if status == StatusCode::UNAUTHORIZED
                || response.url().as_str().contains("reason=download-auth")
            {
                return Err(FetchError::AuthRequired);
            }
            if status == StatusCode::FORBIDDEN {
                return Err(FetchError::EarlyAccess);
            }
            return Err(FetchError::Resolve(format!("{url} (status {status})")));
        }

        let remote = content_disposition_filename(response.headers());
        let filename = if !expected.is_empty() {
            if let Some(remote) = remote.as_deref() {
                if remote != expected {
                    warn!("remote filename ({remote}) does not match expected filename ({expected})");
                }
            }
            expected.to_string()
        } else if let Some(remote) = remote {
            sanitize_filename(&remote)
        } else {
            return Err(FetchError::Resolve(format!(
                "output filename for model version {version_id}"
            )));
        };

        let target = dir.join(&filename);
        if target.is_file() {
            info!("{} already exists; skipping download", target.display());
            return Ok(DownloadOutcome::AlreadyPresent { filename });
        }

        let total = response.content_length().unwrap_or(0);
        if self.max_file_size > 0 && total > self.max_file_size {
            return Err(FetchError::SizeExceeded {
                size: total,
                limit: self.max_file_size,
            });
        }

        fs::create_dir_all(dir)?;
        info!("downloading {filename} from {url}");
        let bar = if total > 0 {
            ProgressBar::new(total)
        } else {
            ProgressBar::new_spinner().with_message("unknown total file size")
        };
        let part = dir.join(format!("{filename}.part"));
        let result = write_body(bar.wrap_read(response), &part, &target);
        bar.finish_and_clear();
        match result {
            Ok(bytes) => Ok(DownloadOutcome::Downloaded { filename, bytes }),
            Err(err) => {
                let _ = fs::remove_file(&part);
                Err(err)
            }
        }
    }

    fn get_json(&mut self, url: &str) -> Result<Value, FetchError> {
        self.gate.wait();
        let mut request = self.http.get(url);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send()?;
        Ok(response.json()?)
    }
}

/// Streams the body to a `.part` file, then renames it into place.
fn write_body(mut body: impl io::Read, part: &Path, target: &Path) -> Result<u64, FetchError> {
    let mut file = fs::File::create(part)?;
    let bytes = io::copy(&mut body, &mut file)?;
    drop(file);
    fs::rename(part, target)?;
    Ok(bytes)
}

fn parse_version_payload(payload: &Value, version_id: &str) -> Result<VersionInfo, FetchError> {
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        if error == "Model not found" {
            return Err(FetchError::NotFound(format!("model version {version_id}")));
        }
        return Err(FetchError::Resolve(format!("model version {version_id}: {error}")));
    }
    let Some(files) = payload.get("files").and_then(Value::as_array) else {
        return Err(FetchError::Resolve(format!(
            "model version {version_id}: no file list in reply"
        )));
    };
    let model = payload.get("model");
    for file in files {
        let url = file.get("downloadUrl").and_then(Value::as_str).unwrap_or("");
        if !url.ends_with(version_id) {
            continue;
        }
        let Some(name) = file.get("name").and_then(Value::as_str) else {
            continue;
        };
        return Ok(VersionInfo {
            filename: sanitize_filename(name),
            name: json_str(model, "name"),
            base_model: payload
                .get("baseModel")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            kind: json_str(model, "type"),
        });
    }
    Err(FetchError::Resolve(format!(
        "model version {version_id}: no file matches the version id"
    )))
}

fn parse_hash_payload(payload: &Value, hash: &str) -> Result<String, FetchError> {
    match payload.get("id") {
        Some(Value::Number(id)) => return Ok(id.to_string()),
        Some(Value::String(id)) => return Ok(id.clone()),
        _ => {}
    }
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        if error == "Model not found" {
            return Err(FetchError::NotFound(format!("hash {hash}")));
        }
        return Err(FetchError::Resolve(format!("hash {hash}: {error}")));
    }
    Err(FetchError::Resolve(format!("hash {hash}: no id in reply")))
}

fn json_str(value: Option<&Value>, key: &str) -> String {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Filename advertised in a Content-Disposition header, e.g.
/// `attachment; filename="model.safetensors"`.
fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    let (_, tail) = value.split_once("filename=")?;
    let name = tail.split(';').next().unwrap_or(tail).trim().trim_matches('"');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Replaces characters that are unsafe in filenames with `-`.
pub fn sanitize_filename(filename: &str) -> String {
    ILLEGAL_FILENAME_CHARS.replace_all(filename, "-").into_owned()
}
