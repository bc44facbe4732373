//! Lookup caches and the download ledger.
//!
//! Four flat text files under the cache directory carry state between
//! runs:
//!
//! - `do_not_download.txt`: user-maintained blacklist of version ids
//! - `civitai_version_ids.txt`: ledger of already-downloaded version ids
//! - `civitai_hash_ids.txt`: hash to version-id lookup results
//! - `civitai_version_info.txt`: version-id to filename/name/base/type
//!   lookup results
//!
//! All four are append-only, comma-delimited and user-editable. In the
//! blacklist and the ledger only the id before the first comma matters;
//! the rest of the line is annotation.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::VersionInfo;
use crate::config::data_lines;

const BLACKLIST_FILE: &str = "do_not_download.txt";
const LEDGER_FILE: &str = "civitai_version_ids.txt";
const HASH_FILE: &str = "civitai_hash_ids.txt";
const VERSION_INFO_FILE: &str = "civitai_version_info.txt";

/// In-memory view of the cache files, loaded once per run. Mutations
/// are appended to the backing file immediately.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    blacklist: HashSet<String>,
    downloaded: HashSet<String>,
    hash_ids: HashMap<String, String>,
    version_info: HashMap<String, VersionInfo>,
}

impl CacheStore {
    /// Load all cache files from the given directory, creating it when
    /// absent.
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut store = Self {
            dir: dir.to_path_buf(),
            blacklist: HashSet::new(),
            downloaded: HashSet::new(),
            hash_ids: HashMap::new(),
            version_info: HashMap::new(),
        };
        store.load()?;
        debug!(
            "cache loaded: {} blacklisted, {} downloaded, {} hash lookups, {} version-info entries",
            store.blacklist.len(),
            store.downloaded.len(),
            store.hash_ids.len(),
            store.version_info.len()
        );
        Ok(store)
    }

    fn load(&mut self) -> io::Result<()> {
        let blacklist = self.dir.join(BLACKLIST_FILE);
        if blacklist.is_file() {
            // the blacklist is hand-edited, so comments are expected
            for line in data_lines(&blacklist)? {
                if let Some(id) = leading_id(&line) {
                    self.blacklist.insert(id);
                }
            }
        }
        let ledger = self.dir.join(LEDGER_FILE);
        if ledger.is_file() {
            for line in raw_lines(&ledger)? {
                if let Some(id) = leading_id(&line) {
                    self.downloaded.insert(id);
                }
            }
        }
        let hashes = self.dir.join(HASH_FILE);
        if hashes.is_file() {
            for line in raw_lines(&hashes)? {
                if let Some((hash, id)) = line.split_once(',') {
                    let hash = hash.trim();
                    if !hash.is_empty() {
                        self.hash_ids.insert(hash.to_string(), id.trim().to_string());
                    }
                }
            }
        }
        let infos = self.dir.join(VERSION_INFO_FILE);
        if infos.is_file() {
            for line in raw_lines(&infos)? {
                let mut parts = line.splitn(5, ',');
                let id = parts.next().unwrap_or("").trim();
                if id.is_empty() {
                    continue;
                }
                let info = VersionInfo {
                    filename: parts.next().unwrap_or("").trim().to_string(),
                    name: parts.next().unwrap_or("").trim().to_string(),
                    base_model: parts.next().unwrap_or("").trim().to_string(),
                    kind: parts.next().unwrap_or("").trim().to_string(),
                };
                self.version_info.insert(id.to_string(), info);
            }
        }
        Ok(())
    }

    pub fn is_blacklisted(&self, version_id: &str) -> bool {
        self.blacklist.contains(version_id)
    }

    pub fn is_downloaded(&self, version_id: &str) -> bool {
        self.downloaded.contains(version_id)
    }

    /// Record a completed download so later runs skip this id. The
    /// filename is annotation only; membership is by id.
    pub fn record_download(&mut self, version_id: &str, filename: &str) -> io::Result<()> {
        if version_id.is_empty() || self.downloaded.contains(version_id) {
            return Ok(());
        }
        self.downloaded.insert(version_id.to_string());
        let line = format!("{version_id},{}", clean_field(filename));
        self.append_line(LEDGER_FILE, &line)
    }

    /// Cached version id for a file hash. `Some("")` means the catalog
    /// was asked before and does not know the hash.
    pub fn hash_lookup(&self, hash: &str) -> Option<&str> {
        self.hash_ids.get(hash).map(String::as_str)
    }

    /// Cache a hash lookup result. An empty id records the hash as
    /// unknown to the catalog, so it is never asked again.
    pub fn record_hash(&mut self, hash: &str, version_id: &str) -> io::Result<()> {
        if hash.is_empty() || self.hash_ids.contains_key(hash) {
            return Ok(());
        }
        self.hash_ids
            .insert(hash.to_string(), version_id.to_string());
        let line = format!("{},{version_id}", clean_field(hash));
        self.append_line(HASH_FILE, &line)
    }

    /// Cached catalog details for a version id. An entry with an empty
    /// filename records an id the catalog does not know.
    pub fn version_info(&self, version_id: &str) -> Option<&VersionInfo> {
        self.version_info.get(version_id)
    }

    pub fn record_version_info(&mut self, version_id: &str, info: &VersionInfo) -> io::Result<()> {
        if version_id.is_empty() || self.version_info.contains_key(version_id) {
            return Ok(());
        }
        self.version_info
            .insert(version_id.to_string(), info.clone());
        let line = format!(
            "{version_id},{},{},{},{}",
            clean_field(&info.filename),
            clean_field(&info.name),
            clean_field(&info.base_model),
            clean_field(&info.kind)
        );
        self.append_line(VERSION_INFO_FILE, &line)
    }

    fn append_line(&self, file: &str, line: &str) -> io::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        writeln!(f, "{line}")
    }
}

/// The id before the first comma, when it is a plain integer.
fn leading_id(line: &str) -> Option<String> {
    let id = line.split(',').next().unwrap_or(line).trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        Some(id.to_string())
    } else {
        None
    }
}

fn raw_lines(path: &Path) -> io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Field values are comma-delimited on disk, so commas inside them are
/// swapped for semicolons.
fn clean_field(value: &str) -> String {
    value.replace(',', ";")
}
