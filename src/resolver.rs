//! Resolution of referenced resources against the local library, the
//! lookup caches and the remote catalog.
//!
//! Image metadata rarely identifies a resource completely: some formats
//! carry a catalog version id, others only a file hash, and the claimed
//! resource types are unreliable. This module fills the gaps (cache
//! first, catalog second), corrects resource kinds, infers base models,
//! and decides which referenced resources actually need downloading.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::{CatalogClient, DownloadOutcome, VersionInfo};
use crate::error::FetchError;
use crate::ledger::CacheStore;
use crate::metadata::{ImageRecord, ResourceKind, ResourceRef};

/// Model files found under one configured library path, keyed by
/// lowercased file stem so matching ignores case and extension.
#[derive(Debug, Default)]
pub struct LocalInventory {
    stems: HashSet<String>,
}

impl LocalInventory {
    /// Collects `*.safetensors` / `*.ckpt` / `*.pt` files under `root`,
    /// recursively. An unset root yields an empty inventory.
    pub fn scan(root: Option<&Path>) -> Self {
        let mut inventory = Self::default();
        let Some(root) = root else {
            return inventory;
        };
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if has_model_extension(&name) {
                inventory.stems.insert(stem_key(&name));
            }
        }
        debug!("found {} model files under {}", inventory.stems.len(), root.display());
        inventory
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// True when a file with the same stem exists locally.
    pub fn contains(&self, filename: &str) -> bool {
        self.stems.contains(&stem_key(filename))
    }
}

fn has_model_extension(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".safetensors") || lower.ends_with(".ckpt") || lower.ends_with(".pt")
}

fn stem_key(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| name.to_lowercase())
}

/// Fills in missing version ids (via hash lookup) and missing
/// filenames/names/base models (via version-id lookup) for every
/// resource reference. Lookups hit the cache first, then the catalog;
/// failures are logged and the reference is left incomplete.
pub fn lookup_missing_metadata(
    records: &mut [ImageRecord],
    cache: &mut CacheStore,
    client: &mut CatalogClient,
) {
    if !records.is_empty() {
        info!("querying civitai.com for missing info in images containing metadata");
    }
    for record in records.iter_mut() {
        for resource in &mut record.resources {
            if !resource.filename.is_empty() {
                continue;
            }
            if resource.version_id.is_empty() && !resource.hash.is_empty() {
                match cached_version_id(cache, client, &resource.hash) {
                    Some(id) => resource.version_id = id,
                    None => debug!(
                        "unable to look up version id for hash {} ({})",
                        resource.hash, record.source_filename
                    ),
                }
            }
            if resource.version_id.is_empty() {
                continue;
            }
            match cached_version_info(cache, client, &resource.version_id) {
                Some(info) => {
                    resource.filename = info.filename;
                    resource.name = info.name;
                    resource.base_model = info.base_model;
                }
                None => debug!(
                    "unable to look up filename for version id {} ({})",
                    resource.version_id, record.source_filename
                ),
            }
        }
    }
}

/// Version id for a hash, consulting the cache before the catalog. A
/// negative cache entry short-circuits without a request.
fn cached_version_id(
    cache: &mut CacheStore,
    client: &mut CatalogClient,
    hash: &str,
) -> Option<String> {
    if let Some(id) = cache.hash_lookup(hash) {
        return if id.is_empty() { None } else { Some(id.to_string()) };
    }
    match client.version_id_by_hash(hash) {
        Ok(id) => {
            record_or_warn(cache.record_hash(hash, &id));
            Some(id)
        }
        Err(FetchError::NotFound(_)) => {
            debug!("hash {hash} does not exist on civitai.com");
            record_or_warn(cache.record_hash(hash, ""));
            None
        }
        Err(err) => {
            debug!("hash lookup for {hash} failed: {err}");
            None
        }
    }
}

/// Catalog details for a version id, consulting the cache before the
/// catalog. Returns `None` for ids the catalog does not know.
fn cached_version_info(
    cache: &mut CacheStore,
    client: &mut CatalogClient,
    version_id: &str,
) -> Option<VersionInfo> {
    if let Some(info) = cache.version_info(version_id) {
        return if info.filename.is_empty() { None } else { Some(info.clone()) };
    }
    match client.version_info(version_id) {
        Ok(info) => {
            record_or_warn(cache.record_version_info(version_id, &info));
            Some(info)
        }
        Err(FetchError::NotFound(_)) => {
            debug!("model version id {version_id} does not exist on civitai.com");
            record_or_warn(cache.record_version_info(version_id, &VersionInfo::default()));
            None
        }
        Err(err) => {
            debug!("version lookup for {version_id} failed: {err}");
            None
        }
    }
}

fn record_or_warn(result: io::Result<()>) {
    if let Err(err) = result {
        warn!("could not update lookup cache: {err}");
    }
}

/// Replaces each resource's claimed kind with the catalog's when the
/// two disagree. Kinds in image metadata are sometimes wrong.
pub fn verify_resource_kinds(records: &mut [ImageRecord], cache: &CacheStore) {
    info!("verifying image metadata resource types match catalog values");
    for record in records.iter_mut() {
        for resource in &mut record.resources {
            let Some(info) = cache.version_info(&resource.version_id) else {
                continue;
            };
            if info.kind.is_empty() {
                continue;
            }
            let catalog_kind = ResourceKind::from_metadata(&info.kind);
            if resource.kind != catalog_kind {
                debug!(
                    "resource type ({}) does not match catalog type ({}) for {}; using catalog type",
                    resource.kind, catalog_kind, resource.name
                );
                resource.kind = catalog_kind;
            }
        }
    }
}

/// Fills in each record's base model family where it is still unknown.
///
/// Tried in order: catalog lookup by the main model hash, the base
/// model of a sole checkpoint in the resource list, and finally the
/// `score_` tag convention that marks Pony prompts.
pub fn infer_base_models(
    records: &mut [ImageRecord],
    cache: &mut CacheStore,
    client: &mut CatalogClient,
) {
    info!("attempting to infer base models for all images");
    for record in records.iter_mut() {
        let mut base = String::new();
        if !record.model_hash.is_empty() {
            if let Some(id) = cached_version_id(cache, client, &record.model_hash) {
                if let Some(info) = cached_version_info(cache, client, &id) {
                    base = info.base_model;
                }
            }
        }
        if base.is_empty() {
            let mut bases = record
                .resources
                .iter()
                .filter(|r| r.kind == ResourceKind::Model && !r.base_model.is_empty())
                .map(|r| r.base_model.clone());
            if let (Some(only), None) = (bases.next(), bases.next()) {
                base = only;
            }
        }
        if base.is_empty() && record.prompt.contains("score_") {
            base = "Pony".to_string();
        }
        if !base.is_empty() {
            record.base_model = base;
        }
    }
}

/// Image counts per base model family, most frequent first. Records
/// without one count as `Unknown`.
pub fn base_model_breakdown(records: &[ImageRecord]) -> Vec<(String, usize)> {
    tally(records.iter().map(|record| record.base_model.clone()))
}

/// Image counts per main model, most frequent first. The model name is
/// refined through cached hash lookups where possible, the
/// `.safetensors` suffix is dropped, and the base model is appended in
/// parentheses when `show_base` is set.
pub fn model_breakdown(
    records: &[ImageRecord],
    cache: &CacheStore,
    show_base: bool,
) -> Vec<(String, usize)> {
    tally(records.iter().map(|record| {
        let mut name = record.model.clone();
        if !record.model_hash.is_empty() {
            if let Some(id) = cache.hash_lookup(&record.model_hash) {
                if let Some(info) = cache.version_info(id) {
                    if !info.filename.is_empty() {
                        name = info.filename.clone();
                    }
                }
            }
        }
        if let Some(stripped) = name.strip_suffix(".safetensors") {
            name = stripped.to_string();
        }
        if show_base && !record.base_model.is_empty() {
            name = format!("{name} ({})", record.base_model);
        }
        name
    }))
}

/// Image counts per sampler, most frequent first.
pub fn sampler_breakdown(records: &[ImageRecord]) -> Vec<(String, usize)> {
    tally(records.iter().map(|record| record.sampler.clone()))
}

fn tally(values: impl Iterator<Item = String>) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in values {
        let value = value.trim();
        let key = if value.is_empty() { "Unknown" } else { value };
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }
    let mut entries: Vec<_> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
}

/// All fully-identified references of one kind across the records,
/// keyed by version id. References still missing a filename or version
/// id are left out.
pub fn referenced_resources(
    records: &[ImageRecord],
    kind: &ResourceKind,
) -> BTreeMap<String, ResourceRef> {
    let mut resources = BTreeMap::new();
    for record in records {
        for resource in &record.resources {
            if resource.kind == *kind
                && !resource.filename.is_empty()
                && !resource.version_id.is_empty()
            {
                resources.insert(resource.version_id.clone(), resource.clone());
            }
        }
    }
    resources
}

/// Drops referenced resources that should not be fetched: blacklisted
/// ids, ids already in the download ledger, and files already present
/// in the local inventory.
pub fn classify_missing(
    referenced: BTreeMap<String, ResourceRef>,
    inventory: &LocalInventory,
    cache: &CacheStore,
) -> BTreeMap<String, ResourceRef> {
    let mut missing = BTreeMap::new();
    for (id, resource) in referenced {
        if cache.is_blacklisted(&id) {
            debug!("version id {id} is on the do-not-download list; skipping");
            continue;
        }
        if cache.is_downloaded(&id) {
            debug!("version id {id} is already in the download ledger; skipping");
            continue;
        }
        if inventory.contains(&resource.filename) {
            continue;
        }
        missing.insert(id, resource);
    }
    missing
}

/// Outcome counts for one kind's download pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadTally {
    pub downloaded: usize,
    pub already_present: usize,
    pub failed: usize,
}

/// Downloads every missing resource of one kind into `dir`, recording
/// successes in the download ledger. With no directory configured the
/// whole kind is skipped.
pub fn download_missing(
    missing: &BTreeMap<String, ResourceRef>,
    label: &str,
    dir: Option<&Path>,
    client: &mut CatalogClient,
    cache: &mut CacheStore,
) -> DownloadTally {
    let mut tally = DownloadTally::default();
    let Some(dir) = dir else {
        info!("download location not specified for {label}; no resources of this type will be downloaded");
        return tally;
    };
    if !missing.is_empty() {
        info!("downloading missing {label}");
    }
    for (index, (id, resource)) in missing.iter().enumerate() {
        info!(
            "  [{} of {}] attempting to download {}",
            index + 1,
            missing.len(),
            resource.filename
        );
        match client.download(id, dir, &resource.filename) {
            Ok(outcome) => {
                record_or_warn(cache.record_download(id, outcome.filename()));
                match outcome {
                    DownloadOutcome::Downloaded { .. } => tally.downloaded += 1,
                    DownloadOutcome::AlreadyPresent { .. } => tally.already_present += 1,
                }
            }
            Err(err) => {
                warn!("  failed to download {}: {err}", resource.filename);
                tally.failed += 1;
            }
        }
    }
    tally
}

#[cfg(test)]
mod tests {
    include!("resolver_tests.rs");
}
