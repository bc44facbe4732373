//! The end-to-end batch run.
//!
//! Order of operations: scan the image folder, extract and parse
//! metadata, fill in missing resource identity from the caches and the
//! catalog, download referenced resources that are absent locally, then
//! filter the records and render the output prompt file. Per-image and
//! per-resource failures are logged and skipped; only startup failures
//! (configuration, cache directory, HTTP client) abort the run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::filters;
use crate::ledger::CacheStore;
use crate::metadata::{self, ImageRecord, ResourceKind};
use crate::resolver::{self, DownloadTally, LocalInventory};
use crate::scan;
use crate::template;

/// Counters reported after a completed run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Image files discovered under the configured path.
    pub images_found: usize,
    /// Images that yielded a metadata record.
    pub images_with_metadata: usize,
    /// Images skipped for having no or unreadable metadata.
    pub images_skipped: usize,
    /// Records that survived filtering and were rendered.
    pub prompts_written: usize,
    pub downloads: DownloadTally,
}

/// Runs the whole batch with the given configuration.
pub fn run(config: &Config) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    let images = scan::collect_images(&config.images.path, config.images.ignore_subdirs);
    summary.images_found = images.len();
    info!("found {} image file(s) in {}", images.len(), config.images.path.display());

    let mut records = read_records(&images, &mut summary);

    let mut cache = CacheStore::open(&config.cache_path).with_context(|| {
        format!("could not open cache directory {}", config.cache_path.display())
    })?;
    let mut client =
        CatalogClient::new(&config.network).context("could not build the catalog client")?;

    resolver::lookup_missing_metadata(&mut records, &mut cache, &mut client);
    resolver::verify_resource_kinds(&mut records, &cache);
    resolver::infer_base_models(&mut records, &mut cache, &mut client);

    log_breakdowns(&records, &cache);

    summary.downloads = fetch_missing_resources(&records, config, &mut cache, &mut client);

    let records = filters::apply_filters(records, &config.prompts);
    summary.prompts_written = records.len();
    template::write_prompt_file(&records, &config.prompts)
        .context("could not write the output prompt file")?;

    Ok(summary)
}

fn read_records(images: &[PathBuf], summary: &mut RunSummary) -> Vec<ImageRecord> {
    if !images.is_empty() {
        info!("looking for metadata in images");
    }
    let mut records = Vec::new();
    for path in images {
        debug!("working on {}", path.display());
        match scan::read_raw_metadata(path) {
            Ok(Some(raw)) => records.push(metadata::parse_metadata(path, &raw)),
            Ok(None) => {
                debug!("{} contains no metadata", path.display());
                summary.images_skipped += 1;
            }
            Err(err) => {
                warn!("could not read {}: {err}", path.display());
                summary.images_skipped += 1;
            }
        }
    }
    summary.images_with_metadata = records.len();
    info!("found metadata in {} of {} image(s)", records.len(), images.len());
    records
}

fn log_breakdowns(records: &[ImageRecord], cache: &CacheStore) {
    debug!(
        "base model breakdown by image count:{}",
        format_breakdown(&resolver::base_model_breakdown(records))
    );
    debug!(
        "model breakdown by image count:{}",
        format_breakdown(&resolver::model_breakdown(records, cache, true))
    );
    debug!(
        "sampler breakdown by image count:{}",
        format_breakdown(&resolver::sampler_breakdown(records))
    );
}

fn format_breakdown(entries: &[(String, usize)]) -> String {
    let mut output = String::new();
    for (name, count) in entries {
        output.push_str(&format!("\n  {name}: {count}"));
    }
    output
}

/// Compares referenced resources against the local library and fetches
/// the ones that are absent, one resource kind at a time.
fn fetch_missing_resources(
    records: &[ImageRecord],
    config: &Config,
    cache: &mut CacheStore,
    client: &mut CatalogClient,
) -> DownloadTally {
    info!("comparing referenced resources to existing local resources");
    let paths = &config.resources;
    let kinds = [
        (
            ResourceKind::Embedding,
            "embedding(s)",
            "embeddings",
            &paths.existing_embedding_path,
            &paths.download_embedding_path,
        ),
        (
            ResourceKind::Lora,
            "LoRA(s)",
            "LoRAs",
            &paths.existing_lora_path,
            &paths.download_lora_path,
        ),
        (
            ResourceKind::Model,
            "model(s)",
            "models",
            &paths.existing_model_path,
            &paths.download_model_path,
        ),
    ];

    let mut missing_sets = Vec::new();
    for (kind, count_label, _, existing, _) in &kinds {
        let inventory = LocalInventory::scan(existing.as_deref());
        let referenced = resolver::referenced_resources(records, kind);
        let missing = resolver::classify_missing(referenced, &inventory, cache);
        info!(
            "  {} referenced {count_label} don't exist locally and need to be downloaded",
            missing.len()
        );
        missing_sets.push(missing);
    }

    let mut total = DownloadTally::default();
    for ((_, _, label, _, download), missing) in kinds.iter().zip(&missing_sets) {
        let tally = resolver::download_missing(missing, label, download.as_deref(), client, cache);
        total.downloaded += tally.downloaded;
        total.already_present += tally.already_present;
        total.failed += tally.failed;
    }
    total
}
