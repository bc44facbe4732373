//! img2prompt - extract prompts and generation settings from AI images
//!
//! This library reads the generation metadata embedded in AI-generated
//! images (PNG text chunks, EXIF user comments), resolves the models,
//! LoRAs and embeddings those images reference against the civitai.com
//! catalog, downloads the ones missing from a local library, and writes
//! the collected prompts out as a batch file.
//!
//! ## Features
//!
//! - **Metadata extraction** from PNG and JPEG files
//! - **Resource resolution** by version id or file hash, with an
//!   on-disk cache so repeat runs stay offline
//! - **Resource download** with rate limiting, size caps and resume-safe
//!   temporary files
//! - **Prompt filtering** by step count, scale, resolution and word lists
//! - **Template rendering** with a built-in format or a custom template
//!
//! ## Example
//!
//! ```rust,no_run
//! use img2prompt::{run, Config};
//!
//! let mut config = Config::default();
//! config.images.path = "sd-output".into();
//!
//! let summary = run(&config).expect("run failed");
//! println!("{} prompt(s) written", summary.prompts_written);
//! ```

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod filters;
pub mod ledger;
pub mod metadata;
pub mod pipeline;
pub mod resolution;
pub mod resolver;
pub mod samplers;
pub mod scan;
pub mod template;

pub use catalog::{sanitize_filename, CatalogClient, VersionInfo};
pub use cli::Cli;
pub use config::Config;
pub use error::{ConfigError, FetchError, MetadataError};
pub use ledger::CacheStore;
pub use metadata::{parse_metadata, ImageRecord, ResourceKind, ResourceRef};
pub use pipeline::{run, RunSummary};
pub use scan::{collect_images, read_raw_metadata};
pub use template::write_prompt_file;
pub use anyhow::Result;
