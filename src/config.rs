//! Layered configuration handling.
//!
//! Options come from three sources, in increasing priority: built-in
//! defaults, an optional `key=value` config file, and command-line flags.
//! Config file lines may carry `#` comments; blank and malformed lines
//! are skipped with a warning.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::warn;

use crate::cli::Cli;
use crate::error::ConfigError;

/// Options for talking to the remote model catalog
#[derive(Debug, Clone)]
pub struct NetworkOptions {
    /// civitai.com API key; empty sends anonymous requests
    pub api_key: String,
    /// Minimum time between remote requests in seconds (default: 1.0)
    pub request_delay: f64,
    /// Maximum download size in bytes, 0 = no limit (default: 1 GB)
    pub max_file_size: u64,
    /// Extra download attempts after a network failure (default: 0)
    pub retries: u32,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            request_delay: 1.0,
            max_file_size: 1_000_000_000,
            retries: 0,
        }
    }
}

/// Options controlling which images are scanned
#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
    /// Folder containing images to scan for metadata
    pub path: PathBuf,
    /// Do not descend into subdirectories (default: false)
    pub ignore_subdirs: bool,
}

/// Options controlling prompt cleanup and output
#[derive(Debug, Clone)]
pub struct PromptOptions {
    /// Appended to each prompt's assigned output filename
    pub append_filename: String,
    /// Minimum allowed step count, 0 = no limit
    pub min_steps: u32,
    /// Maximum allowed step count, 0 = no limit
    pub max_steps: u32,
    /// Minimum allowed guidance scale, 0 = no limit
    pub min_scale: f64,
    /// Maximum allowed guidance scale, 0 = no limit
    pub max_scale: f64,
    /// Snap width/height to the closest officially-supported base
    /// resolution (default: true)
    pub fix_resolution: bool,
    /// Base models to keep in the output; empty keeps everything
    pub only_include_base: Vec<String>,
    /// Template file for the output; the built-in format is used when unset
    pub output_template: Option<PathBuf>,
    /// File prepended to the output
    pub output_header: Option<PathBuf>,
    /// File appended to the output
    pub output_footer: Option<PathBuf>,
    /// Where to write the output; may contain `[date]` and `[time]` tokens
    pub output_save_as: String,
    /// Words removed from prompts when found
    pub word_filter_list: Vec<String>,
    /// Words removed from negative prompts when found
    pub neg_word_filter_list: Vec<String>,
    /// LoRA names removed from prompts when found; `*` removes all
    pub lora_filter_list: Vec<String>,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            append_filename: String::new(),
            min_steps: 0,
            max_steps: 0,
            min_scale: 0.0,
            max_scale: 0.0,
            fix_resolution: true,
            only_include_base: Vec::new(),
            output_template: None,
            output_header: None,
            output_footer: None,
            output_save_as: String::new(),
            word_filter_list: Vec::new(),
            neg_word_filter_list: Vec::new(),
            lora_filter_list: Vec::new(),
        }
    }
}

/// Local folders holding existing resources and download targets.
/// An unset download path disables downloads for that resource type.
#[derive(Debug, Clone, Default)]
pub struct ResourcePaths {
    pub existing_model_path: Option<PathBuf>,
    pub existing_lora_path: Option<PathBuf>,
    pub existing_embedding_path: Option<PathBuf>,
    pub download_model_path: Option<PathBuf>,
    pub download_lora_path: Option<PathBuf>,
    pub download_embedding_path: Option<PathBuf>,
}

/// All user options, grouped by concern
#[derive(Debug, Clone)]
pub struct Config {
    pub network: NetworkOptions,
    pub images: ImageOptions,
    pub prompts: PromptOptions,
    pub resources: ResourcePaths,
    /// Directory holding the lookup caches and the download ledger
    pub cache_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkOptions::default(),
            images: ImageOptions::default(),
            prompts: PromptOptions::default(),
            resources: ResourcePaths::default(),
            cache_path: PathBuf::from("cache"),
        }
    }
}

impl Config {
    /// Build the effective configuration from defaults, the config file
    /// named on the command line, and command-line overrides.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_file(&cli.config_file)?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Read options from a `key=value` config file. A missing file is
    /// not an error; defaults remain in effect.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            if path != Path::new("config.txt") {
                warn!(
                    "config file {} does not exist; using defaults instead",
                    path.display()
                );
            }
            return Ok(());
        }
        let lines = data_lines(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        for line in &lines {
            match line.split_once('=') {
                Some((key, value)) => self.set(&key.trim().to_lowercase(), value.trim()),
                None => warn!("skipping malformed config line: {line}"),
            }
        }
        Ok(())
    }

    /// Apply command-line overrides on top of whatever the config file set.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(v) = &cli.civitai_api_key {
            self.network.api_key = v.clone();
        }
        if let Some(v) = cli.civitai_request_delay {
            self.network.request_delay = v;
        }
        if let Some(v) = cli.civitai_max_file_size {
            self.network.max_file_size = v;
        }
        if let Some(v) = cli.civitai_retries {
            self.network.retries = v;
        }
        if let Some(v) = &cli.image_path {
            self.images.path = v.clone();
        }
        if cli.image_path_ignore_subdirs {
            self.images.ignore_subdirs = true;
        }
        if let Some(v) = &cli.prompt_append_filename {
            self.prompts.append_filename = v.clone();
        }
        if let Some(v) = cli.prompt_min_steps {
            self.prompts.min_steps = v;
        }
        if let Some(v) = cli.prompt_max_steps {
            self.prompts.max_steps = v;
        }
        if let Some(v) = cli.prompt_min_scale {
            self.prompts.min_scale = v;
        }
        if let Some(v) = cli.prompt_max_scale {
            self.prompts.max_scale = v;
        }
        if cli.prompt_no_fix_resolution {
            self.prompts.fix_resolution = false;
        }
        if let Some(v) = &cli.prompt_only_include_base {
            self.prompts.only_include_base = parse_list(v);
        }
        if let Some(v) = &cli.prompt_output_template {
            self.prompts.output_template = Some(v.clone());
        }
        if let Some(v) = &cli.prompt_output_header {
            self.prompts.output_header = Some(v.clone());
        }
        if let Some(v) = &cli.prompt_output_footer {
            self.prompts.output_footer = Some(v.clone());
        }
        if let Some(v) = &cli.prompt_output_save_as {
            self.prompts.output_save_as = v.clone();
        }
        if let Some(v) = &cli.prompt_word_filter_list {
            self.prompts.word_filter_list = parse_list(v);
        }
        if let Some(v) = &cli.prompt_neg_word_filter_list {
            self.prompts.neg_word_filter_list = parse_list(v);
        }
        if let Some(v) = &cli.prompt_lora_filter_list {
            self.prompts.lora_filter_list = parse_list(v);
        }
        if let Some(v) = &cli.existing_model_path {
            self.resources.existing_model_path = Some(v.clone());
        }
        if let Some(v) = &cli.existing_lora_path {
            self.resources.existing_lora_path = Some(v.clone());
        }
        if let Some(v) = &cli.existing_embedding_path {
            self.resources.existing_embedding_path = Some(v.clone());
        }
        if let Some(v) = &cli.download_model_path {
            self.resources.download_model_path = Some(v.clone());
        }
        if let Some(v) = &cli.download_lora_path {
            self.resources.download_lora_path = Some(v.clone());
        }
        if let Some(v) = &cli.download_embedding_path {
            self.resources.download_embedding_path = Some(v.clone());
        }
        if let Some(v) = &cli.cache_path {
            self.cache_path = v.clone();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.images.path.as_os_str().is_empty() {
            return Err(ConfigError::ImagePathUnset);
        }
        if !self.images.path.is_dir() {
            return Err(ConfigError::ImagePathInvalid(self.images.path.clone()));
        }
        Ok(())
    }

    /// Apply a single config-file directive. Empty values keep whatever
    /// was already in effect, matching the behavior of unset keys.
    fn set(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        match key {
            "civitai_api_key" => self.network.api_key = value.to_string(),
            "civitai_request_delay" => {
                if let Some(v) = parse_num(key, value) {
                    self.network.request_delay = v;
                }
            }
            "civitai_max_file_size" => {
                if let Some(v) = parse_num(key, value) {
                    self.network.max_file_size = v;
                }
            }
            "civitai_retries" => {
                if let Some(v) = parse_num(key, value) {
                    self.network.retries = v;
                }
            }
            "image_path" => self.images.path = PathBuf::from(value),
            "image_path_ignore_subdirs" => {
                if let Some(v) = parse_bool(key, value) {
                    self.images.ignore_subdirs = v;
                }
            }
            "prompt_append_filename" => self.prompts.append_filename = value.to_string(),
            "prompt_min_steps" => {
                if let Some(v) = parse_num(key, value) {
                    self.prompts.min_steps = v;
                }
            }
            "prompt_max_steps" => {
                if let Some(v) = parse_num(key, value) {
                    self.prompts.max_steps = v;
                }
            }
            "prompt_min_scale" => {
                if let Some(v) = parse_num(key, value) {
                    self.prompts.min_scale = v;
                }
            }
            "prompt_max_scale" => {
                if let Some(v) = parse_num(key, value) {
                    self.prompts.max_scale = v;
                }
            }
            "prompt_fix_resolution" => {
                if let Some(v) = parse_bool(key, value) {
                    self.prompts.fix_resolution = v;
                }
            }
            "prompt_only_include_base" => self.prompts.only_include_base = parse_list(value),
            "prompt_output_template" => {
                self.prompts.output_template = Some(PathBuf::from(value));
            }
            "prompt_output_header" => self.prompts.output_header = Some(PathBuf::from(value)),
            "prompt_output_footer" => self.prompts.output_footer = Some(PathBuf::from(value)),
            "prompt_output_save_as" => self.prompts.output_save_as = value.to_string(),
            "prompt_word_filter_list" => self.prompts.word_filter_list = parse_list(value),
            "prompt_neg_word_filter_list" => {
                self.prompts.neg_word_filter_list = parse_list(value);
            }
            "prompt_lora_filter_list" => self.prompts.lora_filter_list = parse_list(value),
            "existing_model_path" => {
                self.resources.existing_model_path = Some(PathBuf::from(value));
            }
            "existing_lora_path" => {
                self.resources.existing_lora_path = Some(PathBuf::from(value));
            }
            "existing_embedding_path" => {
                self.resources.existing_embedding_path = Some(PathBuf::from(value));
            }
            "download_model_path" => {
                self.resources.download_model_path = Some(PathBuf::from(value));
            }
            "download_lora_path" => {
                self.resources.download_lora_path = Some(PathBuf::from(value));
            }
            "download_embedding_path" => {
                self.resources.download_embedding_path = Some(PathBuf::from(value));
            }
            "cache_path" => self.cache_path = PathBuf::from(value),
            _ => warn!("unknown config option {key}; ignoring"),
        }
    }
}

/// Reads a text file, dropping `#` comments, surrounding whitespace and
/// blank lines. Used for the config file and the cache lists.
pub(crate) fn data_lines(path: &Path) -> io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| {
            let line = line.split_once('#').map_or(line, |(head, _)| head).trim();
            if line.is_empty() {
                None
            } else {
                Some(line.to_string())
            }
        })
        .collect())
}

/// Splits a comma-separated option into lowercased, trimmed entries.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("skipping non-numeric value for {key}: {value}");
            None
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Option<bool> {
    match value {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => {
            warn!("skipping non-boolean value for {key}: {value}");
            None
        }
    }
}
