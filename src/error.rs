//! Error types for metadata extraction, catalog access and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading embedded generation metadata from an image file.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("png decode error: {0}")]
    Png(#[from] png::DecodingError),

    #[error("exif decode error: {0}")]
    Exif(#[from] exif::Error),
}

/// Errors raised while talking to the remote model catalog.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The catalog rejected the request because no (or an invalid) API key
    /// was supplied.
    #[error("authentication required; set an API key to download this file")]
    AuthRequired,

    /// The file is in early access and cannot be downloaded yet.
    #[error("file is in early access and requires purchase")]
    EarlyAccess,

    /// The advertised payload is larger than the configured limit.
    #[error("file size {size} exceeds the configured limit of {limit} bytes")]
    SizeExceeded { size: u64, limit: u64 },

    /// The referenced remote object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The catalog answered but the reference could not be resolved.
    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal configuration problems, reported before any image is processed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no image location set; pass --image-path or set image_path in the config file")]
    ImagePathUnset,

    #[error("image location {0} is not a directory")]
    ImagePathInvalid(PathBuf),
}
