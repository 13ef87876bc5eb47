//! Defines the custom error types used throughout the `menuboard_rs` application.
//!
//! Each category of failure (configuration, remote fetches, the local cache,
//! media playback) has its own enum, and `AppError` wraps them at the top level.
//! Only configuration and UI start-up errors ever end the process; everything
//! else degrades to stale data, a fallback, or a skipped item.

use thiserror::Error;

// --- ConfigError ---
/// Errors related to application configuration loading and parsing.
#[must_use = "a configuration error should be handled or propagated"]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file content could not be parsed.
    #[error("Configuration parse error: {0}")]
    Parse(String),
    /// A required configuration key was missing from the file.
    #[error("Missing configuration key: '{0}'")]
    MissingKey(String),
    /// A key was present but its value could not be used.
    #[error("Invalid value for configuration key '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

// --- FetchError ---
/// Errors related to reading records from the remote document store.
#[must_use = "a fetch error should be handled or propagated"]
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP request itself failed (connect, timeout, body read).
    #[error("Document store request error: {0}")]
    Http(#[from] reqwest::Error),
    /// The store answered with a non-success status.
    #[error("Document store HTTP error {status}: {message}")]
    Status { status: reqwest::StatusCode, message: String },
    /// The response body was not the JSON shape we expected.
    #[error("Document store JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// A record was missing a required field or held an unusable value.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),
}

// --- PersistenceError ---
/// Errors related to the durable local cache.
#[must_use = "a persistence error should be handled or logged"]
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cache file persistence error: {0}")]
    TempFilePersist(#[from] tempfile::PersistError),
}

// --- PlaybackError ---
/// Errors related to loading and playing a single media item.
#[must_use = "a playback error should be handled or propagated"]
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The media file could not be downloaded.
    #[error("Media download error: {0}")]
    Download(#[from] reqwest::Error),
    /// An I/O error, usually around the temporary video file.
    #[error("Media I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
    #[error("No video stream found in {0}")]
    NoVideoStream(String),
}

// --- EmptyQueueError ---
/// Raised when the content queue holds nothing to play.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Content queue is empty")]
pub struct EmptyQueueError;

// --- AppError (Top-level error enum) ---
/// A top-level error type that can encompass any error within the application.
#[must_use = "an application error should be handled or propagated"]
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Application Configuration Error: {0}")]
    Config(#[from] ConfigError),
    #[error("Application Fetch Error: {0}")]
    Fetch(#[from] FetchError),
    #[error("Application Cache Error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Application Playback Error: {0}")]
    Playback(#[from] PlaybackError),
    #[error("Application Error: {0}")]
    EmptyQueue(#[from] EmptyQueueError),
    #[error("Application UI Error: {0}")]
    Ui(#[from] eframe::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_record_wraps_into_app_error() {
        let err: AppError = FetchError::MalformedRecord("openTime missing".into()).into();
        assert_eq!(
            err.to_string(),
            "Application Fetch Error: Malformed record: openTime missing"
        );
    }

    #[test]
    fn missing_key_names_the_key() {
        let err = ConfigError::MissingKey("project_id".into());
        assert_eq!(err.to_string(), "Missing configuration key: 'project_id'");
    }
}
