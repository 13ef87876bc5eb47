//! Handles application configuration loading and management.
//!
//! Settings live in an INI file (default `/etc/menuboard.conf`). Only the
//! Firestore project id and API key are required; every other key falls back
//! to the values the menu board has always used.

use configparser::ini::Ini;
use log::{debug, error, info};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use super::errors::ConfigError;
use super::model::BusinessHours;
use super::retry::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/menuboard.conf";
const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

/// Connection settings for the remote document store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub api_key: String,
    pub base_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// How long each image stays on screen.
    pub image_duration: Duration,
    /// Delay before preparing content again when there is nothing to play.
    pub empty_retry_delay: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub ttl: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoursConfig {
    /// Weekdays the café opens, 0 = Sunday through 6 = Saturday.
    pub open_days: BTreeSet<u32>,
    /// Window used when no hours can be fetched or cached.
    pub fallback: BusinessHours,
    pub check_interval: Duration,
    pub closed_delay: Duration,
    pub closed_message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    pub probe_url: String,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Upper bound on any single HTTP request, media downloads included.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Holds the application's configuration parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub firestore: FirestoreConfig,
    pub playback: PlaybackConfig,
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub hours: HoursConfig,
    pub network: NetworkConfig,
}

/// Loads application configuration from the specified INI file path.
///
/// # Errors
/// Returns `ConfigError` if the file cannot be read, is malformed,
/// is missing a required key, or holds a value that cannot be used.
#[must_use = "loading configuration can fail, the Result must be handled"]
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    info!("Attempting to load config from: {}", path);
    let contents = std::fs::read_to_string(path).map_err(|e| {
        error!("Error reading config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let app_config = parse_config(&contents)?;
    info!("Configuration loaded successfully from {}", path);
    debug!("{:?}", app_config);
    Ok(app_config)
}

/// Parses configuration from INI text.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let mut ini = Ini::new();
    ini.read(contents.to_string()).map_err(ConfigError::Parse)?;
    let settings = Settings { ini };

    let firestore = FirestoreConfig {
        project_id: settings.required("firestore", "project_id")?,
        api_key: settings.required("firestore", "api_key")?,
        base_url: settings.string_or("firestore", "base_url", DEFAULT_FIRESTORE_URL),
    };

    let playback = PlaybackConfig {
        image_duration: Duration::from_secs(settings.positive_u64_or("playback", "image_duration_secs", 45)?),
        empty_retry_delay: Duration::from_secs(settings.positive_u64_or("playback", "empty_retry_secs", 10)?),
    };

    let cache = CacheConfig {
        path: PathBuf::from(settings.string_or("cache", "path", "/var/lib/menuboard/cache.json")),
        ttl: Duration::from_secs(settings.positive_u64_or("cache", "ttl_minutes", 30)?.saturating_mul(60)),
    };

    let retry = RetryPolicy::new(
        u32::try_from(settings.u64_or("fetch", "max_attempts", 3)?).map_err(|_| ConfigError::InvalidValue {
            key: "fetch.max_attempts".into(),
            message: "too large".into(),
        })?,
        Duration::from_millis(settings.u64_or("fetch", "base_delay_ms", 1000)?),
    );

    let fallback_open = settings.u64_or("hours", "fallback_open", 700)?;
    let fallback_close = settings.u64_or("hours", "fallback_close", 2000)?;
    let fallback = BusinessHours::from_packed(fallback_open as i64, fallback_close as i64).map_err(|e| {
        ConfigError::InvalidValue { key: "hours.fallback_open/fallback_close".into(), message: e.to_string() }
    })?;
    let hours = HoursConfig {
        open_days: parse_open_days(&settings.string_or("hours", "open_days", "0,3,4,5,6"))?,
        fallback,
        check_interval: Duration::from_secs(settings.positive_u64_or("hours", "check_interval_secs", 60)?),
        closed_delay: Duration::from_secs(settings.u64_or("hours", "closed_delay_secs", 3)?),
        closed_message: settings.string_or("hours", "closed_message", "We're closed. See you soon!"),
    };

    let network = NetworkConfig {
        probe_url: settings.string_or("network", "probe_url", &firestore.base_url),
        probe_interval: Duration::from_secs(settings.positive_u64_or("network", "probe_interval_secs", 15)?),
        probe_timeout: Duration::from_secs(settings.positive_u64_or("network", "probe_timeout_secs", 5)?),
        reconnect_delay: Duration::from_secs(settings.u64_or("network", "reconnect_delay_secs", 5)?),
        request_timeout: Duration::from_secs(settings.positive_u64_or("network", "request_timeout_secs", 120)?),
        connect_timeout: Duration::from_secs(settings.positive_u64_or("network", "connect_timeout_secs", 10)?),
    };

    Ok(AppConfig { firestore, playback, cache, retry, hours, network })
}

/// Parses a comma-separated weekday list such as `0,3,4,5,6`.
fn parse_open_days(raw: &str) -> Result<BTreeSet<u32>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<u32>() {
            Ok(day) if day <= 6 => Ok(day),
            _ => Err(ConfigError::InvalidValue {
                key: "hours.open_days".into(),
                message: format!("'{}' is not a weekday number between 0 (Sunday) and 6 (Saturday)", s),
            }),
        })
        .collect()
}

struct Settings {
    ini: Ini,
}

impl Settings {
    fn required(&self, section: &str, key: &str) -> Result<String, ConfigError> {
        self.ini.get(section, key).filter(|v| !v.trim().is_empty()).ok_or_else(|| {
            error!("Missing configuration key '{}' in section '[{}]'", key, section);
            ConfigError::MissingKey(format!("{}.{}", section, key))
        })
    }

    fn string_or(&self, section: &str, key: &str, default: &str) -> String {
        self.ini.get(section, key).filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
    }

    fn u64_or(&self, section: &str, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.ini.get(section, key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: format!("{}.{}", section, key),
                message: format!("'{}': {}", raw, e),
            }),
        }
    }

    /// Like `u64_or`, for intervals and timeouts where zero is meaningless.
    fn positive_u64_or(&self, section: &str, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.u64_or(section, key, default)? {
            0 => Err(ConfigError::InvalidValue {
                key: format!("{}.{}", section, key),
                message: "must be greater than zero".into(),
            }),
            value => Ok(value),
        }
    }
}
