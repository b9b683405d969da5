//! Configuration types.
//!
//! This module defines the library configuration struct and the enums shared
//! with command-line argument parsing.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::ValueEnum;

use crate::config::constants::{
    ANTI_FLAP_MARGIN, CACHE_TTL_SECS, DATA_DIR, DB_PATH, DEDUP_BITMAP_BITS, DEDUP_HASH_FUNCTIONS,
    DEDUP_TTL_SECS, FUSION_DEADLINE_MS, GEOCODER_ENDPOINT, LISTEN_ADDR, MIN_SCORE_FOR_EXACT,
    RADIX_LANG, WEIGHT_EXTERNAL,
};

/// Logging level for the application.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Library configuration (no CLI dependencies).
///
/// This is the core configuration struct used by the library. It can be
/// constructed programmatically without any CLI dependencies.
///
/// # Examples
///
/// ```no_run
/// use ip_locator::Config;
/// use std::path::PathBuf;
///
/// let config = Config {
///     db_path: PathBuf::from("./geo.db"),
///     listen_addr: "0.0.0.0:8080".to_string(),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path. The process refuses to start if the file cannot
    /// be created or opened.
    pub db_path: PathBuf,

    /// Directory the exact-index file is built into.
    pub data_dir: PathBuf,

    /// Listen address for the HTTP server.
    pub listen_addr: String,

    /// Log level
    pub log_level: LogLevel,

    /// Log format
    pub log_format: LogFormat,

    /// Enable the in-process hot cache of serialized responses.
    pub cache_enabled: bool,

    /// Hot-cache entry TTL in seconds.
    pub cache_ttl_s: u64,

    /// Enable short-window request dedup.
    pub dedup_enabled: bool,

    /// Dedup window length in seconds.
    pub dedup_ttl_s: u64,

    /// Bits in the per-bucket dedup bitmap.
    pub dedup_bitmap_bits: u32,

    /// Hash positions probed per dedup key.
    pub dedup_hash_functions: u32,

    /// Hard deadline for one fusion fan-out, in milliseconds.
    pub fusion_deadline_ms: u64,

    /// Top raw score at or above which fusion also writes an exact entry.
    pub min_score_for_exact: f64,

    /// Anti-flap margin applied by the override-KV upsert.
    pub anti_flap_margin: f64,

    /// Run fusion when a hot-cache hit is missing province or city.
    pub fusion_on_partial_cache: bool,

    /// Run fusion when a chain-cache hit is missing province or city.
    pub fusion_on_partial_local: bool,

    /// Run fusion when a relational hit is missing province or city.
    pub fusion_on_partial_db: bool,

    /// Requests per second admitted before the pipeline; `None` disables
    /// rate limiting.
    pub rate_limit_qps: Option<u32>,

    /// Radix-tree database path (optional local source).
    pub radix_path: Option<PathBuf>,

    /// Language window used when slicing radix-tree leaf fields.
    pub radix_lang: String,

    /// XDB database path (optional local source).
    pub xdb_path: Option<PathBuf>,

    /// Endpoint of an out-of-process HTTP source (optional).
    pub external_endpoint: Option<String>,

    /// Registered name of the external HTTP source.
    pub external_name: String,

    /// Association key the external HTTP source writes under.
    pub external_assoc: String,

    /// Weight of the external HTTP source.
    pub external_weight: f64,

    /// Server key for the REST geocoder; `None` leaves it unregistered.
    pub geocoder_key: Option<String>,

    /// REST geocoder endpoint.
    pub geocoder_endpoint: String,

    /// Per-source weight overrides, keyed by source name.
    pub source_weights: HashMap<String, f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DB_PATH),
            data_dir: PathBuf::from(DATA_DIR),
            listen_addr: LISTEN_ADDR.to_string(),
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            cache_enabled: true,
            cache_ttl_s: CACHE_TTL_SECS,
            dedup_enabled: true,
            dedup_ttl_s: DEDUP_TTL_SECS,
            dedup_bitmap_bits: DEDUP_BITMAP_BITS,
            dedup_hash_functions: DEDUP_HASH_FUNCTIONS,
            fusion_deadline_ms: FUSION_DEADLINE_MS,
            min_score_for_exact: MIN_SCORE_FOR_EXACT,
            anti_flap_margin: ANTI_FLAP_MARGIN,
            fusion_on_partial_cache: false,
            fusion_on_partial_local: false,
            fusion_on_partial_db: false,
            rate_limit_qps: None,
            radix_path: None,
            radix_lang: RADIX_LANG.to_string(),
            xdb_path: None,
            external_endpoint: None,
            external_name: "ext".to_string(),
            external_assoc: "ext".to_string(),
            external_weight: WEIGHT_EXTERNAL,
            geocoder_key: None,
            geocoder_endpoint: GEOCODER_ENDPOINT.to_string(),
            source_weights: HashMap::new(),
        }
    }
}

impl Config {
    /// Resolves the weight for a source, applying any configured override.
    pub fn source_weight(&self, name: &str, default: f64) -> f64 {
        self.source_weights.get(name).copied().unwrap_or(default)
    }
}
