//! Configuration constants.
//!
//! Defaults for every tunable the library recognizes. Each one can be
//! overridden through [`crate::Config`].

use std::time::Duration;

/// Hard deadline for one fusion fan-out, in milliseconds.
pub const FUSION_DEADLINE_MS: u64 = 4000;

/// Default SQLite database path.
pub const DB_PATH: &str = "./ip_locator.db";

/// Default directory holding the exact-index file.
pub const DATA_DIR: &str = "./data/localdb";

/// Default listen address for the HTTP server.
pub const LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Upper bound on open relational connections.
pub const DB_MAX_CONNECTIONS: u32 = 50;

/// Dedup window length in seconds.
pub const DEDUP_TTL_SECS: u64 = 600;

/// Hot-cache entry TTL in seconds.
pub const CACHE_TTL_SECS: u64 = 600;

/// Bits in the per-bucket dedup bitmap (2^18).
pub const DEDUP_BITMAP_BITS: u32 = 262_144;

/// Hash positions probed per dedup key.
pub const DEDUP_HASH_FUNCTIONS: u32 = 4;

/// Top raw score at or above which a fusion result is also written to the
/// legacy exact table.
pub const MIN_SCORE_FOR_EXACT: f64 = 80.0;

/// Anti-flap margin: an override row is only replaced when the incoming
/// score exceeds the stored one by at least this much.
pub const ANTI_FLAP_MARGIN: f64 = 20.0;

/// Heartbeat period for registered sources.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Request timeout for remote source calls.
pub const REMOTE_SOURCE_TIMEOUT: Duration = Duration::from_secs(3);

/// Weight ceiling for any source.
pub const MAX_SOURCE_WEIGHT: f64 = 10.0;

/// Default weights per built-in source kind.
pub const WEIGHT_OVERRIDE_KV: f64 = 10.0;
pub const WEIGHT_RADIX: f64 = 5.0;
pub const WEIGHT_XDB: f64 = 5.0;
pub const WEIGHT_EDGE_GEO: f64 = 9.8;
pub const WEIGHT_GEOCODER: f64 = 8.0;
pub const WEIGHT_EXTERNAL: f64 = 5.0;

/// Default REST geocoder endpoint.
pub const GEOCODER_ENDPOINT: &str = "https://restapi.amap.com/v3/ip";

/// Default language window for the radix tree.
pub const RADIX_LANG: &str = "zh-CN";

/// Source tag used when a chain-cache hit is lazily persisted.
pub const FILECACHE_SOURCE_TAG: &str = "filecache";

/// Write key used when fusion produced no anchor.
pub const DEFAULT_ASSOC_KEY: &str = "global";
