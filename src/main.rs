//! Binary entry point: parses CLI options into a [`Config`], initializes
//! logging, and runs the server.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use ip_locator::initialization::init_logger_with;
use ip_locator::{run_server, Config, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "ip_locator", version, about = "Tiered IP geolocation service")]
struct Cli {
    /// SQLite database path
    #[arg(long, default_value = "./ip_locator.db")]
    db_path: PathBuf,

    /// Directory the exact-index file is built into
    #[arg(long, default_value = "./data/localdb")]
    data_dir: PathBuf,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen_addr: String,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value = "plain")]
    log_format: LogFormat,

    /// Disable the hot cache of serialized responses
    #[arg(long)]
    no_cache: bool,

    /// Hot-cache TTL in seconds
    #[arg(long, default_value_t = 600)]
    cache_ttl_s: u64,

    /// Dedup window in seconds
    #[arg(long, default_value_t = 600)]
    dedup_ttl_s: u64,

    /// Bits in the dedup bitmap
    #[arg(long, default_value_t = 262_144)]
    dedup_bitmap_bits: u32,

    /// Hash positions per dedup key
    #[arg(long, default_value_t = 4)]
    dedup_hash_functions: u32,

    /// Fusion fan-out deadline in milliseconds
    #[arg(long, default_value_t = 4000)]
    fusion_deadline_ms: u64,

    /// Top score required for an exact-table write
    #[arg(long, default_value_t = 80.0)]
    min_score_for_exact: f64,

    /// Anti-flap margin for override upserts
    #[arg(long, default_value_t = 20.0)]
    anti_flap_margin: f64,

    /// Run fusion when a hot-cache hit is partial
    #[arg(long)]
    fusion_on_partial_cache: bool,

    /// Run fusion when a chain-cache hit is partial
    #[arg(long)]
    fusion_on_partial_local: bool,

    /// Run fusion when a relational hit is partial
    #[arg(long)]
    fusion_on_partial_db: bool,

    /// Requests per second admitted before the pipeline (omit to disable)
    #[arg(long)]
    rate_limit_qps: Option<u32>,

    /// Radix-tree database path
    #[arg(long)]
    radix_path: Option<PathBuf>,

    /// Language window for radix-tree leaves
    #[arg(long, default_value = "zh-CN")]
    radix_lang: String,

    /// XDB database path
    #[arg(long)]
    xdb_path: Option<PathBuf>,

    /// Endpoint of an out-of-process HTTP source
    #[arg(long)]
    external_endpoint: Option<String>,

    /// Name of the external HTTP source
    #[arg(long, default_value = "ext")]
    external_name: String,

    /// Association key of the external HTTP source
    #[arg(long, default_value = "ext")]
    external_assoc: String,

    /// Weight of the external HTTP source
    #[arg(long, default_value_t = 5.0)]
    external_weight: f64,

    /// Server key for the REST geocoder
    #[arg(long)]
    geocoder_key: Option<String>,

    /// REST geocoder endpoint
    #[arg(long, default_value = "https://restapi.amap.com/v3/ip")]
    geocoder_endpoint: String,

    /// Per-source weight override, repeatable: --fusion-weight radix=7.5
    #[arg(long = "fusion-weight", value_parser = parse_weight)]
    fusion_weights: Vec<(String, f64)>,
}

fn parse_weight(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <source>=<weight>, got `{raw}`"))?;
    let weight: f64 = value
        .parse()
        .map_err(|_| format!("invalid weight `{value}`"))?;
    if !weight.is_finite() {
        return Err(format!("invalid weight `{value}`"));
    }
    Ok((name.to_string(), weight))
}

impl Cli {
    fn into_config(self) -> Config {
        let mut source_weights = HashMap::new();
        for (name, weight) in self.fusion_weights {
            source_weights.insert(name, weight);
        }
        Config {
            db_path: self.db_path,
            data_dir: self.data_dir,
            listen_addr: self.listen_addr,
            log_level: self.log_level,
            log_format: self.log_format,
            cache_enabled: !self.no_cache,
            cache_ttl_s: self.cache_ttl_s,
            dedup_enabled: true,
            dedup_ttl_s: self.dedup_ttl_s,
            dedup_bitmap_bits: self.dedup_bitmap_bits,
            dedup_hash_functions: self.dedup_hash_functions,
            fusion_deadline_ms: self.fusion_deadline_ms,
            min_score_for_exact: self.min_score_for_exact,
            anti_flap_margin: self.anti_flap_margin,
            fusion_on_partial_cache: self.fusion_on_partial_cache,
            fusion_on_partial_local: self.fusion_on_partial_local,
            fusion_on_partial_db: self.fusion_on_partial_db,
            rate_limit_qps: self.rate_limit_qps,
            radix_path: self.radix_path,
            radix_lang: self.radix_lang,
            xdb_path: self.xdb_path,
            external_endpoint: self.external_endpoint,
            external_name: self.external_name,
            external_assoc: self.external_assoc,
            external_weight: self.external_weight,
            geocoder_key: self.geocoder_key,
            geocoder_endpoint: self.geocoder_endpoint,
            source_weights,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = log::LevelFilter::from(cli.log_level.clone());
    let format = cli.log_format.clone();
    init_logger_with(level, format).context("Failed to initialize logger")?;

    let config = cli.into_config();
    run_server(config).await
}
