//! ip_locator library: tiered IP geolocation with multi-source fusion.
//!
//! Given an IPv4 address, the service returns a normalized administrative
//! location (country, region, province, city, ISP). Requests are served
//! from the fastest authoritative layer available — operator overrides, a
//! hot cache, a chain of local binary indices — and fall back to weighted
//! fusion across heterogeneous sources. High-confidence fused answers are
//! persisted so later requests short-circuit earlier, and the local indices
//! are rebuilt and hot-swapped without interrupting the serving path.
//!
//! # Example
//!
//! ```no_run
//! use ip_locator::{Config, run_server};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     listen_addr: "0.0.0.0:8080".to_string(),
//!     ..Default::default()
//! };
//! run_server(config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your
//! application or call library functions within an async context.

pub mod codec;
pub mod config;
pub mod dedup;
pub mod error_handling;
pub mod fusion;
pub mod hotcache;
pub mod initialization;
pub mod localdb;
pub mod models;
pub mod pipeline;
pub mod ratelimit;
pub mod rebuild;
pub mod server;
pub mod sources;
pub mod storage;

// Re-export public API
pub use config::{Config, LogFormat, LogLevel};
pub use models::{Location, QueryResult};
pub use run::run_server;
pub use storage::{run_migrations, Store};

// Internal run module (wires the tiers together and serves)
mod run {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{Context, Result};
    use log::{info, warn};
    use tokio_util::sync::CancellationToken;

    use crate::config::{
        Config, REMOTE_SOURCE_TIMEOUT, WEIGHT_EDGE_GEO, WEIGHT_GEOCODER, WEIGHT_OVERRIDE_KV,
        WEIGHT_RADIX, WEIGHT_XDB,
    };
    use crate::dedup::DedupWindow;
    use crate::hotcache::HotCache;
    use crate::initialization::init_remote_client;
    use crate::localdb::{DynamicCache, RadixCache, XdbCache};
    use crate::pipeline::Pipeline;
    use crate::ratelimit::TokenBucket;
    use crate::rebuild::Rebuilder;
    use crate::server::{build_router, AppState};
    use crate::sources::remote::{GeocoderSource, RemoteHttpSource};
    use crate::sources::{
        EdgeGeoSource, OverrideKvSource, RadixTreeSource, Source, SourceManager, XdbSource,
    };
    use crate::storage::{init_db_pool_with_path, run_migrations, Store};

    /// Starts the service and serves until the listener fails.
    ///
    /// # Errors
    ///
    /// Startup is strict: an unusable database path, a failed migration, or
    /// an unbindable listen address refuses to start. Everything after that
    /// point — missing index files, unhealthy sources, stats failures — is
    /// degraded, logged, and served around.
    pub async fn run_server(config: Config) -> Result<()> {
        let pool = init_db_pool_with_path(&config.db_path)
            .await
            .context("Failed to initialize database pool")?;
        run_migrations(pool.as_ref())
            .await
            .context("Failed to run database migrations")?;
        let store = Store::new(pool.as_ref().clone());

        // Local tree readers are optional: a missing or corrupt file logs a
        // warning and the chain simply runs without that member.
        let radix = match &config.radix_path {
            Some(path) => match RadixCache::new(path, &config.radix_lang) {
                Ok(cache) => {
                    info!("radix_ready path={}", path.display());
                    Some(Arc::new(cache))
                }
                Err(e) => {
                    warn!("radix_open_error path={} err={e}", path.display());
                    None
                }
            },
            None => None,
        };
        let xdb = match &config.xdb_path {
            Some(path) => match XdbCache::new(path) {
                Ok(cache) => {
                    info!("xdb_ready path={}", path.display());
                    Some(Arc::new(cache))
                }
                Err(e) => {
                    warn!("xdb_open_error path={} err={e}", path.display());
                    None
                }
            },
            None => None,
        };

        let chain = Arc::new(DynamicCache::new());
        let rebuilder = Arc::new(Rebuilder::new(
            store.clone(),
            config.data_dir.clone(),
            radix.clone(),
            xdb.clone(),
            Arc::clone(&chain),
        ));
        if let Err(e) = rebuilder.bootstrap().await {
            warn!("chain_bootstrap_error err={e:#}");
        }

        let manager = Arc::new(SourceManager::new());
        manager.register(Source::OverrideKv(OverrideKvSource {
            store: store.clone(),
            weight: config.source_weight("kv", WEIGHT_OVERRIDE_KV),
        }));
        manager.register(Source::EdgeGeo(EdgeGeoSource {
            weight: config.source_weight("edgeone", WEIGHT_EDGE_GEO),
        }));
        if let Some(cache) = &radix {
            manager.register(Source::RadixTree(RadixTreeSource {
                cache: Arc::clone(cache),
                weight: config.source_weight("radix", WEIGHT_RADIX),
            }));
        }
        if let Some(cache) = &xdb {
            manager.register(Source::Xdb(XdbSource {
                cache: Arc::clone(cache),
                weight: config.source_weight("xdb", WEIGHT_XDB),
            }));
        }
        let remote_client = init_remote_client(REMOTE_SOURCE_TIMEOUT)
            .context("Failed to initialize HTTP client")?;
        if let Some(key) = &config.geocoder_key {
            manager.register(Source::Geocoder(GeocoderSource {
                key: key.clone(),
                endpoint: config.geocoder_endpoint.clone(),
                weight: config.source_weight("geocoder", WEIGHT_GEOCODER),
                client: remote_client.clone(),
            }));
        }
        if let Some(endpoint) = &config.external_endpoint {
            manager.register(Source::RemoteHttp(RemoteHttpSource {
                name: config.external_name.clone(),
                assoc_key: config.external_assoc.clone(),
                endpoint: endpoint.clone(),
                weight: config.source_weight(&config.external_name, config.external_weight),
                client: remote_client,
            }));
        }
        let shutdown = CancellationToken::new();
        manager.start(shutdown.child_token());

        let hot_cache = config
            .cache_enabled
            .then(|| Arc::new(HotCache::new(Duration::from_secs(config.cache_ttl_s))));
        let dedup = config.dedup_enabled.then(|| {
            Arc::new(DedupWindow::new(
                config.dedup_bitmap_bits,
                config.dedup_hash_functions,
                config.dedup_ttl_s,
            ))
        });
        let limiter = config.rate_limit_qps.map(|qps| Arc::new(TokenBucket::new(qps)));

        let config = Arc::new(config);
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            Arc::clone(&chain),
            Arc::clone(&manager),
            Arc::clone(&rebuilder),
            hot_cache,
            dedup,
            Arc::clone(&config),
        ));

        let app = build_router(AppState {
            pipeline,
            store,
            limiter,
        });
        let listener = tokio::net::TcpListener::bind(&config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
        info!("listening addr={}", config.listen_addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .context("Server error")?;

        shutdown.cancel();
        Ok(())
    }
}
