//! Shared fixtures for integration tests.

// Not every test crate touches every fixture field
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ip_locator::storage::pool::sqlite_memory_pool;
use tempfile::TempDir;

use ip_locator::config::Config;
use ip_locator::dedup::DedupWindow;
use ip_locator::hotcache::HotCache;
use ip_locator::localdb::DynamicCache;
use ip_locator::pipeline::Pipeline;
use ip_locator::rebuild::Rebuilder;
use ip_locator::sources::SourceManager;
use ip_locator::{run_migrations, Location, Store};

pub struct Harness {
    pub store: Store,
    pub chain: Arc<DynamicCache>,
    pub sources: Arc<SourceManager>,
    pub rebuilder: Arc<Rebuilder>,
    pub pipeline: Arc<Pipeline>,
    pub config: Arc<Config>,
    pub data_dir: TempDir,
}

/// Builds a fully wired serving core over an in-memory database and a
/// temp index directory.
pub async fn harness(config: Config) -> Harness {
    let pool = sqlite_memory_pool()
        .await
        .expect("test pool");
    run_migrations(&pool).await.expect("migrations");
    let store = Store::new(pool);

    let chain = Arc::new(DynamicCache::new());
    let data_dir = TempDir::new().expect("index dir");
    let rebuilder = Arc::new(Rebuilder::new(
        store.clone(),
        data_dir.path().to_path_buf(),
        None,
        None,
        Arc::clone(&chain),
    ));
    let sources = Arc::new(SourceManager::new());
    let config = Arc::new(config);

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

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::clone(&chain),
        Arc::clone(&sources),
        Arc::clone(&rebuilder),
        hot_cache,
        dedup,
        Arc::clone(&config),
    ));

    Harness {
        store,
        chain,
        sources,
        rebuilder,
        pipeline,
        config,
        data_dir,
    }
}

pub fn full_location() -> Location {
    Location {
        country: "中国".into(),
        region: "华东".into(),
        province: "江苏".into(),
        city: "南京".into(),
        isp: "电信".into(),
    }
}
