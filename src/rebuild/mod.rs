//! Exact-index rebuild and chain hot-swap.
//!
//! After a successful fusion promotion, a background task rebuilds the
//! exact-index file, opens a fresh reader over it, composes a new
//! exact -> radix -> xdb chain, and publishes it through the dynamic cache.
//! Concurrent triggers race benignly (last successful publisher wins) and a
//! failed build leaves the previous chain serving untouched.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use log::{debug, error, info};

use crate::localdb::{
    exact::{build_exact_file, ExactFile},
    ChainCache, DynamicCache, LocalLookup, RadixCache, XdbCache,
};
use crate::storage::Store;

/// Owns everything needed to rebuild and publish a serving chain.
pub struct Rebuilder {
    store: Store,
    data_dir: PathBuf,
    radix: Option<Arc<RadixCache>>,
    xdb: Option<Arc<XdbCache>>,
    chain: Arc<DynamicCache>,
    // Builds share one temp path; serialized so a racing trigger cannot
    // rename a half-written file over the published index.
    build_lock: tokio::sync::Mutex<()>,
}

impl Rebuilder {
    pub fn new(
        store: Store,
        data_dir: PathBuf,
        radix: Option<Arc<RadixCache>>,
        xdb: Option<Arc<XdbCache>>,
        chain: Arc<DynamicCache>,
    ) -> Self {
        Self {
            store,
            data_dir,
            radix,
            xdb,
            chain,
            build_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Rebuilds the exact index and atomically publishes the new chain.
    /// Simultaneous triggers queue behind one another; the last successful
    /// publisher wins.
    pub async fn rebuild_and_swap(&self) -> anyhow::Result<()> {
        let _guard = self.build_lock.lock().await;
        let count = build_exact_file(&self.data_dir, &self.store)
            .await
            .context("exact index rebuild failed")?;
        let exact = ExactFile::open(&self.data_dir, self.store.clone())
            .context("exact index reopen failed")?;
        self.publish(Some(Arc::new(exact)));
        debug!("chain_swap_published exact_records={count}");
        Ok(())
    }

    /// Fires a rebuild in the background; used by promotion so the response
    /// never waits. Failures are logged and the old chain keeps serving.
    pub fn spawn_rebuild(self: &Arc<Self>) {
        let rebuilder = Arc::clone(self);
        tokio::spawn(async move {
            match rebuilder.rebuild_and_swap().await {
                Ok(()) => info!("exact_rebuild_swap_ok"),
                Err(e) => error!("exact_rebuild_swap_error err={e:#}"),
            }
        });
    }

    /// Publishes the initial chain at startup. When override rows already
    /// exist the exact index is built first; otherwise the chain starts with
    /// just the tree readers and picks up the exact layer on the first
    /// promotion.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        let overrides: (i64,) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM ip_exact) + (SELECT COUNT(*) FROM ip_overrides_kv)",
        )
        .fetch_one(self.store.pool())
        .await
        .unwrap_or((0,));

        if overrides.0 > 0 {
            self.rebuild_and_swap()
                .await
                .context("bootstrap rebuild failed")?;
            info!("chain_bootstrap_with_exact rows={}", overrides.0);
        } else {
            self.publish(None);
            info!("chain_bootstrap_trees_only");
        }
        Ok(())
    }

    fn publish(&self, exact: Option<Arc<ExactFile>>) {
        let members: Vec<Option<Arc<dyn LocalLookup>>> = vec![
            exact.map(|e| e as Arc<dyn LocalLookup>),
            self.radix.clone().map(|r| r as Arc<dyn LocalLookup>),
            self.xdb.clone().map(|x| x as Arc<dyn LocalLookup>),
        ];
        self.chain.install(Arc::new(ChainCache::new(members)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;
    use crate::storage::run_migrations;
    use crate::storage::pool::sqlite_memory_pool;
    use tempfile::TempDir;

    async fn test_store() -> Store {
        let pool = sqlite_memory_pool().await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        Store::new(pool)
    }

    fn city(name: &str) -> Location {
        Location {
            city: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bootstrap_without_overrides_publishes_empty_chain() {
        let store = test_store().await;
        let dir = TempDir::new().expect("dir");
        let chain = Arc::new(DynamicCache::new());
        let rebuilder = Rebuilder::new(
            store,
            dir.path().to_path_buf(),
            None,
            None,
            Arc::clone(&chain),
        );

        rebuilder.bootstrap().await.expect("bootstrap");
        let current = chain.current().expect("published");
        assert!(current.is_empty());
        assert!(chain.lookup("1.2.3.4").await.is_none());
    }

    #[tokio::test]
    async fn test_rebuild_publishes_fresh_exact_reader() {
        let store = test_store().await;
        let dir = TempDir::new().expect("dir");
        let chain = Arc::new(DynamicCache::new());
        let rebuilder = Rebuilder::new(
            store.clone(),
            dir.path().to_path_buf(),
            None,
            None,
            Arc::clone(&chain),
        );

        store
            .upsert_override_kv("global", 0x01020304, &city("南京"), 90.0, 1.0)
            .await
            .expect("seed");
        rebuilder.rebuild_and_swap().await.expect("rebuild");
        assert_eq!(chain.lookup("1.2.3.4").await.expect("hit").city, "南京");

        // A new override only appears after the next swap
        store
            .upsert_override_kv("global", 0x05060708, &city("苏州"), 90.0, 1.0)
            .await
            .expect("seed 2");
        assert!(chain.lookup("5.6.7.8").await.is_none());
        rebuilder.rebuild_and_swap().await.expect("rebuild 2");
        assert_eq!(chain.lookup("5.6.7.8").await.expect("hit").city, "苏州");
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_chain() {
        let store = test_store().await;
        let dir = TempDir::new().expect("dir");
        let chain = Arc::new(DynamicCache::new());
        let rebuilder = Rebuilder::new(
            store.clone(),
            dir.path().to_path_buf(),
            None,
            None,
            Arc::clone(&chain),
        );

        store
            .upsert_override_kv("global", 0x01020304, &city("南京"), 90.0, 1.0)
            .await
            .expect("seed");
        rebuilder.rebuild_and_swap().await.expect("rebuild");
        let before = chain.current().expect("chain");

        // Poison the relational side so the next build fails
        sqlx::query("DROP TABLE ip_overrides_kv")
            .execute(store.pool())
            .await
            .expect("drop");
        assert!(rebuilder.rebuild_and_swap().await.is_err());

        let after = chain.current().expect("chain");
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(chain.lookup("1.2.3.4").await.expect("hit").city, "南京");
    }
}
