//! Request pipeline: tiered lookup with lazy promotion.
//!
//! Tier order for one request: dedup window, override-KV short-circuit, hot
//! cache, chain cache, relational fallback, source fusion. Promotion (the
//! override upsert, the conditional exact write, and the index rebuild)
//! always runs asynchronously; the response never waits for it.
//!
//! IPv6 targets skip every IPv4-only tier and are echoed back; the hot
//! cache still applies to them.

pub mod context;

pub use context::RequestContext;

use std::sync::Arc;

use log::{debug, info, warn};

use crate::codec;
use crate::config::{Config, DEFAULT_ASSOC_KEY, FILECACHE_SOURCE_TAG};
use crate::dedup::DedupWindow;
use crate::fusion::{self, coherence_coeff, FusionOutcome, COUNTRY_CHINA};
use crate::hotcache::HotCache;
use crate::localdb::DynamicCache;
use crate::models::QueryResult;
use crate::rebuild::Rebuilder;
use crate::sources::SourceManager;
use crate::storage::Store;

/// The serving core: owns every tier and walks them in order.
pub struct Pipeline {
    store: Store,
    chain: Arc<DynamicCache>,
    sources: Arc<SourceManager>,
    rebuilder: Arc<Rebuilder>,
    hot_cache: Option<Arc<HotCache>>,
    dedup: Option<Arc<DedupWindow>>,
    config: Arc<Config>,
}

impl Pipeline {
    pub fn new(
        store: Store,
        chain: Arc<DynamicCache>,
        sources: Arc<SourceManager>,
        rebuilder: Arc<Rebuilder>,
        hot_cache: Option<Arc<HotCache>>,
        dedup: Option<Arc<DedupWindow>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            chain,
            sources,
            rebuilder,
            hot_cache,
            dedup,
            config,
        }
    }

    /// Serves one request through the tier order.
    pub async fn handle(&self, ctx: RequestContext) -> QueryResult {
        let first_seen = match (&self.dedup, ctx.dedup_key()) {
            (Some(dedup), Some(key)) => dedup.check_and_set(&key),
            // No dedup store or no usable identity: treat as first-seen
            _ => true,
        };
        let ip_int = codec::parse(&ctx.ip);
        debug!(
            "query_begin ip={} ipv4={} first_seen={first_seen}",
            ctx.ip,
            ip_int.is_some()
        );

        let res = self.resolve(&ctx, ip_int).await;

        if first_seen && !ctx.ip.is_empty() {
            self.store.incr_stats(!ctx.visitor_ip.is_empty()).await;
            if let Some(v) = ip_int {
                self.store.record_recent(v).await;
            }
        }

        self.finalize(res)
    }

    /// Walks the tiers, returning on the first conclusive answer.
    async fn resolve(&self, ctx: &RequestContext, ip_int: Option<u32>) -> QueryResult {
        let mut res = QueryResult::new(&ctx.ip);

        // Override-KV short-circuit: authoritative, overrides every cache
        if let Some(v) = ip_int {
            if let Some(loc) = self.store.lookup_kv(v).await {
                debug!("tier_kv_hit ip={}", ctx.ip);
                res.fill(&loc);
                self.cache_response(&res, false);
                return res;
            }
        }

        // Hot cache
        if let Some(mut cached) = self.cached_response(&ctx.ip) {
            debug!("tier_cache_hit ip={}", ctx.ip);
            if let Some(v) = ip_int {
                if self.config.fusion_on_partial_cache && cached.location().is_partial() {
                    if let Some(outcome) = self.fuse_and_promote(ctx, v).await {
                        cached.fill(&outcome.location);
                        self.cache_response(&cached, false);
                    }
                }
            }
            return cached;
        }

        // Chain cache: exact file, then the tree indices
        if let Some(v) = ip_int {
            if let Some(loc) = self.chain.lookup(&ctx.ip).await {
                debug!("tier_chain_hit ip={}", ctx.ip);
                res.fill(&loc);
                if self.config.fusion_on_partial_local && res.location().is_partial() {
                    if let Some(outcome) = self.fuse_and_promote(ctx, v).await {
                        res.fill(&outcome.location);
                    }
                }
                // Lazy promotion: persist the served answer so the next
                // rebuild folds it into the exact index
                let store = self.store.clone();
                let served = res.location();
                tokio::spawn(async move {
                    if let Err(e) = store.write_exact(v, &served, FILECACHE_SOURCE_TAG).await {
                        debug!("lazy_exact_persist_error ip_int={v} err={e}");
                    }
                });
                self.cache_response(&res, true);
                return res;
            }
        }

        // Relational fallback (range/CIDR); a hit here does not end the
        // walk, because fusion may still refine a partial answer
        if let Some(v) = ip_int {
            if let Some(loc) = self.store.lookup_ip(v).await {
                debug!("tier_db_hit ip={}", ctx.ip);
                res.fill(&loc);
                self.cache_response(&res, true);
            }
        }

        // Fusion: on a full miss, on a partial answer when configured, or
        // forced by a strong edge-geo signal
        if let Some(v) = ip_int {
            let current = res.location();
            let trigger = current.is_empty()
                || (self.config.fusion_on_partial_db && current.is_partial())
                || ctx.has_edge_signal();
            if trigger {
                if let Some(outcome) = self.fuse_and_promote(ctx, v).await {
                    res.fill(&outcome.location);
                    self.cache_response(&res, true);
                }
            }
        }

        res
    }

    /// Runs the fusion fan-out under its deadline. A non-empty outcome is
    /// promoted in the background and returned; an empty one is dropped.
    async fn fuse_and_promote(&self, ctx: &RequestContext, ip_int: u32) -> Option<FusionOutcome> {
        let deadline = std::time::Duration::from_millis(self.config.fusion_deadline_ms);
        let outcome = self.sources.aggregate(ctx, deadline).await;
        if outcome.location.is_empty() {
            debug!("fusion_empty ip={}", ctx.ip);
            return None;
        }
        debug!(
            "fusion_hit ip={} score={:.1} conf={:.2}",
            ctx.ip, outcome.top_score, outcome.top_confidence
        );
        self.promote(ip_int, &outcome);
        Some(outcome)
    }

    /// Background promotion: override-KV upsert, conditional exact write,
    /// then an index rebuild and chain swap. The response never waits and a
    /// failure never affects it.
    fn promote(&self, ip_int: u32, outcome: &FusionOutcome) {
        let store = self.store.clone();
        let rebuilder = Arc::clone(&self.rebuilder);
        let assoc = outcome
            .anchor_assoc
            .clone()
            .unwrap_or_else(|| DEFAULT_ASSOC_KEY.to_string());
        let loc = outcome.location.clone();
        let score = outcome.top_score;
        let confidence = outcome.top_confidence;
        let margin = self.config.anti_flap_margin;
        let min_score_for_exact = self.config.min_score_for_exact;

        tokio::spawn(async move {
            if let Err(e) = store
                .upsert_override_kv_with_margin(&assoc, ip_int, &loc, score, confidence, margin)
                .await
            {
                warn!("promotion_kv_error ip_int={ip_int} err={e}");
            }
            let (_, write_exact) = fusion::decide_write(score, min_score_for_exact);
            if write_exact {
                if let Err(e) = store.write_exact(ip_int, &loc, &assoc).await {
                    warn!("promotion_exact_error ip_int={ip_int} err={e}");
                }
            }
            rebuilder.spawn_rebuild();
        });
    }

    /// Reads and deserializes a hot-cache entry; a corrupt entry is a miss.
    fn cached_response(&self, ip: &str) -> Option<QueryResult> {
        let cache = self.hot_cache.as_ref()?;
        if ip.is_empty() {
            return None;
        }
        let raw = cache.get(&format!("ip:{ip}"))?;
        match serde_json::from_str::<QueryResult>(&raw) {
            Ok(mut cached) => {
                cached.ip = ip.to_string();
                Some(cached)
            }
            Err(e) => {
                debug!("cache_decode_error ip={ip} err={e}");
                None
            }
        }
    }

    /// Writes the response into the hot cache. Empty results are skipped on
    /// the fallback tiers so a transient miss is not pinned for the TTL.
    fn cache_response(&self, res: &QueryResult, skip_empty: bool) {
        let Some(cache) = &self.hot_cache else { return };
        if res.ip.is_empty() {
            return;
        }
        if skip_empty && res.location().is_empty() {
            debug!("cache_skip_empty ip={}", res.ip);
            return;
        }
        if let Ok(body) = serde_json::to_string(res) {
            cache.set(&format!("ip:{}", res.ip), body);
        }
    }

    /// Coherence guard applied to every response just before it leaves.
    fn finalize(&self, mut res: QueryResult) -> QueryResult {
        let loc = res.location();
        if coherence_coeff(&loc) < 1.0 {
            info!(
                "country_fallback_applied prev={} region={} city={}",
                res.country, res.region, res.city
            );
            res.country = COUNTRY_CHINA.to_string();
        }
        res
    }
}
