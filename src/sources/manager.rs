//! Source registry with heartbeat-driven health.
//!
//! Sources are stored by name with a health flag behind a reader-writer
//! mutex: aggregation snapshots the healthy set under a read lock, the
//! heartbeat ticker updates flags under a write lock. Only healthy sources
//! participate in fusion.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use super::Source;
use crate::config::HEARTBEAT_INTERVAL;
use crate::fusion::{self, FusionOutcome, SourceReport};
use crate::models::Location;
use crate::pipeline::context::RequestContext;

struct Entry {
    source: Arc<Source>,
    healthy: bool,
}

/// Registry of sources plus their health state.
pub struct SourceManager {
    entries: RwLock<HashMap<String, Entry>>,
    heartbeat_interval: Duration,
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceManager {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    /// Registers a source under its name, initially healthy.
    pub fn register(&self, source: Source) {
        let name = source.name().to_string();
        info!(
            "source_registered name={name} assoc={} version={}",
            source.assoc_key(),
            source.version()
        );
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            name,
            Entry {
                source: Arc::new(source),
                healthy: true,
            },
        );
    }

    /// Snapshot of the currently healthy sources.
    pub fn healthy_sources(&self) -> Vec<Arc<Source>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .filter(|e| e.healthy)
            .map(|e| Arc::clone(&e.source))
            .collect()
    }

    /// Starts the background heartbeat loop; cancelling the token stops it.
    pub fn start(self: &Arc<Self>, token: CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.heartbeat_interval);
            // The first tick fires immediately; skip it so registration
            // settles before the first probe round.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.run_heartbeats().await,
                    _ = token.cancelled() => {
                        debug!("heartbeat_loop_stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Probes every source once and updates health flags.
    pub async fn run_heartbeats(&self) {
        let snapshot: Vec<Arc<Source>> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.values().map(|e| Arc::clone(&e.source)).collect()
        };
        let mut results = Vec::with_capacity(snapshot.len());
        for source in snapshot {
            let healthy = match source.heartbeat().await {
                Ok(()) => true,
                Err(e) => {
                    debug!("source_heartbeat_fail name={} err={e}", source.name());
                    false
                }
            };
            results.push((source.name().to_string(), healthy));
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for (name, healthy) in results {
            if let Some(entry) = entries.get_mut(&name) {
                entry.healthy = healthy;
            }
        }
    }

    /// Queries all healthy sources concurrently under a per-source deadline
    /// and returns their reports. A timed-out source contributes an empty
    /// answer with zero confidence, so the fan-out always completes within
    /// the deadline.
    pub async fn collect(
        &self,
        ctx: &RequestContext,
        deadline: Duration,
    ) -> Vec<SourceReport> {
        let sources = self.healthy_sources();
        debug!(
            "source_collect_begin ip={} healthy={}",
            ctx.ip,
            sources.len()
        );
        let queries = sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move {
                let (location, confidence) =
                    match tokio::time::timeout(deadline, source.query(ctx)).await {
                        Ok(answer) => answer,
                        Err(_) => {
                            debug!("source_query_timeout name={}", source.name());
                            (Location::default(), 0.0)
                        }
                    };
                SourceReport {
                    name: source.name().to_string(),
                    assoc_key: source.assoc_key().to_string(),
                    location,
                    confidence,
                    weight: source.weight(),
                }
            }
        });
        futures::future::join_all(queries).await
    }

    /// Collects reports and fuses them into one outcome.
    pub async fn aggregate(&self, ctx: &RequestContext, deadline: Duration) -> FusionOutcome {
        let reports = self.collect(ctx, deadline).await;
        let outcome = fusion::fuse(reports);
        debug!(
            "source_aggregate_end ip={} score={:.1} anchor={:?}",
            ctx.ip, outcome.top_score, outcome.anchor_assoc
        );
        outcome
    }

    #[cfg(test)]
    pub(crate) fn set_health(&self, name: &str, healthy: bool) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(name) {
            entry.healthy = healthy;
        }
    }
}
