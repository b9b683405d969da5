//! Per-request context.
//!
//! Everything request-scoped travels in this value: the target IP, the
//! visitor identity used for dedup, and the edge-supplied geo snapshot
//! consumed by the fusion layer. Nothing request-scoped lives in process
//! globals.

use crate::sources::EdgeGeo;

/// Request-scoped inputs to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// The IP being resolved.
    pub ip: String,
    /// The caller's IP, used for dedup and visitor stats.
    pub visitor_ip: String,
    /// The caller's User-Agent, part of the dedup key.
    pub user_agent: String,
    /// Edge-supplied geo headers, when present.
    pub edge_geo: Option<EdgeGeo>,
}

impl RequestContext {
    pub fn new(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            ..Self::default()
        }
    }

    /// Dedup key combining visitor, target, and user agent. `None` when the
    /// request has no usable identity, which is then treated as first-seen.
    pub fn dedup_key(&self) -> Option<String> {
        if self.ip.is_empty() || self.visitor_ip.is_empty() {
            return None;
        }
        Some(format!(
            "{}|{}|{}",
            self.visitor_ip, self.ip, self.user_agent
        ))
    }

    /// Whether the edge snapshot carries a strong locality signal (city or
    /// region), which force-triggers fusion.
    pub fn has_edge_signal(&self) -> bool {
        self.edge_geo
            .as_ref()
            .map(|g| !g.city.is_empty() || !g.region.is_empty())
            .unwrap_or(false)
    }
}
