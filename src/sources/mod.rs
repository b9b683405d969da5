//! Geolocation sources.
//!
//! A source answers `query(ctx) -> (Location, confidence)` and exposes a
//! name, version, association key, weight, and heartbeat. The set of kinds
//! is closed: local readers, the relational override layer, edge-supplied
//! geo, and the two remote adapters. Out-of-process extensibility goes
//! through [`remote::RemoteHttpSource`] rather than dynamic loading.

pub mod manager;
pub mod remote;

pub use manager::SourceManager;

use std::sync::Arc;

use crate::config::MAX_SOURCE_WEIGHT;
use crate::localdb::{LocalLookup, RadixCache, XdbCache};
use crate::models::Location;
use crate::pipeline::context::RequestContext;
use crate::storage::Store;
use remote::{GeocoderSource, RemoteHttpSource};

/// Edge-supplied geo snapshot parsed from request headers.
#[derive(Debug, Clone, Default)]
pub struct EdgeGeo {
    pub country: String,
    pub region: String,
    pub city: String,
    pub isp: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// The client IP the edge derived these values for; a mismatch with the
    /// queried IP demotes the answer to low confidence.
    pub client_ip: String,
}

/// Relational override-KV source: authoritative on hit.
pub struct OverrideKvSource {
    pub store: Store,
    pub weight: f64,
}

/// Radix-tree local source.
pub struct RadixTreeSource {
    pub cache: Arc<RadixCache>,
    pub weight: f64,
}

/// XDB local source.
pub struct XdbSource {
    pub cache: Arc<XdbCache>,
    pub weight: f64,
}

/// Edge-geo source reading the request context; no network involved.
pub struct EdgeGeoSource {
    pub weight: f64,
}

/// The closed set of source kinds.
pub enum Source {
    OverrideKv(OverrideKvSource),
    RadixTree(RadixTreeSource),
    Xdb(XdbSource),
    EdgeGeo(EdgeGeoSource),
    RemoteHttp(RemoteHttpSource),
    Geocoder(GeocoderSource),
}

impl Source {
    pub fn name(&self) -> &str {
        match self {
            Source::OverrideKv(_) => "kv",
            Source::RadixTree(_) => "radix",
            Source::Xdb(_) => "xdb",
            Source::EdgeGeo(_) => "edgeone",
            Source::RemoteHttp(s) => &s.name,
            Source::Geocoder(_) => "geocoder",
        }
    }

    pub fn version(&self) -> &str {
        "1.0"
    }

    /// Association key used when this source's answer is written back.
    pub fn assoc_key(&self) -> &str {
        match self {
            Source::OverrideKv(_) => "kv",
            Source::RadixTree(_) => "radix",
            Source::Xdb(_) => "xdb",
            Source::EdgeGeo(_) => "edgeone",
            Source::RemoteHttp(s) => &s.assoc_key,
            Source::Geocoder(_) => "geocoder",
        }
    }

    /// Static weight, clamped to [0, 10].
    pub fn weight(&self) -> f64 {
        let raw = match self {
            Source::OverrideKv(s) => s.weight,
            Source::RadixTree(s) => s.weight,
            Source::Xdb(s) => s.weight,
            Source::EdgeGeo(s) => s.weight,
            Source::RemoteHttp(s) => s.weight,
            Source::Geocoder(s) => s.weight,
        };
        raw.clamp(0.0, MAX_SOURCE_WEIGHT)
    }

    /// Queries this source for the context's target IP.
    ///
    /// A failing source reports an empty location with low confidence; it
    /// never aborts aggregation.
    pub async fn query(&self, ctx: &RequestContext) -> (Location, f64) {
        match self {
            Source::OverrideKv(s) => {
                let Some(ip_int) = crate::codec::parse(&ctx.ip) else {
                    return (Location::default(), 0.0);
                };
                match s.store.lookup_kv(ip_int).await {
                    Some(loc) => (loc, 1.0),
                    None => (Location::default(), 0.0),
                }
            }
            Source::RadixTree(s) => match s.cache.lookup(&ctx.ip).await {
                Some(loc) => {
                    let conf = if loc.city.is_empty() { 0.5 } else { 0.7 };
                    (loc, conf)
                }
                None => (Location::default(), 0.0),
            },
            Source::Xdb(s) => match s.cache.lookup(&ctx.ip).await {
                Some(loc) => {
                    let conf = if loc.city.is_empty() { 0.5 } else { 0.6 };
                    (loc, conf)
                }
                None => (Location::default(), 0.0),
            },
            Source::EdgeGeo(_) => query_edge_geo(ctx),
            Source::RemoteHttp(s) => s.query(&ctx.ip).await,
            Source::Geocoder(s) => s.query(&ctx.ip).await,
        }
    }

    /// Health probe. Local kinds are always healthy; remote kinds answer
    /// with their `/health` (or equivalent) reachability.
    pub async fn heartbeat(&self) -> anyhow::Result<()> {
        match self {
            Source::RemoteHttp(s) => s.heartbeat().await,
            _ => Ok(()),
        }
    }
}

/// Maps the edge snapshot into a report. Confidence scales with field
/// completeness and collapses to 0.2 when the snapshot is missing or was
/// derived for a different client IP.
fn query_edge_geo(ctx: &RequestContext) -> (Location, f64) {
    let Some(geo) = &ctx.edge_geo else {
        return (Location::default(), 0.2);
    };
    if !geo.client_ip.is_empty() && geo.client_ip != ctx.ip {
        return (Location::default(), 0.2);
    }
    let loc = Location {
        country: geo.country.clone(),
        region: geo.region.clone(),
        province: String::new(),
        city: geo.city.clone(),
        isp: geo.isp.clone(),
    };
    let confidence = if !loc.city.is_empty() {
        0.9
    } else if !loc.region.is_empty() {
        0.8
    } else if !loc.country.is_empty() {
        0.7
    } else {
        0.2
    };
    (loc, confidence)
}
