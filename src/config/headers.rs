//! HTTP header name constants.
//!
//! Covers the client-IP derivation chain and the edge-supplied geo headers
//! consumed by the fusion layer.

/// Proxy headers consulted, in order, to derive the target/visitor IP.
pub const HEADER_X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const HEADER_CF_CONNECTING_IP: &str = "cf-connecting-ip";
pub const HEADER_X_REAL_IP: &str = "x-real-ip";
pub const HEADER_X_CLIENT_IP: &str = "x-client-ip";
pub const HEADER_X_EDGE_CLIENT_IP: &str = "x-edge-client-ip";
pub const HEADER_X_EDGEONE_IP: &str = "x-edgeone-ip";
pub const HEADER_FORWARDED: &str = "forwarded";

/// Edge-supplied geo headers, mapped into the request context.
pub const HEADER_EO_GEO_COUNTRY: &str = "x-eo-geo-country";
pub const HEADER_EO_GEO_REGION: &str = "x-eo-geo-region";
pub const HEADER_EO_GEO_CITY: &str = "x-eo-geo-city";
pub const HEADER_EO_GEO_LATITUDE: &str = "x-eo-geo-latitude";
pub const HEADER_EO_GEO_LONGITUDE: &str = "x-eo-geo-longitude";
pub const HEADER_EO_ISP: &str = "x-eo-isp";
pub const HEADER_EO_GEO_CISP: &str = "x-eo-geo-cisp";
pub const HEADER_EO_CLIENT_IP: &str = "x-eo-client-ip";
