//! HTTP serving surface.
//!
//! Two endpoints: `GET /ip` resolves a target address through the pipeline
//! and `GET /stats` reports the aggregate counters. The target IP comes
//! from the `ip` query parameter or, absent that, the proxy header chain;
//! edge-supplied geo headers are parsed into the request context for the
//! fusion layer. Rate limiting rejects with 429 before the pipeline runs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::debug;

use crate::config::*;
use crate::pipeline::{Pipeline, RequestContext};
use crate::ratelimit::TokenBucket;
use crate::sources::EdgeGeo;
use crate::storage::Store;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub store: Store,
    pub limiter: Option<Arc<TokenBucket>>,
}

/// Builds the API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ip", get(ip_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

async fn ip_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Some(limiter) = &state.limiter {
        if !limiter.allow() {
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }

    let remote_ip = remote.ip().to_string();
    let target = match params.get("ip") {
        Some(ip) if !ip.is_empty() => ip.clone(),
        _ => derive_client_ip(&headers, &remote_ip),
    };
    let visitor = derive_client_ip(&headers, &remote_ip);
    let user_agent = header_str(&headers, header::USER_AGENT.as_str());

    let ctx = RequestContext {
        ip: target.clone(),
        visitor_ip: visitor,
        user_agent,
        edge_geo: parse_edge_geo(&headers),
    };
    debug!("http_ip_request target={target} remote={remote_ip}");

    let result = state.pipeline.handle(ctx).await;
    let body = serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string());

    let mut response = (StatusCode::OK, body).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        "application/json; charset=utf-8".parse().expect("header"),
    );
    response_headers.insert(header::CACHE_CONTROL, "no-store".parse().expect("header"));
    if !target.is_empty() {
        if let Ok(value) = target.parse() {
            response_headers.insert("x-client-ip", value);
            response_headers.insert(
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                "x-client-ip".parse().expect("header"),
            );
        }
    }
    response
}

async fn stats_handler(State(state): State<AppState>) -> Response {
    let totals = state.store.get_totals().await;
    let body = serde_json::json!({ "total": totals.total, "today": totals.today }).to_string();
    let mut response = (StatusCode::OK, body).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        "application/json; charset=utf-8".parse().expect("header"),
    );
    response_headers.insert(header::CACHE_CONTROL, "no-store".parse().expect("header"));
    response
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Derives the client IP from the proxy header chain, falling back to the
/// transport remote address.
///
/// Forged headers are possible; deployments are expected to pair this with
/// a trusted-proxy filter at the gateway.
pub fn derive_client_ip(headers: &HeaderMap, remote: &str) -> String {
    let forwarded_for = header_str(headers, HEADER_X_FORWARDED_FOR);
    if !forwarded_for.is_empty() {
        return forwarded_for
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
    }
    for name in [
        HEADER_CF_CONNECTING_IP,
        HEADER_X_REAL_IP,
        HEADER_X_CLIENT_IP,
        HEADER_X_EDGE_CLIENT_IP,
        HEADER_X_EDGEONE_IP,
    ] {
        let value = header_str(headers, name);
        if !value.is_empty() {
            return value;
        }
    }
    let forwarded = header_str(headers, HEADER_FORWARDED);
    if let Some(from) = parse_forwarded_for(&forwarded) {
        return from;
    }
    remote.to_string()
}

/// Extracts the `for=` token from an RFC 7239 `Forwarded` header.
fn parse_forwarded_for(value: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let at = lower.find("for=")?;
    let mut token = &value[at + 4..];
    if let Some(end) = token.find([';', ',']) {
        token = &token[..end];
    }
    let token = token.trim().trim_matches('"');
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Parses the edge geo headers into a snapshot, when any are present.
pub fn parse_edge_geo(headers: &HeaderMap) -> Option<EdgeGeo> {
    let isp = {
        let primary = header_str(headers, HEADER_EO_ISP);
        if primary.is_empty() {
            header_str(headers, HEADER_EO_GEO_CISP)
        } else {
            primary
        }
    };
    let geo = EdgeGeo {
        country: header_str(headers, HEADER_EO_GEO_COUNTRY),
        region: header_str(headers, HEADER_EO_GEO_REGION),
        city: header_str(headers, HEADER_EO_GEO_CITY),
        isp,
        latitude: header_str(headers, HEADER_EO_GEO_LATITUDE).parse().ok(),
        longitude: header_str(headers, HEADER_EO_GEO_LONGITUDE).parse().ok(),
        client_ip: header_str(headers, HEADER_EO_CLIENT_IP),
    };
    if geo.country.is_empty()
        && geo.region.is_empty()
        && geo.city.is_empty()
        && geo.isp.is_empty()
        && geo.client_ip.is_empty()
    {
        return None;
    }
    Some(geo)
}
