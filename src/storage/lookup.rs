//! Tiered relational lookups.
//!
//! `lookup_ip` consults, in order: override-KV, the legacy exact table, and
//! the active CIDR special segments (narrowest matching range wins).
//! `lookup_kv` restricts itself to override-KV and is the pipeline's
//! absolute-priority short-circuit.
//!
//! Every read error here is downgraded to a miss so the serving path keeps
//! advancing; only debug logs record what happened.

use log::debug;

use super::Store;
use crate::models::Location;

impl Store {
    /// Looks up a single IPv4 address across all relational layers.
    ///
    /// Returns `None` when no layer matches or when a read fails.
    pub async fn lookup_ip(&self, ip_int: u32) -> Option<Location> {
        if let Some(loc) = self.lookup_kv(ip_int).await {
            debug!("db_override_kv_hit ip_int={ip_int}");
            return Some(loc);
        }

        if let Some(loc) = self.lookup_exact(ip_int).await {
            debug!("db_exact_hit ip_int={ip_int}");
            return Some(loc);
        }

        if let Some(loc) = self.lookup_cidr(ip_int).await {
            debug!("db_special_hit ip_int={ip_int}");
            return Some(loc);
        }

        debug!("db_lookup_miss ip_int={ip_int}");
        None
    }

    /// Looks up the override-KV layer only.
    pub async fn lookup_kv(&self, ip_int: u32) -> Option<Location> {
        let row: (String, String, String, String, String) = sqlx::query_as(
            "SELECT country, region, province, city, isp FROM ip_overrides_kv \
             WHERE ip_int = ? ORDER BY score DESC, updated_at DESC LIMIT 1",
        )
        .bind(ip_int as i64)
        .fetch_optional(self.pool())
        .await
        .unwrap_or_else(|e| {
            debug!("kv_lookup_error ip_int={ip_int} err={e}");
            None
        })?;
        let (country, region, province, city, isp) = row;
        Some(Location {
            country,
            region,
            province,
            city,
            isp,
        })
    }

    /// Resolves a location id through the dictionary.
    pub async fn location_by_id(&self, location_id: i64) -> Option<Location> {
        let row: (String, String, String, String, String) = sqlx::query_as(
            "SELECT country, region, province, city, isp FROM ip_locations WHERE id = ?",
        )
        .bind(location_id)
        .fetch_optional(self.pool())
        .await
        .unwrap_or_else(|e| {
            debug!("location_lookup_error id={location_id} err={e}");
            None
        })?;
        let (country, region, province, city, isp) = row;
        Some(Location {
            country,
            region,
            province,
            city,
            isp,
        })
    }

    async fn lookup_exact(&self, ip_int: u32) -> Option<Location> {
        let row: (i64,) =
            sqlx::query_as("SELECT location_id FROM ip_exact WHERE ip_int = ? LIMIT 1")
                .bind(ip_int as i64)
                .fetch_optional(self.pool())
                .await
                .unwrap_or_else(|e| {
                    debug!("exact_lookup_error ip_int={ip_int} err={e}");
                    None
                })?;
        self.location_by_id(row.0).await
    }

    async fn lookup_cidr(&self, ip_int: u32) -> Option<Location> {
        // Narrowest active range wins; first_octet keeps the scan partitioned.
        let first_octet = (ip_int >> 24) & 0xff;
        let row: (i64,) = sqlx::query_as(
            "SELECT location_id FROM ip_cidr_special \
             WHERE first_octet = ? AND start_int <= ? AND end_int >= ? AND active = 1 \
             ORDER BY (end_int - start_int) ASC, start_int DESC LIMIT 1",
        )
        .bind(first_octet as i64)
        .bind(ip_int as i64)
        .bind(ip_int as i64)
        .fetch_optional(self.pool())
        .await
        .unwrap_or_else(|e| {
            debug!("cidr_lookup_error ip_int={ip_int} err={e}");
            None
        })?;
        self.location_by_id(row.0).await
    }
}
