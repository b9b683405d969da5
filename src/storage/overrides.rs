//! Override writes: the location dictionary, the KV override upsert with its
//! anti-flap guard, the legacy exact-table write, and CIDR version retention.

use chrono::Utc;
use log::debug;

use super::Store;
use crate::error_handling::DatabaseError;
use crate::models::Location;

impl Store {
    /// Inserts a location tuple into the dictionary, returning the existing
    /// or newly-minted id. Idempotent on the full five-tuple.
    pub async fn upsert_location(&self, loc: &Location) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO ip_locations(country, region, province, city, isp) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(country, region, province, city, isp) \
             DO UPDATE SET country = excluded.country \
             RETURNING id",
        )
        .bind(&loc.country)
        .bind(&loc.region)
        .bind(&loc.province)
        .bind(&loc.city)
        .bind(&loc.isp)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Upserts an override-KV row under the anti-flap rule: an existing row
    /// is only replaced when `existing_score + margin <= score`.
    pub async fn upsert_override_kv(
        &self,
        assoc_key: &str,
        ip_int: u32,
        loc: &Location,
        score: f64,
        confidence: f64,
    ) -> Result<(), DatabaseError> {
        self.upsert_override_kv_with_margin(
            assoc_key,
            ip_int,
            loc,
            score,
            confidence,
            crate::config::ANTI_FLAP_MARGIN,
        )
        .await
    }

    /// Same as [`upsert_override_kv`], with an explicit anti-flap margin.
    pub async fn upsert_override_kv_with_margin(
        &self,
        assoc_key: &str,
        ip_int: u32,
        loc: &Location,
        score: f64,
        confidence: f64,
        margin: f64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO ip_overrides_kv(assoc_key, ip_int, country, region, province, city, isp, score, confidence, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(assoc_key, ip_int) DO UPDATE SET \
                 country = excluded.country, \
                 region = excluded.region, \
                 province = excluded.province, \
                 city = excluded.city, \
                 isp = excluded.isp, \
                 score = excluded.score, \
                 confidence = excluded.confidence, \
                 updated_at = excluded.updated_at \
             WHERE COALESCE(ip_overrides_kv.score, 0) + ? <= excluded.score",
        )
        .bind(assoc_key)
        .bind(ip_int as i64)
        .bind(&loc.country)
        .bind(&loc.region)
        .bind(&loc.province)
        .bind(&loc.city)
        .bind(&loc.isp)
        .bind(score)
        .bind(confidence)
        .bind(Utc::now().timestamp())
        .bind(margin)
        .execute(self.pool())
        .await?;
        debug!("kv_upsert assoc={assoc_key} ip_int={ip_int} score={score}");
        Ok(())
    }

    /// Writes a single-IP entry into the legacy exact table, minting a
    /// dictionary id for the location when needed.
    pub async fn write_exact(
        &self,
        ip_int: u32,
        loc: &Location,
        source_tag: &str,
    ) -> Result<(), DatabaseError> {
        let location_id = self.upsert_location(loc).await?;
        sqlx::query(
            "INSERT INTO ip_exact(ip_int, location_id, source_tag, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(ip_int) DO UPDATE SET \
                 location_id = excluded.location_id, \
                 source_tag = excluded.source_tag, \
                 updated_at = excluded.updated_at",
        )
        .bind(ip_int as i64)
        .bind(location_id)
        .bind(source_tag)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await?;
        debug!("exact_write ip_int={ip_int} loc_id={location_id} source={source_tag}");
        Ok(())
    }

    /// Keeps the `keep_n` most recent distinct source tags under `prefix`
    /// active and deactivates the rest. Rollback is the same flip in the
    /// other direction: lowering `keep_n` re-exposes older versions' rows as
    /// inactive ones are never deleted.
    pub async fn retain_cidr_versions(
        &self,
        prefix: &str,
        keep_n: u32,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "WITH versions AS ( \
                 SELECT source_tag, MAX(updated_at) AS last \
                 FROM ip_cidr_special WHERE source_tag LIKE ? || '%' \
                 GROUP BY source_tag \
             ), ranked AS ( \
                 SELECT source_tag, ROW_NUMBER() OVER (ORDER BY last DESC) AS rn \
                 FROM versions \
             ) \
             UPDATE ip_cidr_special \
             SET active = CASE WHEN ( \
                     SELECT rn FROM ranked r WHERE r.source_tag = ip_cidr_special.source_tag \
                 ) <= ? THEN 1 ELSE 0 END, \
                 updated_at = ? \
             WHERE source_tag LIKE ? || '%'",
        )
        .bind(prefix)
        .bind(keep_n as i64)
        .bind(Utc::now().timestamp())
        .bind(prefix)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{run_migrations, Store};
    use crate::models::Location;
    use crate::storage::pool::sqlite_memory_pool;

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
    async fn test_upsert_location_is_idempotent() {
        let store = test_store().await;
        let loc = Location {
            country: "中国".into(),
            region: "华东".into(),
            province: "江苏".into(),
            city: "南京".into(),
            isp: "电信".into(),
        };
        let first = store.upsert_location(&loc).await.expect("first");
        let second = store.upsert_location(&loc).await.expect("second");
        assert_eq!(first, second);

        let other = store
            .upsert_location(&Location {
                city: "苏州".into(),
                ..loc.clone()
            })
            .await
            .expect("other");
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_anti_flap_margin_blocks_small_improvements() {
        let store = test_store().await;
        let ip = 0x01020304;

        store
            .upsert_override_kv("global", ip, &city("A"), 70.0, 0.8)
            .await
            .expect("seed");

        // 70 + 20 <= 85: replaced
        store
            .upsert_override_kv("global", ip, &city("B"), 85.0, 0.9)
            .await
            .expect("update");
        assert_eq!(store.lookup_kv(ip).await.expect("hit").city, "B");

        // 85 + 20 > 80: unchanged
        store
            .upsert_override_kv("global", ip, &city("C"), 80.0, 0.9)
            .await
            .expect("guarded update");
        assert_eq!(store.lookup_kv(ip).await.expect("hit").city, "B");
    }

    #[tokio::test]
    async fn test_anti_flap_boundary_is_inclusive() {
        let store = test_store().await;
        let ip = 0x01020304;
        store
            .upsert_override_kv("global", ip, &city("A"), 60.0, 0.8)
            .await
            .expect("seed");
        // exactly existing + margin: replaced
        store
            .upsert_override_kv("global", ip, &city("B"), 80.0, 0.8)
            .await
            .expect("boundary update");
        assert_eq!(store.lookup_kv(ip).await.expect("hit").city, "B");
    }

    #[tokio::test]
    async fn test_one_row_per_assoc_and_ip() {
        let store = test_store().await;
        let ip = 0x0a000001;
        store
            .upsert_override_kv("a", ip, &city("X"), 50.0, 0.5)
            .await
            .expect("a");
        store
            .upsert_override_kv("a", ip, &city("Y"), 90.0, 0.5)
            .await
            .expect("a again");
        store
            .upsert_override_kv("b", ip, &city("Z"), 40.0, 0.5)
            .await
            .expect("b");

        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM ip_overrides_kv WHERE ip_int = ?")
                .bind(ip as i64)
                .fetch_one(store.pool())
                .await
                .expect("count");
        assert_eq!(count.0, 2);
    }

    #[tokio::test]
    async fn test_write_exact_replaces_previous_entry() {
        let store = test_store().await;
        let ip = 0x7f000001;
        store
            .write_exact(ip, &city("老城"), "seed")
            .await
            .expect("first");
        store
            .write_exact(ip, &city("新城"), "filecache")
            .await
            .expect("second");

        let row: (i64, String) =
            sqlx::query_as("SELECT location_id, source_tag FROM ip_exact WHERE ip_int = ?")
                .bind(ip as i64)
                .fetch_one(store.pool())
                .await
                .expect("row");
        assert_eq!(row.1, "filecache");
        let loc = store.location_by_id(row.0).await.expect("dictionary");
        assert_eq!(loc.city, "新城");
    }

    #[tokio::test]
    async fn test_retain_cidr_versions_keeps_latest_tags() {
        let store = test_store().await;
        let id = store.upsert_location(&city("城")).await.expect("loc");

        for (tag, ts) in [("v-1", 100), ("v-2", 200), ("v-3", 300)] {
            sqlx::query(
                "INSERT INTO ip_cidr_special(start_int, end_int, first_octet, location_id, source_tag, active, updated_at) \
                 VALUES (?, ?, 1, ?, ?, 1, ?)",
            )
            .bind(0x01000000_i64)
            .bind(0x0100ffff_i64)
            .bind(id)
            .bind(tag)
            .bind(ts)
            .execute(store.pool())
            .await
            .expect("seed");
        }

        store.retain_cidr_versions("v-", 2).await.expect("retain");

        let active: Vec<(String, i64)> = sqlx::query_as(
            "SELECT source_tag, active FROM ip_cidr_special ORDER BY source_tag",
        )
        .fetch_all(store.pool())
        .await
        .expect("rows");
        let flags: Vec<(&str, i64)> =
            active.iter().map(|(t, a)| (t.as_str(), *a)).collect();
        assert_eq!(flags, vec![("v-1", 0), ("v-2", 1), ("v-3", 1)]);
    }
}
