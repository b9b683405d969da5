//! Monotonic counters and the recent-IP log.
//!
//! All writes here are best-effort: failures are logged at debug level and
//! never propagated, so a broken stats table cannot take down the serving
//! path.

use chrono::Utc;
use log::debug;

use super::models::Totals;
use super::Store;

impl Store {
    /// Bumps the lifetime and per-day query counters; when the request came
    /// from an identified visitor, bumps the visitor counters too.
    pub async fn incr_stats(&self, has_visitor: bool) {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        if let Err(e) = sqlx::query(
            "UPDATE ip_stats_total SET total_queries = total_queries + 1 WHERE id = 1",
        )
        .execute(self.pool())
        .await
        {
            debug!("stats_total_error err={e}");
        }
        if let Err(e) = sqlx::query(
            "INSERT INTO ip_stats_daily(day, queries) VALUES (?, 1) \
             ON CONFLICT(day) DO UPDATE SET queries = ip_stats_daily.queries + 1",
        )
        .bind(&day)
        .execute(self.pool())
        .await
        {
            debug!("stats_daily_error err={e}");
        }
        if has_visitor {
            if let Err(e) = sqlx::query(
                "UPDATE ip_stats_total SET total_visitors = total_visitors + 1 WHERE id = 1",
            )
            .execute(self.pool())
            .await
            {
                debug!("stats_visitor_error err={e}");
            }
            if let Err(e) = sqlx::query(
                "INSERT INTO ip_stats_daily(day, visitors) VALUES (?, 1) \
                 ON CONFLICT(day) DO UPDATE SET visitors = ip_stats_daily.visitors + 1",
            )
            .bind(&day)
            .execute(self.pool())
            .await
            {
                debug!("stats_daily_visitor_error err={e}");
            }
        }
    }

    /// Records a queried IP in the recent log with a monotonic `last_seen`.
    /// Consumed by the external enrichment job, not the serving path.
    pub async fn record_recent(&self, ip_int: u32) {
        if let Err(e) = sqlx::query(
            "INSERT INTO ip_recent_ips(ip_int, last_seen, queries) VALUES (?, ?, 1) \
             ON CONFLICT(ip_int) DO UPDATE SET \
                 last_seen = MAX(ip_recent_ips.last_seen, excluded.last_seen), \
                 queries = ip_recent_ips.queries + 1",
        )
        .bind(ip_int as i64)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await
        {
            debug!("recent_record_error ip_int={ip_int} err={e}");
        }
    }

    /// Reads the lifetime and current-day query counts. Read errors report
    /// zeros rather than failing the surface.
    pub async fn get_totals(&self) -> Totals {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let total: Option<(i64,)> =
            sqlx::query_as("SELECT total_queries FROM ip_stats_total WHERE id = 1")
                .fetch_optional(self.pool())
                .await
                .unwrap_or(None);
        let today: Option<(i64,)> =
            sqlx::query_as("SELECT queries FROM ip_stats_daily WHERE day = ?")
                .bind(&day)
                .fetch_optional(self.pool())
                .await
                .unwrap_or(None);
        Totals {
            total: total.map(|t| t.0).unwrap_or(0),
            today: today.map(|t| t.0).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{run_migrations, Store};
    use crate::storage::pool::sqlite_memory_pool;

    async fn test_store() -> Store {
        let pool = sqlite_memory_pool().await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        Store::new(pool)
    }

    #[tokio::test]
    async fn test_incr_stats_is_monotonic() {
        let store = test_store().await;
        assert_eq!(store.get_totals().await.total, 0);

        store.incr_stats(true).await;
        store.incr_stats(false).await;
        store.incr_stats(true).await;

        let totals = store.get_totals().await;
        assert_eq!(totals.total, 3);
        assert_eq!(totals.today, 3);

        let visitors: (i64,) =
            sqlx::query_as("SELECT total_visitors FROM ip_stats_total WHERE id = 1")
                .fetch_one(store.pool())
                .await
                .expect("visitors");
        assert_eq!(visitors.0, 2);
    }

    #[tokio::test]
    async fn test_record_recent_counts_queries() {
        let store = test_store().await;
        let ip = 0x08080808;
        store.record_recent(ip).await;
        store.record_recent(ip).await;
        store.record_recent(ip).await;

        let row: (i64, i64) =
            sqlx::query_as("SELECT queries, last_seen FROM ip_recent_ips WHERE ip_int = ?")
                .bind(ip as i64)
                .fetch_one(store.pool())
                .await
                .expect("row");
        assert_eq!(row.0, 3);
        assert!(row.1 > 0);
    }

    #[tokio::test]
    async fn test_record_recent_last_seen_is_monotonic() {
        let store = test_store().await;
        let ip = 0x01010101;
        store.record_recent(ip).await;
        let first: (i64,) = sqlx::query_as("SELECT last_seen FROM ip_recent_ips WHERE ip_int = ?")
            .bind(ip as i64)
            .fetch_one(store.pool())
            .await
            .expect("row");

        // A stale timestamp must never move last_seen backwards
        sqlx::query(
            "INSERT INTO ip_recent_ips(ip_int, last_seen, queries) VALUES (?, 1, 1) \
             ON CONFLICT(ip_int) DO UPDATE SET \
                 last_seen = MAX(ip_recent_ips.last_seen, excluded.last_seen), \
                 queries = ip_recent_ips.queries + 1",
        )
        .bind(ip as i64)
        .execute(store.pool())
        .await
        .expect("stale write");

        let after: (i64,) = sqlx::query_as("SELECT last_seen FROM ip_recent_ips WHERE ip_int = ?")
            .bind(ip as i64)
            .fetch_one(store.pool())
            .await
            .expect("row");
        assert_eq!(after.0, first.0);
    }
}
