//! Exact-index file: a sorted binary dump of single-IP overrides.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! offset 0  : 'E' 'X' 'D' 'B'
//! offset 4  : version u32 (= 1)
//! offset 8  : count u32
//! offset 12 : count x { ip u32, location_id u32 }, keys strictly ascending
//! ```
//!
//! The builder streams both override tables out of the relational store
//! (KV entries replace legacy entries on the same ip), writes to a temp
//! path, fsyncs, and publishes by rename-over. Readers keep an open handle
//! and binary-search with positioned reads, so a rebuild never disturbs an
//! in-flight lookup.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};

use super::LocalLookup;
use crate::codec;
use crate::error_handling::LocalDbError;
use crate::models::Location;
use crate::storage::Store;

const MAGIC: &[u8; 4] = b"EXDB";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 12;
const RECORD_LEN: u64 = 8;

/// File name of the published index inside its directory.
pub const EXACT_FILE_NAME: &str = "exact.db";

/// Rebuilds the exact-index file from the relational store.
///
/// Returns the number of records written. The previous file keeps serving
/// until the final rename.
pub async fn build_exact_file(dir: &Path, store: &Store) -> anyhow::Result<usize> {
    info!("exact_build_begin dir={}", dir.display());
    std::fs::create_dir_all(dir).context("Failed to create index directory")?;

    let mut merged: BTreeMap<u32, u32> = BTreeMap::new();

    let legacy: Vec<(i64, i64)> =
        sqlx::query_as("SELECT ip_int, location_id FROM ip_exact ORDER BY ip_int")
            .fetch_all(store.pool())
            .await
            .context("Failed to read legacy exact rows")?;
    for (ip, location_id) in legacy {
        merged.insert(ip as u32, location_id as u32);
    }

    let kv: Vec<(i64, String, String, String, String, String)> = sqlx::query_as(
        "SELECT ip_int, country, region, province, city, isp \
         FROM ip_overrides_kv ORDER BY ip_int",
    )
    .fetch_all(store.pool())
    .await
    .context("Failed to read override-KV rows")?;
    for (ip, country, region, province, city, isp) in kv {
        let loc = Location {
            country,
            region,
            province,
            city,
            isp,
        };
        let location_id = store
            .upsert_location(&loc)
            .await
            .context("Failed to mint dictionary id for override")?;
        merged.insert(ip as u32, location_id as u32);
    }

    let mut body = Vec::with_capacity(12 + merged.len() * 8);
    body.extend_from_slice(MAGIC);
    body.extend_from_slice(&VERSION.to_be_bytes());
    body.extend_from_slice(&(merged.len() as u32).to_be_bytes());
    for (ip, location_id) in &merged {
        body.extend_from_slice(&ip.to_be_bytes());
        body.extend_from_slice(&location_id.to_be_bytes());
    }

    let final_path = dir.join(EXACT_FILE_NAME);
    let tmp_path = dir.join(format!("{EXACT_FILE_NAME}.tmp"));
    let mut file = File::create(&tmp_path).context("Failed to create temp index file")?;
    file.write_all(&body).context("Failed to write index body")?;
    file.sync_all().context("Failed to fsync index file")?;
    drop(file);
    std::fs::rename(&tmp_path, &final_path).context("Failed to publish index file")?;

    info!("exact_build_done count={}", merged.len());
    Ok(merged.len())
}

/// Read-only view over a published exact-index file.
///
/// Lookups binary-search the record table with positioned reads and resolve
/// the matched location id through the relational dictionary.
pub struct ExactFile {
    file: File,
    count: u32,
    store: Store,
}

impl ExactFile {
    /// Opens the index inside `dir`, validating magic and version.
    pub fn open(dir: &Path, store: Store) -> Result<Self, LocalDbError> {
        let file = File::open(dir.join(EXACT_FILE_NAME))?;
        let mut header = [0u8; 12];
        file.read_exact_at(&mut header, 0)?;
        if &header[0..4] != MAGIC {
            return Err(LocalDbError::BadMagic);
        }
        let version = u32::from_be_bytes(header[4..8].try_into().expect("4 bytes"));
        if version != VERSION {
            return Err(LocalDbError::BadLayout(format!(
                "unsupported version {version}"
            )));
        }
        let count = u32::from_be_bytes(header[8..12].try_into().expect("4 bytes"));
        let expected = HEADER_LEN + count as u64 * RECORD_LEN;
        let actual = file.metadata()?.len();
        if actual != expected {
            return Err(LocalDbError::BadLayout(format!(
                "count {count} does not match file size {actual}"
            )));
        }
        debug!("exact_open count={count}");
        Ok(Self { file, count, store })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Binary search for the record holding `ip_int`.
    fn search(&self, ip_int: u32) -> Option<u32> {
        let mut lo = 0i64;
        let mut hi = self.count as i64 - 1;
        let mut buf = [0u8; 8];
        while lo <= hi {
            let mid = (lo + hi) >> 1;
            let offset = HEADER_LEN + mid as u64 * RECORD_LEN;
            if self.file.read_exact_at(&mut buf, offset).is_err() {
                return None;
            }
            let key = u32::from_be_bytes(buf[0..4].try_into().expect("4 bytes"));
            if ip_int < key {
                hi = mid - 1;
            } else if ip_int > key {
                lo = mid + 1;
            } else {
                return Some(u32::from_be_bytes(buf[4..8].try_into().expect("4 bytes")));
            }
        }
        None
    }
}

#[async_trait]
impl LocalLookup for ExactFile {
    async fn lookup(&self, ip: &str) -> Option<Location> {
        let ip_int = codec::parse(ip)?;
        let location_id = self.search(ip_int)?;
        let loc = self.store.location_by_id(location_id as i64).await?;
        debug!("exact_lookup_hit ip={ip} loc_id={location_id}");
        Some(loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::run_migrations;
    use crate::storage::pool::sqlite_memory_pool;
    use tempfile::TempDir;

    async fn seeded_store() -> Store {
        let pool = sqlite_memory_pool().await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        Store::new(pool)
    }

    fn loc(city: &str, isp: &str) -> Location {
        Location {
            country: "中国".into(),
            region: "".into(),
            province: "".into(),
            city: city.into(),
            isp: isp.into(),
        }
    }

    #[tokio::test]
    async fn test_build_produces_sorted_unique_records() {
        let store = seeded_store().await;
        let dir = TempDir::new().expect("dir");

        store
            .upsert_override_kv("global", 0x0a000002, &loc("乙", ""), 90.0, 1.0)
            .await
            .expect("kv");
        store
            .upsert_override_kv("global", 0x0a000001, &loc("甲", ""), 90.0, 1.0)
            .await
            .expect("kv");
        store
            .write_exact(0x01000001, &loc("丙", ""), "seed")
            .await
            .expect("legacy");

        let count = build_exact_file(dir.path(), &store).await.expect("build");
        assert_eq!(count, 3);

        let bytes = std::fs::read(dir.path().join(EXACT_FILE_NAME)).expect("read");
        assert_eq!(&bytes[0..4], b"EXDB");
        assert_eq!(u32::from_be_bytes(bytes[4..8].try_into().unwrap()), 1);
        let n = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
        assert_eq!(n, 3);
        assert_eq!(bytes.len(), 12 + n as usize * 8);

        // Keys strictly ascending
        let mut prev = None;
        for i in 0..n as usize {
            let at = 12 + i * 8;
            let key = u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap());
            if let Some(p) = prev {
                assert!(key > p, "keys must be strictly ascending");
            }
            prev = Some(key);
        }
    }

    #[tokio::test]
    async fn test_kv_entries_replace_legacy_on_same_ip() {
        let store = seeded_store().await;
        let dir = TempDir::new().expect("dir");
        let ip = 0x01020304;

        store
            .write_exact(ip, &loc("旧", ""), "seed")
            .await
            .expect("legacy");
        store
            .upsert_override_kv("global", ip, &loc("新", ""), 95.0, 1.0)
            .await
            .expect("kv");

        build_exact_file(dir.path(), &store).await.expect("build");
        let reader = ExactFile::open(dir.path(), store).expect("open");
        let hit = reader.lookup("1.2.3.4").await.expect("hit");
        assert_eq!(hit.city, "新");
    }

    #[tokio::test]
    async fn test_round_trip_every_key() {
        let store = seeded_store().await;
        let dir = TempDir::new().expect("dir");

        let seeds = [
            (0x00000000u32, "零"),
            (0x01020304u32, "壹"),
            (0x7f000001u32, "贰"),
            (0xffffffffu32, "叁"),
        ];
        for (ip, city) in &seeds {
            store
                .upsert_override_kv("global", *ip, &loc(city, "电信"), 90.0, 1.0)
                .await
                .expect("kv");
        }

        build_exact_file(dir.path(), &store).await.expect("build");
        let reader = ExactFile::open(dir.path(), store).expect("open");
        for (ip, city) in &seeds {
            let hit = reader
                .lookup(&codec::format(*ip))
                .await
                .unwrap_or_else(|| panic!("hit for {ip}"));
            assert_eq!(&hit.city, city);
        }
        assert!(reader.lookup("9.9.9.9").await.is_none());
        assert!(reader.lookup("not-an-ip").await.is_none());
    }

    #[tokio::test]
    async fn test_open_rejects_bad_magic_and_truncation() {
        let store = seeded_store().await;
        let dir = TempDir::new().expect("dir");
        let path = dir.path().join(EXACT_FILE_NAME);

        std::fs::write(&path, b"XXXX\x00\x00\x00\x01\x00\x00\x00\x00").expect("write");
        assert!(matches!(
            ExactFile::open(dir.path(), store.clone()),
            Err(LocalDbError::BadMagic)
        ));

        // Header says one record but the body is empty
        std::fs::write(&path, b"EXDB\x00\x00\x00\x01\x00\x00\x00\x01").expect("write");
        assert!(matches!(
            ExactFile::open(dir.path(), store),
            Err(LocalDbError::BadLayout(_))
        ));
    }

    #[tokio::test]
    async fn test_build_is_atomic_under_reader() {
        // A reader opened before a rebuild keeps serving its own snapshot.
        let store = seeded_store().await;
        let dir = TempDir::new().expect("dir");

        store
            .upsert_override_kv("global", 0x01020304, &loc("甲", ""), 90.0, 1.0)
            .await
            .expect("kv");
        build_exact_file(dir.path(), &store).await.expect("build v1");
        let reader_v1 = ExactFile::open(dir.path(), store.clone()).expect("open v1");

        store
            .upsert_override_kv("global", 0x05060708, &loc("乙", ""), 90.0, 1.0)
            .await
            .expect("kv2");
        build_exact_file(dir.path(), &store).await.expect("build v2");
        let reader_v2 = ExactFile::open(dir.path(), store).expect("open v2");

        assert_eq!(reader_v1.count(), 1);
        assert_eq!(reader_v2.count(), 2);
        assert!(reader_v1.lookup("1.2.3.4").await.is_some());
        assert!(reader_v2.lookup("5.6.7.8").await.is_some());
    }
}
