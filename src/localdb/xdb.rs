//! XDB database reader.
//!
//! Layout (all integers little-endian): a 256-byte header, a 256x256 vector
//! index of `(start_ptr u32, end_ptr u32)` pairs selected by the first two
//! address octets, then 14-byte segment entries
//! `(start_ip u32, end_ip u32, data_len u16, data_ptr u32)` pointing at
//! pipe-separated region strings.
//!
//! The raw answer is `country|region|province|city|ISP`; the literal values
//! `"0"`, `"unknown"`, and the empty string all normalize to "unknown".

use std::path::Path;

use async_trait::async_trait;

use super::LocalLookup;
use crate::codec;
use crate::error_handling::LocalDbError;
use crate::models::Location;

const HEADER_LEN: usize = 256;
const VECTOR_INDEX_LEN: usize = 256 * 256 * 8;
const SEGMENT_ENTRY_LEN: usize = 14;

/// In-memory searcher over one XDB file.
pub struct XdbSearcher {
    data: Vec<u8>,
}

impl XdbSearcher {
    pub fn open(path: &Path) -> Result<Self, LocalDbError> {
        let data = std::fs::read(path)?;
        if data.len() < HEADER_LEN + VECTOR_INDEX_LEN {
            return Err(LocalDbError::BadLayout(
                "file shorter than header and vector index".into(),
            ));
        }
        Ok(Self { data })
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes = self.data.get(offset..offset + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes = self.data.get(offset..offset + 2)?;
        Some(u16::from_le_bytes(bytes.try_into().expect("2 bytes")))
    }

    /// Returns the raw region string for an address, if any segment covers it.
    pub fn search(&self, ip_int: u32) -> Option<String> {
        let il0 = (ip_int >> 24) as usize;
        let il1 = ((ip_int >> 16) & 0xff) as usize;
        let vector_at = HEADER_LEN + (il0 * 256 + il1) * 8;
        let start_ptr = self.u32_at(vector_at)? as usize;
        let end_ptr = self.u32_at(vector_at + 4)? as usize;
        if start_ptr == 0 || end_ptr < start_ptr {
            return None;
        }

        let mut lo = 0i64;
        let mut hi = ((end_ptr - start_ptr) / SEGMENT_ENTRY_LEN) as i64;
        while lo <= hi {
            let mid = (lo + hi) >> 1;
            let entry = start_ptr + mid as usize * SEGMENT_ENTRY_LEN;
            let start_ip = self.u32_at(entry)?;
            let end_ip = self.u32_at(entry + 4)?;
            if ip_int < start_ip {
                hi = mid - 1;
            } else if ip_int > end_ip {
                lo = mid + 1;
            } else {
                let len = self.u16_at(entry + 8)? as usize;
                let ptr = self.u32_at(entry + 10)? as usize;
                let raw = self.data.get(ptr..ptr + len)?;
                return String::from_utf8(raw.to_vec()).ok();
            }
        }
        None
    }
}

/// Lookup view translating XDB region strings into [`Location`] tuples.
pub struct XdbCache {
    searcher: XdbSearcher,
}

impl XdbCache {
    pub fn new(path: &Path) -> Result<Self, LocalDbError> {
        Ok(Self {
            searcher: XdbSearcher::open(path)?,
        })
    }
}

#[async_trait]
impl LocalLookup for XdbCache {
    async fn lookup(&self, ip: &str) -> Option<Location> {
        let ip_int = codec::parse(ip)?;
        let region = self.searcher.search(ip_int)?;
        if region.is_empty() {
            return None;
        }
        Some(parse_region(&region))
    }
}

/// Splits a `country|region|province|city|ISP` string into a location.
fn parse_region(raw: &str) -> Location {
    let mut parts = raw.split('|');
    Location {
        country: normalize(parts.next()),
        region: normalize(parts.next()),
        province: normalize(parts.next()),
        city: normalize(parts.next()),
        isp: normalize(parts.next()),
    }
}

fn normalize(part: Option<&str>) -> String {
    match part {
        Some(s) if s == "0" || s.is_empty() || s.eq_ignore_ascii_case("unknown") => String::new(),
        Some(s) => s.to_string(),
        None => String::new(),
    }
}
