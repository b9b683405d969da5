//! Radix-tree database reader.
//!
//! File layout: a 4-byte big-endian header length, a JSON header describing
//! `node_count`, `total_size`, per-language field offsets and the ordered
//! field list, then `node_count * 8` bytes of node table followed by leaf
//! records. Each node is two big-endian u32 child pointers; a pointer above
//! `node_count` addresses a leaf record (2-byte big-endian length plus a
//! tab-separated field string).
//!
//! The whole file is held in memory; lookups are read-only and lock-free.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::LocalLookup;
use crate::codec;
use crate::error_handling::LocalDbError;
use crate::models::Location;

#[derive(Debug, Deserialize)]
struct RadixHeader {
    node_count: usize,
    total_size: usize,
    languages: HashMap<String, usize>,
    fields: Vec<String>,
}

/// Parsed radix tree: node table, leaves, and the pre-computed IPv4 root.
pub struct RadixTree {
    node_count: usize,
    v4_root: usize,
    header: RadixHeader,
    data: Vec<u8>,
}

impl RadixTree {
    /// Opens and validates a radix database file.
    pub fn open(path: &Path) -> Result<Self, LocalDbError> {
        let body = std::fs::read(path)?;
        if body.len() < 4 {
            return Err(LocalDbError::BadLayout("file shorter than length prefix".into()));
        }
        let header_len = u32::from_be_bytes(body[0..4].try_into().expect("4 bytes")) as usize;
        if body.len() < 4 + header_len {
            return Err(LocalDbError::BadLayout("header length exceeds file".into()));
        }
        let header: RadixHeader = serde_json::from_slice(&body[4..4 + header_len])?;
        if header.languages.is_empty() || header.fields.is_empty() {
            return Err(LocalDbError::BadLayout("missing languages or fields".into()));
        }
        if body.len() != 4 + header_len + header.total_size {
            return Err(LocalDbError::BadLayout("total_size mismatch".into()));
        }
        let data = body[4 + header_len..].to_vec();

        let mut tree = Self {
            node_count: header.node_count,
            v4_root: 0,
            header,
            data,
        };
        // The IPv4 subtree root: 80 left steps then 16 right steps from node
        // 0, bounded by the node count.
        let mut node = 0usize;
        for i in 0..96 {
            if node >= tree.node_count {
                break;
            }
            node = tree.read_node(node, usize::from(i >= 80));
        }
        tree.v4_root = node;
        Ok(tree)
    }

    fn read_node(&self, node: usize, index: usize) -> usize {
        let offset = node * 8 + index * 4;
        if offset + 4 > self.data.len() {
            return node;
        }
        u32::from_be_bytes(self.data[offset..offset + 4].try_into().expect("4 bytes")) as usize
    }

    /// Reads the leaf record addressed by a pointer above `node_count`.
    fn resolve(&self, node: usize) -> Option<&[u8]> {
        let resolved = node - self.node_count + self.node_count * 8;
        if resolved + 2 > self.data.len() {
            return None;
        }
        let size =
            u16::from_be_bytes(self.data[resolved..resolved + 2].try_into().expect("2 bytes"))
                as usize;
        if resolved + 2 + size > self.data.len() {
            return None;
        }
        Some(&self.data[resolved + 2..resolved + 2 + size])
    }

    fn language_offset(&self, language: &str) -> usize {
        if let Some(offset) = self.header.languages.get(language) {
            return *offset;
        }
        self.header.languages.values().copied().min().unwrap_or(0)
    }
}

/// Lookup view over a [`RadixTree`] sliced to one language window.
pub struct RadixCache {
    tree: RadixTree,
    offset: usize,
}

impl RadixCache {
    pub fn new(path: &Path, language: &str) -> Result<Self, LocalDbError> {
        let tree = RadixTree::open(path)?;
        let offset = tree.language_offset(language);
        Ok(Self { tree, offset })
    }

    fn lookup_v4(&self, ip_int: u32) -> Option<Location> {
        let mut node = self.tree.v4_root;
        for i in 0..32 {
            // MSB first, one address bit per step
            let bit = ((ip_int >> (31 - i)) & 1) as usize;
            node = self.tree.read_node(node, bit);
            if node > self.tree.node_count {
                break;
            }
        }
        if node <= self.tree.node_count {
            // Address bits exhausted without reaching a leaf
            return None;
        }
        let raw = self.tree.resolve(node)?;
        let fields = std::str::from_utf8(raw).ok()?;
        let parts: Vec<&str> = fields.split('\t').collect();

        let begin = self.offset.min(parts.len());
        let end = (self.offset + self.tree.header.fields.len()).min(parts.len());
        if begin >= end {
            return None;
        }
        let window = &parts[begin..end];

        let mut loc = Location::default();
        for (i, name) in self.tree.header.fields.iter().enumerate() {
            let Some(value) = window.get(i) else { break };
            match name.as_str() {
                "country_name" => loc.country = (*value).to_string(),
                "region_name" => loc.region = (*value).to_string(),
                "province_name" => loc.province = (*value).to_string(),
                "city_name" => loc.city = (*value).to_string(),
                _ => {}
            }
        }
        Some(loc)
    }
}

#[async_trait]
impl LocalLookup for RadixCache {
    async fn lookup(&self, ip: &str) -> Option<Location> {
        let ip_int = codec::parse(ip)?;
        self.lookup_v4(ip_int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Builds a minimal three-node tree:
    /// - node 0: left -> 0 (self), right -> 1, so the v4-root walk lands on 1
    /// - node 1: left -> 2, right -> 1 (addresses with a leading 1-bit spin
    ///   here and exhaust their 32 bits)
    /// - node 2: left -> leaf A, right -> leaf B
    fn build_fixture(languages: &str, leaf_a: &str, leaf_b: &str) -> Vec<u8> {
        let node_count: u32 = 3;
        let mut data = Vec::new();
        let table_len = node_count as usize * 8;

        // Leaf pointers address `ptr - node_count + node_count*8` in data
        let leaf_a_off = table_len + 2;
        let leaf_a_ptr = (leaf_a_off - table_len + node_count as usize) as u32;
        let leaf_b_off = leaf_a_off + 2 + leaf_a.len();
        let leaf_b_ptr = (leaf_b_off - table_len + node_count as usize) as u32;

        for (left, right) in [(0u32, 1u32), (2, 1), (leaf_a_ptr, leaf_b_ptr)] {
            data.extend_from_slice(&left.to_be_bytes());
            data.extend_from_slice(&right.to_be_bytes());
        }
        data.extend_from_slice(&[0, 0]); // padding so leaf pointers clear node_count
        for leaf in [leaf_a, leaf_b] {
            data.extend_from_slice(&(leaf.len() as u16).to_be_bytes());
            data.extend_from_slice(leaf.as_bytes());
        }

        let header = format!(
            "{{\"node_count\":{node_count},\"total_size\":{},\"languages\":{languages},\
             \"fields\":[\"country_name\",\"region_name\",\"province_name\",\"city_name\"]}}",
            data.len()
        );
        let mut file = Vec::new();
        file.extend_from_slice(&(header.len() as u32).to_be_bytes());
        file.extend_from_slice(header.as_bytes());
        file.extend_from_slice(&data);
        file
    }

    fn write_fixture(dir: &TempDir, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("tree.db");
        std::fs::write(&path, bytes).expect("write fixture");
        path
    }

    #[test]
    fn test_lookup_maps_fields_positionally() {
        let dir = TempDir::new().expect("dir");
        let bytes = build_fixture(
            "{\"zh-CN\":0}",
            "中国\t华东\t江苏\t南京",
            "中国\t华南\t广东\t深圳",
        );
        let path = write_fixture(&dir, &bytes);
        let cache = RadixCache::new(&path, "zh-CN").expect("open");

        // 1.2.3.4 has leading bits 0,0 -> node 1 -> node 2 -> leaf A
        let hit = cache.lookup_v4(0x01020304).expect("hit");
        assert_eq!(hit.country, "中国");
        assert_eq!(hit.region, "华东");
        assert_eq!(hit.province, "江苏");
        assert_eq!(hit.city, "南京");

        // 64.0.0.1 has leading bits 0,1 -> node 1 -> node 2 -> leaf B
        let hit = cache.lookup_v4(0x40000001).expect("hit");
        assert_eq!(hit.city, "深圳");
    }

    #[test]
    fn test_lookup_misses_when_bits_exhaust() {
        // Addresses with a leading 1-bit loop on node 1 and never reach a
        // leaf; the lookup must miss without panicking.
        let dir = TempDir::new().expect("dir");
        let bytes = build_fixture("{\"zh-CN\":0}", "中国\t\t江苏\t南京", "中国\t\t\t");
        let path = write_fixture(&dir, &bytes);
        let cache = RadixCache::new(&path, "zh-CN").expect("open");
        assert!(cache.lookup_v4(0x80000001).is_none());
        assert!(cache.lookup_v4(0xffffffff).is_none());
    }

    #[test]
    fn test_unknown_language_falls_back_to_lowest_offset() {
        let dir = TempDir::new().expect("dir");
        let bytes = build_fixture("{\"zh-CN\":0}", "中国\t华东\t江苏\t南京", "x\t\t\t");
        let path = write_fixture(&dir, &bytes);
        let cache = RadixCache::new(&path, "en").expect("open");
        let hit = cache.lookup_v4(0x01020304).expect("hit");
        assert_eq!(hit.city, "南京");
    }

    #[test]
    fn test_open_rejects_malformed_files() {
        let dir = TempDir::new().expect("dir");

        let path = write_fixture(&dir, &[0, 0]);
        assert!(RadixCache::new(&path, "zh-CN").is_err());

        // Header length larger than the file
        let path = write_fixture(&dir, &[0, 0, 0, 200, b'{', b'}']);
        assert!(RadixCache::new(&path, "zh-CN").is_err());

        // Valid JSON but total_size inconsistent with the body
        let header = "{\"node_count\":1,\"total_size\":999,\"languages\":{\"zh-CN\":0},\"fields\":[\"country_name\"]}";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(header.len() as u32).to_be_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        let path = write_fixture(&dir, &bytes);
        assert!(matches!(
            RadixCache::new(&path, "zh-CN"),
            Err(LocalDbError::BadLayout(_))
        ));
    }

    #[tokio::test]
    async fn test_trait_lookup_rejects_non_ipv4() {
        let dir = TempDir::new().expect("dir");
        let bytes = build_fixture("{\"zh-CN\":0}", "中国\t华东\t江苏\t南京", "x\t\t\t");
        let path = write_fixture(&dir, &bytes);
        let cache = RadixCache::new(&path, "zh-CN").expect("open");
        assert!(cache.lookup("::1").await.is_none());
        assert!(cache.lookup("bogus").await.is_none());
        assert!(cache.lookup("1.2.3.4").await.is_some());
    }
}
