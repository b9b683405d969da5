//! Short-window request dedup.
//!
//! A bloom-style bit vector of `m` bits per TTL bucket with `k` hash
//! positions per key. The bucket is `now / ttl`; when it rotates the bitmap
//! is cleared, which deliberately makes dedup approximate at the rollover
//! boundary. Positions are derived by hashing `[i] ++ key_bytes` for
//! `i = 0..k` with a fixed-seed 64-bit hash, modulo `m`.

use std::hash::{BuildHasher, Hasher};
use std::sync::Mutex;

use ahash::RandomState;
use chrono::Utc;
use log::debug;

// Fixed seeds keep positions stable for the lifetime of the process.
const SEEDS: (u64, u64, u64, u64) = (
    0x4cf5_ad43_2745_937f,
    0x2545_f491_4f6c_dd1d,
    0x9e37_79b9_7f4a_7c15,
    0xff51_afd7_ed55_8ccd,
);

struct Window {
    bucket: i64,
    bits: Vec<u64>,
}

/// Per-bucket dedup bit vector.
pub struct DedupWindow {
    window: Mutex<Window>,
    hasher: RandomState,
    bits_m: u32,
    hashes_k: u32,
    ttl_s: u64,
}

impl DedupWindow {
    /// Creates a window of `bits_m` bits probing `hashes_k` positions per
    /// key, rotating every `ttl_s` seconds.
    pub fn new(bits_m: u32, hashes_k: u32, ttl_s: u64) -> Self {
        let bits_m = bits_m.max(64);
        let words = (bits_m as usize).div_ceil(64);
        Self {
            window: Mutex::new(Window {
                bucket: 0,
                bits: vec![0; words],
            }),
            hasher: RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3),
            bits_m,
            hashes_k: hashes_k.max(1),
            ttl_s: ttl_s.max(1),
        }
    }

    /// Returns whether the key is first-seen inside the current bucket, and
    /// marks it seen.
    pub fn check_and_set(&self, key: &str) -> bool {
        let bucket = Utc::now().timestamp() / self.ttl_s as i64;
        self.check_and_set_at(bucket, key)
    }

    pub(crate) fn check_and_set_at(&self, bucket: i64, key: &str) -> bool {
        let positions = self.positions(key.as_bytes());
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if window.bucket != bucket {
            debug!("dedup_bucket_rotate from={} to={bucket}", window.bucket);
            window.bucket = bucket;
            window.bits.fill(0);
        }
        let mut seen = true;
        for &p in &positions {
            if window.bits[(p / 64) as usize] & (1u64 << (p % 64)) == 0 {
                seen = false;
            }
        }
        if seen {
            return false;
        }
        for &p in &positions {
            window.bits[(p / 64) as usize] |= 1u64 << (p % 64);
        }
        true
    }

    fn positions(&self, key: &[u8]) -> Vec<u32> {
        (0..self.hashes_k)
            .map(|i| {
                let mut h = self.hasher.build_hasher();
                h.write_u8(i as u8);
                h.write(key);
                (h.finish() % self.bits_m as u64) as u32
            })
            .collect()
    }
}
