//! Inbound rate limiting.
//!
//! A token bucket keyed on wall-clock seconds: the bucket refills to
//! capacity when the second rolls over, and an exhausted bucket rejects the
//! request before it enters the pipeline. No queueing.

use std::sync::Mutex;

use chrono::Utc;

struct BucketState {
    tokens: u32,
    last_sec: i64,
}

/// Per-second token bucket.
pub struct TokenBucket {
    capacity: u32,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(qps: u32) -> Self {
        Self {
            capacity: qps,
            state: Mutex::new(BucketState {
                tokens: qps,
                last_sec: Utc::now().timestamp(),
            }),
        }
    }

    /// Consumes one token if available.
    pub fn allow(&self) -> bool {
        self.allow_at(Utc::now().timestamp())
    }

    fn allow_at(&self, now_sec: i64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.last_sec != now_sec {
            state.last_sec = now_sec;
            state.tokens = self.capacity;
        }
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }
}
