//! Lock-free publication of the current chain.
//!
//! The serving path loads the current chain with a single atomic load per
//! lookup; a rebuild publishes its replacement with a single atomic store.
//! Readers always observe either the previous complete chain or the new
//! complete chain.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::chain::ChainCache;
use crate::models::Location;

/// Single-slot holder of the currently serving [`ChainCache`].
#[derive(Default)]
pub struct DynamicCache {
    current: ArcSwapOption<ChainCache>,
}

impl DynamicCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new chain; takes effect for the next lookup.
    pub fn install(&self, chain: Arc<ChainCache>) {
        self.current.store(Some(chain));
    }

    /// Returns the currently published chain, if any.
    pub fn current(&self) -> Option<Arc<ChainCache>> {
        self.current.load_full()
    }

    /// Looks up against the current chain; an unset cache is a miss.
    pub async fn lookup(&self, ip: &str) -> Option<Location> {
        let chain = self.current.load_full()?;
        chain.lookup(ip).await
    }
}
