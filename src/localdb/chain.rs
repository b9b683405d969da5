//! Ordered composition of lookup-capable readers.
//!
//! Members are probed in construction order and the first hit wins. The
//! canonical serving order is exact-file, radix tree, XDB.

use std::sync::Arc;

use super::LocalLookup;
use crate::models::Location;

/// An immutable, ordered list of local readers.
pub struct ChainCache {
    members: Vec<Arc<dyn LocalLookup>>,
}

impl ChainCache {
    /// Builds a chain from optional members; absent members are skipped.
    pub fn new(members: Vec<Option<Arc<dyn LocalLookup>>>) -> Self {
        Self {
            members: members.into_iter().flatten().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Probes each member in order, returning the first hit.
    pub async fn lookup(&self, ip: &str) -> Option<Location> {
        for member in &self.members {
            if let Some(loc) = member.lookup(ip).await {
                return Some(loc);
            }
        }
        None
    }
}
