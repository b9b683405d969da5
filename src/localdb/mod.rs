//! Local database stack: read-only index readers and their composition.
//!
//! This module provides:
//! - The exact-index file builder and reader (`exact`)
//! - The radix-tree reader (`radix`)
//! - The XDB reader (`xdb`)
//! - Ordered chain composition (`chain`) and the lock-free current-chain
//!   pointer (`dynamic`)
//!
//! Every reader is read-only and safe for concurrent lookups; replacement
//! happens wholesale through the dynamic cache.

pub mod chain;
pub mod dynamic;
pub mod exact;
pub mod radix;
pub mod xdb;

pub use chain::ChainCache;
pub use dynamic::DynamicCache;
pub use exact::ExactFile;
pub use radix::RadixCache;
pub use xdb::XdbCache;

use async_trait::async_trait;

use crate::models::Location;

/// Uniform contract of a lookup-capable local source.
///
/// A miss (including any internal read failure) is `None`; the pipeline
/// advances to the next member.
#[async_trait]
pub trait LocalLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Option<Location>;
}
