//! Serving context shared by every listener

use crate::cache::CacheQueue;
use crate::route::RouteTable;

/// Smallest backend fetch unit
pub const MIN_BLOCK_SIZE: u64 = 1 << 20;
/// Largest backend fetch unit
pub const MAX_BLOCK_SIZE: u64 = 16 << 20;
/// Backend fetch unit used when none is configured
pub const DEFAULT_BLOCK_SIZE: u64 = 4 << 20;

/// Immutable snapshot of everything a session needs.
///
/// A reload publishes a new snapshot; sessions keep the one they started
/// with.
#[derive(Debug, Clone)]
pub struct Context {
    pub routes: RouteTable,
    pub cache: CacheQueue,
    /// Bytes fetched from a backend per refill while transferring
    pub block_size: u64,
}

impl Context {
    pub fn new(routes: RouteTable, cache: CacheQueue, block_size: u64) -> Self {
        Self {
            routes,
            cache,
            block_size: block_size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE),
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Client;

    use super::*;

    #[test]
    fn test_block_size_is_clamped() {
        let routes = RouteTable::new(&[], Client::new()).unwrap();
        let (cache, _rx) = CacheQueue::channel(1);

        let ctx = Context::new(routes.clone(), cache.clone(), 1);
        assert_eq!(ctx.block_size, MIN_BLOCK_SIZE);
        let ctx = Context::new(routes.clone(), cache.clone(), u64::MAX);
        assert_eq!(ctx.block_size, MAX_BLOCK_SIZE);
        let ctx = Context::new(routes, cache, DEFAULT_BLOCK_SIZE);
        assert_eq!(ctx.block_size, DEFAULT_BLOCK_SIZE);
    }
}
