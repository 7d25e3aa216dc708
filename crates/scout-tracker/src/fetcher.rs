//! Position state fetching abstraction.

use scout_core::{PositionSnapshot, TraderId};
use scout_info::{InfoClient, InfoError};
use std::future::Future;
use std::pin::Pin;

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Source of per-trader position snapshots.
///
/// Implemented by [`InfoClient`] in production and by fakes in tests.
pub trait StateFetcher: Send + Sync {
    fn fetch<'a>(&'a self, trader: &'a TraderId)
        -> BoxFuture<'a, Result<PositionSnapshot, InfoError>>;
}

impl StateFetcher for InfoClient {
    fn fetch<'a>(
        &'a self,
        trader: &'a TraderId,
    ) -> BoxFuture<'a, Result<PositionSnapshot, InfoError>> {
        Box::pin(self.fetch_snapshot(trader))
    }
}
