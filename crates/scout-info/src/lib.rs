//! Info endpoint client for trader position state.
//!
//! Fetches `clearinghouseState` for one trader and validates the loose JSON
//! into a typed [`scout_core::PositionSnapshot`].

pub mod clearinghouse;
pub mod client;
pub mod error;

pub use clearinghouse::{
    AssetPositionData, AssetPositionEntry, ClearinghouseStateResponse, MarginSummary,
};
pub use client::{InfoClient, DEFAULT_INFO_URL};
pub use error::{InfoError, InfoResult};
