//! hl-scout: discovers active perpetual traders from the public trades
//! stream, tracks their positions under a request-rate budget, turns
//! position changes into events and ranks traders.

pub mod app;
pub mod config;
pub mod error;

pub use app::{compact_periodically, supervise_discovery, Application};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
