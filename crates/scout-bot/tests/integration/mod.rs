//! Shared fixtures for scout-bot integration tests.

pub mod common;
