//! Reelforge - media acquisition and byte-range streaming
//!
//! This library crate exposes the core functionality for integration testing.

pub mod cache;
pub mod config;
pub mod server;
pub mod services;
pub mod streaming;
