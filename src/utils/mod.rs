// src/utils/mod.rs
//! Common utilities: configuration and error types

pub mod config;
pub mod errors;

pub use config::TapConfig;
pub use errors::{Result, TapError};
