//! Screener Common - Shared configuration, logging and error types for the market screener.
//!
//! This crate provides:
//! - Configuration types and loading
//! - The configuration error type
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, ObservabilityConfig, ScannerConfig, SourceKind};
pub use error::{Error, Result};

