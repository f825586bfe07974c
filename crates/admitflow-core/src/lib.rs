//! # Admitflow Core
//!
//! Shared foundation for the Admitflow admissions pipeline: configuration
//! loading and the common error type used across crates.

pub mod config;
pub mod error;

pub use config::AdmitflowConfig;
pub use error::{AdmitflowError, Result};
