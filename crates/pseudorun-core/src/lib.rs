//! `pseudorun` Core Library
//!
//! Shared functionality for `pseudorun` components:
//! - Line framing and classification of compiler stdout
//! - Client/server wire protocol for the WebSocket gateway
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod ndjson;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
