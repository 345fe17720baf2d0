//! Outbound HTTP.
//!
//! # Data Flow
//! ```text
//! HttpJsonPoller
//!     → client.rs (retry loop → deadline → GET → JSON decode)
//!     → serde_json::Value
//! ```

pub mod client;

pub use client::JsonClient;
