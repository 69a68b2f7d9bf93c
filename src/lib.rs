//! # Hublink
//!
//! Receive-only live update channel client for Mercure-style SSE hubs.
//!
//! A [`Channel`] subscribes one topic on the configured hub, decodes pushed
//! `{type, data}` envelopes, routes built-in kinds to injected refresh hooks
//! and fans every message out to registered subscribers. Transport failures
//! are retried with bounded exponential backoff.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod envelope;
pub mod registry;
pub mod sse;

mod dispatch;
mod error;

pub use channel::{Channel, Status};
pub use config::{Config, Topic};
pub use dispatch::{Hooks, RefreshHook};
pub use error::Error;

/// crate result type
pub type Result<T> = std::result::Result<T, Error>;
