//! crate error types

use snafu::prelude::*;

use crate::config::{ConfigError, InvalidTopicError};
use crate::sse::ConnectError;

/// live update channel error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// the subscribe topic is invalid
    #[snafu(display("invalid subscribe topic: {source}"))]
    InvalidTopic {
        /// source error
        source: InvalidTopicError,
    },

    /// the configured hub url is invalid
    #[snafu(display("load hub configuration failed: {source}"))]
    LoadConfigFailed {
        /// source error
        source: ConfigError,
    },

    /// create the SSE connector failed
    #[snafu(display("create sse connector failed: {source}"))]
    CreateConnectorFailed {
        /// source error
        source: ConnectError,
    },
}
