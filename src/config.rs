//! Hub configuration and topic types.

use std::{fmt::Display, str::FromStr};

use snafu::prelude::*;
use url::Url;

/// environment variable the hub url is read from
pub static HUB_URL_ENV: &str = "HUBLINK_HUB_URL";

/// Error when load hub configuration
#[derive(Debug, Snafu)]
#[snafu(
    visibility(pub(crate)),
    module(config_error_variant),
    context(suffix(false))
)]
pub enum ConfigError {
    /// the configured value is not a valid url
    #[snafu(display("{value} is an invalid hub url: {source}"))]
    InvalidHubURL {
        /// configured value
        value: String,
        /// source error
        source: url::ParseError,
    },
}

/// Error when construct a topic from string
#[derive(Debug, Snafu)]
#[snafu(
    display("topic must be a non-empty string"),
    visibility(pub(crate)),
    module(invalid_topic_variant),
    context(suffix(false))
)]
pub struct InvalidTopicError;

/// Per-principal channel identifier the client subscribes to.
///
/// Usually derived from the authenticated user's identifier by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Create a topic, rejecting the empty string.
    pub fn new<S: AsRef<str> + ?Sized>(value: &S) -> Result<Self, InvalidTopicError> {
        let value = value.as_ref();

        ensure!(!value.is_empty(), invalid_topic_variant::InvalidTopic);

        Ok(Self(value.to_string()))
    }

    /// topic as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Topic {
    type Err = InvalidTopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Live update channel configuration.
///
/// A config without a hub url makes the whole channel inert: `connect`
/// succeeds and does nothing.
#[derive(Debug, Clone, Default)]
pub struct Config {
    hub: Option<Url>,
}

impl Config {
    /// Create a config pointing at a hub.
    pub fn new(hub: Url) -> Self {
        Self { hub: Some(hub) }
    }

    /// Create a config with live updates disabled.
    pub fn disabled() -> Self {
        Self { hub: None }
    }

    /// Read the hub url from [`HUB_URL_ENV`]; an unset variable means disabled.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(HUB_URL_ENV) {
            Ok(value) => {
                let hub = value
                    .parse()
                    .with_context(|_| config_error_variant::InvalidHubURL {
                        value: value.clone(),
                    })?;

                Ok(Self { hub: Some(hub) })
            }
            Err(_) => Ok(Self::disabled()),
        }
    }

    /// true when a hub url is configured
    pub fn is_enabled(&self) -> bool {
        self.hub.is_some()
    }

    /// Build the subscribe url for a topic, None when disabled.
    pub fn subscribe_url(&self, topic: &Topic) -> Option<Url> {
        let mut url = self.hub.clone()?;

        url.query_pairs_mut().append_pair("topic", topic.as_str());

        Some(url)
    }
}
