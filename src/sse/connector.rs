use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::Stream;
use snafu::prelude::*;
use url::Url;

use super::parser::{Frame, FrameParser};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Error when open a subscribe connection
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ConnectError {
    /// create the underlying http client failed
    #[snafu(display("create http client failed: {source}"))]
    CreateClientFailed {
        /// source error
        source: reqwest::Error,
    },

    /// send the subscribe request failed
    #[snafu(display("subscribe {url} failed: {source}"))]
    RequestFailed {
        /// subscribe url
        url: String,
        /// source error
        source: reqwest::Error,
    },

    /// http response of the subscribe request is not successful
    #[snafu(display("subscribe {url} got http status code {status_code}"))]
    HTTPStatusNotSuccess {
        /// subscribe url
        url: String,
        /// received http status code
        status_code: reqwest::StatusCode,
    },
}

/// Error when an established frame stream breaks
#[derive(Debug, Snafu)]
#[snafu(display("event stream broken: {source}"), context(false))]
pub struct StreamError {
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl StreamError {
    /// Wrap a transport error for delivery through a frame stream.
    pub fn new<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(source),
        }
    }
}

/// Stream of parsed server-sent-event frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, StreamError>> + Send>>;

/// Transport seam of the live update channel.
///
/// The channel opens exactly one connection at a time through this trait;
/// tests inject a fake implementation instead of a real hub.
#[async_trait::async_trait]
pub trait Connect: Send + Sync + 'static {
    /// Open one streaming connection for a subscribe url, resolving once the
    /// stream is established.
    async fn open(&self, url: &Url) -> Result<FrameStream, ConnectError>;
}

/// SSE connector over a reqwest streaming GET request.
#[derive(Debug, Clone)]
pub struct SseConnector {
    client: reqwest::Client,
}

impl SseConnector {
    /// Create a connector with its own http client.
    pub fn new() -> Result<Self, ConnectError> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context(error::CreateClientFailed)?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Connect for SseConnector {
    async fn open(&self, url: &Url) -> Result<FrameStream, ConnectError> {
        log::debug!("Subscribing {}", url);

        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .with_context(|_| error::RequestFailed {
                url: url.to_string(),
            })?;

        ensure!(
            response.status().is_success(),
            error::HTTPStatusNotSuccess {
                url: url.to_string(),
                status_code: response.status(),
            }
        );

        log::debug!("Subscription stream established");

        Ok(Box::pin(SseFrameStream {
            bytes: Box::pin(response.bytes_stream()),
            parser: FrameParser::new(),
            pending: VecDeque::new(),
        }))
    }
}

struct SseFrameStream {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    parser: FrameParser,
    pending: VecDeque<Frame>,
}

impl Stream for SseFrameStream {
    type Item = Result<Frame, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }

            match this.bytes.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(this.parser.feed(&chunk));
                }
                Poll::Ready(Some(Err(err))) => {
                    return Poll::Ready(Some(Err(StreamError::new(err))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
