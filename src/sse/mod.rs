//! Server-sent-events transport.

mod connector;
mod parser;

pub use connector::{Connect, ConnectError, FrameStream, SseConnector, StreamError};
pub use parser::{Frame, FrameParser};
