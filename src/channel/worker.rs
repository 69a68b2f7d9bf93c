use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::sync::watch;
use url::Url;

use super::Status;
use crate::{
    dispatch::Dispatcher,
    sse::{Connect, FrameStream},
};

/// reconnect attempt ceiling before giving up
pub(crate) const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// first reconnect delay, doubled on every further attempt
pub(crate) const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

// Background task owning the single live connection for one topic. Opens the
// transport, pumps frames into the dispatcher, and schedules bounded
// exponential-backoff reconnects. The shutdown signal wins every select arm,
// so after `Channel::disconnect` awaits this task no further event is
// delivered.
pub(crate) struct Worker {
    pub url: Url,
    pub connector: Arc<dyn Connect>,
    pub dispatcher: Arc<Dispatcher>,
    pub status: watch::Sender<Status>,
    pub shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub async fn run(mut self) {
        log::debug!("Channel worker start");

        let mut attempts: u32 = 0;

        loop {
            self.publish(Status::Connecting);

            let opened = tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    self.publish(Status::Closed);
                    return;
                }

                result = self.connector.open(&self.url) => result,
            };

            match opened {
                Ok(frames) => {
                    attempts = 0;
                    self.publish(Status::Open);

                    if !self.pump(frames).await {
                        self.publish(Status::Closed);
                        return;
                    }
                }
                Err(err) => {
                    log::warn!("Open subscription failed: {}", err);
                }
            }

            if attempts >= RECONNECT_MAX_ATTEMPTS {
                log::warn!("Reached reconnect attempt limit, give up");
                self.publish(Status::GaveUp);
                return;
            }

            let delay = RECONNECT_BASE_DELAY * 2u32.pow(attempts);
            attempts += 1;

            log::info!("Reconnect attempt {} in {:?}", attempts, delay);
            self.publish(Status::Reconnecting);

            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    self.publish(Status::Closed);
                    return;
                }

                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// true if the stream broke and a reconnect should be scheduled,
    /// false on shutdown
    async fn pump(&mut self, mut frames: FrameStream) -> bool {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => return false,

                item = frames.next() => match item {
                    Some(Ok(frame)) => {
                        log::trace!("Received frame ({} bytes)", frame.data.len());
                        self.dispatcher.dispatch(&frame.data);
                    }
                    Some(Err(err)) => {
                        log::warn!("Event stream broken: {}", err);
                        return true;
                    }
                    None => {
                        log::warn!("Hub closed the event stream");
                        return true;
                    }
                },
            }
        }
    }

    fn publish(&self, status: Status) {
        log::debug!("Move to {:?} state", status);

        // send only fails when the owning channel is gone
        let _ = self.status.send(status);
    }
}
