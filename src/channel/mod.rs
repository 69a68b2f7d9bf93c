//! Live update channel lifecycle management.

mod status;
mod worker;

pub use status::Status;

use std::{fmt, sync::Arc};

use serde_json::Value;
use snafu::prelude::*;
use tokio::sync::{watch, Mutex};

use crate::{
    config::{Config, Topic},
    dispatch::{Dispatcher, Hooks},
    error,
    registry::{Registry, Token},
    sse::{Connect, SseConnector},
    Result,
};
use worker::Worker;

struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    topic: Option<Topic>,
    handle: Option<WorkerHandle>,
}

/// Receive-only live update channel.
///
/// Owns at most one streaming connection to the configured hub, decodes
/// `{type, data}` envelopes, routes built-in kinds to the injected refresh
/// hooks and fans every message out to [`on`][Channel::on] subscribers.
/// Transport failures are retried with bounded exponential backoff; the
/// current connectivity state is observable through
/// [`status`][Channel::status].
pub struct Channel {
    config: Config,
    connector: Arc<dyn Connect>,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    status_tx: watch::Sender<Status>,
    status_rx: watch::Receiver<Status>,
    slot: Mutex<Slot>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Create a channel using the real SSE connector.
    pub fn new(config: Config, hooks: Hooks) -> Result<Self> {
        let connector = SseConnector::new().context(error::CreateConnectorFailed)?;

        Ok(Self::with_connector(config, hooks, Arc::new(connector)))
    }

    /// Create a channel with the hub url read from the environment.
    pub fn from_env(hooks: Hooks) -> Result<Self> {
        let config = Config::from_env().context(error::LoadConfigFailed)?;

        Self::new(config, hooks)
    }

    /// Create a channel with a custom transport.
    pub fn with_connector(config: Config, hooks: Hooks, connector: Arc<dyn Connect>) -> Self {
        let registry = Arc::new(Registry::new());
        let dispatcher = Arc::new(Dispatcher::new(hooks, Arc::clone(&registry)));
        let (status_tx, status_rx) = watch::channel(Status::Idle);

        Self {
            config,
            connector,
            registry,
            dispatcher,
            status_tx,
            status_rx,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Subscribe the channel to a topic and start receiving updates.
    ///
    /// A no-op when already connected to the same topic or when no hub url is
    /// configured. Connecting to a different topic tears the previous
    /// connection down first. Returns immediately after starting the worker,
    /// results arrive through status transitions and subscriber callbacks.
    pub async fn connect<S: AsRef<str> + ?Sized>(&self, topic: &S) -> Result<()> {
        let topic = Topic::new(topic.as_ref()).context(error::InvalidTopic)?;

        let mut slot = self.slot.lock().await;

        if let Some(handle) = slot.handle.as_ref() {
            if !handle.join.is_finished() {
                if slot.topic.as_ref() == Some(&topic) {
                    log::debug!("Already connected to topic {}, skip", topic);
                    return Ok(());
                }

                log::debug!("Topic changed, tear down previous connection first");
                Self::stop_locked(&mut slot).await;
            }
        }

        slot.topic = Some(topic.clone());
        self.start_locked(&mut slot, &topic);

        Ok(())
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// Safe to call multiple times and when no connection exists. After it
    /// returns no further message is dispatched.
    pub async fn disconnect(&self) {
        let mut slot = self.slot.lock().await;

        if slot.handle.is_some() {
            Self::stop_locked(&mut slot).await;
            let _ = self.status_tx.send(Status::Closed);
        }
    }

    /// Drop the current connection and rebuild it from scratch.
    ///
    /// Used for manual recovery, bypasses backoff: the fresh connection
    /// starts with a zeroed attempt counter. A no-op when the channel was
    /// never connected.
    pub async fn reconnect(&self) {
        let mut slot = self.slot.lock().await;

        Self::stop_locked(&mut slot).await;

        let topic = match slot.topic.clone() {
            Some(topic) => topic,
            None => {
                log::debug!("No topic to reconnect to, skip");
                return;
            }
        };

        self.start_locked(&mut slot, &topic);
    }

    fn start_locked(&self, slot: &mut Slot, topic: &Topic) {
        let url = match self.config.subscribe_url(topic) {
            Some(url) => url,
            None => {
                log::debug!("No hub url configured, live updates disabled");
                return;
            }
        };

        log::info!("Connecting live update channel for topic {}", topic);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            url,
            connector: Arc::clone(&self.connector),
            dispatcher: Arc::clone(&self.dispatcher),
            status: self.status_tx.clone(),
            shutdown: shutdown_rx,
        };

        slot.handle = Some(WorkerHandle {
            shutdown: shutdown_tx,
            join: tokio::spawn(worker.run()),
        });
    }

    async fn stop_locked(slot: &mut Slot) {
        if let Some(handle) = slot.handle.take() {
            let _ = handle.shutdown.send(true);

            if handle.join.await.is_err() {
                log::warn!("Channel worker ended abnormally");
            }
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> Status {
        *self.status_rx.borrow()
    }

    /// true while the transport is open
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// true while an automatic reconnect is pending
    pub fn is_reconnecting(&self) -> bool {
        self.status().is_reconnecting()
    }

    /// Watch status transitions.
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.status_rx.clone()
    }

    /// Register a callback for a message type.
    pub fn on<S, F>(&self, type_name: &S, callback: F) -> Token
    where
        S: AsRef<str> + ?Sized,
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.registry.on(type_name, callback)
    }

    /// Remove one registration, a no-op when it is already gone.
    pub fn off(&self, token: &Token) {
        self.registry.off(token)
    }

    /// Deliver a message to subscribers directly, without the transport.
    pub fn emit<S: AsRef<str> + ?Sized>(&self, type_name: &S, data: &Value) {
        self.registry.emit(type_name, data)
    }

    /// Shared subscriber registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
        time::Duration,
    };

    use futures_util::stream;
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::sse::{ConnectError, Frame, FrameStream};
    use super::worker::{RECONNECT_BASE_DELAY, RECONNECT_MAX_ATTEMPTS};

    enum Behavior {
        Fail,
        StayOpen,
        EndAfter(Vec<String>),
    }

    struct ScriptedConnector {
        opens: AtomicUsize,
        opened_at: StdMutex<Vec<tokio::time::Instant>>,
        script: StdMutex<VecDeque<Behavior>>,
    }

    impl ScriptedConnector {
        fn new(script: Vec<Behavior>) -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                opened_at: StdMutex::new(Vec::new()),
                script: StdMutex::new(script.into()),
            })
        }

        fn always_failing() -> Arc<Self> {
            Self::new(Vec::new())
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        fn gaps_ms(&self) -> Vec<u128> {
            self.opened_at
                .lock()
                .unwrap()
                .windows(2)
                .map(|pair| (pair[1] - pair[0]).as_millis())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Connect for ScriptedConnector {
        async fn open(&self, _url: &Url) -> std::result::Result<FrameStream, ConnectError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.opened_at.lock().unwrap().push(tokio::time::Instant::now());

            // empty script keeps failing
            let behavior = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Behavior::Fail);

            match behavior {
                Behavior::Fail => Err(ConnectError::HTTPStatusNotSuccess {
                    url: "test".to_string(),
                    status_code: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                }),
                Behavior::StayOpen => Ok(Box::pin(stream::pending())),
                Behavior::EndAfter(payloads) => Ok(Box::pin(stream::iter(
                    payloads
                        .into_iter()
                        .map(|data| Ok(Frame { event: None, data }))
                        .collect::<Vec<_>>(),
                ))),
            }
        }
    }

    fn test_config() -> Config {
        Config::new(Url::parse("https://hub.example.com/.well-known/mercure").unwrap())
    }

    fn test_channel(connector: Arc<ScriptedConnector>) -> Channel {
        Channel::with_connector(test_config(), Hooks::default(), connector)
    }

    async fn wait_status(channel: &Channel, wanted: Status) {
        let mut status = channel.watch_status();
        while *status.borrow() != wanted {
            status.changed().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let connector = ScriptedConnector::new(vec![Behavior::StayOpen]);
        let channel = test_channel(Arc::clone(&connector));

        channel.connect("user/42").await.unwrap();
        channel.connect("user/42").await.unwrap();

        wait_status(&channel, Status::Open).await;
        channel.connect("user/42").await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(connector.opens(), 1);
        assert!(channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_until_give_up() {
        let connector = ScriptedConnector::always_failing();
        let channel = test_channel(Arc::clone(&connector));

        let start = tokio::time::Instant::now();
        channel.connect("user/42").await.unwrap();

        wait_status(&channel, Status::GaveUp).await;

        // the initial attempt plus one per scheduled reconnect
        assert_eq!(connector.opens(), 1 + RECONNECT_MAX_ATTEMPTS as usize);
        assert_eq!(connector.gaps_ms(), vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(start.elapsed(), Duration::from_millis(31000));

        // no sixth reconnect is ever scheduled
        tokio::time::sleep(RECONNECT_BASE_DELAY * 64).await;
        assert_eq!(connector.opens(), 1 + RECONNECT_MAX_ATTEMPTS as usize);
        assert!(!channel.is_connected());
        assert!(!channel.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_backoff() {
        let connector = ScriptedConnector::new(vec![
            Behavior::Fail,
            Behavior::Fail,
            Behavior::EndAfter(Vec::new()),
            Behavior::Fail,
            Behavior::StayOpen,
        ]);
        let channel = test_channel(Arc::clone(&connector));

        channel.connect("user/42").await.unwrap();

        let mut status = channel.watch_status();
        loop {
            if *status.borrow() == Status::Open && connector.opens() == 5 {
                break;
            }
            status.changed().await.unwrap();
        }

        // delays return to the base value after the successful third open
        assert_eq!(connector.gaps_ms(), vec![1000, 2000, 1000, 2000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let connector = ScriptedConnector::always_failing();
        let channel = test_channel(Arc::clone(&connector));

        channel.connect("user/42").await.unwrap();
        wait_status(&channel, Status::Reconnecting).await;

        channel.disconnect().await;
        let opens_before = connector.opens();

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.opens(), opens_before);
        assert_eq!(channel.status(), Status::Closed);
        assert!(!channel.is_connected());
        assert!(!channel.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let connector = ScriptedConnector::new(vec![Behavior::StayOpen]);
        let channel = test_channel(Arc::clone(&connector));

        channel.disconnect().await;
        assert_eq!(channel.status(), Status::Idle);

        channel.connect("user/42").await.unwrap();
        wait_status(&channel, Status::Open).await;

        channel.disconnect().await;
        channel.disconnect().await;

        assert_eq!(channel.status(), Status::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_restarts_with_fresh_backoff() {
        let connector = ScriptedConnector::new(vec![Behavior::StayOpen, Behavior::StayOpen]);
        let channel = test_channel(Arc::clone(&connector));

        channel.connect("user/42").await.unwrap();
        wait_status(&channel, Status::Open).await;

        channel.reconnect().await;
        wait_status(&channel, Status::Open).await;

        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_recovers_from_give_up() {
        let connector = ScriptedConnector::always_failing();
        let channel = test_channel(Arc::clone(&connector));

        channel.connect("user/42").await.unwrap();
        wait_status(&channel, Status::GaveUp).await;

        connector
            .script
            .lock()
            .unwrap()
            .push_back(Behavior::StayOpen);

        channel.reconnect().await;
        wait_status(&channel, Status::Open).await;

        assert!(channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changing_topic_replaces_the_connection() {
        let connector = ScriptedConnector::new(vec![Behavior::StayOpen, Behavior::StayOpen]);
        let channel = test_channel(Arc::clone(&connector));

        channel.connect("user/42").await.unwrap();
        wait_status(&channel, Status::Open).await;

        channel.connect("user/43").await.unwrap();
        wait_status(&channel, Status::Open).await;

        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_config_makes_connect_inert() {
        let connector = ScriptedConnector::always_failing();
        let channel =
            Channel::with_connector(Config::disabled(), Hooks::default(), connector.clone());

        channel.connect("user/42").await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(connector.opens(), 0);
        assert_eq!(channel.status(), Status::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_rejects_empty_topic() {
        let channel = test_channel(ScriptedConnector::always_failing());

        let err = channel.connect("").await.unwrap_err();

        assert!(matches!(err, crate::Error::InvalidTopic { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_frames_reach_subscribers() {
        let connector = ScriptedConnector::new(vec![
            Behavior::EndAfter(vec![
                json!({ "type": "stream.finished", "data": { "id": 7 } }).to_string(),
                // undecodable frames must not break the stream
                "not json".to_string(),
            ]),
            Behavior::StayOpen,
        ]);
        let channel = test_channel(Arc::clone(&connector));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_in_callback = Arc::clone(&seen);
        channel.on("stream.finished", move |data| {
            seen_in_callback.lock().unwrap().push(data.clone());
        });

        channel.connect("user/42").await.unwrap();

        let mut status = channel.watch_status();
        loop {
            if *status.borrow() == Status::Open && connector.opens() == 2 {
                break;
            }
            status.changed().await.unwrap();
        }

        assert_eq!(*seen.lock().unwrap(), vec![json!({ "id": 7 })]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_builtin_refresh_hook_fires_from_the_stream() {
        let refreshed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&refreshed);
        let hooks = Hooks {
            user: Some(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..Hooks::default()
        };

        let connector = ScriptedConnector::new(vec![
            Behavior::EndAfter(vec![json!({ "type": "user.refresh" }).to_string()]),
            Behavior::StayOpen,
        ]);
        let channel = Channel::with_connector(test_config(), hooks, connector.clone());

        channel.connect("user/42").await.unwrap();

        let mut status = channel.watch_status();
        loop {
            if *status.borrow() == Status::Open && connector.opens() == 2 {
                break;
            }
            status.changed().await.unwrap();
        }

        assert_eq!(refreshed.load(Ordering::SeqCst), 1);
    }
}
