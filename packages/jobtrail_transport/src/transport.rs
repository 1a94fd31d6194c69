//! Transport manager: owns the push connection and its recovery policy.
//!
//! A single tokio task ([`TransportManager`]) owns the connection, both
//! timers and every flag. [`TransportHandle`] is the clonable front door.
//! Commands are acknowledged only after the task has applied them, so a
//! caller that awaits `disconnect()` knows no stale reconnect can fire.

use std::fmt;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::backoff::{JitterSource, ReconnectPolicy};
use crate::connector::{Connector, PayloadStream};
use crate::endpoint::{DEFAULT_STREAM_PATH, StreamEndpoint};
use crate::error::TransportError;
use crate::stats::{StatsSnapshot, StreamStats};
use crate::wire::{self, ChatEvent, DataChanged, MAX_PAYLOAD_BYTES, Route};

const COMMAND_BUFFER: usize = 32;

/// What the UI shows for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Whether the user is currently looking at the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Connection notices for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Fired once per drop of a live or opening connection.
    Disconnected,
    /// Fired when a connection opens after a drop or an idle close.
    Reconnected,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Same-origin path of the stream.
    pub endpoint: String,
    pub policy: ReconnectPolicy,
    /// How long the view may stay hidden before the connection is closed.
    pub inactivity_timeout: Duration,
    pub max_payload_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_STREAM_PATH.to_string(),
            policy: ReconnectPolicy::default(),
            inactivity_timeout: Duration::from_secs(300),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }
}

/// Where validated events go. Any slot may be empty.
#[derive(Debug, Clone, Default)]
pub struct TransportHandlers {
    pub chat: Option<mpsc::Sender<ChatEvent>>,
    pub data_changed: Option<mpsc::Sender<DataChanged>>,
    pub lifecycle: Option<mpsc::Sender<LifecycleEvent>>,
}

/// Internal state, exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportSnapshot {
    pub status: ConnectionStatus,
    pub visibility: Visibility,
    pub reconnect_attempt: u32,
    pub is_reconnecting: bool,
    pub closed_by_inactivity: bool,
    pub reconnect_pending: bool,
    pub inactivity_pending: bool,
    pub destroyed: bool,
}

enum TransportCommand {
    Connect {
        respond_to: oneshot::Sender<()>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
    Destroy {
        respond_to: oneshot::Sender<()>,
    },
    SetVisibility {
        visibility: Visibility,
        respond_to: oneshot::Sender<()>,
    },
    Snapshot {
        respond_to: oneshot::Sender<TransportSnapshot>,
    },
}

type ChatSlot = Option<mpsc::Sender<ChatEvent>>;

/// Handle to the transport task.
///
/// Lifecycle calls on a destroyed transport are silent no-ops.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    sender: mpsc::Sender<TransportCommand>,
    status: watch::Receiver<ConnectionStatus>,
    chat_slot: Arc<watch::Sender<ChatSlot>>,
    stats: Arc<StreamStats>,
    endpoint: StreamEndpoint,
}

impl TransportHandle {
    /// Open the connection, replacing any live one.
    pub async fn connect(&self) {
        self.fire(|respond_to| TransportCommand::Connect { respond_to })
            .await;
    }

    /// Close the connection and cancel every pending timer. Emits no notices.
    pub async fn disconnect(&self) {
        self.fire(|respond_to| TransportCommand::Disconnect { respond_to })
            .await;
    }

    /// Permanently shut the transport down. Idempotent.
    pub async fn destroy(&self) {
        self.fire(|respond_to| TransportCommand::Destroy { respond_to })
            .await;
    }

    pub async fn set_visibility(&self, visibility: Visibility) {
        self.fire(|respond_to| TransportCommand::SetVisibility {
            visibility,
            respond_to,
        })
        .await;
    }

    pub async fn snapshot(&self) -> Result<TransportSnapshot, TransportError> {
        self.request(|respond_to| TransportCommand::Snapshot { respond_to })
            .await
    }

    /// Replace the chat handler. `None` detaches the current one.
    ///
    /// Takes effect for the next dispatched event; does not round-trip
    /// through the task, so it is safe to call from inside a handler.
    pub fn set_chat_handler(&self, handler: Option<mpsc::Sender<ChatEvent>>) {
        self.chat_slot.send_replace(handler);
    }

    pub fn current_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch status transitions.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    async fn fire(&self, build: impl FnOnce(oneshot::Sender<()>) -> TransportCommand) {
        if self.request(build).await.is_err() {
            debug!("transport already shut down, ignoring command");
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> TransportCommand,
    ) -> Result<T, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)
    }
}

/// At most one of these exists at a time.
enum Link {
    Opening(BoxFuture<'static, Result<PayloadStream, TransportError>>),
    Open(PayloadStream),
}

enum LinkSignal {
    Opened(PayloadStream),
    Payload(String),
    Failed(TransportError),
}

enum Wake {
    Command(Option<TransportCommand>),
    Delivered,
    Link(LinkSignal),
    ReconnectDue,
    InactivityDue,
}

/// The task behind a [`TransportHandle`].
pub struct TransportManager<C, J> {
    endpoint: StreamEndpoint,
    policy: ReconnectPolicy,
    inactivity_timeout: Duration,
    max_payload_bytes: usize,
    connector: C,
    jitter: J,
    commands: mpsc::Receiver<TransportCommand>,
    status: watch::Sender<ConnectionStatus>,
    chat_slot: watch::Receiver<ChatSlot>,
    data_changed: Option<mpsc::Sender<DataChanged>>,
    lifecycle: Option<mpsc::Sender<LifecycleEvent>>,
    stats: Arc<StreamStats>,
    link: Option<Link>,
    /// An event waiting on a full handler. Reading from the stream pauses
    /// until it lands.
    delivery: Option<BoxFuture<'static, ()>>,
    visibility: Visibility,
    reconnect_attempt: u32,
    reconnect_at: Option<Instant>,
    inactivity_at: Option<Instant>,
    is_reconnecting: bool,
    closed_by_inactivity: bool,
    destroyed: bool,
}

impl<C: Connector, J: JitterSource> TransportManager<C, J> {
    /// Validate the endpoint and start the task. Nothing is opened until
    /// [`TransportHandle::connect`].
    pub fn spawn(
        config: TransportConfig,
        handlers: TransportHandlers,
        connector: C,
        jitter: J,
    ) -> Result<TransportHandle, TransportError> {
        let endpoint = StreamEndpoint::parse(&config.endpoint)?;

        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (slot_tx, slot_rx) = watch::channel(handlers.chat);
        let stats = Arc::new(StreamStats::new());

        let manager = Self {
            endpoint: endpoint.clone(),
            policy: config.policy,
            inactivity_timeout: config.inactivity_timeout,
            max_payload_bytes: config.max_payload_bytes,
            connector,
            jitter,
            commands,
            status: status_tx,
            chat_slot: slot_rx,
            data_changed: handlers.data_changed,
            lifecycle: handlers.lifecycle,
            stats: Arc::clone(&stats),
            link: None,
            delivery: None,
            visibility: Visibility::Visible,
            reconnect_attempt: 0,
            reconnect_at: None,
            inactivity_at: None,
            is_reconnecting: false,
            closed_by_inactivity: false,
            destroyed: false,
        };
        tokio::spawn(manager.run());

        Ok(TransportHandle {
            sender,
            status: status_rx,
            chat_slot: Arc::new(slot_tx),
            stats,
            endpoint,
        })
    }

    async fn run(mut self) {
        debug!("Transport task for '{}' started", self.endpoint);

        loop {
            let link_ready =
                self.delivery.is_none() || matches!(self.link, Some(Link::Opening(_)));
            let wake = tokio::select! {
                biased;
                cmd = self.commands.recv() => Wake::Command(cmd),
                _ = drive(&mut self.delivery) => Wake::Delivered,
                signal = next_signal(&mut self.link), if link_ready => Wake::Link(signal),
                _ = wait_until(self.reconnect_at) => Wake::ReconnectDue,
                _ = wait_until(self.inactivity_at) => Wake::InactivityDue,
            };

            match wake {
                Wake::Command(Some(cmd)) => self.handle_command(cmd),
                // Every handle is gone; nobody can observe us any more.
                Wake::Command(None) => self.destroy(),
                Wake::Delivered => self.delivery = None,
                Wake::Link(LinkSignal::Opened(stream)) => self.on_open(stream),
                Wake::Link(LinkSignal::Payload(raw)) => self.on_payload(raw),
                Wake::Link(LinkSignal::Failed(err)) => self.on_failure(err),
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    self.connect();
                }
                Wake::InactivityDue => self.on_inactivity(),
            }

            if self.destroyed {
                break;
            }
        }

        debug!("Transport task for '{}' stopped", self.endpoint);
    }

    fn handle_command(&mut self, cmd: TransportCommand) {
        match cmd {
            TransportCommand::Connect { respond_to } => {
                self.connect();
                let _ = respond_to.send(());
            }
            TransportCommand::Disconnect { respond_to } => {
                self.disconnect();
                let _ = respond_to.send(());
            }
            TransportCommand::Destroy { respond_to } => {
                self.destroy();
                let _ = respond_to.send(());
            }
            TransportCommand::SetVisibility {
                visibility,
                respond_to,
            } => {
                self.set_visibility(visibility);
                let _ = respond_to.send(());
            }
            TransportCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn connect(&mut self) {
        if self.destroyed {
            return;
        }
        self.reconnect_at = None;
        if self.link.take().is_some() {
            debug!("Replacing existing connection to {}", self.endpoint);
        }
        debug!(
            attempt = self.reconnect_attempt,
            "Opening stream {}", self.endpoint
        );
        self.link = Some(Link::Opening(self.connector.open(&self.endpoint)));
    }

    fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.inactivity_at = None;
        if self.link.take().is_some() {
            info!("Stream {} closed by caller", self.endpoint);
        }
        self.is_reconnecting = false;
        self.closed_by_inactivity = false;
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.disconnect();
        self.destroyed = true;
    }

    fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
        match visibility {
            Visibility::Hidden => {
                if self.current_status() == ConnectionStatus::Connected
                    && self.inactivity_at.is_none()
                {
                    self.arm_inactivity();
                }
            }
            Visibility::Visible => {
                self.inactivity_at = None;
                if self.closed_by_inactivity && !self.destroyed {
                    info!("View visible again, resuming stream");
                    self.closed_by_inactivity = false;
                    self.is_reconnecting = true;
                    self.connect();
                }
            }
        }
    }

    fn arm_inactivity(&mut self) {
        self.inactivity_at = Some(Instant::now() + self.inactivity_timeout);
    }

    fn on_open(&mut self, stream: PayloadStream) {
        self.link = Some(Link::Open(stream));
        self.stats.record_open();
        self.reconnect_attempt = 0;
        self.closed_by_inactivity = false;
        self.set_status(ConnectionStatus::Connected);

        if self.visibility == Visibility::Hidden && self.inactivity_at.is_none() {
            self.arm_inactivity();
        }
        if self.is_reconnecting {
            self.is_reconnecting = false;
            self.emit(LifecycleEvent::Reconnected);
        }
    }

    fn on_failure(&mut self, err: TransportError) {
        self.link = None;
        self.inactivity_at = None;

        if !err.is_transient() {
            warn!(
                code = err.error_code(),
                "Stream {} failed for good: {}", self.endpoint, err
            );
            self.reconnect_at = None;
            self.is_reconnecting = false;
            self.set_status(ConnectionStatus::Disconnected);
            self.emit(LifecycleEvent::Disconnected);
            return;
        }

        warn!(
            attempt = self.reconnect_attempt,
            "Stream {} lost: {}", self.endpoint, err
        );
        self.is_reconnecting = true;
        self.set_status(ConnectionStatus::Reconnecting);
        self.emit(LifecycleEvent::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let failures = self.reconnect_attempt.saturating_add(1);
        if failures >= self.policy.max_attempts {
            warn!(
                failures,
                "Giving up on {} until connect is called again", self.endpoint
            );
            self.reconnect_at = None;
            self.set_status(ConnectionStatus::Disconnected);
            return;
        }

        let delay = self
            .policy
            .jittered_delay(self.reconnect_attempt, self.jitter.sample());
        self.reconnect_attempt = failures;
        self.reconnect_at = Some(Instant::now() + delay);
        self.stats.record_reconnect_scheduled();
        debug!(
            attempt = self.reconnect_attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    fn on_inactivity(&mut self) {
        self.inactivity_at = None;
        if self.current_status() != ConnectionStatus::Connected
            || self.visibility == Visibility::Visible
        {
            return;
        }
        info!(
            "Closing {} after {}s hidden",
            self.endpoint,
            self.inactivity_timeout.as_secs()
        );
        self.link = None;
        self.closed_by_inactivity = true;
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn on_payload(&mut self, raw: String) {
        self.stats.record_payload();
        let event = match wire::parse_payload(&raw, self.max_payload_bytes) {
            Ok(event) => event,
            Err(reason) => {
                self.stats.record_drop(reason);
                debug!(?reason, bytes = raw.len(), "Dropping inbound payload");
                return;
            }
        };
        self.stats.record_dispatch();

        match event.into_route() {
            Route::Chat(event) => {
                let handler = self.chat_slot.borrow().clone();
                if let Some(tx) = handler {
                    self.deliver(tx, event, "chat");
                }
            }
            Route::DataChanged(notice) => {
                if let Some(tx) = self.data_changed.clone() {
                    self.deliver(tx, notice, "data_changed");
                }
            }
            Route::Keepalive => {}
        }
    }

    /// Hand an event to its handler without blocking commands. A full
    /// handler parks the event in `delivery`, which the run loop drives.
    fn deliver<T: Send + 'static>(&mut self, tx: mpsc::Sender<T>, item: T, handler: &'static str) {
        match tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => {
                debug!(handler, "Handler went away, event dropped");
            }
            Err(TrySendError::Full(item)) => {
                debug!(handler, "Handler is full, pausing the stream");
                self.delivery = Some(Box::pin(async move {
                    if tx.send(item).await.is_err() {
                        debug!(handler, "Handler went away, event dropped");
                    }
                }));
            }
        }
    }

    /// Lifecycle notices are advisory; a lagging observer loses them.
    fn emit(&self, event: LifecycleEvent) {
        if let Some(tx) = &self.lifecycle {
            if let Err(TrySendError::Full(event)) = tx.try_send(event) {
                self.stats.record_notice_dropped();
                debug!(?event, "Lifecycle handler is full, notice dropped");
            }
        }
    }

    fn current_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            info!("Stream {} is {}", self.endpoint, status);
        }
    }

    fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            status: self.current_status(),
            visibility: self.visibility,
            reconnect_attempt: self.reconnect_attempt,
            is_reconnecting: self.is_reconnecting,
            closed_by_inactivity: self.closed_by_inactivity,
            reconnect_pending: self.reconnect_at.is_some(),
            inactivity_pending: self.inactivity_at.is_some(),
            destroyed: self.destroyed,
        }
    }
}

async fn next_signal(link: &mut Option<Link>) -> LinkSignal {
    match link {
        Some(Link::Opening(open)) => match open.await {
            Ok(stream) => LinkSignal::Opened(stream),
            Err(err) => LinkSignal::Failed(err),
        },
        Some(Link::Open(stream)) => match stream.next().await {
            Some(Ok(payload)) => LinkSignal::Payload(payload),
            Some(Err(err)) => LinkSignal::Failed(err),
            None => LinkSignal::Failed(TransportError::Stream(
                "server closed the stream".to_string(),
            )),
        },
        None => pending().await,
    }
}

async fn drive(delivery: &mut Option<BoxFuture<'static, ()>>) {
    match delivery {
        Some(pending_send) => pending_send.await,
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
