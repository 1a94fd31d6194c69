//! Jobtrail Transport - server-push stream for the assistant
//!
//! This crate owns the long-lived connection to the assistant's event
//! stream. It knows nothing about conversations: it validates each inbound
//! payload, routes chat events and cache-invalidation notices to their
//! handlers, and keeps the connection alive across drops with exponential
//! backoff. A connection left idle in a hidden view is closed after five
//! minutes and reopened when the view comes back.
//!
//! # Example
//!
//! ```no_run
//! use jobtrail_transport::{
//!     Connector, RandomJitter, TransportConfig, TransportHandlers, TransportManager, Visibility,
//! };
//! use tokio::sync::mpsc;
//!
//! # async fn run(connector: impl Connector) -> Result<(), jobtrail_transport::TransportError> {
//! let (chat_tx, mut chat_rx) = mpsc::channel(256);
//! let handlers = TransportHandlers {
//!     chat: Some(chat_tx),
//!     ..Default::default()
//! };
//!
//! let transport =
//!     TransportManager::spawn(TransportConfig::default(), handlers, connector, RandomJitter)?;
//! transport.connect().await;
//!
//! while let Some(event) = chat_rx.recv().await {
//!     println!("{event:?}");
//! }
//!
//! transport.set_visibility(Visibility::Hidden).await;
//! transport.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod stats;
pub mod transport;
pub mod wire;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backoff::{FixedJitter, JitterSource, RandomJitter, ReconnectPolicy};
pub use connector::{Connector, PayloadStream};
pub use endpoint::{DEFAULT_STREAM_PATH, StreamEndpoint};
pub use error::TransportError;
pub use stats::{StatsSnapshot, StreamStats};
pub use transport::{
    ConnectionStatus, LifecycleEvent, TransportConfig, TransportHandle, TransportHandlers,
    TransportManager, TransportSnapshot, Visibility,
};
pub use wire::{
    ChatEvent, DataChanged, DropReason, MAX_PAYLOAD_BYTES, MAX_TOOL_NAME_LEN, WireEvent,
    parse_payload,
};
