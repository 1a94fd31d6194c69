//! The seam between the transport state machine and the network.
//!
//! A [`Connector`] opens the push channel for an endpoint. The returned
//! stream yields raw payload strings; an `Err` item or the end of the stream
//! both mean the connection dropped.

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::endpoint::StreamEndpoint;
use crate::error::TransportError;

/// Raw payloads from one live connection.
pub type PayloadStream = BoxStream<'static, Result<String, TransportError>>;

pub trait Connector: Send + Sync + 'static {
    /// Open the stream. Resolving `Ok` means the connection is established.
    fn open(
        &self,
        endpoint: &StreamEndpoint,
    ) -> BoxFuture<'static, Result<PayloadStream, TransportError>>;
}
