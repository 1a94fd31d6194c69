//! Scripted [`Connector`] for driving the transport without a network.
//!
//! Each call to `open` consumes the next plan: either an immediate connect
//! failure or a live stream fed through a [`StreamFeed`]. Dropping every
//! clone of a feed ends its stream, which the transport sees as a dropped
//! connection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::{StreamExt, stream};
use tokio::sync::mpsc;

use crate::connector::{Connector, PayloadStream};
use crate::endpoint::StreamEndpoint;
use crate::error::TransportError;

type Feed = mpsc::UnboundedSender<Result<String, TransportError>>;

enum Plan {
    Fail(TransportError),
    Open(mpsc::UnboundedReceiver<Result<String, TransportError>>),
}

#[derive(Default)]
struct Script {
    plans: VecDeque<Plan>,
    opens: usize,
    last_endpoint: Option<StreamEndpoint>,
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `times` connect failures.
    pub fn fail_next(&self, times: usize) {
        let mut script = self.lock();
        for n in 0..times {
            script
                .plans
                .push_back(Plan::Fail(TransportError::Connect(format!(
                    "scripted failure #{n}"
                ))));
        }
    }

    /// Queue one open that fails with `err`.
    pub fn reject_next(&self, err: TransportError) {
        self.lock().plans.push_back(Plan::Fail(err));
    }

    /// Queue one successful open and return the handle that feeds it.
    pub fn open_next(&self) -> StreamFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().plans.push_back(Plan::Open(rx));
        StreamFeed { tx }
    }

    /// Number of times `open` has been called.
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn last_endpoint(&self) -> Option<StreamEndpoint> {
        self.lock().last_endpoint.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connector for ScriptedConnector {
    fn open(
        &self,
        endpoint: &StreamEndpoint,
    ) -> BoxFuture<'static, Result<PayloadStream, TransportError>> {
        let plan = {
            let mut script = self.lock();
            script.opens += 1;
            script.last_endpoint = Some(endpoint.clone());
            script.plans.pop_front()
        };

        Box::pin(async move {
            match plan {
                Some(Plan::Open(rx)) => {
                    let payloads =
                        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
                    Ok(payloads.boxed())
                }
                Some(Plan::Fail(err)) => Err(err),
                None => Err(TransportError::Connect(
                    "no scripted connection left".to_string(),
                )),
            }
        })
    }
}

/// Writer side of a scripted connection.
#[derive(Clone)]
pub struct StreamFeed {
    tx: Feed,
}

impl StreamFeed {
    /// Deliver one raw payload. Returns false once the transport dropped the stream.
    pub fn push(&self, payload: impl Into<String>) -> bool {
        self.tx.send(Ok(payload.into())).is_ok()
    }

    /// Break the connection with a stream error.
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(TransportError::Stream(reason.to_string())));
    }

    /// True once the transport has let go of this connection.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
