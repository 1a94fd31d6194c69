//! Recording [`ChatApi`] double.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Notify;

use crate::api::ChatApi;
use crate::error::ApiError;

#[derive(Default)]
struct Recorded {
    submitted: Vec<String>,
    replies: VecDeque<Result<String, ApiError>>,
    history: Option<Result<Vec<Value>, ApiError>>,
    held: bool,
}

/// Records every submission and answers from a queue.
///
/// With no queued reply a submission succeeds with `srv-<n>`. While
/// [`hold`](Self::hold) is active submissions wait for [`release`](Self::release).
#[derive(Clone, Default)]
pub struct RecordingApi {
    recorded: Arc<Mutex<Recorded>>,
    gate: Arc<Notify>,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_with(&self, reply: Result<String, ApiError>) {
        self.lock().replies.push_back(reply);
    }

    pub fn history_with(&self, history: Result<Vec<Value>, ApiError>) {
        self.lock().history = Some(history);
    }

    pub fn hold(&self) {
        self.lock().held = true;
    }

    pub fn release(&self) {
        self.lock().held = false;
        self.gate.notify_waiters();
    }

    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChatApi for RecordingApi {
    fn submit_message(&self, content: String) -> BoxFuture<'static, Result<String, ApiError>> {
        let reply = {
            let mut recorded = self.lock();
            recorded.submitted.push(content);
            let n = recorded.submitted.len();
            recorded
                .replies
                .pop_front()
                .unwrap_or_else(|| Ok(format!("srv-{n}")))
        };
        let this = self.clone();
        Box::pin(async move {
            loop {
                let released = this.gate.notified();
                if !this.lock().held {
                    break;
                }
                released.await;
            }
            reply
        })
    }

    fn fetch_history(&self) -> BoxFuture<'static, Result<Vec<Value>, ApiError>> {
        let history = self.lock().history.clone().unwrap_or_else(|| Ok(Vec::new()));
        Box::pin(async move { history })
    }
}
