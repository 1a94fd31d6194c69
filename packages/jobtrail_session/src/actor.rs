//! Session actor: owns a [`SessionState`] and serializes every action.
//!
//! Actions come from three places: handle commands, chat events pushed by
//! the transport, and outcomes of effects this task spawned. All of them are
//! applied one at a time in arrival order. Each new state is published on a
//! `watch` channel.

use std::future::pending;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use jobtrail_transport::{ChatEvent, TransportHandle};

use crate::api::ChatApi;
use crate::error::SessionError;
use crate::reducer::{SessionAction, SessionEffect, SessionState};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the chat event channel handed to the transport.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { event_capacity: 256 }
    }
}

enum SessionCommand {
    Dispatch {
        action: SessionAction,
        respond_to: oneshot::Sender<()>,
    },
    Attach {
        events: mpsc::Receiver<ChatEvent>,
        respond_to: oneshot::Sender<()>,
    },
    Detach {
        respond_to: oneshot::Sender<()>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    api: Arc<dyn ChatApi>,
    event_capacity: usize,
}

impl SessionHandle {
    /// Submit user text. Rejections (empty, oversized, busy) are silent.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.dispatch(SessionAction::Send { text: text.into() })
            .await
    }

    /// Replace the conversation with already-fetched history records.
    pub async fn load_history(&self, entries: Vec<Value>) -> Result<(), SessionError> {
        self.dispatch(SessionAction::LoadHistory { entries }).await
    }

    /// Fetch history from the server and load it. Returns the number of
    /// messages kept after validation.
    pub async fn refresh_history(&self) -> Result<usize, SessionError> {
        let entries = self.api.fetch_history().await?;
        self.load_history(entries).await?;
        Ok(self.state.borrow().len())
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        self.dispatch(SessionAction::Clear).await
    }

    /// Apply an arbitrary action, e.g. a chat event from another source.
    pub async fn dispatch(&self, action: SessionAction) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::Dispatch { action, respond_to })
            .await
    }

    /// Start consuming chat events from `transport`, replacing any handler
    /// it had.
    pub async fn attach(&self, transport: &TransportHandle) -> Result<(), SessionError> {
        let (tx, events) = mpsc::channel(self.event_capacity);
        self.request(|respond_to| SessionCommand::Attach { events, respond_to })
            .await?;
        transport.set_chat_handler(Some(tx));
        Ok(())
    }

    /// Stop consuming chat events. Events already queued are discarded.
    pub async fn detach(&self, transport: &TransportHandle) -> Result<(), SessionError> {
        transport.set_chat_handler(None);
        self.request(|respond_to| SessionCommand::Detach { respond_to })
            .await
    }

    /// Stop the actor. Later calls on any clone return `SessionError::Closed`.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::Shutdown { respond_to })
            .await
    }

    /// Latest published state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<()>) -> SessionCommand,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

pub struct SessionActor {
    state: SessionState,
    api: Arc<dyn ChatApi>,
    commands: mpsc::Receiver<SessionCommand>,
    events: Option<mpsc::Receiver<ChatEvent>>,
    outcomes_tx: mpsc::UnboundedSender<SessionAction>,
    outcomes: mpsc::UnboundedReceiver<SessionAction>,
    published: watch::Sender<SessionState>,
}

impl SessionActor {
    /// Spawn a session with an empty conversation.
    pub fn spawn(api: Arc<dyn ChatApi>, config: SessionConfig) -> SessionHandle {
        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let (published, state) = watch::channel(SessionState::new());
        let (outcomes_tx, outcomes) = mpsc::unbounded_channel();

        let actor = Self {
            state: SessionState::new(),
            api: Arc::clone(&api),
            commands,
            events: None,
            outcomes_tx,
            outcomes,
            published,
        };
        tokio::spawn(actor.run());

        SessionHandle {
            sender,
            state,
            api,
            event_capacity: config.event_capacity.max(1),
        }
    }

    async fn run(mut self) {
        debug!("Session actor started");

        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Shutdown { respond_to }) => {
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(action) = self.outcomes.recv() => self.apply(action),
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.apply(event.into()),
                    None => {
                        debug!("Chat event source closed");
                        self.events = None;
                    }
                },
            }
        }

        debug!("Session actor stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Dispatch { action, respond_to } => {
                self.apply(action);
                let _ = respond_to.send(());
            }
            SessionCommand::Attach { events, respond_to } => {
                self.events = Some(events);
                let _ = respond_to.send(());
            }
            SessionCommand::Detach { respond_to } => {
                self.events = None;
                let _ = respond_to.send(());
            }
            SessionCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    fn apply(&mut self, action: SessionAction) {
        let kind = action.kind();
        let (next, effect) = std::mem::take(&mut self.state).apply(action);
        self.state = next;
        self.published.send_replace(self.state.clone());
        debug!(
            action = kind,
            messages = self.state.len(),
            streaming = self.state.is_streaming(),
            "Session updated"
        );

        if let Some(effect) = effect {
            self.perform(effect);
        }
    }

    fn perform(&self, effect: SessionEffect) {
        match effect {
            SessionEffect::Submit { local_id, content } => {
                let api = Arc::clone(&self.api);
                let outcomes = self.outcomes_tx.clone();
                tokio::spawn(async move {
                    let outcome = match api.submit_message(content).await {
                        Ok(server_id) => SessionAction::SendAccepted {
                            local_id,
                            server_id,
                        },
                        Err(err) => {
                            warn!("Sending chat message failed: {}", err);
                            SessionAction::SendFailed {
                                error: err.to_string(),
                            }
                        }
                    };
                    // The actor may be gone; a late outcome is simply lost then.
                    let _ = outcomes.send(outcome);
                });
            }
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<ChatEvent>>) -> Option<ChatEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}
