//! Line-oriented terminal front end.
//!
//! Typed lines are sent to the assistant; lines starting with `/` are
//! commands. Replies stream onto stdout as tokens arrive while logs go to
//! stderr.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use jobtrail_session::{CardType, ConversationMessage, Role, SessionHandle, SessionState, ToolStatus};
use jobtrail_transport::{LifecycleEvent, TransportHandle, Visibility};

use crate::cache_bridge::RecentChanges;

const HELP: &str = "\
commands:
  /history   reload the conversation from the server
  /clear     clear the conversation locally
  /hide      pretend the window went to the background
  /show      bring it back
  /status    stream status and counters
  /changes   recent data change notices
  /help      this text
  /quit      exit
anything else is sent to the assistant";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    History,
    Clear,
    Hide,
    Show,
    Status,
    Changes,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    let Some(name) = trimmed.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };
    match name {
        "history" => Command::History,
        "clear" => Command::Clear,
        "hide" => Command::Hide,
        "show" => Command::Show,
        "status" => Command::Status,
        "changes" => Command::Changes,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

/// A message whose tail may still grow.
#[derive(Debug, Clone, Copy)]
struct OpenMessage {
    /// Position in the epoch's append order.
    index: u64,
    content_bytes: usize,
    tools: usize,
}

/// Turns successive session snapshots into terminal output.
///
/// Tracks how much of the conversation has been printed so each snapshot
/// only emits what is new: fresh messages, plus the growing tail of a
/// streaming reply.
#[derive(Debug, Default)]
pub struct Renderer {
    epoch: u64,
    printed: u64,
    open: Option<OpenMessage>,
}

impl Renderer {
    pub fn render(&mut self, state: &SessionState) -> String {
        let mut out = String::new();

        if state.epoch() != self.epoch {
            if self.open.take().is_some() {
                out.push('\n');
            }
            self.epoch = state.epoch();
            self.printed = 0;
            let _ = writeln!(out, "-- conversation reset ({} messages) --", state.len());
        }

        let base = state.appended() - state.len() as u64;

        if let Some(open) = self.open.take() {
            match open.index.checked_sub(base) {
                Some(pos) => {
                    let msg = &state.messages()[pos as usize];
                    self.continue_message(&mut out, open, msg);
                }
                None => out.push('\n'),
            }
        }

        for index in self.printed.max(base)..state.appended() {
            let msg = &state.messages()[(index - base) as usize];
            let _ = write!(out, "{} {}", prefix(msg.role), msg.content);
            if msg.is_streaming_agent() {
                let open = OpenMessage {
                    index,
                    content_bytes: msg.content.len(),
                    tools: 0,
                };
                self.continue_message(&mut out, open, msg);
            } else {
                out.push('\n');
                write_attachments(&mut out, msg);
            }
        }
        self.printed = state.appended();

        out
    }

    fn continue_message(&mut self, out: &mut String, mut open: OpenMessage, msg: &ConversationMessage) {
        if let Some(delta) = msg.content.get(open.content_bytes..) {
            out.push_str(delta);
            open.content_bytes = msg.content.len();
        }
        for tool in msg.tools.iter().skip(open.tools) {
            let _ = write!(out, "\n  [{}...]\n", tool.tool);
        }
        open.tools = msg.tools.len();

        if msg.is_streaming {
            self.open = Some(open);
        } else {
            out.push('\n');
            write_attachments(out, msg);
        }
    }
}

fn prefix(role: Role) -> &'static str {
    match role {
        Role::User => "you>",
        Role::Agent => "agent>",
        Role::System => "!",
    }
}

fn write_attachments(out: &mut String, msg: &ConversationMessage) {
    for tool in &msg.tools {
        let status = match tool.status {
            ToolStatus::Running => "running",
            ToolStatus::Success => "ok",
            ToolStatus::Error => "failed",
        };
        let _ = writeln!(out, "  tool {}: {status}", tool.tool);
    }
    for card in &msg.cards {
        let label = match card.card_type {
            CardType::Posting => "posting",
            CardType::Application => "application",
            CardType::Resume => "resume",
            CardType::Persona => "persona",
        };
        let title = ["title", "name", "id"]
            .iter()
            .find_map(|key| card.data.get(key).and_then(|v| v.as_str()))
            .unwrap_or("");
        let _ = writeln!(out, "  [{label}] {title}");
    }
}

async fn print(stdout: &mut tokio::io::Stdout, text: &str) -> Result<()> {
    if !text.is_empty() {
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

pub async fn run(
    session: SessionHandle,
    transport: TransportHandle,
    mut lifecycle: mpsc::Receiver<LifecycleEvent>,
    changes: Arc<RecentChanges>,
) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state_rx = session.subscribe();
    let mut renderer = Renderer::default();
    let mut lifecycle_open = true;

    print(&mut stdout, "type /help for commands\n").await?;
    let initial = renderer.render(&state_rx.borrow_and_update());
    print(&mut stdout, &initial).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                let output = match parse_command(&line) {
                    Command::Send(text) => match session.send(text).await {
                        Ok(()) => String::new(),
                        Err(e) => format!("! {e}\n"),
                    },
                    Command::History => match session.refresh_history().await {
                        Ok(n) => format!("-- loaded {n} messages --\n"),
                        Err(e) => {
                            warn!(code = e.error_code(), "History refresh failed: {e}");
                            format!("! could not load history: {e}\n")
                        }
                    },
                    Command::Clear => match session.clear().await {
                        Ok(()) => String::new(),
                        Err(e) => format!("! {e}\n"),
                    },
                    Command::Hide => {
                        transport.set_visibility(Visibility::Hidden).await;
                        "-- hidden --\n".to_string()
                    }
                    Command::Show => {
                        transport.set_visibility(Visibility::Visible).await;
                        "-- visible --\n".to_string()
                    }
                    Command::Status => status_report(&transport).await,
                    Command::Changes => changes_report(&changes),
                    Command::Help => format!("{HELP}\n"),
                    Command::Quit => break,
                    Command::Unknown(name) => format!("! unknown command /{name}, try /help\n"),
                };
                print(&mut stdout, &output).await?;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    debug!("Session closed");
                    break;
                }
                let output = renderer.render(&state_rx.borrow_and_update());
                print(&mut stdout, &output).await?;
            }
            event = lifecycle.recv(), if lifecycle_open => {
                let notice = match event {
                    Some(LifecycleEvent::Disconnected) => "\n-- connection lost, reconnecting --\n",
                    Some(LifecycleEvent::Reconnected) => "-- reconnected --\n",
                    None => {
                        lifecycle_open = false;
                        continue;
                    }
                };
                print(&mut stdout, notice).await?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn status_report(transport: &TransportHandle) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "stream {} ({})", transport.current_status(), transport.endpoint());
    match transport.snapshot().await {
        Ok(snap) => {
            let _ = writeln!(
                out,
                "  attempt {} reconnecting={} idle_closed={} visibility={:?}",
                snap.reconnect_attempt, snap.is_reconnecting, snap.closed_by_inactivity, snap.visibility
            );
        }
        Err(e) => {
            let _ = writeln!(out, "  {e}");
        }
    }
    let stats = transport.stats();
    let _ = writeln!(
        out,
        "  opened {} payloads {} dispatched {} dropped {} notices lost {}",
        stats.connections_opened,
        stats.payloads_received,
        stats.events_dispatched,
        stats.dropped_total(),
        stats.notices_dropped
    );
    out
}

fn changes_report(changes: &RecentChanges) -> String {
    let recent = changes.snapshot();
    if recent.is_empty() {
        return "-- no data changes yet --\n".to_string();
    }
    let mut out = String::new();
    for change in recent {
        let _ = writeln!(out, "  {} {} {}", change.action, change.resource, change.id);
    }
    out
}
