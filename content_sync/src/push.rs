//! Best-effort live hints over a websocket. While the scheduler is idle a
//! message naming a group turns into a jump-in for that group; while it is
//! active the connection is closed because polling already runs at full
//! speed.

use crate::config::PushConfig;
use crate::scheduler::Scheduler;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PushState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Deserialize)]
struct PushHint {
    #[serde(rename = "groupId", alias = "group_id")]
    group_id: Option<String>,
}

/// Extracts the group named by a push message, if any.
pub fn parse_hint(text: &str) -> Option<String> {
    let hint: PushHint = serde_json::from_str(text).ok()?;
    hint.group_id.filter(|group| !group.is_empty())
}

pub struct PushAccelerator {
    state: watch::Receiver<PushState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PushAccelerator {
    /// Spawns the connection supervisor. It stops on its own when the
    /// scheduler stops.
    pub fn spawn(config: PushConfig, scheduler: Scheduler) -> Self {
        let (state_tx, state) = watch::channel(PushState::Disconnected);
        let cancel = scheduler.cancellation_token().child_token();
        let supervisor = Supervisor {
            config,
            scheduler,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervisor.run());
        Self {
            state,
            cancel,
            task,
        }
    }

    pub fn state(&self) -> watch::Receiver<PushState> {
        self.state.clone()
    }

    pub fn current(&self) -> PushState {
        *self.state.borrow()
    }

    /// Drops any open socket and waits for the supervisor to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!(error = ?err, "push supervisor ended abnormally");
        }
    }
}

enum SessionEnd {
    Cancelled,
    LeftLazyMode,
    Closed,
    Failed(String),
}

struct Supervisor {
    config: PushConfig,
    scheduler: Scheduler,
    state: watch::Sender<PushState>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self) {
        let mut lazy = self.scheduler.lazy_mode();
        loop {
            if !self.wait_for_lazy_mode(&mut lazy).await {
                break;
            }

            self.set_state(PushState::Connecting);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = connect_async(self.config.url.as_str()) => result,
            };
            match connected {
                Ok((stream, _)) => {
                    self.set_state(PushState::Connected);
                    let end = self.session(stream, &mut lazy).await;
                    self.set_state(PushState::Disconnected);
                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::LeftLazyMode => {
                            tracing::debug!("scheduler active again, closed push channel");
                            continue;
                        }
                        SessionEnd::Closed => tracing::info!("push channel closed by server"),
                        SessionEnd::Failed(err) => {
                            tracing::warn!(error = %err, "push channel failed")
                        }
                    }
                }
                Err(err) => {
                    self.set_state(PushState::Disconnected);
                    tracing::warn!(url = %self.config.url, error = %err, "push connect failed");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
        self.set_state(PushState::Disconnected);
        tracing::debug!("push supervisor exited");
    }

    /// Returns false once cancelled or the scheduler is gone.
    async fn wait_for_lazy_mode(&self, lazy: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *lazy.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = lazy.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn session(&self, mut stream: PushStream, lazy: &mut watch::Receiver<bool>) -> SessionEnd {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                changed = lazy.changed() => {
                    if changed.is_err() {
                        return SessionEnd::Cancelled;
                    }
                    if !*lazy.borrow_and_update() {
                        if let Err(err) = stream.close(None).await {
                            tracing::debug!(error = %err, "push close handshake failed");
                        }
                        return SessionEnd::LeftLazyMode;
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.on_text(&text),
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return SessionEnd::Failed(err.to_string()),
                },
            }
        }
    }

    fn on_text(&self, text: &str) {
        let Some(group_id) = parse_hint(text) else {
            tracing::debug!("ignoring push message without a group");
            return;
        };
        if !self.scheduler.is_lazy() {
            tracing::debug!(group_id = %group_id, "push hint while active, ignoring");
            return;
        }
        if self.scheduler.jump_in(&group_id) {
            tracing::info!(group_id = %group_id, "push hint, jumping in");
        }
    }

    fn set_state(&self, next: PushState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            tracing::info!(state = ?next, "push state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_accept_both_field_spellings() {
        assert_eq!(parse_hint(r#"{"groupId":"g1"}"#).as_deref(), Some("g1"));
        assert_eq!(parse_hint(r#"{"group_id":"g2","extra":1}"#).as_deref(), Some("g2"));
    }

    #[test]
    fn malformed_hints_are_ignored() {
        assert_eq!(parse_hint("ping"), None);
        assert_eq!(parse_hint(r#"{"other":"x"}"#), None);
        assert_eq!(parse_hint(r#"{"groupId":""}"#), None);
        assert_eq!(parse_hint("42"), None);
    }
}
