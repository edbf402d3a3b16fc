// =============================================================================
// PumpPortal data stream — new tokens and per-mint trades over one socket
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::events::{parse_event, FeedEvent};
use super::Subscriptions;
use crate::error::FeedError;

/// Requests forwarded to the connection task.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Cloneable handle used by the engine to (un)subscribe mints.
///
/// The subscribed key set outlives individual connections so a reconnect can
/// restore every trade subscription.
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<FeedCommand>,
    keys: Arc<RwLock<HashSet<String>>>,
}

impl FeedHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FeedCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = Self {
            commands,
            keys: Arc::new(RwLock::new(HashSet::new())),
        };
        (handle, rx)
    }

    /// Mints currently subscribed for trades.
    pub fn subscribed(&self) -> Vec<String> {
        self.keys.read().iter().cloned().collect()
    }
}

impl Subscriptions for FeedHandle {
    fn subscribe(&self, mints: &[String]) -> Result<(), FeedError> {
        self.keys.write().extend(mints.iter().cloned());
        self.commands
            .send(FeedCommand::Subscribe(mints.to_vec()))
            .map_err(|_| FeedError::Closed)
    }

    fn unsubscribe(&self, mints: &[String]) -> Result<(), FeedError> {
        {
            let mut keys = self.keys.write();
            for mint in mints {
                keys.remove(mint);
            }
        }
        self.commands
            .send(FeedCommand::Unsubscribe(mints.to_vec()))
            .map_err(|_| FeedError::Closed)
    }
}

impl std::fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHandle")
            .field("subscribed", &self.keys.read().len())
            .finish()
    }
}

fn request_frame(method: &str, keys: Option<&[String]>) -> Result<String, FeedError> {
    let payload = match keys {
        Some(keys) => json!({ "method": method, "keys": keys }),
        None => json!({ "method": method }),
    };
    Ok(serde_json::to_string(&payload)?)
}

fn command_frame(cmd: &FeedCommand) -> Result<String, FeedError> {
    match cmd {
        FeedCommand::Subscribe(keys) => request_frame("subscribeTokenTrade", Some(keys.as_slice())),
        FeedCommand::Unsubscribe(keys) => request_frame("unsubscribeTokenTrade", Some(keys.as_slice())),
    }
}

// ---------------------------------------------------------------------------
// WebSocket stream
// ---------------------------------------------------------------------------

/// Connect to the PumpPortal data socket, subscribe to token creation and to
/// trades for every mint in `handle`, then pump events into `events` while
/// forwarding `commands` to the socket.
///
/// Returns when the stream disconnects, an error occurs, or the event
/// receiver is dropped; the caller (main.rs) handles reconnection.
pub async fn run_pump_stream(
    url: &str,
    handle: &FeedHandle,
    commands: &mut mpsc::UnboundedReceiver<FeedCommand>,
    events: &mpsc::Sender<FeedEvent>,
) -> Result<()> {
    info!(url = %url, "connecting to PumpPortal WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to PumpPortal WebSocket")?;
    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Text(request_frame("subscribeNewToken", None)?))
        .await
        .context("failed to subscribe to new tokens")?;

    let held = handle.subscribed();
    if !held.is_empty() {
        write
            .send(Message::Text(request_frame("subscribeTokenTrade", Some(held.as_slice()))?))
            .await
            .context("failed to restore trade subscriptions")?;
    }
    info!(restored = held.len(), "PumpPortal WebSocket connected");

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_event(&text) {
                    Ok(FeedEvent::Notice(notice)) => {
                        debug!(notice = %notice, "feed notice");
                    }
                    Ok(event) => {
                        if events.send(event).await.is_err() {
                            info!("event receiver dropped — closing feed");
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to parse feed message");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    warn!(frame = ?frame, "PumpPortal WebSocket closed by server");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "PumpPortal WebSocket read error");
                    return Err(e.into());
                }
                None => {
                    warn!("PumpPortal WebSocket stream ended");
                    return Ok(());
                }
            },
            cmd = commands.recv() => match cmd {
                Some(cmd) => {
                    let frame = command_frame(&cmd)?;
                    debug!(command = ?cmd, "sending feed request");
                    write
                        .send(Message::Text(frame))
                        .await
                        .context("failed to send feed request")?;
                }
                None => {
                    info!("all feed handles dropped — closing feed");
                    return Ok(());
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_tracks_keys_and_queues_commands() {
        let (handle, mut rx) = FeedHandle::new();
        handle.subscribe(&["A".into(), "B".into()]).unwrap();
        handle.unsubscribe(&["A".into()]).unwrap();

        assert_eq!(handle.subscribed(), vec!["B".to_string()]);
        assert_eq!(
            rx.try_recv().unwrap(),
            FeedCommand::Subscribe(vec!["A".into(), "B".into()])
        );
        assert_eq!(rx.try_recv().unwrap(), FeedCommand::Unsubscribe(vec!["A".into()]));
    }

    #[test]
    fn subscribe_fails_once_connection_task_is_gone() {
        let (handle, rx) = FeedHandle::new();
        drop(rx);
        assert!(matches!(handle.subscribe(&["A".into()]), Err(FeedError::Closed)));
    }

    #[test]
    fn command_frames_match_pumpportal_methods() {
        let frame = command_frame(&FeedCommand::Unsubscribe(vec!["M".into()])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["method"], "unsubscribeTokenTrade");
        assert_eq!(value["keys"][0], "M");

        let frame = request_frame("subscribeNewToken", None).unwrap();
        assert_eq!(frame, r#"{"method":"subscribeNewToken"}"#);
    }
}
