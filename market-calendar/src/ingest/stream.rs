use super::depth::parse_depth;
use crate::{
    error::CalendarError,
    store::{SharedStore, SymbolTag},
};
use chrono::Utc;
use derive_more::Display;
use futures::StreamExt;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Depth stream configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DepthStreamConfig {
    /// WebSocket base URL, the stream name is appended
    pub base_url: String,
    /// Reconnection delay after disconnect
    pub reconnect_delay: Duration,
}

impl Default for DepthStreamConfig {
    fn default() -> Self {
        Self {
            base_url: crate::config::DEFAULT_WS_URL.to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl DepthStreamConfig {
    /// Create a new configuration with custom base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// `{base_url}/{symbol lowercase}@depth`
    pub fn stream_url(&self, symbol: &str) -> String {
        format!(
            "{}/{}@depth",
            self.base_url.trim_end_matches('/'),
            symbol.to_lowercase()
        )
    }
}

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Spawn the depth stream for `tag`. The task re-dials after every disconnect and exits once
/// `tag` is stale.
pub fn spawn_depth_stream(
    config: DepthStreamConfig,
    store: SharedStore,
    tag: SymbolTag,
    status_tx: watch::Sender<ConnectionStatus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_depth_stream(config, store, tag, status_tx).await;
    })
}

/// Main WebSocket connection loop with auto-reconnect
async fn run_depth_stream(
    config: DepthStreamConfig,
    store: SharedStore,
    tag: SymbolTag,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let url = config.stream_url(&tag.symbol);
    info!(%tag, %url, "starting depth stream");

    loop {
        if !store.read().is_current(&tag) {
            break;
        }

        status_tx.send_replace(ConnectionStatus::Reconnecting);

        match connect_async(url.as_str()).await {
            Ok((mut ws_stream, _)) => {
                info!(%tag, "depth stream connected");
                status_tx.send_replace(ConnectionStatus::Connected);

                while let Some(msg) = ws_stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            let Some(update) = parse_depth(&text) else {
                                debug!(%tag, payload = text.as_str(), "ignoring non-depth message");
                                continue;
                            };

                            let Some(sample) = update.sample(Utc::now().timestamp_millis())
                            else {
                                continue;
                            };

                            if !store.write().push_sample(&tag, sample) {
                                info!(%tag, "symbol changed, closing depth stream");
                                status_tx.send_replace(ConnectionStatus::Disconnected);
                                return;
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            info!(%tag, ?frame, "server closed depth stream");
                            break;
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                            // Heartbeat messages - tungstenite handles these automatically
                        }
                        Err(error) => {
                            let error = CalendarError::from(error);
                            warn!(%tag, %error, "depth stream error");
                            break;
                        }
                        _ => {}
                    }
                }

                status_tx.send_replace(ConnectionStatus::Disconnected);
            }
            Err(error) => {
                let error = CalendarError::from(error);
                warn!(%tag, %url, %error, "failed to connect depth stream");
                status_tx.send_replace(ConnectionStatus::Disconnected);
            }
        }

        debug!(%tag, delay = ?config.reconnect_delay, "waiting before reconnecting");
        tokio::time::sleep(config.reconnect_delay).await;
    }

    info!(%tag, "depth stream stopped");
}
