//! Signal source loops.
//!
//! `poll` mode fetches a JSON snapshot on a fixed interval; `push` mode
//! keeps a WebSocket open and reconnects with exponential backoff. Both
//! feed qualifying candidates into the unbounded order queue.

use crate::detector::{parse_entries, SpreadDetector};
use crate::error::{FeedError, FeedResult};
use futures_util::{SinkExt, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use spreadbot_core::{Backoff, OrderCandidate};
use spreadbot_telemetry::Metrics;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How the feed is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    #[default]
    Poll,
    Push,
}

/// Signal source configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub mode: FeedMode,
    /// Snapshot URL (`poll`) or WebSocket URL (`push`).
    pub url: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Retry/reconnect backoff.
    pub backoff: Backoff,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            mode: FeedMode::Poll,
            url: "http://127.0.0.1:8001/state".to_string(),
            poll_interval: Duration::from_secs(13),
            request_timeout: Duration::from_secs(15),
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(10)),
        }
    }
}

/// Sleep for `delay` unless cancelled first. Returns `true` on cancellation.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        () = cancel.cancelled() => true,
    }
}

/// Body as JSON, skipping a BOM or any junk before the first bracket.
fn parse_snapshot_body(text: &str) -> FeedResult<Value> {
    let trimmed = text.trim_start_matches('\u{feff}').trim();
    let start = [trimmed.find('{'), trimmed.find('[')]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(0);
    Ok(serde_json::from_str(&trimmed[start..])?)
}

fn truncate(text: &str) -> String {
    text.chars().take(500).collect()
}

/// Produces order candidates from the configured feed.
pub struct SignalSource {
    config: FeedConfig,
    detector: SpreadDetector,
    tx: mpsc::UnboundedSender<OrderCandidate>,
}

impl SignalSource {
    pub fn new(
        config: FeedConfig,
        detector: SpreadDetector,
        tx: mpsc::UnboundedSender<OrderCandidate>,
    ) -> Self {
        Self {
            config,
            detector,
            tx,
        }
    }

    /// Run until cancelled. Only a closed queue ends the loop early.
    pub async fn run(&self, cancel: CancellationToken) -> FeedResult<()> {
        info!(mode = ?self.config.mode, url = %self.config.url, "Signal source started");
        let result = match self.config.mode {
            FeedMode::Poll => self.run_poll(&cancel).await,
            FeedMode::Push => self.run_push(&cancel).await,
        };
        info!("Signal source stopped");
        result
    }

    /// Parse one message and enqueue its candidates. Returns how many were sent.
    pub fn handle_message(&self, value: Value) -> FeedResult<usize> {
        let entries = parse_entries(value)?;
        let candidates = self.detector.scan(&entries);
        let count = candidates.len();
        for candidate in candidates {
            info!(
                symbol = %candidate.symbol,
                spread = %candidate.spread_percent,
                mid = %candidate.reference_price,
                dex = %candidate.counterparty_price,
                "Signal"
            );
            self.tx.send(candidate).map_err(|_| FeedError::QueueClosed)?;
        }
        Ok(count)
    }

    async fn run_poll(&self, cancel: &CancellationToken) -> FeedResult<()> {
        let http = Client::builder()
            .timeout(self.config.request_timeout)
            .build()?;
        let mut attempt = 0u32;

        loop {
            let outcome = tokio::select! {
                r = self.fetch_snapshot(&http) => r,
                () = cancel.cancelled() => return Ok(()),
            };

            let delay = match outcome.and_then(|snapshot| self.handle_message(snapshot)) {
                Ok(sent) => {
                    attempt = 0;
                    debug!(sent, "Snapshot processed");
                    self.config.poll_interval
                }
                Err(FeedError::QueueClosed) => return Err(FeedError::QueueClosed),
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    let delay = self.config.backoff.delay(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Snapshot failed");
                    Metrics::feed_reconnect("poll_error");
                    delay
                }
            };

            if sleep_or_cancel(delay, cancel).await {
                return Ok(());
            }
        }
    }

    async fn fetch_snapshot(&self, http: &Client) -> FeedResult<Value> {
        let response = http
            .get(&self.config.url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
                body: truncate(&text),
            });
        }
        parse_snapshot_body(&text)
    }

    async fn run_push(&self, cancel: &CancellationToken) -> FeedResult<()> {
        let mut attempt = 0u32;

        loop {
            let reason = match self.stream_once(cancel, &mut attempt).await {
                Ok(()) if cancel.is_cancelled() => return Ok(()),
                Ok(()) => {
                    info!("Feed stream ended");
                    "stream_ended"
                }
                Err(FeedError::QueueClosed) => return Err(FeedError::QueueClosed),
                Err(e) => {
                    error!(error = %e, "Feed connection error");
                    "error"
                }
            };

            attempt = attempt.saturating_add(1);
            Metrics::feed_reconnect(reason);
            let delay = self.config.backoff.delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting feed");
            if sleep_or_cancel(delay, cancel).await {
                return Ok(());
            }
        }
    }

    async fn stream_once(&self, cancel: &CancellationToken, attempt: &mut u32) -> FeedResult<()> {
        let (ws, _response) = tokio::select! {
            r = connect_async(self.config.url.as_str()) => r?,
            () = cancel.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws.split();
        *attempt = 0;
        info!(url = %self.config.url, "Feed connected");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "Close frame not sent");
                    }
                    return Ok(());
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_raw(text.as_bytes())?,
                    Some(Ok(Message::Binary(bytes))) => self.handle_raw(&bytes)?,
                    Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        return Err(FeedError::ConnectionClosed { code, reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
            }
        }
    }

    /// Decode and handle one pushed frame; bad frames are logged and dropped.
    fn handle_raw(&self, bytes: &[u8]) -> FeedResult<()> {
        let value = match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable feed frame");
                return Ok(());
            }
        };
        match self.handle_message(value) {
            Ok(_) => Ok(()),
            Err(FeedError::QueueClosed) => Err(FeedError::QueueClosed),
            Err(e) => {
                warn!(error = %e, "Dropping malformed feed frame");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::SpreadFilter;
    use serde_json::json;
    use spreadbot_core::TokenBook;
    use std::sync::Arc;

    fn source() -> (SignalSource, mpsc::UnboundedReceiver<OrderCandidate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let detector = SpreadDetector::new(Arc::new(TokenBook::new()), SpreadFilter::default());
        (SignalSource::new(FeedConfig::default(), detector, tx), rx)
    }

    #[test]
    fn test_handle_message_enqueues_qualifying() {
        let (src, mut rx) = source();
        let sent = src
            .handle_message(json!({
                "ABC": {"mexc_best_bid": 1, "mexc_best_ask": 1, "dex": 1.05},
                "XYZ": {"mexc_best_bid": 1, "mexc_best_ask": 1, "dex": 1.001}
            }))
            .unwrap();
        assert_eq!(sent, 1);
        assert_eq!(rx.try_recv().unwrap().symbol, "ABC_USDT");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_queue_on_send() {
        let (src, rx) = source();
        drop(rx);
        let err = src
            .handle_message(json!({"ABC": {"mexc_best_bid": 1, "mexc_best_ask": 1, "dex": 1.1}}))
            .unwrap_err();
        assert!(matches!(err, FeedError::QueueClosed));
    }

    #[test]
    fn test_raw_frame_errors_dropped() {
        let (src, _rx) = source();
        assert!(src.handle_raw(b"not json").is_ok());
        assert!(src.handle_raw(b"[1,2,3]").is_ok());
    }

    #[test]
    fn test_snapshot_body_tolerates_prefix() {
        let value = parse_snapshot_body("\u{feff}  garbage{\"ABC\": {}}").unwrap();
        assert!(value.get("ABC").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let cancel = CancellationToken::new();
        assert!(!sleep_or_cancel(Duration::from_millis(10), &cancel).await);
        cancel.cancel();
        assert!(sleep_or_cancel(Duration::from_secs(3600), &cancel).await);
    }

    #[tokio::test]
    async fn test_run_returns_when_cancelled() {
        let (src, _rx) = source();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(src.run(cancel).await.is_ok());
    }
}
