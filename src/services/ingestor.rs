//! Long-lived price feed subscription.
//!
//! Reads the Binance combined trade stream, decodes each frame into a tick and
//! hands it to the matcher before reading the next frame, so ticks of one
//! instrument are evaluated strictly in arrival order. Connection failures and
//! dropped sessions are logged and retried with exponential backoff forever;
//! only the shutdown signal ends the loop.

use std::{
    collections::HashMap,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::{sync::watch, time::sleep};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as TMessage};
use tracing::{debug, error, info, warn};

use crate::{
    config::{BackoffConfig, Settings},
    error::{AppError, Result},
    services::matcher::AlertMatcher,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub instrument: String,
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frame {
    Combined { data: TradeEvent },
    Raw(TradeEvent),
}

/// Decodes one text frame. `symbols` maps upper-case exchange symbols to instruments.
pub fn decode_tick(text: &str, symbols: &HashMap<String, String>) -> Result<Tick> {
    let frame: Frame = serde_json::from_str(text).map_err(AppError::feed)?;
    let trade = match frame {
        Frame::Combined { data } => data,
        Frame::Raw(t) => t,
    };

    let instrument = symbols
        .get(&trade.symbol.to_uppercase())
        .ok_or_else(|| AppError::Feed(format!("unsubscribed symbol {}", trade.symbol)))?;

    let price = Decimal::from_str(trade.price.trim())
        .map_err(|e| AppError::Feed(format!("bad price {:?}: {e}", trade.price)))?;
    if price <= Decimal::ZERO {
        return Err(AppError::Feed(format!("non-positive price {price}")));
    }

    Ok(Tick {
        instrument: instrument.clone(),
        price,
    })
}

/// Exponential backoff with up to 20% jitter, reset after a good connection.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_ms: config.initial_delay_ms,
            config,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.current_ms = self.config.initial_delay_ms;
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.current_ms;
        self.attempt += 1;

        let next = (self.current_ms as f64 * self.config.multiplier) as u64;
        self.current_ms = next
            .min(self.config.max_delay_ms)
            .max(self.config.initial_delay_ms);

        Duration::from_millis(base + jitter_ms(base))
    }
}

fn jitter_ms(base_ms: u64) -> u64 {
    let range = base_ms / 5;
    if range == 0 {
        return 0;
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as u64) % (range + 1)
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

pub struct PriceIngestor {
    url: String,
    symbols: HashMap<String, String>,
    backoff: BackoffConfig,
    matcher: AlertMatcher,
}

impl PriceIngestor {
    pub fn new(settings: &Settings, matcher: AlertMatcher) -> Self {
        Self {
            url: stream_url(&settings.feed_url, &settings.feed_symbols),
            symbols: settings.feed_symbols.iter().cloned().collect(),
            backoff: settings.feed_backoff.clone(),
            matcher,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.backoff.clone());

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.session(&mut shutdown, &mut backoff).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Disconnected) => warn!("price feed closed the connection"),
                Err(e) => warn!(error = %e, "price feed session failed"),
            }

            let delay = backoff.next_delay();
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = backoff.attempt(),
                "reconnecting to price feed"
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("price ingestor stopped");
    }

    async fn session(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> Result<SessionEnd> {
        let (ws, _) = connect_async(self.url.as_str()).await.map_err(AppError::feed)?;
        info!(url = %self.url, "price feed connected");
        backoff.reset();

        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(TMessage::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }

                msg = read.next() => match msg {
                    // evaluated inline: the next frame is not read until this one is done
                    Some(Ok(TMessage::Text(txt))) => self.process_frame(&txt).await,
                    Some(Ok(TMessage::Close(_))) | None => return Ok(SessionEnd::Disconnected),
                    // pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(AppError::feed(e)),
                }
            }
        }
    }

    /// Decodes and evaluates one frame. Malformed frames are dropped.
    pub async fn process_frame(&self, text: &str) {
        let tick = match decode_tick(text, &self.symbols) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "dropping malformed tick");
                return;
            }
        };

        match self.matcher.evaluate(&tick.instrument, tick.price).await {
            Ok(fired) if !fired.is_empty() => {
                debug!(instrument = %tick.instrument, price = %tick.price, fired = fired.len(), "tick triggered alerts");
            }
            Ok(_) => {}
            Err(e) => error!(instrument = %tick.instrument, error = %e, "alert evaluation failed"),
        }
    }
}

/// `wss://host/stream?streams=btcusdt@trade/ethusdt@trade`
pub fn stream_url(base: &str, symbols: &[(String, String)]) -> String {
    let streams = symbols
        .iter()
        .map(|(exchange, _)| format!("{}@trade", exchange.to_lowercase()))
        .collect::<Vec<_>>()
        .join("/");

    format!("{}/stream?streams={}", base.trim_end_matches('/'), streams)
}
