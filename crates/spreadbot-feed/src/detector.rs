//! Spread detection.
//!
//! Turns snapshot entries `{mexc_best_bid, mexc_best_ask, dex}` into order
//! candidates. The venue mid is the reference; the spread is measured from
//! the mid to the counterparty (DEX) price.

use crate::error::{FeedError, FeedResult};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::Value;
use spreadbot_core::{spread_pct, OrderCandidate, Price, TokenBook};
use std::sync::Arc;
use tracing::{debug, warn};

/// Quote entry for one symbol.
///
/// Numbers may arrive as JSON numbers or strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QuoteEntry {
    /// Present only on single-symbol push messages.
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub mexc_best_bid: Option<Decimal>,
    #[serde(default)]
    pub mexc_best_ask: Option<Decimal>,
    #[serde(default)]
    pub dex: Option<Decimal>,
    /// Upstream's own spread figure; informational only.
    #[serde(default)]
    pub spread_pct: Option<Decimal>,
}

impl QuoteEntry {
    /// `(bid + ask) / 2`, when both sides are present and positive.
    pub fn mid(&self) -> Option<Price> {
        let bid = self.mexc_best_bid.filter(|b| *b > Decimal::ZERO)?;
        let ask = self.mexc_best_ask.filter(|a| *a > Decimal::ZERO)?;
        Some(Price::new((bid + ask) / Decimal::TWO))
    }
}

/// Upper-case a feed key and append `_USDT` when it has no quote currency.
pub fn normalize_symbol(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.contains('_') {
        upper
    } else {
        format!("{upper}_USDT")
    }
}

/// Split a feed message into `(symbol, entry)` pairs.
///
/// Accepts either a map `{SYMBOL: entry}` or a single entry carrying a
/// `symbol` field. Entries that fail to decode are logged and dropped.
pub fn parse_entries(value: Value) -> FeedResult<Vec<(String, QuoteEntry)>> {
    let Value::Object(map) = value else {
        return Err(FeedError::InvalidData("feed message is not an object".to_string()));
    };

    if let Some(Value::String(symbol)) = map.get("symbol") {
        let symbol = symbol.clone();
        let entry: QuoteEntry = serde_json::from_value(Value::Object(map))?;
        return Ok(vec![(symbol, entry)]);
    }

    let entries = map
        .into_iter()
        .filter_map(|(symbol, data)| {
            if !data.is_object() {
                debug!(%symbol, "Skipping non-object feed entry");
                return None;
            }
            match serde_json::from_value::<QuoteEntry>(data) {
                Ok(entry) => Some((symbol, entry)),
                Err(e) => {
                    warn!(%symbol, error = %e, "Dropping malformed feed entry");
                    None
                }
            }
        })
        .collect();
    Ok(entries)
}

/// Accepted absolute spread range, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpreadFilter {
    pub min_percent: Decimal,
    pub max_percent: Decimal,
}

impl Default for SpreadFilter {
    fn default() -> Self {
        Self {
            min_percent: dec!(1.2),
            max_percent: dec!(90),
        }
    }
}

impl SpreadFilter {
    /// `min <= |spread| <= max`, with `custom_min` replacing `min` when set.
    pub fn accepts(&self, spread: Decimal, custom_min: Option<Decimal>) -> bool {
        let min = custom_min
            .filter(|m| *m > Decimal::ZERO)
            .unwrap_or(self.min_percent);
        let abs = spread.abs();
        abs >= min && abs <= self.max_percent
    }
}

/// Evaluates quote entries against the filter and the token book.
#[derive(Debug, Clone)]
pub struct SpreadDetector {
    book: Arc<TokenBook>,
    filter: SpreadFilter,
}

impl SpreadDetector {
    pub fn new(book: Arc<TokenBook>, filter: SpreadFilter) -> Self {
        Self { book, filter }
    }

    pub fn filter(&self) -> SpreadFilter {
        self.filter
    }

    /// Candidate for `raw_symbol`, if its spread is inside the range.
    ///
    /// Symbols missing from the book still produce candidates; the order
    /// engine decides whether they trade.
    pub fn evaluate(&self, raw_symbol: &str, entry: &QuoteEntry) -> Option<OrderCandidate> {
        let symbol = normalize_symbol(raw_symbol);
        let Some(mid) = entry.mid() else {
            debug!(%symbol, "Incomplete venue quote");
            return None;
        };
        let dex = Price::new(entry.dex?);
        let spread = spread_pct(mid, dex)?;

        let token = self.book.get(&symbol);
        let custom_min = token.as_ref().and_then(|t| t.custom_percent);
        if !self.filter.accepts(spread, custom_min) {
            debug!(%symbol, %spread, "Spread outside range");
            return None;
        }

        let candidate = OrderCandidate::new(symbol, mid, dex, spread);
        Some(match token {
            Some(t) => candidate.with_sizing(t.contract_size, t.price_scale, t.max_volume),
            None => candidate,
        })
    }

    /// Candidates for every qualifying entry of one message.
    pub fn scan(&self, entries: &[(String, QuoteEntry)]) -> Vec<OrderCandidate> {
        entries
            .iter()
            .filter_map(|(symbol, entry)| self.evaluate(symbol, entry))
            .collect()
    }
}
