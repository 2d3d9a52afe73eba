//! Per-symbol token configuration and the shared token book.
//!
//! The book is the one piece of mutable state every task reads. The map
//! itself sits behind a `RwLock` so bulk updates are applied atomically;
//! the `order_in_process` flag lives in a per-entry `AtomicBool` and is only
//! ever claimed through [`OrderGuard`], which clears it on drop.

use crate::{Price, Size};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Token configuration for one tradable contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub base_coin: String,
    /// Ignored symbols never trade.
    #[serde(default = "default_true")]
    pub is_ignored: bool,
    #[serde(default)]
    pub is_normik: bool,
    /// Minimum absolute spread (%) for this symbol, overriding the feed default.
    #[serde(default)]
    pub custom_percent: Option<Decimal>,
    /// Per-symbol margin cap; never raises the global cap.
    #[serde(default)]
    pub max_margin: Option<Decimal>,
    #[serde(default = "default_contract_size")]
    pub contract_size: Decimal,
    #[serde(default = "default_price_scale")]
    pub price_scale: u32,
    #[serde(default)]
    pub vol_scale: u32,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    #[serde(default)]
    pub max_volume: Option<Size>,
}

fn default_true() -> bool {
    true
}

fn default_contract_size() -> Decimal {
    Decimal::ONE
}

fn default_price_scale() -> u32 {
    8
}

fn default_max_leverage() -> u32 {
    20
}

impl TokenConfig {
    /// New, ignored token with exchange defaults.
    pub fn new(symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        let base_coin = symbol
            .split_once('_')
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| symbol.clone());
        Self {
            symbol,
            base_coin,
            is_ignored: true,
            is_normik: false,
            custom_percent: None,
            max_margin: None,
            contract_size: default_contract_size(),
            price_scale: default_price_scale(),
            vol_scale: 0,
            max_leverage: default_max_leverage(),
            max_volume: None,
        }
    }

    pub fn tick(&self) -> Price {
        Price::tick(self.price_scale)
    }

    pub fn volume_step(&self) -> Size {
        Size::step(self.vol_scale)
    }

    /// Effective margin: the global cap, lowered by a positive per-token cap.
    pub fn effective_margin(&self, global_margin: Decimal) -> Decimal {
        match self.max_margin {
            Some(cap) if cap > Decimal::ZERO => global_margin.min(cap),
            _ => global_margin,
        }
    }
}

/// Book entry: configuration plus the in-flight order flag.
#[derive(Debug)]
pub struct TokenEntry {
    config: RwLock<TokenConfig>,
    order_in_process: AtomicBool,
}

impl TokenEntry {
    fn new(config: TokenConfig) -> Self {
        Self {
            config: RwLock::new(config),
            order_in_process: AtomicBool::new(false),
        }
    }

    /// Snapshot of the configuration.
    pub fn config(&self) -> TokenConfig {
        self.config.read().clone()
    }

    pub fn is_order_in_process(&self) -> bool {
        self.order_in_process.load(Ordering::Acquire)
    }
}

/// Shared symbol -> token map.
#[derive(Debug, Default)]
pub struct TokenBook {
    tokens: RwLock<HashMap<String, Arc<TokenEntry>>>,
}

impl TokenBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a book from configurations.
    pub fn from_configs(configs: impl IntoIterator<Item = TokenConfig>) -> Self {
        let book = Self::new();
        book.apply(configs);
        book
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.tokens.read().contains_key(symbol)
    }

    /// Configuration snapshot for `symbol`.
    pub fn get(&self, symbol: &str) -> Option<TokenConfig> {
        self.tokens.read().get(symbol).map(|entry| entry.config())
    }

    /// Entry handle for `symbol`.
    pub fn entry(&self, symbol: &str) -> Option<Arc<TokenEntry>> {
        self.tokens.read().get(symbol).cloned()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.tokens.read().keys().cloned().collect()
    }

    /// Insert or update a single token, keeping its in-process flag.
    pub fn upsert(&self, config: TokenConfig) {
        self.apply(std::iter::once(config));
    }

    /// Bulk insert/update under one write lock.
    ///
    /// Existing entries are updated in place so an order in flight keeps
    /// its claim on the symbol.
    pub fn apply(&self, configs: impl IntoIterator<Item = TokenConfig>) {
        let mut tokens = self.tokens.write();
        let mut updated = 0usize;
        for config in configs {
            match tokens.get(&config.symbol) {
                Some(entry) => *entry.config.write() = config,
                None => {
                    tokens.insert(config.symbol.clone(), Arc::new(TokenEntry::new(config)));
                }
            }
            updated += 1;
        }
        debug!(updated, total = tokens.len(), "Token book updated");
    }

    /// Claim the in-process flag for `symbol`.
    ///
    /// Returns `None` if the symbol is unknown or already has an order in flight.
    pub fn try_begin_order(&self, symbol: &str) -> Option<OrderGuard> {
        let entry = self.entry(symbol)?;
        entry
            .order_in_process
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(OrderGuard { entry })
    }

    pub fn is_order_in_process(&self, symbol: &str) -> bool {
        self.entry(symbol)
            .map(|e| e.is_order_in_process())
            .unwrap_or(false)
    }
}

/// Exclusive claim on a symbol's in-process flag. Dropping it releases the claim.
#[derive(Debug)]
pub struct OrderGuard {
    entry: Arc<TokenEntry>,
}

impl OrderGuard {
    pub fn symbol(&self) -> String {
        self.entry.config.read().symbol.clone()
    }
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        self.entry.order_in_process.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tradable(symbol: &str) -> TokenConfig {
        TokenConfig {
            is_ignored: false,
            ..TokenConfig::new(symbol)
        }
    }

    #[test]
    fn test_guard_is_exclusive_and_released_on_drop() {
        let book = TokenBook::from_configs([tradable("ABC_USDT")]);

        let guard = book.try_begin_order("ABC_USDT").unwrap();
        assert!(book.is_order_in_process("ABC_USDT"));
        assert!(book.try_begin_order("ABC_USDT").is_none());

        drop(guard);
        assert!(!book.is_order_in_process("ABC_USDT"));
        assert!(book.try_begin_order("ABC_USDT").is_some());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let book = Arc::new(TokenBook::from_configs([tradable("ABC_USDT")]));
        let book_clone = book.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = book_clone.try_begin_order("ABC_USDT").unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!book.is_order_in_process("ABC_USDT"));
    }

    #[test]
    fn test_apply_keeps_in_process_flag() {
        let book = TokenBook::from_configs([tradable("ABC_USDT")]);
        let _guard = book.try_begin_order("ABC_USDT").unwrap();

        let mut updated = tradable("ABC_USDT");
        updated.max_leverage = 5;
        book.apply([updated, tradable("XYZ_USDT")]);

        assert_eq!(book.len(), 2);
        assert_eq!(book.get("ABC_USDT").unwrap().max_leverage, 5);
        assert!(book.is_order_in_process("ABC_USDT"));
    }

    #[test]
    fn test_unknown_symbol_cannot_be_claimed() {
        let book = TokenBook::new();
        assert!(book.try_begin_order("NOPE_USDT").is_none());
    }

    #[test]
    fn test_effective_margin() {
        let mut token = tradable("ABC_USDT");
        assert_eq!(token.effective_margin(dec!(50)), dec!(50));
        token.max_margin = Some(dec!(20));
        assert_eq!(token.effective_margin(dec!(50)), dec!(20));
        token.max_margin = Some(dec!(100));
        assert_eq!(token.effective_margin(dec!(50)), dec!(50));
        token.max_margin = Some(dec!(0));
        assert_eq!(token.effective_margin(dec!(50)), dec!(50));
    }
}
