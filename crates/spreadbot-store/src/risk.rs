//! Typed access to risk-strategy state.
//!
//! The order engine and the position monitor share these markers; values
//! are stored as decimal strings so Redis and memory stores read the same.

use crate::error::{StoreError, StoreResult};
use crate::key::StateKey;
use crate::store::DynStore;
use rust_decimal::Decimal;
use spreadbot_core::{Price, Size};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Risk-state facade over a [`StateStore`](crate::StateStore).
#[derive(Clone)]
pub struct RiskState {
    store: DynStore,
}

impl RiskState {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    async fn get_decimal(&self, key: StateKey) -> StoreResult<Option<Decimal>> {
        let rendered = key.render();
        match self.store.get(key).await? {
            Some(value) => Decimal::from_str(value.trim())
                .map(Some)
                .map_err(|_| StoreError::InvalidValue {
                    key: rendered,
                    value,
                }),
            None => Ok(None),
        }
    }

    // --- Cooldown ---

    /// Suppress new entries on `symbol` for `ttl`.
    pub async fn set_cooldown(&self, symbol: &str, ttl: Duration) -> StoreResult<()> {
        debug!(%symbol, secs = ttl.as_secs(), "Cooldown set");
        self.store
            .set(StateKey::cooldown(symbol), "1".to_string(), Some(ttl))
            .await
    }

    pub async fn is_cooling_down(&self, symbol: &str) -> StoreResult<bool> {
        self.store.exists(StateKey::cooldown(symbol)).await
    }

    // --- Entry ---

    pub async fn set_initial_spread(&self, position_id: i64, spread_percent: Decimal) -> StoreResult<()> {
        let key = StateKey::initial_spread(position_id);
        let ttl = key.default_ttl();
        self.store
            .set(key, spread_percent.normalize().to_string(), Some(ttl))
            .await
    }

    pub async fn initial_spread(&self, position_id: i64) -> StoreResult<Option<Decimal>> {
        self.get_decimal(StateKey::initial_spread(position_id)).await
    }

    // --- Trailing stop ---

    pub async fn peak_price(&self, position_id: i64) -> StoreResult<Option<Price>> {
        Ok(self
            .get_decimal(StateKey::peak_price(position_id))
            .await?
            .map(Price::new))
    }

    pub async fn set_peak_price(&self, position_id: i64, price: Price) -> StoreResult<()> {
        let key = StateKey::peak_price(position_id);
        let ttl = key.default_ttl();
        self.store.set(key, price.inner().normalize().to_string(), Some(ttl)).await
    }

    // --- Scaling out ---

    /// Stored baseline volume, snapshotting `current` on first use.
    pub async fn initial_volume_or_snapshot(&self, position_id: i64, current: Size) -> StoreResult<Size> {
        let key = StateKey::initial_volume(position_id);
        if let Some(volume) = self.get_decimal(key.clone()).await? {
            return Ok(Size::new(volume));
        }
        let ttl = key.default_ttl();
        let created = self
            .store
            .set_nx(key.clone(), current.inner().normalize().to_string(), ttl)
            .await?;
        if created {
            debug!(position_id, volume = %current, "Initial volume snapshot");
            return Ok(current);
        }
        // Lost a race with another writer; theirs wins.
        Ok(self.get_decimal(key).await?.map(Size::new).unwrap_or(current))
    }

    pub async fn is_scale_out_hit(&self, position_id: i64, pnl_percent: Decimal) -> StoreResult<bool> {
        self.store
            .exists(StateKey::scale_out_hit(position_id, pnl_percent))
            .await
    }

    pub async fn mark_scale_out_hit(&self, position_id: i64, pnl_percent: Decimal) -> StoreResult<()> {
        let key = StateKey::scale_out_hit(position_id, pnl_percent);
        let ttl = key.default_ttl();
        self.store.set(key, "1".to_string(), Some(ttl)).await
    }

    // --- Pyramiding ---

    /// Add-on entries confirmed so far.
    pub async fn pyramid_entries(&self, position_id: i64) -> StoreResult<i64> {
        let key = StateKey::pyramid_entries(position_id);
        let rendered = key.render();
        match self.store.get(key).await? {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| StoreError::InvalidValue {
                    key: rendered,
                    value,
                }),
            None => Ok(0),
        }
    }

    /// Claim add-on attempt `entry`. Only the first caller gets `true`.
    pub async fn try_lock_pyramid(&self, position_id: i64, entry: i64) -> StoreResult<bool> {
        let key = StateKey::pyramid_lock(position_id, entry);
        let ttl = key.default_ttl();
        self.store.set_nx(key, "1".to_string(), ttl).await
    }

    /// Count a confirmed add-on; returns the new total.
    pub async fn record_pyramid_entry(&self, position_id: i64) -> StoreResult<i64> {
        let key = StateKey::pyramid_entries(position_id);
        let ttl = key.default_ttl();
        self.store.incr(key, ttl).await
    }

    // --- Close ---

    /// Delete every per-position key. Returns how many existed.
    pub async fn clear_position(&self, position_id: i64) -> StoreResult<u64> {
        let mut removed = self
            .store
            .delete(StateKey::position_keys(position_id))
            .await?;
        for prefix in StateKey::position_prefixes(position_id) {
            removed += self.store.delete_prefix(prefix).await?;
        }
        debug!(position_id, removed, "Position state cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StateStore};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn risk() -> (Arc<MemoryStore>, RiskState) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), RiskState::new(store))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expires() {
        let (_, risk) = risk();
        risk.set_cooldown("ABC_USDT", Duration::from_secs(60)).await.unwrap();
        assert!(risk.is_cooling_down("ABC_USDT").await.unwrap());
        assert!(!risk.is_cooling_down("XYZ_USDT").await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!risk.is_cooling_down("ABC_USDT").await.unwrap());
    }

    #[tokio::test]
    async fn test_initial_volume_snapshot_once() {
        let (_, risk) = risk();
        let first = risk
            .initial_volume_or_snapshot(5, Size::new(dec!(100)))
            .await
            .unwrap();
        let second = risk
            .initial_volume_or_snapshot(5, Size::new(dec!(40)))
            .await
            .unwrap();
        assert_eq!(first.inner(), dec!(100));
        assert_eq!(second.inner(), dec!(100));
    }

    #[tokio::test]
    async fn test_pyramid_lock_and_counter() {
        let (_, risk) = risk();
        assert_eq!(risk.pyramid_entries(3).await.unwrap(), 0);
        assert!(risk.try_lock_pyramid(3, 0).await.unwrap());
        assert!(!risk.try_lock_pyramid(3, 0).await.unwrap());
        assert_eq!(risk.record_pyramid_entry(3).await.unwrap(), 1);
        assert_eq!(risk.pyramid_entries(3).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_position_removes_everything_but_cooldown() {
        let (store, risk) = risk();
        risk.set_cooldown("ABC_USDT", Duration::from_secs(60)).await.unwrap();
        risk.set_initial_spread(8, dec!(2.5)).await.unwrap();
        risk.set_peak_price(8, Price::new(dec!(2.2))).await.unwrap();
        risk.initial_volume_or_snapshot(8, Size::new(dec!(10))).await.unwrap();
        risk.mark_scale_out_hit(8, dec!(20)).await.unwrap();
        risk.try_lock_pyramid(8, 0).await.unwrap();
        risk.record_pyramid_entry(8).await.unwrap();

        let removed = risk.clear_position(8).await.unwrap();
        assert_eq!(removed, 6);
        assert_eq!(store.keys(), vec!["cooldown:ABC_USDT".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_position_catches_markers_of_removed_targets() {
        let (store, risk) = risk();
        // Targets 15 and 30 were configured when these fired.
        risk.mark_scale_out_hit(8, dec!(15)).await.unwrap();
        risk.mark_scale_out_hit(8, dec!(30)).await.unwrap();
        risk.try_lock_pyramid(8, 4).await.unwrap();
        risk.mark_scale_out_hit(80, dec!(15)).await.unwrap();

        assert_eq!(risk.clear_position(8).await.unwrap(), 3);
        assert_eq!(store.keys(), vec!["scale_out_hit:80:15".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_peak_is_an_error() {
        let (store, risk) = risk();
        store
            .set(StateKey::peak_price(1), "oops".into(), None)
            .await
            .unwrap();
        assert!(matches!(
            risk.peak_price(1).await,
            Err(StoreError::InvalidValue { .. })
        ));
    }
}
