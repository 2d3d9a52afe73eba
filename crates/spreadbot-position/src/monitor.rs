//! Periodic position monitor.
//!
//! One monitor per account. Each cycle fetches holding positions and all
//! tickers, then runs the strategies per position in a fixed order:
//! pyramiding, scaling out, stop loss, trailing stop, timeout. A scale-out
//! or a full close ends evaluation of that position for the cycle.

use crate::closer::PositionCloser;
use crate::error::PositionResult;
use crate::strategy::{
    reached_targets, stop_loss_hit, timed_out, wants_pyramid, CloseReason, TrailDecision,
    TrailingStop,
};
use futures_util::FutureExt;
use rust_decimal::Decimal;
use spreadbot_core::sizing::fraction_of;
use spreadbot_core::{compute_volume, Position, Price, Settings, SettingsSource, Size, TokenBook, TokenConfig, VolumeSpec};
use spreadbot_exchange::{holding_positions, ticker_map, DynExchange, EntryOrder};
use spreadbot_store::RiskState;
use spreadbot_telemetry::Metrics;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one position in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Pyramided { entry: i64 },
    ScaledOut { target: Decimal, volume: Size },
    Closed(CloseReason),
}

/// Per-cycle summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub positions: usize,
    pub evaluated: usize,
    pub actions: Vec<(i64, Action)>,
    pub errors: usize,
}

impl CycleReport {
    pub fn closed(&self) -> usize {
        self.actions
            .iter()
            .filter(|(_, a)| matches!(a, Action::Closed(_)))
            .count()
    }
}

// ============================================================================
// PositionMonitor
// ============================================================================

/// Applies exit and add-on strategies to one account's positions.
pub struct PositionMonitor {
    api: DynExchange,
    book: Arc<TokenBook>,
    settings: Arc<dyn SettingsSource>,
    risk: RiskState,
}

impl PositionMonitor {
    pub fn new(
        api: DynExchange,
        book: Arc<TokenBook>,
        settings: Arc<dyn SettingsSource>,
        risk: RiskState,
    ) -> Self {
        Self {
            api,
            book,
            settings,
            risk,
        }
    }

    /// Run until cancelled.
    ///
    /// Errors and panics inside a cycle are logged and followed by the
    /// error sleep; the loop itself only ends on cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        let account = self.api.account();
        info!(%account, "Position monitor started");

        loop {
            let settings = self.settings.current();
            let pause = match AssertUnwindSafe(self.run_cycle(&settings))
                .catch_unwind()
                .await
            {
                Ok(Ok(report)) => {
                    if !report.actions.is_empty() || report.errors > 0 {
                        info!(
                            %account,
                            positions = report.positions,
                            actions = report.actions.len(),
                            closed = report.closed(),
                            errors = report.errors,
                            "Monitor cycle done"
                        );
                    }
                    settings.monitor_interval()
                }
                Ok(Err(e)) => {
                    error!(%account, error = %e, "Monitor cycle failed");
                    settings.error_sleep()
                }
                Err(_) => {
                    error!(%account, "Monitor cycle panicked");
                    settings.error_sleep()
                }
            };

            tokio::select! {
                () = cancel.cancelled() => {
                    info!(%account, "Position monitor stopping");
                    return;
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// One pass over the account's holding positions.
    pub async fn run_cycle(&self, settings: &Settings) -> PositionResult<CycleReport> {
        let api = self.api.as_ref();
        let mut report = CycleReport::default();

        let Some(positions) = holding_positions(api).await? else {
            return Ok(report);
        };
        Metrics::open_positions(positions.len() as i64);
        report.positions = positions.len();
        if positions.is_empty() {
            return Ok(report);
        }

        let Some(tickers) = ticker_map(api).await? else {
            warn!(account = %api.account(), "No tickers, skipping cycle");
            return Ok(report);
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        for position in &positions {
            let Some(token) = self.book.get(&position.symbol) else {
                warn!(symbol = %position.symbol, "No token details for position, skipping");
                continue;
            };
            let Some(ticker) = tickers.get(&position.symbol) else {
                warn!(symbol = %position.symbol, "No ticker for position, skipping");
                continue;
            };

            report.evaluated += 1;
            match self
                .evaluate(settings, &token, position, ticker.last_price, now_ms)
                .await
            {
                Ok(actions) => report
                    .actions
                    .extend(actions.into_iter().map(|a| (position.position_id, a))),
                Err(e) => {
                    report.errors += 1;
                    error!(
                        symbol = %position.symbol,
                        position_id = position.position_id,
                        error = %e,
                        "Position evaluation failed"
                    );
                }
            }
        }
        Ok(report)
    }

    /// Run every strategy for one position.
    pub async fn evaluate(
        &self,
        settings: &Settings,
        token: &TokenConfig,
        position: &Position,
        current: Price,
        now_ms: i64,
    ) -> PositionResult<Vec<Action>> {
        let mut actions = Vec::new();
        let Some(pnl) = position.pnl_pct(current) else {
            warn!(symbol = %position.symbol, position_id = position.position_id, "Zero entry price, skipping");
            return Ok(actions);
        };
        debug!(
            symbol = %position.symbol,
            position_id = position.position_id,
            side = ?position.position_type,
            leverage = position.leverage,
            entry = %position.open_avg_price,
            %current,
            pnl_pct = %pnl.round_dp(3),
            "Position PnL"
        );

        if settings.use_pyramiding {
            if let Some(entry) = self.pyramid(settings, token, position, current, pnl).await? {
                actions.push(Action::Pyramided { entry });
            }
        }

        if settings.use_scaling_out {
            if let Some(action) = self.scale_out(settings, token, position, pnl).await? {
                actions.push(action);
                return Ok(actions);
            }
        }

        if stop_loss_hit(pnl, settings.stop_loss_percent) {
            warn!(symbol = %position.symbol, position_id = position.position_id, pnl_pct = %pnl.round_dp(3), "Stop loss hit");
            self.close_fully(position, CloseReason::StopLoss, Some(settings.loss_cooldown()))
                .await?;
            actions.push(Action::Closed(CloseReason::StopLoss));
            return Ok(actions);
        }

        if settings.use_trailing_stop {
            let trail = TrailingStop::from_settings(settings);
            let stored = self.risk.peak_price(position.position_id).await?;
            match trail.evaluate(position.position_type, stored, current, pnl) {
                TrailDecision::Inactive => {}
                TrailDecision::Track { peak } => {
                    if stored != Some(peak) {
                        self.risk.set_peak_price(position.position_id, peak).await?;
                        debug!(symbol = %position.symbol, position_id = position.position_id, %peak, "Trailing peak updated");
                    }
                }
                TrailDecision::Close { peak } => {
                    warn!(symbol = %position.symbol, position_id = position.position_id, %peak, %current, "Trailing stop hit");
                    self.close_fully(position, CloseReason::TrailingStop, None)
                        .await?;
                    actions.push(Action::Closed(CloseReason::TrailingStop));
                    return Ok(actions);
                }
            }
        }

        if timed_out(position.age_ms(now_ms), settings.max_position_age_ms()) {
            warn!(symbol = %position.symbol, position_id = position.position_id, age_ms = position.age_ms(now_ms), "Position timed out");
            self.close_fully(position, CloseReason::Timeout, Some(settings.timeout_cooldown()))
                .await?;
            actions.push(Action::Closed(CloseReason::Timeout));
        }

        Ok(actions)
    }

    /// Add to a winning position. Returns the new entry count on success.
    async fn pyramid(
        &self,
        settings: &Settings,
        token: &TokenConfig,
        position: &Position,
        current: Price,
        pnl: Decimal,
    ) -> PositionResult<Option<i64>> {
        let id = position.position_id;
        let entries = self.risk.pyramid_entries(id).await?;
        if !wants_pyramid(settings, pnl, entries) {
            return Ok(None);
        }
        if !self.risk.try_lock_pyramid(id, entries).await? {
            debug!(symbol = %position.symbol, position_id = id, entry = entries, "Pyramid attempt already locked");
            return Ok(None);
        }

        info!(
            symbol = %position.symbol,
            position_id = id,
            entry = entries + 1,
            pnl_pct = %pnl.round_dp(3),
            "Adding to position"
        );
        let volume = match compute_volume(
            settings.pyramiding.add_margin_amount,
            position.leverage,
            current,
            VolumeSpec {
                contract_size: token.contract_size,
                vol_scale: token.vol_scale,
                max_volume: token.max_volume,
            },
        ) {
            Ok(volume) => volume,
            Err(e) => {
                warn!(symbol = %position.symbol, position_id = id, error = %e, "Add-on too small, skipped");
                return Ok(None);
            }
        };

        let request = EntryOrder {
            symbol: position.symbol.clone(),
            side: position.position_type.open_side(),
            leverage: position.leverage,
            volume,
            margin_mode: settings.margin_mode,
            order_type: settings.entry_order_type,
            price: current,
            price_scale: token.price_scale,
        }
        .into_request();

        let result = self.api.create_order(request).await;
        let ok = matches!(&result, Ok(resp) if resp.is_ok());
        Metrics::order("pyramid", ok);
        match result {
            Ok(resp) if resp.is_ok() => {
                let count = self.risk.record_pyramid_entry(id).await?;
                info!(symbol = %position.symbol, position_id = id, entries = count, %volume, "Added to position");
                Ok(Some(count))
            }
            Ok(resp) => {
                warn!(symbol = %position.symbol, position_id = id, code = resp.code, message = ?resp.message, "Add-on order rejected");
                Ok(None)
            }
            Err(e) => {
                warn!(symbol = %position.symbol, position_id = id, error = %e, "Add-on order failed");
                Ok(None)
            }
        }
    }

    /// Close a slice at the first reached target not yet hit.
    async fn scale_out(
        &self,
        settings: &Settings,
        token: &TokenConfig,
        position: &Position,
        pnl: Decimal,
    ) -> PositionResult<Option<Action>> {
        let id = position.position_id;
        let initial = self
            .risk
            .initial_volume_or_snapshot(id, position.hold_vol)
            .await?;

        let targets = settings.sorted_scale_out_targets();
        for target in reached_targets(&targets, pnl) {
            if self.risk.is_scale_out_hit(id, target.pnl_percent).await? {
                continue;
            }
            let volume = fraction_of(initial, target.close_fraction, token.vol_scale);
            info!(
                symbol = %position.symbol,
                position_id = id,
                target = %target.pnl_percent,
                %initial,
                %volume,
                "Scale-out target reached"
            );
            PositionCloser::new(self.api.as_ref())
                .close(position, Some(volume), CloseReason::ScaleOut)
                .await?;
            self.risk.mark_scale_out_hit(id, target.pnl_percent).await?;
            return Ok(Some(Action::ScaledOut {
                target: target.pnl_percent,
                volume,
            }));
        }
        Ok(None)
    }

    /// Close everything, optionally cool the symbol down, and drop the
    /// position's stored state.
    async fn close_fully(
        &self,
        position: &Position,
        reason: CloseReason,
        cooldown: Option<Duration>,
    ) -> PositionResult<()> {
        PositionCloser::new(self.api.as_ref())
            .close(position, None, reason)
            .await?;

        if let Some(ttl) = cooldown {
            self.risk.set_cooldown(&position.symbol, ttl).await?;
        }
        self.risk.clear_position(position.position_id).await?;
        Ok(())
    }
}
