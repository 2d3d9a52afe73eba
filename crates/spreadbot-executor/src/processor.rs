//! Order processing state machine.
//!
//! `RECEIVED -> SKIPPED | LEVERAGE_SET -> ORDER_SUBMITTED -> FILLED ->
//! PROTECTIVE_ORDERS_PLACED -> COMPLETE`. Every failure after the claim sets
//! a named cooldown on the symbol; skips never touch the exchange.

use crate::error::{ExecutorError, ExecutorResult};
use crate::fill::{Fill, FillConfirmer};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use spreadbot_core::{
    compute_volume, OrderCandidate, OrderSide, Settings, SettingsSource, Size, TokenBook,
    TokenConfig, VolumeSpec,
};
use spreadbot_exchange::{
    negotiate_leverage, protective_requests, DynExchange, EntryOrder, LeveragePlan, ProtectiveSpec,
};
use spreadbot_store::RiskState;
use spreadbot_telemetry::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// Outcomes
// ============================================================================

/// Why a candidate was dropped without any exchange call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnknownSymbol,
    Ignored,
    InProcess,
    Cooldown,
    /// Cooldown state could not be read.
    StoreUnavailable,
    MissingSettings(&'static str),
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownSymbol => "unknown_symbol",
            Self::Ignored => "ignored",
            Self::InProcess => "in_process",
            Self::Cooldown => "cooldown",
            Self::StoreUnavailable => "store_unavailable",
            Self::MissingSettings(_) => "missing_settings",
        }
    }
}

/// Stage at which a claimed candidate failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    Leverage,
    Sizing,
    Submit,
}

impl FailedStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leverage => "leverage",
            Self::Sizing => "sizing",
            Self::Submit => "submit",
        }
    }

    /// Cooldown applied after a failure at this stage.
    pub fn cooldown(&self, settings: &Settings) -> Duration {
        match self {
            Self::Leverage => settings.leverage_failure_cooldown(),
            Self::Sizing | Self::Submit => settings.order_failure_cooldown(),
        }
    }
}

/// Terminal result of one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    /// Entry placed. `position_id` is `None` when no fill was confirmed.
    Completed {
        position_id: Option<i64>,
        leverage: u32,
        volume: Size,
        protective_orders: usize,
    },
    Failed {
        stage: FailedStage,
        reason: String,
    },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "skipped",
            Self::Completed {
                position_id: Some(_),
                ..
            } => "filled",
            Self::Completed { .. } => "unconfirmed",
            Self::Failed { .. } => "failed",
        }
    }
}

struct Failure {
    stage: FailedStage,
    error: ExecutorError,
}

// ============================================================================
// OrderProcessor
// ============================================================================

/// Turns one candidate into an entry with protective orders.
pub struct OrderProcessor {
    api: DynExchange,
    book: Arc<TokenBook>,
    settings: Arc<dyn SettingsSource>,
    risk: RiskState,
}

impl OrderProcessor {
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

    pub fn book(&self) -> &Arc<TokenBook> {
        &self.book
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.current()
    }

    /// Process one candidate to completion.
    pub async fn process(&self, candidate: &OrderCandidate) -> Outcome {
        let settings = self.settings.current();
        let symbol = candidate.symbol.as_str();

        let token = match self.admit(&settings, symbol).await {
            Ok(token) => token,
            Err(reason) => {
                debug!(%symbol, reason = reason.as_str(), "Candidate skipped");
                return Outcome::Skipped(reason);
            }
        };

        // Claim the symbol; the guard releases it on every exit path.
        let Some(_guard) = self.book.try_begin_order(symbol) else {
            return Outcome::Skipped(SkipReason::InProcess);
        };
        info!(%symbol, spread = %candidate.spread_percent, "Processing candidate");

        match self.execute(&settings, &token, candidate).await {
            Ok(outcome) => outcome,
            Err(Failure { stage, error }) => {
                error!(%symbol, stage = stage.as_str(), error = %error, "Candidate failed");
                let ttl = stage.cooldown(&settings);
                if let Err(e) = self.risk.set_cooldown(symbol, ttl).await {
                    warn!(%symbol, error = %e, "Failed to set failure cooldown");
                }
                Outcome::Failed {
                    stage,
                    reason: error.to_string(),
                }
            }
        }
    }

    /// Skip rules. Nothing here calls the exchange.
    async fn admit(&self, settings: &Settings, symbol: &str) -> Result<TokenConfig, SkipReason> {
        let token = self.book.get(symbol).ok_or(SkipReason::UnknownSymbol)?;
        if token.is_ignored {
            return Err(SkipReason::Ignored);
        }
        if self.book.is_order_in_process(symbol) {
            return Err(SkipReason::InProcess);
        }
        if settings.use_cooldown {
            match self.risk.is_cooling_down(symbol).await {
                Ok(true) => return Err(SkipReason::Cooldown),
                Ok(false) => {}
                Err(e) => {
                    warn!(%symbol, error = %e, "Cooldown check failed");
                    return Err(SkipReason::StoreUnavailable);
                }
            }
        }
        if settings.primary_token().is_none() {
            return Err(SkipReason::MissingSettings("auth_token"));
        }
        if !settings
            .max_margin_per_order
            .is_some_and(|m| m > Decimal::ZERO)
        {
            return Err(SkipReason::MissingSettings("max_margin_per_order"));
        }
        if !settings.leverage.is_some_and(|l| l > 0) {
            return Err(SkipReason::MissingSettings("leverage"));
        }
        Ok(token)
    }

    async fn execute(
        &self,
        settings: &Settings,
        token: &TokenConfig,
        candidate: &OrderCandidate,
    ) -> Result<Outcome, Failure> {
        let symbol = token.symbol.as_str();
        let api = self.api.as_ref();

        // LEVERAGE_SET
        let target = settings.leverage.unwrap_or(1);
        let target = if token.max_leverage > 0 {
            target.min(token.max_leverage)
        } else {
            target
        };
        let negotiated = negotiate_leverage(
            api,
            LeveragePlan {
                symbol: symbol.to_string(),
                leverage: target,
                margin_mode: settings.margin_mode,
                hedge_mode: settings.hedge_mode,
                retry_delay: settings.leverage_retry_delay(),
            },
        )
        .await
        .map_err(|e| Failure {
            stage: FailedStage::Leverage,
            error: e.into(),
        })?;
        let leverage = negotiated.leverage;
        debug!(%symbol, leverage, one_way = negotiated.one_way_fallback, "Leverage set");

        // ORDER_SUBMITTED
        let margin = token.effective_margin(settings.max_margin_per_order.unwrap_or_default());
        let volume = compute_volume(
            margin,
            leverage,
            candidate.reference_price,
            VolumeSpec {
                contract_size: token.contract_size,
                vol_scale: token.vol_scale,
                max_volume: token.max_volume,
            },
        )
        .map_err(|e| Failure {
            stage: FailedStage::Sizing,
            error: e.into(),
        })?;

        let side = OrderSide::open_for_spread(candidate.spread_percent);
        let request = EntryOrder {
            symbol: symbol.to_string(),
            side,
            leverage,
            volume,
            margin_mode: settings.margin_mode,
            order_type: settings.entry_order_type,
            price: candidate.reference_price,
            price_scale: token.price_scale,
        }
        .into_request();
        info!(%symbol, ?side, %volume, leverage, %margin, "Submitting entry order");

        let order_id = self
            .submit(request)
            .await
            .map_err(|error| Failure {
                stage: FailedStage::Submit,
                error,
            })?;

        // FILLED
        let fill = FillConfirmer::new(api, &settings.fill_confirmation, settings.entry_order_type)
            .confirm(order_id.as_deref(), symbol, side.position_type())
            .await;

        // PROTECTIVE_ORDERS_PLACED
        let protective_orders = match &fill {
            Some(fill) => self.place_protective(settings, token, candidate, fill, leverage, volume).await,
            None => {
                warn!(%symbol, order_id = ?order_id, "No position id, protective orders not placed");
                0
            }
        };

        // COMPLETE
        let position_id = fill.as_ref().map(|f| f.position_id);
        if let Some(position_id) = position_id {
            if let Err(e) = self
                .risk
                .set_initial_spread(position_id, candidate.spread_percent)
                .await
            {
                warn!(%symbol, position_id, error = %e, "Failed to store initial spread");
            }
        }
        if settings.use_cooldown {
            if let Err(e) = self.risk.set_cooldown(symbol, settings.cooldown()).await {
                warn!(%symbol, error = %e, "Failed to set cooldown");
            } else {
                info!(%symbol, secs = settings.cooldown_seconds, "Cooldown set");
            }
        }

        Ok(Outcome::Completed {
            position_id,
            leverage,
            volume,
            protective_orders,
        })
    }

    /// Submit the entry; returns the exchange order id when one came back.
    async fn submit(&self, request: spreadbot_exchange::OrderRequest) -> ExecutorResult<Option<String>> {
        let result = self.api.create_order(request).await;
        let ok = matches!(&result, Ok(resp) if resp.is_ok());
        Metrics::order("entry", ok);

        let resp = result?;
        if !resp.is_ok() {
            return Err(ExecutorError::Rejected {
                code: resp.code,
                message: resp.message.unwrap_or_default(),
            });
        }
        Ok(resp.data.and_then(|d| d.order_id))
    }

    /// Submit TP/SL plan orders concurrently. Failures are logged only.
    async fn place_protective(
        &self,
        settings: &Settings,
        token: &TokenConfig,
        candidate: &OrderCandidate,
        fill: &Fill,
        leverage: u32,
        submitted: Size,
    ) -> usize {
        let spec = ProtectiveSpec {
            symbol: token.symbol.clone(),
            position_type: OrderSide::open_for_spread(candidate.spread_percent).position_type(),
            position_id: fill.position_id,
            fill_price: fill.price.unwrap_or(candidate.reference_price),
            volume: fill.volume.unwrap_or(submitted),
            price_scale: token.price_scale,
            margin_mode: settings.margin_mode,
            leverage,
            stop_loss_pct: settings.stop_loss_percent,
            take_profit_pct: settings.take_profit_percent,
        };
        let requests = protective_requests(&spec);
        if requests.is_empty() {
            return 0;
        }

        let api = self.api.as_ref();
        let results = join_all(requests.into_iter().map(|(kind, req)| async move {
            let trigger = req.trigger_price;
            (kind, trigger, api.create_plan_order(req).await)
        }))
        .await;

        let mut placed = 0;
        for (kind, trigger, result) in results {
            match result {
                Ok(resp) if resp.is_ok() => {
                    placed += 1;
                    Metrics::order("plan", true);
                    info!(symbol = %spec.symbol, kind = kind.as_str(), %trigger, "Protective order placed");
                }
                Ok(resp) => {
                    Metrics::order("plan", false);
                    error!(symbol = %spec.symbol, kind = kind.as_str(), code = resp.code, message = ?resp.message, "Protective order rejected");
                }
                Err(e) => {
                    Metrics::order("plan", false);
                    error!(symbol = %spec.symbol, kind = kind.as_str(), error = %e, "Protective order failed");
                }
            }
        }
        placed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_cooldowns_are_named_settings() {
        let settings = Settings::from_toml(
            "leverage_failure_cooldown_seconds = 45\norder_failure_cooldown_seconds = 90",
        )
        .unwrap();
        assert_eq!(FailedStage::Leverage.cooldown(&settings), Duration::from_secs(45));
        assert_eq!(FailedStage::Submit.cooldown(&settings), Duration::from_secs(90));
        assert_eq!(FailedStage::Sizing.cooldown(&settings), Duration::from_secs(90));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::Skipped(SkipReason::Cooldown).label(), "skipped");
        let done = Outcome::Completed {
            position_id: None,
            leverage: 10,
            volume: Size::ONE,
            protective_orders: 0,
        };
        assert_eq!(done.label(), "unconfirmed");
    }
}
