//! Leverage negotiation.
//!
//! Hedge mode sets long and short leverage independently. Open orders
//! (`2019`) are cancelled and the failed side retried once; a double `600`
//! means the account is actually one-way and a single one-way call is made.

use crate::api::{pick_position_id, ExchangeApi};
use crate::error::{ExchangeError, ExchangeResult};
use crate::wire::{ApiResponse, LeverageData, LeverageRequest, CODE_OPEN_ORDERS, CODE_WRONG_MODE};
use spreadbot_core::{MarginMode, PositionType, RawPosition};
use std::time::Duration;
use tracing::{info, warn};

/// Leverage change parameters for one symbol.
#[derive(Debug, Clone)]
pub struct LeveragePlan {
    pub symbol: String,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub hedge_mode: bool,
    /// Pause between cancelling open orders and the retry.
    pub retry_delay: Duration,
}

/// Result of a successful negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeverageOutcome {
    /// Leverage echoed by the exchange, else the requested one.
    pub leverage: u32,
    /// The hedge attempt fell back to a one-way call.
    pub one_way_fallback: bool,
}

type Reply = ExchangeResult<ApiResponse<LeverageData>>;

fn is_ok(reply: &Reply) -> bool {
    matches!(reply, Ok(r) if r.is_ok())
}

fn has_code(reply: &Reply, code: i64) -> bool {
    matches!(reply, Ok(r) if r.has_code(code))
}

fn describe(reply: &Reply) -> String {
    match reply {
        Ok(r) => format!("code={} message={}", r.code, r.message.as_deref().unwrap_or("")),
        Err(e) => e.to_string(),
    }
}

fn echoed(reply: &Reply) -> Option<u32> {
    reply
        .as_ref()
        .ok()
        .and_then(|r| r.data.as_ref())
        .and_then(|d| d.leverage)
}

/// Runs the leverage protocol against one account.
pub struct LeverageNegotiator<'a> {
    api: &'a dyn ExchangeApi,
    plan: LeveragePlan,
    positions: Vec<RawPosition>,
}

impl<'a> LeverageNegotiator<'a> {
    pub fn new(api: &'a dyn ExchangeApi, plan: LeveragePlan) -> Self {
        Self {
            api,
            plan,
            positions: Vec::new(),
        }
    }

    /// Request for `side`: by position id when one is open, else by parameters.
    fn request(&self, side: Option<PositionType>, open_type: MarginMode) -> LeverageRequest {
        match pick_position_id(&self.positions, &self.plan.symbol, side) {
            Some(position_id) => LeverageRequest::ByPosition {
                position_id,
                leverage: self.plan.leverage,
            },
            None => LeverageRequest::ByParams {
                open_type,
                leverage: self.plan.leverage,
                symbol: self.plan.symbol.clone(),
                position_type: side.unwrap_or(PositionType::Long),
            },
        }
    }

    async fn send(&self, side: Option<PositionType>) -> Reply {
        let req = self.request(side, self.plan.margin_mode);
        info!(symbol = %self.plan.symbol, ?req, "change_leverage");
        self.api.change_leverage(req).await
    }

    /// Run the protocol.
    pub async fn run(mut self) -> ExchangeResult<LeverageOutcome> {
        // Positions are looked up once; a failed lookup just means "none".
        self.positions = match self.api.open_positions().await {
            Ok(resp) if resp.is_ok() => resp.data.unwrap_or_default(),
            Ok(resp) => {
                warn!(symbol = %self.plan.symbol, code = resp.code, "Position lookup rejected, assuming none");
                Vec::new()
            }
            Err(e) => {
                warn!(symbol = %self.plan.symbol, error = %e, "Position lookup failed, assuming none");
                Vec::new()
            }
        };

        if self.plan.hedge_mode {
            self.run_hedge().await
        } else {
            self.run_one_way().await
        }
    }

    async fn run_hedge(&self) -> ExchangeResult<LeverageOutcome> {
        let symbol = &self.plan.symbol;
        let mut long = self.send(Some(PositionType::Long)).await;
        let mut short = self.send(Some(PositionType::Short)).await;

        if is_ok(&long) && is_ok(&short) {
            return Ok(self.outcome(&long, false));
        }

        if has_code(&long, CODE_OPEN_ORDERS) || has_code(&short, CODE_OPEN_ORDERS) {
            warn!(%symbol, "Open orders block leverage change, cancelling and retrying");
            if let Err(e) = self.api.cancel_all_orders(symbol.clone()).await {
                warn!(%symbol, error = %e, "cancel_all_orders failed");
            }
            if let Err(e) = self.api.cancel_all_plan_orders(symbol.clone()).await {
                warn!(%symbol, error = %e, "cancel_all_plan_orders failed");
            }
            tokio::time::sleep(self.plan.retry_delay).await;

            if !is_ok(&long) {
                long = self.send(Some(PositionType::Long)).await;
            }
            if !is_ok(&short) {
                short = self.send(Some(PositionType::Short)).await;
            }
            if is_ok(&long) && is_ok(&short) {
                return Ok(self.outcome(&long, false));
            }
        }

        if has_code(&long, CODE_WRONG_MODE) && has_code(&short, CODE_WRONG_MODE) {
            warn!(%symbol, "Both hedge sides answered 600, trying one-way");
            let one_way = self.send(None).await;
            if is_ok(&one_way) {
                return Ok(self.outcome(&one_way, true));
            }
            return Err(ExchangeError::Leverage(format!(
                "{symbol}: one-way fallback failed: {}",
                describe(&one_way)
            )));
        }

        Err(ExchangeError::Leverage(format!(
            "{symbol}: long [{}] short [{}]",
            describe(&long),
            describe(&short)
        )))
    }

    async fn run_one_way(&self) -> ExchangeResult<LeverageOutcome> {
        let symbol = &self.plan.symbol;
        let first_req = self.request(None, self.plan.margin_mode);
        info!(%symbol, req = ?first_req, "change_leverage (one-way)");
        let reply = self.api.change_leverage(first_req.clone()).await;
        if is_ok(&reply) {
            return Ok(self.outcome(&reply, false));
        }

        if has_code(&reply, CODE_WRONG_MODE) {
            if let Some(flipped) = first_req.with_flipped_open_type() {
                warn!(%symbol, "600 on one-way leverage, retrying with flipped margin mode");
                let retry = self.api.change_leverage(flipped).await;
                if is_ok(&retry) {
                    return Ok(self.outcome(&retry, false));
                }
                return Err(ExchangeError::Leverage(format!(
                    "{symbol}: flipped margin mode failed: {}",
                    describe(&retry)
                )));
            }
        }

        Err(ExchangeError::Leverage(format!("{symbol}: {}", describe(&reply))))
    }

    fn outcome(&self, reply: &Reply, one_way_fallback: bool) -> LeverageOutcome {
        LeverageOutcome {
            leverage: echoed(reply).filter(|l| *l > 0).unwrap_or(self.plan.leverage),
            one_way_fallback,
        }
    }
}

/// Run the leverage protocol for `plan` against `api`.
pub async fn negotiate_leverage(api: &dyn ExchangeApi, plan: LeveragePlan) -> ExchangeResult<LeverageOutcome> {
    LeverageNegotiator::new(api, plan).run().await
}
