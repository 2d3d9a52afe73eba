//! Exchange API trait.
//!
//! Provides a trait-based abstraction over the futures REST API so the
//! order engine and position monitor can run against a recording mock.

use crate::error::ExchangeResult;
use crate::wire::{
    ApiResponse, ContractDetail, CreateOrderData, LeverageData, LeverageRequest, OrderDetail,
    OrderRequest, PlanOrderRequest,
};
use parking_lot::Mutex;
use serde_json::Value;
use spreadbot_core::{Position, PositionType, RawPosition, Ticker};
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Futures exchange operations.
///
/// Transport failures are `Err`; business failures come back in the
/// envelope so callers can branch on `code`.
pub trait ExchangeApi: Send + Sync {
    /// Log-safe account label.
    fn account(&self) -> String;

    fn create_order(&self, req: OrderRequest)
        -> BoxFuture<'_, ExchangeResult<ApiResponse<CreateOrderData>>>;

    fn create_plan_order(&self, req: PlanOrderRequest)
        -> BoxFuture<'_, ExchangeResult<ApiResponse<Value>>>;

    fn cancel_all_orders(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<Value>>>;

    fn cancel_all_plan_orders(&self, symbol: String)
        -> BoxFuture<'_, ExchangeResult<ApiResponse<Value>>>;

    fn change_leverage(&self, req: LeverageRequest)
        -> BoxFuture<'_, ExchangeResult<ApiResponse<LeverageData>>>;

    fn open_positions(&self) -> BoxFuture<'_, ExchangeResult<ApiResponse<Vec<RawPosition>>>>;

    fn order_by_id(&self, order_id: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<OrderDetail>>>;

    fn ticker(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<Ticker>>>;

    fn tickers(&self) -> BoxFuture<'_, ExchangeResult<ApiResponse<Vec<Ticker>>>>;

    fn contract_details(&self) -> BoxFuture<'_, ExchangeResult<ApiResponse<Vec<ContractDetail>>>>;
}

/// Arc wrapper for ExchangeApi trait objects.
pub type DynExchange = Arc<dyn ExchangeApi>;

/// Holding positions, validated.
///
/// Incomplete rows are logged and skipped. A failed envelope yields `None`
/// ("no data this cycle").
pub async fn holding_positions(api: &dyn ExchangeApi) -> ExchangeResult<Option<Vec<Position>>> {
    let resp = api.open_positions().await?;
    if !resp.is_ok() {
        warn!(account = %api.account(), code = resp.code, message = ?resp.message, "open_positions rejected");
        return Ok(None);
    }
    let positions = resp
        .data
        .unwrap_or_default()
        .into_iter()
        .filter_map(|raw| match Position::try_from(raw) {
            Ok(pos) if pos.is_holding() => Some(pos),
            Ok(_) => None,
            Err(e) => {
                warn!(account = %api.account(), error = %e, "Skipping incomplete position row");
                None
            }
        })
        .collect();
    Ok(Some(positions))
}

/// All tickers keyed by symbol; `None` when unavailable.
pub async fn ticker_map(api: &dyn ExchangeApi) -> ExchangeResult<Option<HashMap<String, Ticker>>> {
    let resp = api.tickers().await?;
    if !resp.is_ok() {
        warn!(code = resp.code, message = ?resp.message, "tickers rejected");
        return Ok(None);
    }
    match resp.data {
        Some(rows) if !rows.is_empty() => Ok(Some(
            rows.into_iter().map(|t| (t.symbol.clone(), t)).collect(),
        )),
        _ => Ok(None),
    }
}

/// Find the holding position id for `symbol` and `side` in raw rows.
///
/// With `side == None` any holding position on the symbol matches.
pub fn pick_position_id(rows: &[RawPosition], symbol: &str, side: Option<PositionType>) -> Option<i64> {
    rows.iter()
        .filter(|r| r.symbol.as_deref() == Some(symbol))
        .filter(|r| r.state == Some(spreadbot_core::POSITION_STATE_HOLDING))
        .filter(|r| match side {
            Some(side) => r.position_type == Some(side.code()),
            None => true,
        })
        .find_map(|r| r.position_id)
}

/// One recorded call against [`MockExchange`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    CreateOrder(OrderRequest),
    CreatePlanOrder(PlanOrderRequest),
    CancelAllOrders(String),
    CancelAllPlanOrders(String),
    ChangeLeverage(LeverageRequest),
    OpenPositions,
    OrderById(String),
    Ticker(String),
    Tickers,
    ContractDetails,
}

#[derive(Debug, Default)]
struct Script {
    create_order: VecDeque<ApiResponse<CreateOrderData>>,
    plan_order: VecDeque<ApiResponse<Value>>,
    leverage: VecDeque<ApiResponse<LeverageData>>,
    order_detail: VecDeque<ApiResponse<OrderDetail>>,
    positions: VecDeque<Vec<RawPosition>>,
    steady_positions: Vec<RawPosition>,
    tickers: Vec<Ticker>,
    contracts: Vec<ContractDetail>,
}

/// Recording exchange mock for testing.
///
/// Each scripted queue is consumed in order; an empty queue falls back to
/// a plain success (or the steady value set for positions and tickers).
#[derive(Debug, Default)]
pub struct MockExchange {
    calls: Mutex<Vec<MockCall>>,
    script: Mutex<Script>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_create_order(&self, resp: ApiResponse<CreateOrderData>) {
        self.script.lock().create_order.push_back(resp);
    }

    pub fn push_plan_order(&self, resp: ApiResponse<Value>) {
        self.script.lock().plan_order.push_back(resp);
    }

    pub fn push_leverage(&self, resp: ApiResponse<LeverageData>) {
        self.script.lock().leverage.push_back(resp);
    }

    pub fn push_order_detail(&self, resp: ApiResponse<OrderDetail>) {
        self.script.lock().order_detail.push_back(resp);
    }

    /// Positions returned by the next `open_positions` call only.
    pub fn push_positions(&self, rows: Vec<RawPosition>) {
        self.script.lock().positions.push_back(rows);
    }

    /// Positions returned once the one-shot queue is empty.
    pub fn set_positions(&self, rows: Vec<RawPosition>) {
        self.script.lock().steady_positions = rows;
    }

    pub fn set_tickers(&self, tickers: Vec<Ticker>) {
        self.script.lock().tickers = tickers;
    }

    pub fn set_contracts(&self, contracts: Vec<ContractDetail>) {
        self.script.lock().contracts = contracts;
    }

    /// Recorded calls.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn leverage_calls(&self) -> Vec<LeverageRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::ChangeLeverage(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::CreateOrder(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn plan_orders(&self) -> Vec<PlanOrderRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::CreatePlanOrder(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }
}

impl ExchangeApi for MockExchange {
    fn account(&self) -> String {
        "mock".to_string()
    }

    fn create_order(&self, req: OrderRequest) -> BoxFuture<'_, ExchangeResult<ApiResponse<CreateOrderData>>> {
        Box::pin(async move {
            self.record(MockCall::CreateOrder(req));
            Ok(self
                .script
                .lock()
                .create_order
                .pop_front()
                .unwrap_or_else(|| ApiResponse::ok(CreateOrderData::default())))
        })
    }

    fn create_plan_order(&self, req: PlanOrderRequest) -> BoxFuture<'_, ExchangeResult<ApiResponse<Value>>> {
        Box::pin(async move {
            self.record(MockCall::CreatePlanOrder(req));
            Ok(self
                .script
                .lock()
                .plan_order
                .pop_front()
                .unwrap_or_else(ApiResponse::ok_empty))
        })
    }

    fn cancel_all_orders(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<Value>>> {
        Box::pin(async move {
            self.record(MockCall::CancelAllOrders(symbol));
            Ok(ApiResponse::ok_empty())
        })
    }

    fn cancel_all_plan_orders(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<Value>>> {
        Box::pin(async move {
            self.record(MockCall::CancelAllPlanOrders(symbol));
            Ok(ApiResponse::ok_empty())
        })
    }

    fn change_leverage(&self, req: LeverageRequest) -> BoxFuture<'_, ExchangeResult<ApiResponse<LeverageData>>> {
        Box::pin(async move {
            self.record(MockCall::ChangeLeverage(req));
            Ok(self
                .script
                .lock()
                .leverage
                .pop_front()
                .unwrap_or_else(ApiResponse::ok_empty))
        })
    }

    fn open_positions(&self) -> BoxFuture<'_, ExchangeResult<ApiResponse<Vec<RawPosition>>>> {
        Box::pin(async move {
            self.record(MockCall::OpenPositions);
            let rows = {
                let mut script = self.script.lock();
                match script.positions.pop_front() {
                    Some(rows) => rows,
                    None => script.steady_positions.clone(),
                }
            };
            Ok(ApiResponse::ok(rows))
        })
    }

    fn order_by_id(&self, order_id: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<OrderDetail>>> {
        Box::pin(async move {
            self.record(MockCall::OrderById(order_id));
            Ok(self
                .script
                .lock()
                .order_detail
                .pop_front()
                .unwrap_or_else(ApiResponse::ok_empty))
        })
    }

    fn ticker(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<Ticker>>> {
        Box::pin(async move {
            let found = self
                .script
                .lock()
                .tickers
                .iter()
                .find(|t| t.symbol == symbol)
                .cloned();
            self.record(MockCall::Ticker(symbol));
            Ok(match found {
                Some(t) => ApiResponse::ok(t),
                None => ApiResponse::ok_empty(),
            })
        })
    }

    fn tickers(&self) -> BoxFuture<'_, ExchangeResult<ApiResponse<Vec<Ticker>>>> {
        Box::pin(async move {
            self.record(MockCall::Tickers);
            Ok(ApiResponse::ok(self.script.lock().tickers.clone()))
        })
    }

    fn contract_details(&self) -> BoxFuture<'_, ExchangeResult<ApiResponse<Vec<ContractDetail>>>> {
        Box::pin(async move {
            self.record(MockCall::ContractDetails);
            Ok(ApiResponse::ok(self.script.lock().contracts.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::CODE_WRONG_MODE;
    use rust_decimal_macros::dec;

    fn raw(symbol: &str, id: i64, side: PositionType, state: i64) -> RawPosition {
        RawPosition {
            symbol: Some(symbol.into()),
            position_id: Some(id),
            position_type: Some(side.code()),
            open_avg_price: Some(dec!(2)),
            leverage: Some(10),
            hold_vol: Some(dec!(100)),
            create_time: Some(1_700_000_000_000),
            state: Some(state),
        }
    }

    #[test]
    fn test_pick_position_id_by_side() {
        let rows = vec![
            raw("ABC_USDT", 1, PositionType::Long, 1),
            raw("ABC_USDT", 2, PositionType::Short, 1),
            raw("XYZ_USDT", 3, PositionType::Short, 1),
            raw("ABC_USDT", 4, PositionType::Short, 3),
        ];
        assert_eq!(pick_position_id(&rows, "ABC_USDT", Some(PositionType::Short)), Some(2));
        assert_eq!(pick_position_id(&rows, "ABC_USDT", None), Some(1));
        assert_eq!(pick_position_id(&rows, "NOPE_USDT", None), None);
    }

    #[tokio::test]
    async fn test_holding_positions_skips_incomplete_rows() {
        let mock = MockExchange::new();
        let mut broken = raw("ABC_USDT", 2, PositionType::Long, 1);
        broken.open_avg_price = None;
        mock.set_positions(vec![raw("ABC_USDT", 1, PositionType::Long, 1), broken]);

        let positions = holding_positions(&mock).await.unwrap().unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].position_id, 1);
    }

    #[tokio::test]
    async fn test_mock_scripts_then_defaults() {
        let mock = MockExchange::new();
        mock.push_leverage(ApiResponse::err(CODE_WRONG_MODE, "mode"));

        let req = LeverageRequest::ByPosition {
            position_id: 1,
            leverage: 5,
        };
        let first = mock.change_leverage(req.clone()).await.unwrap();
        let second = mock.change_leverage(req).await.unwrap();
        assert!(first.has_code(CODE_WRONG_MODE));
        assert!(second.is_ok());
        assert_eq!(mock.leverage_calls().len(), 2);
    }
}
