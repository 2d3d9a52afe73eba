//! Signed, rate-limited MEXC futures client.
//!
//! - `AdmissionController`: process-wide sliding-window rate limiter
//! - `MexcClient`: per-account signed REST client
//! - `ExchangeApi`: trait seam with a recording `MockExchange`
//! - Leverage negotiation and order payload builders

pub mod api;
pub mod client;
pub mod error;
pub mod leverage;
pub mod payload;
pub mod rate_limiter;
pub mod signer;
pub mod wire;

pub use api::{
    holding_positions, pick_position_id, ticker_map, BoxFuture, DynExchange, ExchangeApi,
    MockCall, MockExchange,
};
pub use client::{ClientConfig, MexcClient, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use error::{ExchangeError, ExchangeResult};
pub use leverage::{negotiate_leverage, LeverageNegotiator, LeverageOutcome, LeveragePlan};
pub use payload::{close_request, protective_requests, EntryOrder, ProtectiveKind, ProtectiveSpec};
pub use rate_limiter::{AdmissionController, DEFAULT_REQUESTS_PER_SECOND};
pub use signer::{Clock, RequestSigner, SystemClock};
pub use wire::{
    ApiResponse, ContractDetail, CreateOrderData, LeverageData, LeverageRequest, OrderDetail,
    OrderRequest, PlanOrderRequest,
};
