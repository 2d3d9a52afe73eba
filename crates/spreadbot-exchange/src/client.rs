//! HTTP client for the MEXC futures API.
//!
//! Every request first waits on the shared [`AdmissionController`]; private
//! endpoints are signed per [`crate::signer`].

use crate::api::{BoxFuture, ExchangeApi};
use crate::error::{ExchangeError, ExchangeResult};
use crate::rate_limiter::AdmissionController;
use crate::signer::{Clock, RequestSigner, SystemClock, EMPTY_BODY, NONCE_HEADER, SIGN_HEADER};
use crate::wire::{
    ApiResponse, CancelAllRequest, ContractDetail, CreateOrderData, LeverageData, LeverageRequest,
    OrderDetail, OrderRequest, PlanOrderRequest,
};
use reqwest::header::{ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;
use spreadbot_core::{AuthToken, RawPosition, Ticker};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default base URL of the futures API.
pub const DEFAULT_BASE_URL: &str = "https://futures.mexc.com";

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const PATH_ORDER_CREATE: &str = "/api/v1/private/order/create";
const PATH_ORDER_CANCEL_ALL: &str = "/api/v1/private/order/cancel_all";
const PATH_ORDER_GET: &str = "/api/v1/private/order/get";
const PATH_PLAN_PLACE: &str = "/api/v1/private/planorder/place";
const PATH_PLAN_CANCEL_ALL: &str = "/api/v1/private/planorder/cancel_all";
const PATH_CHANGE_LEVERAGE: &str = "/api/v1/private/position/change_leverage";
const PATH_OPEN_POSITIONS: &str = "/api/v1/private/position/open_positions";
const PATH_TICKER: &str = "/api/v1/contract/ticker";
const PATH_CONTRACT_DETAIL: &str = "/api/v1/contract/detail";

/// Connection settings shared by every account client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Signed, rate-limited client for one account.
pub struct MexcClient<C: Clock = SystemClock> {
    http: Client,
    base_url: String,
    signer: RequestSigner<C>,
    limiter: Arc<AdmissionController>,
}

impl MexcClient<SystemClock> {
    /// Create a client for `token`, sharing `limiter` with every other client.
    pub fn new(
        config: &ClientConfig,
        token: AuthToken,
        limiter: Arc<AdmissionController>,
    ) -> ExchangeResult<Self> {
        Self::with_clock(config, token, limiter, SystemClock)
    }
}

impl<C: Clock> MexcClient<C> {
    pub fn with_clock(
        config: &ClientConfig,
        token: AuthToken,
        limiter: Arc<AdmissionController>,
        clock: C,
    ) -> ExchangeResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExchangeError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            signer: RequestSigner::new(token, clock),
            limiter,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn signed_post<B: Serialize>(&self, path: &str, body: &B) -> ExchangeResult<ApiResponse<Value>> {
        let body = serde_json::to_string(body)?;
        self.signed(Method::POST, path, body).await
    }

    async fn signed_get(&self, path: &str) -> ExchangeResult<ApiResponse<Value>> {
        self.signed(Method::GET, path, EMPTY_BODY.to_string()).await
    }

    async fn signed(&self, method: Method, path: &str, body: String) -> ExchangeResult<ApiResponse<Value>> {
        self.limiter.acquire().await;
        let signature = self.signer.sign(&body);
        debug!(%method, path, "Signed request");

        let mut request = self
            .http
            .request(method.clone(), self.url(path))
            .header(AUTHORIZATION, self.signer.token().expose())
            .header(ACCEPT_LANGUAGE, "en-US")
            .header(CONTENT_TYPE, "application/json")
            .header(NONCE_HEADER, signature.nonce)
            .header(SIGN_HEADER, signature.sign);
        if method == Method::POST {
            request = request.body(body);
        }

        decode(request.send().await?).await
    }

    async fn public_get(&self, path: &str, query: &[(&str, &str)]) -> ExchangeResult<ApiResponse<Value>> {
        self.limiter.acquire().await;
        let response = self.http.get(self.url(path)).query(query).send().await?;
        decode(response).await
    }
}

/// Decode the envelope; bodies that are not an envelope are errors.
async fn decode(response: reqwest::Response) -> ExchangeResult<ApiResponse<Value>> {
    let status = response.status();
    let text = response.text().await?;
    match serde_json::from_str::<ApiResponse<Value>>(&text) {
        Ok(envelope) => {
            if !envelope.is_ok() {
                warn!(
                    status = status.as_u16(),
                    code = envelope.code,
                    message = ?envelope.message,
                    "Exchange returned failure"
                );
            }
            Ok(envelope)
        }
        Err(e) if status.is_success() => Err(ExchangeError::Decode(format!("{e}: {}", truncate(&text)))),
        Err(_) => Err(ExchangeError::Status {
            status: status.as_u16(),
            body: truncate(&text),
        }),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(500).collect()
}

impl<C: Clock + 'static> ExchangeApi for MexcClient<C> {
    fn account(&self) -> String {
        self.signer.token().fingerprint()
    }

    fn create_order(&self, req: OrderRequest) -> BoxFuture<'_, ExchangeResult<ApiResponse<CreateOrderData>>> {
        Box::pin(async move { Ok(self.signed_post(PATH_ORDER_CREATE, &req).await?.typed()) })
    }

    fn create_plan_order(&self, req: PlanOrderRequest) -> BoxFuture<'_, ExchangeResult<ApiResponse<Value>>> {
        Box::pin(async move { self.signed_post(PATH_PLAN_PLACE, &req).await })
    }

    fn cancel_all_orders(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<Value>>> {
        Box::pin(async move {
            self.signed_post(PATH_ORDER_CANCEL_ALL, &CancelAllRequest { symbol })
                .await
        })
    }

    fn cancel_all_plan_orders(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<Value>>> {
        Box::pin(async move {
            self.signed_post(PATH_PLAN_CANCEL_ALL, &CancelAllRequest { symbol })
                .await
        })
    }

    fn change_leverage(&self, req: LeverageRequest) -> BoxFuture<'_, ExchangeResult<ApiResponse<LeverageData>>> {
        Box::pin(async move { Ok(self.signed_post(PATH_CHANGE_LEVERAGE, &req).await?.typed()) })
    }

    fn open_positions(&self) -> BoxFuture<'_, ExchangeResult<ApiResponse<Vec<RawPosition>>>> {
        Box::pin(async move { Ok(self.signed_get(PATH_OPEN_POSITIONS).await?.rows()) })
    }

    fn order_by_id(&self, order_id: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<OrderDetail>>> {
        Box::pin(async move {
            let path = format!("{PATH_ORDER_GET}/{order_id}");
            Ok(self.signed_get(&path).await?.typed())
        })
    }

    fn ticker(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<ApiResponse<Ticker>>> {
        Box::pin(async move {
            Ok(self
                .public_get(PATH_TICKER, &[("symbol", symbol.as_str())])
                .await?
                .typed())
        })
    }

    fn tickers(&self) -> BoxFuture<'_, ExchangeResult<ApiResponse<Vec<Ticker>>>> {
        Box::pin(async move { Ok(self.public_get(PATH_TICKER, &[]).await?.rows()) })
    }

    fn contract_details(&self) -> BoxFuture<'_, ExchangeResult<ApiResponse<Vec<ContractDetail>>>> {
        Box::pin(async move { Ok(self.public_get(PATH_CONTRACT_DETAIL, &[]).await?.rows()) })
    }
}
