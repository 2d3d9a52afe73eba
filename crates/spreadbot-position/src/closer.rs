//! Reduce-only position closing.

use crate::error::{PositionError, PositionResult};
use crate::strategy::CloseReason;
use spreadbot_core::{Position, Size};
use spreadbot_exchange::{close_request, ExchangeApi};
use spreadbot_telemetry::Metrics;
use tracing::{error, info, warn};

/// Sends market-to-current reduce-only closes.
pub struct PositionCloser<'a> {
    api: &'a dyn ExchangeApi,
}

impl<'a> PositionCloser<'a> {
    pub fn new(api: &'a dyn ExchangeApi) -> Self {
        Self { api }
    }

    /// Close `volume` of `position` (`None` closes everything held).
    ///
    /// Returns `false` when there was nothing to close. A rejected close is
    /// an error so callers leave their state untouched for the next cycle.
    pub async fn close(&self, position: &Position, volume: Option<Size>, reason: CloseReason) -> PositionResult<bool> {
        let requested = volume.unwrap_or(position.hold_vol);
        let Some(request) = close_request(position, requested) else {
            warn!(
                symbol = %position.symbol,
                position_id = position.position_id,
                %requested,
                reason = reason.as_str(),
                "Nothing to close, order not sent"
            );
            return Ok(false);
        };

        let partial = request.vol < position.hold_vol;
        info!(
            symbol = %position.symbol,
            position_id = position.position_id,
            vol = %request.vol,
            partial,
            reason = reason.as_str(),
            "Closing position"
        );

        let result = self.api.create_order(request).await;
        let ok = matches!(&result, Ok(resp) if resp.is_ok());
        Metrics::order("close", ok);

        let resp = result?;
        if !resp.is_ok() {
            error!(
                symbol = %position.symbol,
                position_id = position.position_id,
                code = resp.code,
                message = ?resp.message,
                "Close rejected"
            );
            return Err(PositionError::CloseRejected {
                position_id: position.position_id,
                code: resp.code,
                message: resp.message.unwrap_or_default(),
            });
        }

        Metrics::position_closed(reason.as_str());
        info!(symbol = %position.symbol, position_id = position.position_id, "Position close accepted");
        Ok(true)
    }
}
