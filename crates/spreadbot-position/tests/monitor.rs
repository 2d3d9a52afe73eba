//! Monitor cycles against the recording exchange mock.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spreadbot_core::{OrderSide, Price, RawPosition, Settings, Size, StaticSettings, Ticker, TokenBook, TokenConfig};
use spreadbot_exchange::{ApiResponse, MockCall, MockExchange};
use spreadbot_position::{Action, CloseReason, PositionMonitor};
use spreadbot_store::{MemoryStore, RiskState, StateKey};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SYMBOL: &str = "ABC_USDT";
const ID: i64 = 42;

struct Harness {
    mock: Arc<MockExchange>,
    store: Arc<MemoryStore>,
    risk: RiskState,
    monitor: PositionMonitor,
    settings: Settings,
}

impl Harness {
    fn new(toml: &str) -> Self {
        let mock = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let risk = RiskState::new(store.clone());
        let book = Arc::new(TokenBook::from_configs(vec![TokenConfig {
            is_ignored: false,
            price_scale: 4,
            vol_scale: 0,
            ..TokenConfig::new(SYMBOL)
        }]));
        let settings = Settings::from_toml(toml).unwrap();
        let monitor = PositionMonitor::new(
            mock.clone(),
            book,
            Arc::new(StaticSettings::new(settings.clone())),
            risk.clone(),
        );
        Self {
            mock,
            store,
            risk,
            monitor,
            settings,
        }
    }

    fn hold(&self, hold_vol: Decimal, created_ms_ago: i64) {
        self.mock.set_positions(vec![RawPosition {
            symbol: Some(SYMBOL.into()),
            position_id: Some(ID),
            position_type: Some(1),
            open_avg_price: Some(dec!(2.0)),
            leverage: Some(10),
            hold_vol: Some(hold_vol),
            create_time: Some(chrono::Utc::now().timestamp_millis() - created_ms_ago),
            state: Some(1),
        }]);
    }

    fn price(&self, last: Decimal) {
        self.mock.set_tickers(vec![Ticker {
            symbol: SYMBOL.into(),
            last_price: Price::new(last),
            bid1: None,
            ask1: None,
            timestamp: None,
        }]);
    }

    async fn cycle(&self) -> spreadbot_position::CycleReport {
        self.monitor.run_cycle(&self.settings).await.unwrap()
    }

    fn keys(&self) -> Vec<String> {
        self.store.keys()
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_loss_closes_once_and_clears_keys() {
    let h = Harness::new("stop_loss_percent = 5\nuse_trailing_stop = true");
    h.risk.set_initial_spread(ID, dec!(4.2)).await.unwrap();
    h.risk.set_peak_price(ID, Price::new(dec!(2.2))).await.unwrap();
    h.hold(dec!(250), 0);
    // -0.6% move at 10x is -6%.
    h.price(dec!(1.988));

    let report = h.cycle().await;
    assert_eq!(report.actions, vec![(ID, Action::Closed(CloseReason::StopLoss))]);

    let orders = h.mock.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::CloseLong);
    assert_eq!(orders[0].vol.inner(), dec!(250));
    assert_eq!(h.keys(), vec!["cooldown:ABC_USDT".to_string()]);
    assert_eq!(
        h.store.ttl(&StateKey::cooldown(SYMBOL)),
        Some(Duration::from_secs(600))
    );

    h.mock.set_positions(vec![]);
    let report = h.cycle().await;
    assert!(report.actions.is_empty());
    assert_eq!(h.mock.orders().len(), 1);
}

#[tokio::test]
async fn test_close_clears_markers_of_unconfigured_targets() {
    // No scale-out targets configured now; these fired under older settings.
    let h = Harness::new("stop_loss_percent = 5");
    h.risk.mark_scale_out_hit(ID, dec!(12.5)).await.unwrap();
    h.risk.try_lock_pyramid(ID, 2).await.unwrap();
    h.hold(dec!(250), 0);
    h.price(dec!(1.9));

    let report = h.cycle().await;
    assert_eq!(report.actions, vec![(ID, Action::Closed(CloseReason::StopLoss))]);
    assert_eq!(h.keys(), vec!["cooldown:ABC_USDT".to_string()]);
}

#[tokio::test]
async fn test_rejected_close_keeps_state() {
    let h = Harness::new("stop_loss_percent = 5");
    h.risk.set_initial_spread(ID, dec!(4.2)).await.unwrap();
    h.hold(dec!(250), 0);
    h.price(dec!(1.9));
    h.mock.push_create_order(ApiResponse::err(2009, "busy"));

    let report = h.cycle().await;
    assert_eq!(report.errors, 1);
    assert!(report.actions.is_empty());
    assert_eq!(h.keys(), vec![format!("initial_spread:{ID}")]);
}

#[tokio::test]
async fn test_scale_out_targets_fire_once() {
    let h = Harness::new(
        r#"
use_scaling_out = true
scale_out_targets = [
    { pnl_percent = 20, close_fraction = 0.5 },
    { pnl_percent = 10, close_fraction = 0.5 },
]
"#,
    );
    h.hold(dec!(250), 0);
    h.price(dec!(2.03));

    let report = h.cycle().await;
    assert_eq!(
        report.actions,
        vec![(
            ID,
            Action::ScaledOut {
                target: dec!(10),
                volume: Size::new(dec!(125)),
            }
        )]
    );

    // Same PnL after the partial close: the first target is spent.
    h.hold(dec!(125), 0);
    assert!(h.cycle().await.actions.is_empty());
    assert_eq!(h.mock.orders().len(), 1);

    // Next target sizes from the original volume, not the remainder.
    h.price(dec!(2.05));
    let report = h.cycle().await;
    assert_eq!(
        report.actions,
        vec![(
            ID,
            Action::ScaledOut {
                target: dec!(20),
                volume: Size::new(dec!(125)),
            }
        )]
    );
    assert!(h.risk.is_scale_out_hit(ID, dec!(10)).await.unwrap());
    assert!(h.risk.is_scale_out_hit(ID, dec!(20)).await.unwrap());
    assert_eq!(
        h.risk
            .initial_volume_or_snapshot(ID, Size::ONE)
            .await
            .unwrap()
            .inner(),
        dec!(250)
    );
}

#[tokio::test]
async fn test_trailing_peak_only_moves_up_then_closes() {
    let h = Harness::new("use_trailing_stop = true\ntrailing_activation_percent = 10\ntrailing_percent = 5");
    h.hold(dec!(250), 0);

    h.price(dec!(2.01));
    h.cycle().await;
    assert_eq!(h.risk.peak_price(ID).await.unwrap(), None);

    for (last, peak) in [(dec!(2.1), dec!(2.1)), (dec!(2.3), dec!(2.3)), (dec!(2.2), dec!(2.3))] {
        h.price(last);
        assert!(h.cycle().await.actions.is_empty());
        assert_eq!(h.risk.peak_price(ID).await.unwrap(), Some(Price::new(peak)));
    }

    // 5% under 2.3 is 2.185.
    h.price(dec!(2.18));
    let report = h.cycle().await;
    assert_eq!(report.actions, vec![(ID, Action::Closed(CloseReason::TrailingStop))]);
    assert_eq!(h.risk.peak_price(ID).await.unwrap(), None);
    assert!(h.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_closes_with_timeout_cooldown() {
    let h = Harness::new("max_position_hours = 1\ntimeout_cooldown_seconds = 120");
    h.hold(dec!(250), 2 * 3_600_000);
    h.price(dec!(2.0));

    let report = h.cycle().await;
    assert_eq!(report.actions, vec![(ID, Action::Closed(CloseReason::Timeout))]);
    assert_eq!(
        h.store.ttl(&StateKey::cooldown(SYMBOL)),
        Some(Duration::from_secs(120))
    );

    let fresh = Harness::new("max_position_hours = 1");
    fresh.hold(dec!(250), 60_000);
    fresh.price(dec!(2.0));
    assert!(fresh.cycle().await.actions.is_empty());
}

#[tokio::test]
async fn test_pyramiding_bounded_by_max_entries() {
    let h = Harness::new(
        "use_pyramiding = true\npyramiding = { pnl_threshold_percent = 15, max_entries = 1, add_margin_amount = 5 }",
    );
    h.hold(dec!(250), 0);
    h.price(dec!(2.04));

    let report = h.cycle().await;
    assert_eq!(report.actions, vec![(ID, Action::Pyramided { entry: 1 })]);
    let orders = h.mock.orders();
    assert_eq!(orders[0].side, OrderSide::OpenLong);
    assert_eq!(orders[0].leverage, Some(10));
    // 5 * 10 / 2.04 = 24.5, floored to whole contracts.
    assert_eq!(orders[0].vol.inner(), dec!(24));
    assert_eq!(h.risk.pyramid_entries(ID).await.unwrap(), 1);

    assert!(h.cycle().await.actions.is_empty());
    assert_eq!(h.mock.orders().len(), 1);
}

#[tokio::test]
async fn test_rejected_pyramid_does_not_count() {
    let h = Harness::new(
        "use_pyramiding = true\npyramiding = { pnl_threshold_percent = 15, max_entries = 3 }",
    );
    h.hold(dec!(250), 0);
    h.price(dec!(2.04));
    h.mock.push_create_order(ApiResponse::err(2005, "balance"));

    assert!(h.cycle().await.actions.is_empty());
    assert_eq!(h.risk.pyramid_entries(ID).await.unwrap(), 0);
    // Attempt 0 stays locked until its lock expires.
    assert!(h.cycle().await.actions.is_empty());
    assert_eq!(h.mock.orders().len(), 1);
}

#[tokio::test]
async fn test_positions_without_token_or_ticker_skipped() {
    let h = Harness::new("stop_loss_percent = 5");
    h.mock.set_positions(vec![RawPosition {
        symbol: Some("NOPE_USDT".into()),
        position_id: Some(7),
        position_type: Some(2),
        open_avg_price: Some(dec!(1)),
        leverage: Some(5),
        hold_vol: Some(dec!(10)),
        create_time: Some(0),
        state: Some(1),
    }]);
    h.price(dec!(2.0));

    let report = h.cycle().await;
    assert_eq!(report.positions, 1);
    assert_eq!(report.evaluated, 0);
    assert!(h.mock.orders().is_empty());
}

#[tokio::test]
async fn test_no_positions_skips_ticker_fetch() {
    let h = Harness::new("");
    let report = h.cycle().await;
    assert_eq!(report.positions, 0);
    assert_eq!(h.mock.count(|c| matches!(c, MockCall::Tickers)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_polls_until_cancelled() {
    let h = Harness::new("monitor_interval_seconds = 10");
    let mock = h.mock.clone();
    let monitor = Arc::new(h.monitor);
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        async move { monitor.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(25)).await;
    cancel.cancel();
    task.await.unwrap();
    assert_eq!(mock.count(|c| matches!(c, MockCall::OpenPositions)), 3);
}
