//! End-to-end replays through the backtest engine.
//!
//! Every scenario uses a $1000 account with a $5 profit target and a $10
//! stop, 100 contracts per trade and taker fees on both legs.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spikebot_backtest::{
    BacktestEngine, BacktestResult, PriceHistoryStore, PricePoint, Signal, SignalAnomaly,
    SignalDetector, ThresholdSpikeDetector,
};
use spikebot_core::{BacktestConfig, BotConfig, ExitConfig, ExitReason, Side};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// =============================================================================
// Helper Functions
// =============================================================================

/// Tuesday session open.
fn tuesday(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 3, 14, 30, 0).unwrap() + Duration::seconds(secs)
}

fn wednesday(secs: i64) -> DateTime<Utc> {
    tuesday(secs) + Duration::days(1)
}

fn config() -> BotConfig {
    BotConfig {
        exits: ExitConfig::default().with_targets(dec!(5), dec!(-10)),
        backtest: BacktestConfig::default().with_starting_balance(dec!(1000)),
        ..BotConfig::default()
    }
}

fn push_all(store: &mut PriceHistoryStore, market_id: &str, points: &[(DateTime<Utc>, Decimal)]) {
    store.extend(
        market_id,
        points.iter().map(|(timestamp, price)| PricePoint {
            timestamp: *timestamp,
            price: *price,
            liquidity: Some(dec!(5000)),
        }),
    );
}

fn run(config: BotConfig, store: &PriceHistoryStore) -> BacktestResult {
    BacktestEngine::new(config)
        .unwrap()
        .run(store, &AtomicBool::new(false))
        .unwrap()
}

/// Two sessions of FED-DEC, each with one profitable spike trade.
fn two_day_store() -> PriceHistoryStore {
    let mut store = PriceHistoryStore::new();
    push_all(
        &mut store,
        "FED-DEC",
        &[
            (tuesday(0), dec!(0.50)),
            (tuesday(1), dec!(0.60)),
            (tuesday(5), dec!(0.70)),
            (wednesday(0), dec!(0.70)),
            (wednesday(1), dec!(0.80)),
            (wednesday(2), dec!(0.85)),
            (wednesday(3), dec!(0.90)),
        ],
    );
    store
}

/// Wraps the threshold detector and raises the cancel flag after `limit` points.
struct CancelAfter {
    inner: ThresholdSpikeDetector,
    seen: usize,
    limit: usize,
    flag: Arc<AtomicBool>,
}

impl SignalDetector for CancelAfter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn on_point(&mut self, market_id: &str, point: &PricePoint) -> Result<Option<Signal>, SignalAnomaly> {
        self.seen += 1;
        if self.seen >= self.limit {
            self.flag.store(true, Ordering::Relaxed);
        }
        self.inner.on_point(market_id, point)
    }

    fn reset(&mut self) {
        self.seen = 0;
        self.inner.reset();
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn replay_is_deterministic() {
    let mut store = two_day_store();
    push_all(
        &mut store,
        "CPI-JAN",
        &[
            (tuesday(0), dec!(0.30)),
            (tuesday(1), dec!(0.33)),
            (tuesday(2), dec!(0.25)),
            (wednesday(0), dec!(0.40)),
        ],
    );

    let first = run(config(), &store);
    let second = run(config(), &store);

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert!(!first.trades.is_empty());
}

#[test]
fn daily_pnl_is_keyed_by_close_date() {
    let result = run(config(), &two_day_store());

    assert_eq!(result.trades.len(), 2);
    assert!(result
        .trades
        .iter()
        .all(|t| t.exit_reason == ExitReason::ProfitTarget));
    assert_eq!(result.daily_pnl[&tuesday(0).date_naive()], dec!(6.85));
    assert_eq!(result.daily_pnl[&wednesday(0).date_naive()], dec!(8.25));
    assert_eq!(result.final_balance, dec!(1015.10));
    assert_eq!(result.metrics.total_pnl, dec!(15.10));
    assert!(result.metrics.profit_factor.is_infinite());
}

#[test]
fn open_positions_are_force_closed_at_end() {
    let mut store = PriceHistoryStore::new();
    // long 100 @ 0.55 costs 56.74; 0.56 returns 54.27
    push_all(
        &mut store,
        "FED-DEC",
        &[(tuesday(0), dec!(0.50)), (tuesday(1), dec!(0.55)), (tuesday(2), dec!(0.56))],
    );
    let result = run(config(), &store);

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::BacktestEnd);
    assert_eq!(trade.exit_price, dec!(0.56));
    assert_eq!(trade.closed_at, tuesday(2));
    assert_eq!(trade.net_pnl, dec!(-2.47));
    assert_eq!(trade.entry_notional, dec!(55));
    assert_eq!(trade.entry_fee, dec!(1.74));
    assert_eq!(trade.exit_notional, dec!(56));
    assert_eq!(trade.exit_fee, dec!(1.73));
    assert_eq!(trade.exit_revenue, dec!(54.27));
    assert_eq!(trade.gross_profit, dec!(1.00));
    assert_eq!(trade.total_fees, dec!(3.47));

    let json = serde_json::to_value(trade).unwrap();
    for key in ["entry_notional", "exit_notional", "exit_revenue", "gross_profit", "total_fees"] {
        assert!(json.get(key).is_some(), "trade record is missing {key}");
    }
    assert!(result.open_positions.is_empty());
    assert_eq!(result.final_balance, dec!(997.53));
}

#[test]
fn short_entry_hits_the_stop() {
    let mut store = PriceHistoryStore::new();
    // short 100 @ yes 0.40 holds NO at 0.60 for 61.68; NO at 0.50 returns 48.25
    push_all(
        &mut store,
        "FED-DEC",
        &[(tuesday(0), dec!(0.50)), (tuesday(1), dec!(0.40)), (tuesday(5), dec!(0.50))],
    );
    let result = run(config(), &store);

    let trade = &result.trades[0];
    assert_eq!(trade.side, Side::Short);
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert_eq!(trade.net_pnl, dec!(-13.43));
    assert_eq!(result.metrics.max_consecutive_losses, 1);
    assert_eq!(result.final_balance, dec!(986.57));
}

#[test]
fn rejections_are_counted_by_reason() {
    let mut config = config();
    config.risk = config.risk.with_max_daily_trades(1);

    let mut store = PriceHistoryStore::new();
    push_all(&mut store, "CPI-JAN", &[(tuesday(0), dec!(0.50)), (tuesday(1), dec!(0.55))]);
    push_all(&mut store, "FED-DEC", &[(tuesday(0), dec!(0.50)), (tuesday(1), dec!(0.55))]);
    let result = run(config, &store);

    assert_eq!(result.spikes_detected, 2);
    assert_eq!(result.spikes_traded, 1);
    assert_eq!(result.rejection_reasons["max_daily_trades"], 1);
    // CPI-JAN sorts first, so it took the only slot
    assert_eq!(result.trades[0].market_id, "CPI-JAN");
}

#[test]
fn bad_points_are_skipped_not_fatal() {
    let mut store = PriceHistoryStore::new();
    push_all(
        &mut store,
        "FED-DEC",
        &[
            (tuesday(0), dec!(0.50)),
            (tuesday(1), dec!(1.5)),
            (tuesday(2), dec!(-0.1)),
            (tuesday(3), dec!(0.51)),
        ],
    );
    let result = run(config(), &store);

    assert_eq!(result.skipped_points, 2);
    assert_eq!(result.events_processed, 2);
    assert_eq!(result.spikes_detected, 0);
    assert!(!result.cancelled);
}

#[test]
fn unparseable_history_rows_count_as_skipped() {
    let json = r#"[
        {"timestamp": "2026-03-03T14:30:00Z", "price": 0.50, "market_id": "FED-DEC"},
        {"timestamp": "yesterday", "price": 0.52, "market_id": "FED-DEC"},
        {"timestamp": "2026-03-03T14:30:02Z", "price": "garbage", "market_id": "FED-DEC"},
        {"timestamp": "2026-03-03T14:30:03Z", "price": 0.51, "market_id": "FED-DEC"}
    ]"#;
    let store = PriceHistoryStore::from_json_str(json).unwrap();
    assert_eq!(store.rejected_records(), 2);

    let result = run(config(), &store);
    assert_eq!(result.skipped_points, 2);
    assert_eq!(result.events_processed, 2);
}

#[test]
fn cancellation_returns_a_partial_result() {
    let mut store = PriceHistoryStore::new();
    push_all(
        &mut store,
        "FED-DEC",
        &[
            (tuesday(0), dec!(0.50)),
            (tuesday(1), dec!(0.60)),
            (tuesday(2), dec!(0.61)),
            (tuesday(3), dec!(0.62)),
        ],
    );

    let config = config();
    let flag = Arc::new(AtomicBool::new(false));
    let mut detector = CancelAfter {
        inner: ThresholdSpikeDetector::new(config.spike.clone()).unwrap(),
        seen: 0,
        limit: 2,
        flag: Arc::clone(&flag),
    };
    let result = BacktestEngine::new(config)
        .unwrap()
        .run_with_detector(&store, &mut detector, &flag)
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.events_processed, 2);
    assert!(result.trades.is_empty());
    assert_eq!(result.open_positions.len(), 1);
    // 938.32 cash plus 58.32 liquidation value at 0.60
    assert_eq!(result.final_balance, dec!(996.64));
}

#[test]
fn csv_history_replays_like_in_memory_history() {
    let csv = "timestamp,price,market_id,liquidity\n\
               2026-03-03T14:30:00Z,0.50,FED-DEC,5000\n\
               2026-03-03T14:30:01Z,0.60,FED-DEC,5000\n\
               2026-03-03T14:30:05Z,0.70,FED-DEC,5000\n";
    let from_csv = PriceHistoryStore::from_csv_reader(csv.as_bytes()).unwrap();

    let mut in_memory = PriceHistoryStore::new();
    push_all(
        &mut in_memory,
        "FED-DEC",
        &[(tuesday(0), dec!(0.50)), (tuesday(1), dec!(0.60)), (tuesday(5), dec!(0.70))],
    );

    let result = run(config(), &from_csv);
    assert_eq!(result, run(config(), &in_memory));
    assert_eq!(result.trades[0].net_pnl, dec!(6.85));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replay_runs_on_a_blocking_worker() {
    let store = two_day_store();
    let cancel = Arc::new(AtomicBool::new(false));

    let handle = {
        let cancel = Arc::clone(&cancel);
        tokio::task::spawn_blocking(move || {
            BacktestEngine::new(config())
                .unwrap()
                .run(&store, &cancel)
                .unwrap()
        })
    };
    let result = handle.await.unwrap();

    assert!(!result.cancelled);
    assert_eq!(result.trades.len(), 2);
}
