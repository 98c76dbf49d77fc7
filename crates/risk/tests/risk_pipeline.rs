//! Integration tests for the live decision flow.
//!
//! These tests drive a [`TradingDesk`] the way the signal and price loops do:
//! - candidate -> pre-trade checks -> fill -> slippage check
//! - price ticks -> exit decisions -> close -> settlement
//! - account suspension and daily loss halts across the whole flow

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spikebot_core::{
    ExitConfig, ExitReason, FeeEngine, FeeKind, MarketTick, PositionLedger, RiskConfig, Side,
    TradeCandidate,
};
use spikebot_risk::{CloseOutcome, ReasonCode, RiskCoordinator, TradingDesk};

// =============================================================================
// Helper Functions
// =============================================================================

/// Tuesday morning session open.
fn session_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 3, 14, 30, 0).unwrap()
}

fn desk_with(exits: ExitConfig, risk: RiskConfig, balance: Decimal) -> TradingDesk {
    let ledger = PositionLedger::new(FeeEngine::default(), exits).unwrap();
    let mut coordinator = RiskCoordinator::new(risk).unwrap();
    coordinator.initialize_daily(balance, session_open());
    TradingDesk::new(ledger, coordinator)
}

fn tick(market_id: &str, price: Decimal, at: DateTime<Utc>) -> MarketTick {
    MarketTick {
        market_id: market_id.to_string(),
        price,
        liquidity: Some(dec!(1000)),
        timestamp: at,
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn full_round_trip_books_net_profit() {
    let exits = ExitConfig::default().with_targets(dec!(5), dec!(-10));
    let mut desk = desk_with(exits, RiskConfig::default(), dec!(1000));
    let mut cash = dec!(1000);
    let now = session_open();

    let candidate = TradeCandidate::new("FED-DEC", Side::Long, dec!(0.60), 100)
        .with_liquidity(dec!(800))
        .with_confidence(0.7);
    let check = desk.submit_candidate(&candidate, cash, now);
    assert!(check.passed, "{check:?}");

    let fill = desk
        .open_position(&candidate, dec!(0.60), FeeKind::Taker, now)
        .unwrap();
    assert!(!fill.should_unwind());
    cash -= fill.position.entry_cost;
    assert_eq!(cash, dec!(938.32));

    let mut exit = None;
    for (minute, price) in [(1, dec!(0.62)), (2, dec!(0.66)), (3, dec!(0.70))] {
        let decisions = desk.on_market_update(&tick("FED-DEC", price, now + Duration::minutes(minute)));
        if let Some(decision) = decisions.into_iter().next() {
            exit = Some((decision, price, now + Duration::minutes(minute)));
            break;
        }
    }
    let (decision, price, at) = exit.expect("profit target should fire");
    assert_eq!(decision.reason, Some(ExitReason::ProfitTarget));

    let outcome = desk
        .close_position(decision.position_id, price, FeeKind::Taker, at, ExitReason::ProfitTarget)
        .unwrap();
    let CloseOutcome::Closed { pnl } = outcome else {
        panic!("expected a close, got {outcome:?}");
    };
    assert_eq!(pnl.net_profit, dec!(6.85));
    cash += pnl.exit_revenue;

    // proceeds are booked but not yet spendable
    let summary = desk.risk_summary(at);
    assert_eq!(summary.daily.realized_pnl, dec!(6.85));
    assert_eq!(summary.daily.trades_count, 1);
    assert_eq!(summary.settlement.pending_amount, dec!(68.53));
    assert_eq!(desk.risk().available_balance(cash, at), dec!(938.32));
}

#[test]
fn small_move_loses_to_fees() {
    let exits = ExitConfig::default().with_targets(dec!(5), dec!(-10));
    let mut desk = desk_with(exits, RiskConfig::default(), dec!(1000));
    let now = session_open();

    let candidate = TradeCandidate::new("CPI-JAN", Side::Long, dec!(0.50), 100);
    let fill = desk
        .open_position(&candidate, dec!(0.50), FeeKind::Taker, now)
        .unwrap();

    // a one-cent move does not cover 3.50 of round-trip fees
    assert!(desk.on_market_update(&tick("CPI-JAN", dec!(0.51), now)).is_empty());
    let outcome = desk
        .close_position(fill.position.id, dec!(0.51), FeeKind::Taker, now, ExitReason::Manual)
        .unwrap();
    assert!(matches!(outcome, CloseOutcome::Closed { ref pnl } if pnl.net_profit == dec!(-2.50)));
    assert_eq!(desk.risk().daily_state().consecutive_losses, 1);
}

#[test]
fn correlated_fed_markets_hit_the_group_limit() {
    let mut desk = desk_with(ExitConfig::default(), RiskConfig::default(), dec!(1000));
    let now = session_open();

    // 290 @ 0.50 costs 150.08
    let first = TradeCandidate::new("FED-NOV", Side::Long, dec!(0.50), 290);
    assert!(desk.submit_candidate(&first, dec!(1000), now).passed);
    let fill = desk
        .open_position(&first, dec!(0.50), FeeKind::Taker, now)
        .unwrap();
    assert_eq!(fill.position.entry_cost, dec!(150.08));

    // 115 @ 0.50 costs 59.52, pushing the FED group past 200
    let second = TradeCandidate::new("FED-DEC", Side::Long, dec!(0.50), 115);
    let cash = dec!(1000) - fill.position.entry_cost;
    let check = desk.submit_candidate(&second, cash, now);
    assert_eq!(check.reason, Some(ReasonCode::CorrelationLimit));
    assert_eq!(check.details["group"], "FED");

    // a different event is unaffected
    let unrelated = TradeCandidate::new("CPI-JAN", Side::Long, dec!(0.50), 115);
    assert!(desk.submit_candidate(&unrelated, cash, now).passed);
}

#[test]
fn daily_loss_halts_trading_until_next_session() {
    let mut desk = desk_with(ExitConfig::default(), RiskConfig::default(), dec!(1000));
    let now = session_open();
    let candidate = TradeCandidate::new("FED-DEC", Side::Long, dec!(0.50), 10);

    let check = desk.submit_candidate(&candidate, dec!(840), now);
    assert_eq!(check.reason, Some(ReasonCode::DailyLossLimitExceeded));
    assert!(!desk.risk_summary(now).trading_allowed);

    // same day, balance back up: still halted
    let check = desk.submit_candidate(&candidate, dec!(1000), now + Duration::hours(1));
    assert_eq!(check.reason, Some(ReasonCode::DailyLossLimitExceeded));

    let tomorrow = now + Duration::days(1);
    assert!(desk.risk_mut().initialize_daily(dec!(840), tomorrow));
    assert!(desk.submit_candidate(&candidate, dec!(840), tomorrow).passed);
}

#[test]
fn api_errors_suspend_and_recover() {
    let mut desk = desk_with(ExitConfig::default(), RiskConfig::default(), dec!(1000));
    let now = session_open();
    let candidate = TradeCandidate::new("FED-DEC", Side::Long, dec!(0.50), 10);

    for attempt in 0..4 {
        assert!(!desk
            .risk_mut()
            .handle_api_error(503, "unavailable", now + Duration::seconds(attempt)));
    }
    assert!(desk.submit_candidate(&candidate, dec!(1000), now).passed);

    assert!(desk.risk_mut().handle_api_error(503, "unavailable", now + Duration::seconds(5)));
    let check = desk.submit_candidate(&candidate, dec!(1000), now + Duration::minutes(1));
    assert_eq!(check.reason, Some(ReasonCode::AccountSuspended));

    let after_cooldown = now + Duration::minutes(16);
    assert!(desk.submit_candidate(&candidate, dec!(1000), after_cooldown).passed);

    let summary = desk.risk_summary(after_cooldown);
    assert_eq!(summary.account.suspensions, 1);
    assert_eq!(summary.checks_failed[&ReasonCode::AccountSuspended], 1);
    assert_eq!(summary.checks_passed, 2);
}

#[test]
fn short_position_profits_when_price_falls() {
    let exits = ExitConfig::default().with_targets(dec!(5), dec!(-10));
    let mut desk = desk_with(exits, RiskConfig::default(), dec!(1000));
    let now = session_open();

    let candidate = TradeCandidate::new("INXD-26MAR", Side::Short, dec!(0.70), 100);
    assert!(desk.submit_candidate(&candidate, dec!(1000), now).passed);
    let fill = desk
        .open_position(&candidate, dec!(0.70), FeeKind::Taker, now)
        .unwrap();
    assert_eq!(fill.position.entry_cost, dec!(31.47));

    let decisions = desk.on_market_update(&tick("INXD-26MAR", dec!(0.60), now + Duration::minutes(2)));
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].unrealized.net_profit, dec!(6.85));
}
