mod common;

use chrono::Duration;
use common::{candidate, harness, short, t0};
use ladderbot::config::{AppConfig, EmergencyAction};
use ladderbot::domain::{ReadinessVerdict, SignalStrength};
use ladderbot::strategy::{CloseReason, EarlyCloseKind, EmergencyTrigger};
use ladderbot::MarketDataSource;
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

#[tokio::test]
async fn opens_ready_candidate_at_first_rung() {
    let mut h = harness(AppConfig::default());
    h.venue.set_price("XUSDT", dec!(2)).await;
    h.script
        .set_candidates(vec![candidate("XUSDT", dec!(25), dec!(2))]);

    let report = h.gate.tick(t0()).await;

    assert_eq!(report.opened, vec!["XUSDT".to_string()]);
    let pos = h.gate.ledger().get("XUSDT").unwrap();
    assert_eq!(pos.step(), 1);
    assert_eq!(pos.total_quantity(), dec!(20));
    assert_eq!(pos.total_margin(), dec!(4));
    assert_eq!(pos.average_entry(), dec!(2));
    assert_eq!(h.venue.leverage_for("XUSDT").await, Some(10));
    assert_eq!(h.script.readiness_calls(), vec!["XUSDT".to_string()]);
}

#[tokio::test]
async fn entry_pipeline_filters_candidates() {
    let mut config = AppConfig::default();
    config.blacklist.static_symbols = vec!["LUNAUSDT".to_string()];
    let mut h = harness(config);
    for symbol in ["AUSDT", "BUSDT", "CUSDT", "DUSDT", "LUNAUSDT"] {
        h.venue.set_price(symbol, dec!(1)).await;
    }
    h.script.set_candidates(vec![
        candidate("LUNAUSDT", dec!(60), dec!(1)),
        candidate("AUSDT", dec!(20), dec!(1)),
        candidate("BUSDT", dec!(20), dec!(1)),
        candidate("CUSDT", dec!(20), dec!(1)),
        candidate("DUSDT", dec!(45), dec!(1)),
    ]);
    h.script.block_trend("BUSDT");
    h.script
        .set_readiness("CUSDT", ReadinessVerdict::not_ready("still pumping"));
    h.script.block_sentiment("DUSDT");

    let report = h.gate.tick(t0()).await;

    assert_eq!(report.opened, vec!["AUSDT".to_string()]);
    assert!(!h.script.readiness_calls().contains(&"LUNAUSDT".to_string()));
    assert_eq!(h.gate.ledger().len(), 1);
}

#[tokio::test]
async fn new_entries_respect_capacity_and_scan_interval() {
    let mut config = AppConfig::default();
    config.capacity.max_positions_below = 2;
    config.capacity.max_positions_above = 1;
    let mut h = harness(config);
    for symbol in ["AUSDT", "BUSDT", "CUSDT"] {
        h.venue.set_price(symbol, dec!(1)).await;
    }
    h.script.set_candidates(vec![
        candidate("AUSDT", dec!(20), dec!(1)),
        candidate("BUSDT", dec!(20), dec!(1)),
        candidate("CUSDT", dec!(20), dec!(1)),
    ]);

    let report = h.gate.tick(t0()).await;
    assert_eq!(report.opened, vec!["AUSDT".to_string(), "BUSDT".to_string()]);
    assert_eq!(h.gate.ledger().len(), 2);

    // Next scan is 90s away
    h.gate.tick(t0() + Duration::seconds(20)).await;
    assert_eq!(h.script.readiness_calls().len(), 3);
}

#[tokio::test]
async fn adds_second_step_after_margin_loss() {
    let mut h = harness(AppConfig::default());
    h.venue
        .seed_position(short("XUSDT", dec!(20), dec!(2), dec!(4)))
        .await;
    h.venue.set_price("XUSDT", dec!(2)).await;
    assert_ok!(h.gate.recover(t0()).await);

    // $3 loss on $4 margin: 75% >= 70%
    h.venue.set_price("XUSDT", dec!(2.15)).await;
    let report = h.gate.tick(t0() + Duration::minutes(1)).await;

    assert_eq!(report.steps_added.len(), 1);
    assert_eq!(report.steps_added[0].step, 2);
    assert_eq!(report.steps_added[0].margin, dec!(4));
    let pos = h.gate.ledger().get("XUSDT").unwrap();
    assert_eq!(pos.total_quantity(), dec!(38.6));
    assert_eq!(pos.total_margin(), dec!(8));
    assert!(h.script.readiness_calls().is_empty());
}

#[tokio::test]
async fn deep_steps_wait_for_readiness() {
    let mut h = harness(AppConfig::default());
    // $14 margin estimates step 3
    h.venue
        .seed_position(short("XUSDT", dec!(70), dec!(2), dec!(14)))
        .await;
    assert_ok!(h.gate.recover(t0()).await);
    assert_eq!(h.gate.ledger().get("XUSDT").unwrap().step(), 3);

    // 10% above average, past the 8% rung and its 3 minute wait
    h.venue.set_price("XUSDT", dec!(2.2)).await;
    h.script
        .set_readiness("XUSDT", ReadinessVerdict::not_ready("momentum intact"));
    let report = h.gate.tick(t0() + Duration::minutes(5)).await;
    assert!(report.steps_added.is_empty());
    assert_eq!(h.script.readiness_calls(), vec!["XUSDT".to_string()]);

    h.script.set_readiness(
        "XUSDT",
        ReadinessVerdict::ready(SignalStrength::Weak, "upper wick"),
    );
    let report = h.gate.tick(t0() + Duration::minutes(6)).await;
    assert_eq!(report.steps_added.len(), 1);
    assert_eq!(report.steps_added[0].step, 4);
    assert_eq!(h.gate.ledger().get("XUSDT").unwrap().total_margin(), dec!(20));
}

#[tokio::test]
async fn readiness_failures_skip_the_step_until_answered() {
    let mut h = harness(AppConfig::default());
    h.venue
        .seed_position(short("XUSDT", dec!(70), dec!(2), dec!(14)))
        .await;
    assert_ok!(h.gate.recover(t0()).await);
    h.venue.set_price("XUSDT", dec!(2.2)).await;

    h.script.fail_readiness("XUSDT");
    let report = h.gate.tick(t0() + Duration::minutes(5)).await;
    assert!(report.steps_added.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("readiness unavailable"));

    // A lookup task that dies still produces an answer
    h.script.heal_readiness("XUSDT");
    h.script.crash_readiness("XUSDT");
    let report = h.gate.tick(t0() + Duration::minutes(6)).await;
    assert!(report.steps_added.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("no readiness verdict"));
    assert_eq!(h.gate.ledger().get("XUSDT").unwrap().step(), 3);

    h.script.heal_readiness("XUSDT");
    let report = h.gate.tick(t0() + Duration::minutes(7)).await;
    assert_eq!(report.steps_added.len(), 1);
    assert_eq!(report.steps_added[0].step, 4);
}

#[tokio::test]
async fn trailing_take_profit_harvests_on_retrace() {
    let mut h = harness(AppConfig::default());
    h.venue
        .seed_position(short("XUSDT", dec!(20), dec!(2), dec!(4)))
        .await;
    assert_ok!(h.gate.recover(t0()).await);

    // Profits of 4, 10 and 7 against a $3.5 step-1 target
    let mut closed = Vec::new();
    for (minute, price) in [(1, dec!(1.8)), (2, dec!(1.5)), (3, dec!(1.65))] {
        h.venue.set_price("XUSDT", price).await;
        let report = h.gate.tick(t0() + Duration::minutes(minute)).await;
        if minute == 2 {
            let pos = h.gate.ledger().get("XUSDT").unwrap();
            assert!(pos.trailing_tp_active());
            assert_eq!(pos.max_profit_usd(), dec!(10));
        }
        closed.extend(report.closed);
    }

    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].reason, CloseReason::TakeProfit);
    assert_eq!(closed[0].realized_pnl, dec!(7));
    assert!(h.gate.ledger().is_empty());
    assert!(h.venue.positions().await.unwrap().is_empty());
    assert!(h.gate.blacklist().records().is_empty());
}

#[tokio::test]
async fn emergency_warns_without_closing_by_default() {
    let mut h = harness(AppConfig::default());
    h.venue
        .seed_position(short("XUSDT", dec!(20), dec!(2), dec!(4)))
        .await;
    assert_ok!(h.gate.recover(t0()).await);

    h.venue.set_price("XUSDT", dec!(2.8)).await;
    let report = h.gate.tick(t0() + Duration::minutes(1)).await;

    assert_eq!(report.emergency_warnings, vec!["XUSDT".to_string()]);
    assert!(report.emergency_closed.is_empty());
    assert!(h.gate.ledger().contains("XUSDT"));
    // Management continues: the step-1 loss gate still applies
    assert_eq!(report.steps_added.len(), 1);
}

#[tokio::test]
async fn emergency_closes_feed_blacklist_and_journal() {
    let journal = std::env::temp_dir()
        .join(format!("ladderbot-it-{}", uuid::Uuid::new_v4()))
        .join("losses.jsonl");
    let mut config = AppConfig::default();
    config.emergency.action = EmergencyAction::Close;
    config.blacklist.journal_path = Some(journal.clone());
    let mut h = harness(config.clone());
    h.venue.set_price("XUSDT", dec!(2.8)).await;

    let second = t0() + Duration::minutes(30);
    for at in [t0(), second] {
        h.venue
            .seed_position(short("XUSDT", dec!(20), dec!(2), dec!(4)))
            .await;
        assert_ok!(h.gate.recover(at).await);
        let report = h.gate.tick(at).await;

        assert_eq!(report.emergency_closed.len(), 1);
        let closed = &report.emergency_closed[0];
        assert_eq!(
            closed.reason,
            CloseReason::EmergencyStop(EmergencyTrigger::Drawdown)
        );
        assert_eq!(closed.realized_pnl, dec!(-16));
        assert!(!h.gate.ledger().contains("XUSDT"));
    }

    let bans = h.gate.bans(second);
    assert_eq!(bans.len(), 1);
    assert_eq!(bans[0].symbol, "XUSDT");
    assert_eq!(bans[0].expires_at, second + Duration::hours(6));

    // Banned symbols are tracked but not managed
    h.venue
        .seed_position(short("XUSDT", dec!(20), dec!(2), dec!(4)))
        .await;
    assert_ok!(h.gate.recover(second).await);
    let report = h.gate.tick(second + Duration::minutes(1)).await;
    assert!(report.emergency_warnings.is_empty());
    assert!(h.gate.ledger().contains("XUSDT"));

    // A fresh gate rebuilds the ban from the journal
    let mut restarted = harness(config);
    let later = second + Duration::hours(1);
    assert_eq!(restarted.gate.restore_loss_history(later).await.unwrap(), 2);
    assert_eq!(restarted.gate.bans(later).len(), 1);

    if let Some(dir) = journal.parent() {
        tokio::fs::remove_dir_all(dir).await.ok();
    }
}

#[tokio::test]
async fn close_keeps_lot_size_residual_tracked() {
    let mut config = AppConfig::default();
    config.emergency.action = EmergencyAction::Close;
    let mut h = harness(config);
    h.venue
        .seed_position(short("XUSDT", dec!(20.05), dec!(2), dec!(4)))
        .await;
    assert_ok!(h.gate.recover(t0()).await);
    h.venue.set_price("XUSDT", dec!(2.8)).await;

    let report = h.gate.tick(t0()).await;

    // 20.05 rounds down to the 0.1 lot: 20 closes, 0.05 stays on the venue
    assert_eq!(report.emergency_closed.len(), 1);
    assert_eq!(report.emergency_closed[0].quantity, dec!(20));
    assert_eq!(report.emergency_closed[0].realized_pnl, dec!(-16));
    let residual = h.gate.ledger().get("XUSDT").unwrap();
    assert_eq!(residual.total_quantity(), dec!(0.05));

    let venue_positions = h.venue.positions().await.unwrap();
    assert_eq!(venue_positions.len(), 1);
    assert_eq!(venue_positions[0].signed_quantity, dec!(-0.05));

    // Ledger and venue agree, so sync has nothing to re-import
    let sync = h.gate.sync(t0() + Duration::minutes(5)).await.unwrap();
    assert!(sync.added.is_empty());
    assert!(sync.removed.is_empty());
    assert!(sync.updated.is_empty());
}

#[tokio::test]
async fn half_close_locks_profit_once() {
    let mut h = harness(AppConfig::default());
    h.venue
        .seed_position(short("XUSDT", dec!(70), dec!(2), dec!(14)))
        .await;
    assert_ok!(h.gate.recover(t0()).await);

    // $3.5 profit at step 3 clears the $3 half-close target
    h.venue.set_price("XUSDT", dec!(1.95)).await;
    let report = h.gate.tick(t0() + Duration::minutes(1)).await;
    assert_eq!(report.half_closed, vec!["XUSDT".to_string()]);

    let pos = h.gate.ledger().get("XUSDT").unwrap();
    assert_eq!(pos.total_quantity(), dec!(35));
    assert_eq!(pos.total_margin(), dec!(14));
    assert_eq!(pos.average_entry(), dec!(2));
    assert!(pos.half_closed());
    assert_eq!(
        h.venue.positions().await.unwrap()[0].signed_quantity,
        dec!(-35)
    );

    h.venue.set_price("XUSDT", dec!(1.9)).await;
    let report = h.gate.tick(t0() + Duration::minutes(2)).await;
    assert!(report.half_closed.is_empty());
}

#[tokio::test]
async fn early_close_frees_one_slot_above_margin_threshold() {
    let mut config = AppConfig::default();
    config.capacity.margin_threshold = dec!(10);
    let mut h = harness(config);
    for symbol in ["AUSDT", "BUSDT", "CUSDT", "DUSDT", "EUSDT"] {
        h.venue
            .seed_position(short(symbol, dec!(20), dec!(2), dec!(4)))
            .await;
        h.venue.set_price(symbol, dec!(2)).await;
    }
    assert_ok!(h.gate.recover(t0()).await);
    assert_eq!(h.gate.ledger().len(), 5);

    let report = h.gate.tick(t0() + Duration::minutes(1)).await;

    assert_eq!(report.auto_closed.len(), 1);
    assert_eq!(report.auto_closed[0].symbol, "AUSDT");
    assert_eq!(
        report.auto_closed[0].reason,
        CloseReason::EarlyAutoClose(EarlyCloseKind::SmallLoss)
    );
    assert_eq!(h.gate.ledger().len(), 4);
}

#[tokio::test]
async fn recycle_trims_position_and_frees_margin() {
    let mut config = AppConfig::default();
    config.recycle.enabled = true;
    let mut h = harness(config);
    // $30 margin estimates step 5
    h.venue
        .seed_position(short("XUSDT", dec!(150), dec!(2), dec!(30)))
        .await;
    assert_ok!(h.gate.recover(t0()).await);

    // Half a percent in profit, $1.5
    h.venue.set_price("XUSDT", dec!(1.99)).await;
    let report = h.gate.tick(t0() + Duration::minutes(1)).await;

    assert_eq!(report.recycled, vec!["XUSDT".to_string()]);
    let pos = h.gate.ledger().get("XUSDT").unwrap();
    assert_eq!(pos.total_quantity(), dec!(90));
    assert_eq!(pos.total_margin(), dec!(18));
    assert_eq!(pos.recycle_count(), 1);
    assert_eq!(pos.step(), 5);
}

#[tokio::test]
async fn rejected_order_leaves_ledger_untouched() {
    let mut h = harness(AppConfig::default());
    h.venue
        .seed_position(short("XUSDT", dec!(20), dec!(2), dec!(4)))
        .await;
    assert_ok!(h.gate.recover(t0()).await);
    h.venue.set_price("XUSDT", dec!(2.15)).await;
    h.venue.reject_orders("XUSDT").await;

    let report = h.gate.tick(t0() + Duration::minutes(1)).await;
    assert!(report.steps_added.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("rejected"));
    assert_eq!(h.gate.ledger().get("XUSDT").unwrap().step(), 1);

    h.venue.accept_orders("XUSDT").await;
    let report = h.gate.tick(t0() + Duration::minutes(2)).await;
    assert_eq!(report.steps_added.len(), 1);
}

#[tokio::test]
async fn missing_price_skips_symbol() {
    let mut h = harness(AppConfig::default());
    h.venue
        .seed_position(short("XUSDT", dec!(20), dec!(2), dec!(4)))
        .await;
    assert_ok!(h.gate.recover(t0()).await);

    let report = h.gate.tick(t0()).await;
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].reason, "no mark price");
    assert_eq!(report.action_count(), 0);
}

#[tokio::test]
async fn sync_follows_the_exchange() {
    let mut h = harness(AppConfig::default());
    h.venue
        .seed_position(short("AUSDT", dec!(20), dec!(2), dec!(4)))
        .await;
    h.venue
        .seed_position(short("BUSDT", dec!(10), dec!(1), dec!(1)))
        .await;
    assert_ok!(h.gate.recover(t0()).await);

    h.venue.close_externally("AUSDT").await;
    h.venue
        .seed_position(short("BUSDT", dec!(12), dec!(1), dec!(1.2)))
        .await;
    h.venue
        .seed_position(short("CUSDT", dec!(30), dec!(1), dec!(3)))
        .await;

    let report = h.gate.sync(t0() + Duration::minutes(5)).await.unwrap();

    assert_eq!(report.removed, vec!["AUSDT".to_string()]);
    assert_eq!(report.added, vec!["CUSDT".to_string()]);
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].new_quantity, dec!(12));
    assert_eq!(
        h.gate.ledger().get("BUSDT").unwrap().total_margin(),
        dec!(1.2)
    );
}

#[tokio::test]
async fn status_snapshot_published_after_tick() {
    let mut h = harness(AppConfig::default());
    let status = h.gate.subscribe();
    h.venue
        .seed_position(short("XUSDT", dec!(20), dec!(2), dec!(4)))
        .await;
    h.venue.set_price("XUSDT", dec!(1.9)).await;
    assert_ok!(h.gate.recover(t0()).await);

    h.gate.tick(t0() + Duration::minutes(1)).await;

    let snapshot = status.borrow().clone();
    assert_eq!(snapshot.open_positions, 1);
    assert_eq!(snapshot.total_margin, dec!(4));
    assert_eq!(snapshot.total_unrealized_pnl, dec!(2));
    assert_eq!(snapshot.positions[0].mark_price, Some(dec!(1.9)));
}
