//! End-to-end pass over the ingestion pipeline: wire frames through the
//! state machine, statistics, alerting and the snapshot writer, then back
//! off disk.

use chrono::{DateTime, TimeZone, Utc};
use depthwatch::error::EngineError;
use depthwatch::orderbook::stats;
use depthwatch::orderbook::{
    AlertEngine, AlertKind, AlertThresholds, BookMode, BookStateMachine, Phase, Side,
};
use depthwatch::persist::{
    read_records, snapshot_path, FullSnapshotRecord, LightSnapshotRecord, SnapshotWriter,
};
use depthwatch::stream::{decode_frame, Event};
use rust_decimal_macros::dec;
use std::time::Duration;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn snapshot_frame(sequence: i64) -> String {
    format!(
        r#"{{
            "channel": "l2_data",
            "sequence_num": {sequence},
            "events": [{{
                "type": "snapshot",
                "product_id": "BTC-USD",
                "updates": [
                    {{"side": "bid", "price_level": "100", "new_quantity": "1"}},
                    {{"side": "bid", "price_level": "99", "new_quantity": "2"}},
                    {{"side": "offer", "price_level": "101", "new_quantity": "3"}},
                    {{"side": "offer", "price_level": "102", "new_quantity": "4"}}
                ]
            }}]
        }}"#
    )
}

fn update_frame(sequence: i64, side: &str, price: &str, size: &str) -> String {
    format!(
        r#"{{
            "channel": "l2_data",
            "sequence_num": {sequence},
            "events": [{{
                "type": "update",
                "product_id": "BTC-USD",
                "updates": [{{"side": "{side}", "price_level": "{price}", "new_quantity": "{size}"}}]
            }}]
        }}"#
    )
}

fn apply(machine: &mut BookStateMachine, frame: &str, at: DateTime<Utc>) -> Result<(), EngineError> {
    match decode_frame(frame, at).unwrap() {
        Event::Snapshot(evt) => machine.on_snapshot(&evt),
        Event::Update(evt) => machine.on_update(&evt),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn snapshot_then_deletion_scenario() {
    let mut machine = BookStateMachine::new("BTC-USD", BookMode::Full);
    apply(&mut machine, &snapshot_frame(10), ts(0)).unwrap();

    let stats = stats::compute("BTC-USD", machine.book(), machine.timestamp(), 2);
    assert_eq!(stats.best_bid, Some(dec!(100)));
    assert_eq!(stats.best_ask, Some(dec!(101)));
    assert_eq!(stats.spread, Some(dec!(1)));
    assert_eq!(stats.mid_price, Some(dec!(100.5)));
    assert_eq!(stats.imbalance, Some(dec!(0.3)));

    // Deleting the best bid via size zero moves best/spread/mid.
    apply(&mut machine, &update_frame(11, "bid", "100", "0"), ts(1)).unwrap();
    let stats = stats::compute("BTC-USD", machine.book(), machine.timestamp(), 2);
    assert_eq!(stats.best_bid, Some(dec!(99)));
    assert_eq!(stats.spread, Some(dec!(2)));
    assert_eq!(stats.mid_price, Some(dec!(100)));
}

#[test]
fn sequence_gap_recovery_scenario() {
    let mut machine = BookStateMachine::new("BTC-USD", BookMode::Light);
    apply(&mut machine, &snapshot_frame(10), ts(0)).unwrap();

    // Sequence 12 after 10 means a lost message: gap, book cleared.
    let err = apply(&mut machine, &update_frame(12, "bid", "98", "1"), ts(1)).unwrap_err();
    assert!(matches!(err, EngineError::SequenceGap { .. }));
    assert_eq!(machine.phase(), Phase::Uninitialized);

    // The resubscribe-triggered snapshot restores a live book.
    apply(&mut machine, &snapshot_frame(13), ts(2)).unwrap();
    assert_eq!(machine.phase(), Phase::Live);
    assert_eq!(machine.sequence(), 13);
    apply(&mut machine, &update_frame(14, "offer", "101", "5"), ts(3)).unwrap();
    assert_eq!(machine.book().best(Side::Ask), Some((dec!(101), dec!(5))));
}

#[test]
fn imbalance_alert_fires_through_the_pipeline() {
    let mut machine = BookStateMachine::new("BTC-USD", BookMode::Light);
    let mut alerts = AlertEngine::new("BTC-USD", AlertThresholds::default());
    apply(&mut machine, &snapshot_frame(10), ts(0)).unwrap();

    // Pile bid volume up to 91 : 7 over the top levels.
    apply(&mut machine, &update_frame(11, "bid", "100", "89"), ts(1)).unwrap();
    let fired = alerts.update(machine.book(), ts(1));
    assert!(fired
        .iter()
        .any(|alert| alert.kind == AlertKind::StrongBuyImbalance));
}

#[test]
fn full_mode_persistence_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut machine = BookStateMachine::new("BTC-USD", BookMode::Full);
    apply(&mut machine, &snapshot_frame(10), ts(0)).unwrap();
    apply(&mut machine, &update_frame(11, "offer", "101.50", "2.5"), ts(30)).unwrap();

    let path = snapshot_path(dir.path(), machine.symbol(), ts(0));
    let mut writer = SnapshotWriter::new(path.clone(), Duration::from_secs(60));
    assert!(writer.maybe_write(ts(30), || FullSnapshotRecord::from_machine(&machine)));

    // Another update and a second flush past the interval.
    apply(&mut machine, &update_frame(12, "bid", "99", "0"), ts(95)).unwrap();
    assert!(writer.maybe_write(ts(95), || FullSnapshotRecord::from_machine(&machine)));

    let records: Vec<FullSnapshotRecord> = read_records(&path).unwrap();
    assert_eq!(records.len(), 2);
    // Records are in non-decreasing timestamp order.
    assert!(records[0].timestamp <= records[1].timestamp);
    assert_eq!(records[0].sequence, 11);
    assert_eq!(records[1].sequence, 12);

    // The last record reloads to a book equal to the live one.
    assert_eq!(records[1].to_book(), *machine.book());
    // And the first reflects the state before the deletion.
    assert_eq!(
        records[0].to_book().best(Side::Bid),
        Some((dec!(100), dec!(1)))
    );
}

#[test]
fn light_mode_records_summarize_top_of_book() {
    let dir = tempfile::tempdir().unwrap();
    let mut machine = BookStateMachine::new("ETH-USD", BookMode::Light);
    let frame = snapshot_frame(7).replace("BTC-USD", "ETH-USD");
    apply(&mut machine, &frame, ts(0)).unwrap();

    let path = dir.path().join("order_book_ETH-USD_light.jsonl.gz");
    let mut writer = SnapshotWriter::new(path.clone(), Duration::from_secs(60));
    assert!(writer.maybe_write(ts(0), || LightSnapshotRecord::from_machine(&machine)));

    let records: Vec<LightSnapshotRecord> = read_records(&path).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.p, "ETH-USD");
    assert_eq!(record.s, 7);
    assert_eq!(record.bb, Some(dec!(100)));
    assert_eq!(record.ba, Some(dec!(101)));
    assert_eq!(record.sp, Some(dec!(1)));
    assert_eq!(record.mp, Some(dec!(100.5)));
    assert_eq!(record.ib, Some(dec!(0.3)));
}
