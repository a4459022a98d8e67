//! Per-symbol book state machine.
//!
//! Consumes decoded stream events for one symbol and drives an
//! [`OrderedBook`]. A snapshot replaces any prior state wholesale; updates
//! mutate in place under strict sequence policing. On a gap or a crossed
//! book the machine drops back to `Uninitialized` and the stream client
//! resubscribes the symbol, which makes the venue resend a snapshot.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::orderbook::book::{OrderedBook, Side};
use crate::stream::protocol::BookEvent;

/// What the snapshot writer emits for this symbol: the entire book, or a
/// top-of-book summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookMode {
    Full,
    Light,
}

/// Lifecycle of a per-symbol machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No usable book; waiting for a snapshot.
    Uninitialized,
    /// Snapshot applied; updates accepted.
    Live,
    /// Session shut down; no further events accepted.
    Closed,
}

#[derive(Debug)]
pub struct BookStateMachine {
    symbol: String,
    mode: BookMode,
    phase: Phase,
    sequence: i64,
    timestamp: DateTime<Utc>,
    book: OrderedBook,
}

impl BookStateMachine {
    pub fn new(symbol: impl Into<String>, mode: BookMode) -> Self {
        Self {
            symbol: symbol.into(),
            mode,
            phase: Phase::Uninitialized,
            sequence: -1,
            timestamp: Utc::now(),
            book: OrderedBook::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn mode(&self) -> BookMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn book(&self) -> &OrderedBook {
        &self.book
    }

    /// Reinitialize both sides from a snapshot, discarding prior state.
    ///
    /// Negative sizes fail with `MalformedEvent` before anything is
    /// applied; zero-size levels are skipped so the all-sizes-positive
    /// invariant holds from the first frame.
    pub fn on_snapshot(&mut self, evt: &BookEvent) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        validate_sizes(evt)?;

        let mut book = OrderedBook::new();
        for change in &evt.updates {
            book.apply(change.side, change.price, change.new_size);
        }
        self.book = book;
        self.sequence = evt.sequence.unwrap_or(-1);
        self.timestamp = evt.received_at;
        self.phase = Phase::Live;
        debug!(
            symbol = %self.symbol,
            sequence = self.sequence,
            bid_levels = self.book.len(Side::Bid),
            ask_levels = self.book.len(Side::Ask),
            "book initialized from snapshot"
        );
        Ok(())
    }

    /// Apply an incremental update.
    ///
    /// Sequence numbers, when the stream provides them, must advance by
    /// exactly one: a replayed or out-of-order message and an unexplained
    /// upward jump both mean lost state, so the machine resets and fails
    /// with `SequenceGap`. A crossed book after application resets
    /// likewise with `CrossedBook`.
    pub fn on_update(&mut self, evt: &BookEvent) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        if self.phase != Phase::Live {
            return Err(self.gap(evt.sequence.unwrap_or(-1)));
        }
        if let Some(received) = evt.sequence {
            // A sequence baseline only exists once the stream has shown
            // one; the first sequenced update after an unsequenced
            // snapshot establishes it.
            if self.sequence >= 0 && received != self.sequence + 1 {
                return Err(self.gap(received));
            }
        }
        validate_sizes(evt)?;

        for change in &evt.updates {
            self.book.apply(change.side, change.price, change.new_size);
        }
        if let Some(sequence) = evt.sequence {
            self.sequence = sequence;
        }
        self.timestamp = evt.received_at;

        if self.book.is_crossed() {
            let (best_bid, _) = self.book.best(Side::Bid).expect("crossed book has bids");
            let (best_ask, _) = self.book.best(Side::Ask).expect("crossed book has asks");
            self.reset();
            return Err(EngineError::CrossedBook {
                symbol: self.symbol.clone(),
                best_bid,
                best_ask,
            });
        }
        Ok(())
    }

    /// Drop back to `Uninitialized`, clearing the book. The next snapshot
    /// restores `Live`.
    pub fn reset(&mut self) {
        self.book = OrderedBook::new();
        self.phase = Phase::Uninitialized;
        self.sequence = -1;
    }

    /// Terminal transition on session shutdown.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    fn gap(&mut self, received: i64) -> EngineError {
        let current = self.sequence;
        self.reset();
        EngineError::SequenceGap {
            symbol: self.symbol.clone(),
            current,
            received,
        }
    }
}

fn validate_sizes(evt: &BookEvent) -> Result<()> {
    for change in &evt.updates {
        if change.new_size.is_sign_negative() && !change.new_size.is_zero() {
            return Err(EngineError::MalformedEvent(format!(
                "negative size {} at {} {}",
                change.new_size, change.side, change.price
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::protocol::LevelChange;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn event(sequence: Option<i64>, levels: &[(Side, Decimal, Decimal)]) -> BookEvent {
        BookEvent {
            symbol: "BTC-USD".to_string(),
            sequence,
            origin_ts: None,
            received_at: Utc::now(),
            updates: levels
                .iter()
                .map(|&(side, price, new_size)| LevelChange {
                    side,
                    price,
                    new_size,
                })
                .collect(),
        }
    }

    fn live_machine() -> BookStateMachine {
        let mut machine = BookStateMachine::new("BTC-USD", BookMode::Full);
        machine
            .on_snapshot(&event(
                Some(10),
                &[
                    (Side::Bid, dec!(100), dec!(1)),
                    (Side::Bid, dec!(99), dec!(2)),
                    (Side::Ask, dec!(101), dec!(3)),
                    (Side::Ask, dec!(102), dec!(4)),
                ],
            ))
            .unwrap();
        machine
    }

    #[test]
    fn snapshot_brings_machine_live() {
        let machine = live_machine();
        assert_eq!(machine.phase(), Phase::Live);
        assert_eq!(machine.sequence(), 10);
        assert_eq!(machine.book().best(Side::Bid), Some((dec!(100), dec!(1))));
        assert_eq!(machine.book().best(Side::Ask), Some((dec!(101), dec!(3))));
    }

    #[test]
    fn snapshot_replaces_prior_state() {
        let mut machine = live_machine();
        machine
            .on_snapshot(&event(Some(50), &[(Side::Bid, dec!(200), dec!(5))]))
            .unwrap();
        assert_eq!(machine.sequence(), 50);
        assert_eq!(machine.book().len(Side::Ask), 0);
        assert_eq!(machine.book().best(Side::Bid), Some((dec!(200), dec!(5))));
    }

    #[test]
    fn snapshot_rejects_negative_size() {
        let mut machine = BookStateMachine::new("BTC-USD", BookMode::Full);
        let err = machine
            .on_snapshot(&event(Some(1), &[(Side::Bid, dec!(100), dec!(-1))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedEvent(_)));
        assert_eq!(machine.phase(), Phase::Uninitialized);
    }

    #[test]
    fn update_applies_deletion_via_zero_size() {
        let mut machine = live_machine();
        machine
            .on_update(&event(Some(11), &[(Side::Bid, dec!(100), dec!(0))]))
            .unwrap();
        assert_eq!(machine.book().best(Side::Bid), Some((dec!(99), dec!(2))));
        assert_eq!(machine.sequence(), 11);
    }

    #[test]
    fn sequence_gap_resets_and_snapshot_recovers() {
        let mut machine = live_machine();
        let err = machine
            .on_update(&event(Some(10), &[(Side::Bid, dec!(98), dec!(1))]))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::SequenceGap {
                current: 10,
                received: 10,
                ..
            }
        ));
        assert_eq!(machine.phase(), Phase::Uninitialized);
        assert!(machine.book().is_empty());

        machine
            .on_snapshot(&event(Some(13), &[(Side::Bid, dec!(100), dec!(1))]))
            .unwrap();
        assert_eq!(machine.phase(), Phase::Live);
        assert_eq!(machine.sequence(), 13);
    }

    #[test]
    fn upward_sequence_jump_is_a_gap() {
        let mut machine = live_machine();
        let err = machine
            .on_update(&event(Some(12), &[(Side::Bid, dec!(98), dec!(1))]))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::SequenceGap {
                current: 10,
                received: 12,
                ..
            }
        ));
        assert_eq!(machine.phase(), Phase::Uninitialized);

        machine
            .on_snapshot(&event(Some(13), &[(Side::Bid, dec!(100), dec!(1))]))
            .unwrap();
        assert_eq!(machine.phase(), Phase::Live);
    }

    #[test]
    fn unsequenced_snapshot_accepts_first_sequenced_update() {
        let mut machine = BookStateMachine::new("BTC-USD", BookMode::Light);
        machine
            .on_snapshot(&event(None, &[(Side::Bid, dec!(100), dec!(1))]))
            .unwrap();
        machine
            .on_update(&event(Some(40), &[(Side::Ask, dec!(101), dec!(1))]))
            .unwrap();
        assert_eq!(machine.sequence(), 40);
        // From here the baseline is strict again.
        let err = machine
            .on_update(&event(Some(40), &[(Side::Ask, dec!(102), dec!(1))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::SequenceGap { .. }));
    }

    #[test]
    fn update_before_snapshot_is_a_gap() {
        let mut machine = BookStateMachine::new("BTC-USD", BookMode::Light);
        let err = machine
            .on_update(&event(Some(5), &[(Side::Bid, dec!(100), dec!(1))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::SequenceGap { .. }));
    }

    #[test]
    fn updates_without_sequence_are_accepted_in_order() {
        let mut machine = live_machine();
        machine
            .on_update(&event(None, &[(Side::Ask, dec!(101), dec!(7))]))
            .unwrap();
        assert_eq!(machine.book().best(Side::Ask), Some((dec!(101), dec!(7))));
        assert_eq!(machine.sequence(), 10);
    }

    #[test]
    fn crossed_book_resets_machine() {
        let mut machine = live_machine();
        let err = machine
            .on_update(&event(Some(11), &[(Side::Bid, dec!(101), dec!(2))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::CrossedBook { .. }));
        assert_eq!(machine.phase(), Phase::Uninitialized);
        assert!(machine.book().is_empty());
    }

    #[test]
    fn closed_machine_ignores_events() {
        let mut machine = live_machine();
        machine.close();
        machine
            .on_update(&event(Some(99), &[(Side::Bid, dec!(1), dec!(1))]))
            .unwrap();
        assert_eq!(machine.phase(), Phase::Closed);
        assert_eq!(machine.sequence(), 10);
    }
}
