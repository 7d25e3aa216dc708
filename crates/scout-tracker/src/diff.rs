//! Snapshot diffing.
//!
//! Compares two consecutive snapshots of one trader instrument by instrument
//! and emits one typed event per instrument whose signed size changed.

use rust_decimal::Decimal;
use scout_core::{ChangeEvent, ChangeKind, PositionSnapshot, Size};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Diff `previous` against `current`.
///
/// - No previous snapshot: `current` is a baseline and no events are emitted.
/// - Instruments are visited in sorted order.
/// - The reference price is the current entry price, falling back to the
///   previous one (closed positions have no current entry).
/// - Reducing events carry the previous unrealized PnL scaled by the
///   fraction of the position that was closed.
pub fn diff_positions(
    previous: Option<&PositionSnapshot>,
    current: &PositionSnapshot,
) -> Vec<ChangeEvent> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let instruments: BTreeSet<&String> = previous
        .positions
        .keys()
        .chain(current.positions.keys())
        .collect();

    let mut events = Vec::new();
    for coin in instruments {
        let before = previous.size_of(coin);
        let after = current.size_of(coin);
        let Some(kind) = ChangeKind::classify(before, after) else {
            continue;
        };

        let prev_pos = previous.get(coin);
        let reference_price = current
            .get(coin)
            .and_then(|p| p.entry_price)
            .or_else(|| prev_pos.and_then(|p| p.entry_price));

        let mut event = ChangeEvent {
            id: Uuid::new_v4(),
            trader: current.trader.clone(),
            timestamp: current.captured_at,
            kind,
            instrument: coin.clone(),
            before_size: before,
            after_size: after,
            reference_price,
            notional: None,
            pnl_estimate: None,
        };
        event.notional = reference_price
            .and_then(|px| event.traded_quantity()?.checked_mul(px.inner()));
        event.pnl_estimate = pnl_estimate(
            kind,
            before,
            after,
            prev_pos.and_then(|p| p.unrealized_pnl),
        );
        events.push(event);
    }

    events
}

/// Previous unrealized PnL pro-rated by the closed fraction. `None` on
/// overflow.
fn pnl_estimate(
    kind: ChangeKind,
    before: Size,
    after: Size,
    unrealized: Option<Decimal>,
) -> Option<Decimal> {
    let unrealized = unrealized?;
    let fraction = match kind {
        ChangeKind::Closed | ChangeKind::Flipped => Decimal::ONE,
        ChangeKind::Decreased if !before.is_zero() => before
            .abs()
            .checked_sub(after.abs())?
            .checked_div(before.abs())?,
        _ => return None,
    };
    Some(unrealized.checked_mul(fraction)?.round_dp(8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use scout_core::{Position, Price, TraderId};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn snap(at: i64, positions: &[(&str, Decimal, Decimal, Decimal)]) -> PositionSnapshot {
        let mut s = PositionSnapshot::empty(TraderId::parse("0xabc").unwrap(), ts(at));
        for &(coin, size, entry, upnl) in positions {
            s.insert(
                coin,
                Position::new(Size::new(size))
                    .with_entry_price(Price::new(entry))
                    .with_unrealized_pnl(upnl),
            );
        }
        s
    }

    #[test]
    fn test_no_previous_is_baseline() {
        let current = snap(0, &[("BTC", dec!(1.5), dec!(60000), dec!(0))]);
        assert!(diff_positions(None, &current).is_empty());
    }

    #[test]
    fn test_opened() {
        let prev = snap(0, &[]);
        let cur = snap(75, &[("BTC", dec!(1.5), dec!(60000), dec!(0))]);

        let events = diff_positions(Some(&prev), &cur);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, ChangeKind::Opened);
        assert_eq!(e.instrument, "BTC");
        assert_eq!(e.before_size, Size::ZERO);
        assert_eq!(e.after_size, Size::new(dec!(1.5)));
        assert_eq!(e.notional, Some(dec!(90000)));
        assert_eq!(e.pnl_estimate, None);
        assert_eq!(e.timestamp, ts(75));
    }

    #[test]
    fn test_flipped() {
        let prev = snap(0, &[("BTC", dec!(1.5), dec!(60000), dec!(300))]);
        let cur = snap(75, &[("BTC", dec!(-0.5), dec!(61000), dec!(0))]);

        let events = diff_positions(Some(&prev), &cur);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, ChangeKind::Flipped);
        assert_eq!(e.reference_price, Some(Price::new(dec!(61000))));
        assert_eq!(e.notional, Some(dec!(122000)));
        assert_eq!(e.pnl_estimate, Some(dec!(300)));
    }

    #[test]
    fn test_open_then_close_same_size() {
        let empty = snap(0, &[]);
        let open = snap(75, &[("ETH", dec!(2), dec!(3000), dec!(0))]);
        let closed = snap(150, &[]);

        let first = diff_positions(Some(&empty), &open);
        assert_eq!(first[0].kind, ChangeKind::Opened);

        let second = diff_positions(Some(&open), &closed);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, ChangeKind::Closed);
        assert_eq!(second[0].before_size, first[0].after_size);
        assert_eq!(second[0].after_size, Size::ZERO);
        assert_eq!(second[0].reference_price, Some(Price::new(dec!(3000))));
    }

    #[test]
    fn test_decreased_pro_rates_pnl() {
        let prev = snap(0, &[("SOL", dec!(-40), dec!(100), dec!(-80))]);
        let cur = snap(75, &[("SOL", dec!(-10), dec!(100), dec!(-20))]);

        let events = diff_positions(Some(&prev), &cur);
        assert_eq!(events[0].kind, ChangeKind::Decreased);
        assert_eq!(events[0].notional, Some(dec!(3000)));
        assert_eq!(events[0].pnl_estimate, Some(dec!(-60)));
    }

    #[test]
    fn test_increased_has_no_pnl() {
        let prev = snap(0, &[("BTC", dec!(1), dec!(60000), dec!(100))]);
        let cur = snap(75, &[("BTC", dec!(2), dec!(60500), dec!(150))]);

        let events = diff_positions(Some(&prev), &cur);
        assert_eq!(events[0].kind, ChangeKind::Increased);
        assert_eq!(events[0].notional, Some(dec!(60500)));
        assert_eq!(events[0].pnl_estimate, None);
    }

    #[test]
    fn test_unchanged_emits_nothing_and_order_is_sorted() {
        let prev = snap(
            0,
            &[
                ("SOL", dec!(5), dec!(100), dec!(0)),
                ("BTC", dec!(1), dec!(60000), dec!(0)),
                ("ETH", dec!(3), dec!(3000), dec!(0)),
            ],
        );
        let cur = snap(
            75,
            &[
                ("SOL", dec!(6), dec!(100), dec!(0)),
                ("BTC", dec!(1), dec!(60000), dec!(0)),
                ("ARB", dec!(100), dec!(1), dec!(0)),
            ],
        );

        let events = diff_positions(Some(&prev), &cur);
        let coins: Vec<&str> = events.iter().map(|e| e.instrument.as_str()).collect();
        assert_eq!(coins, vec!["ARB", "ETH", "SOL"]);
    }

    #[test]
    fn test_deterministic() {
        let prev = snap(0, &[("BTC", dec!(1), dec!(60000), dec!(10))]);
        let cur = snap(75, &[("BTC", dec!(-1), dec!(59000), dec!(0)), ("ETH", dec!(1), dec!(3000), dec!(0))]);

        let strip = |events: Vec<ChangeEvent>| {
            events
                .into_iter()
                .map(|e| (e.kind, e.instrument, e.before_size, e.after_size, e.notional, e.pnl_estimate))
                .collect::<Vec<_>>()
        };
        assert_eq!(
            strip(diff_positions(Some(&prev), &cur)),
            strip(diff_positions(Some(&prev), &cur))
        );
    }

    #[test]
    fn test_missing_price_leaves_notional_empty() {
        let prev = PositionSnapshot::empty(TraderId::parse("0xabc").unwrap(), ts(0));
        let cur = PositionSnapshot::empty(TraderId::parse("0xabc").unwrap(), ts(75))
            .with_position("BTC", Position::new(Size::new(dec!(1))));

        let events = diff_positions(Some(&prev), &cur);
        assert_eq!(events[0].kind, ChangeKind::Opened);
        assert_eq!(events[0].reference_price, None);
        assert_eq!(events[0].notional, None);
    }

    #[test]
    fn test_extreme_values_leave_estimates_empty() {
        let prev = snap(0, &[("ETH", Decimal::MAX, dec!(3), Decimal::MAX)]);
        let cur = snap(
            75,
            &[
                ("BTC", Decimal::MAX, dec!(2), dec!(0)),
                ("ETH", Decimal::MIN, dec!(3), dec!(0)),
            ],
        );

        let events = diff_positions(Some(&prev), &cur);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ChangeKind::Opened);
        assert_eq!(events[0].notional, None);
        assert_eq!(events[1].kind, ChangeKind::Flipped);
        assert_eq!(events[1].notional, None);
        assert_eq!(events[1].pnl_estimate, Some(Decimal::MAX));
    }
}
