// =============================================================================
// Shared types used across the microstructure lab
// =============================================================================
//
// A `Snapshot` is one point-in-time view of the book: top-of-book prices and
// sizes, depth aggregated over the first 5 and 10 levels, and the metrics
// derived from them. Every derived field is `None` when its inputs are
// missing; nothing is ever filled with a placeholder zero.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of levels aggregated for the shallow depth / imbalance metrics.
pub const SHALLOW_LEVELS: usize = 5;
/// Number of levels aggregated for the deep depth metrics.
pub const DEEP_LEVELS: usize = 10;

/// A single price level: (price, size).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

impl BookLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

/// Raw order book as returned by an exchange connector, best price first on
/// both sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookDepth {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookDepth {
    pub fn new(bids: Vec<BookLevel>, asks: Vec<BookLevel>) -> Self {
        Self { bids, asks }
    }

    /// Sum of sizes over the first `levels` entries of `side`, or `None` if
    /// the side has fewer than `levels` entries.
    fn aggregate(side: &[BookLevel], levels: usize) -> Option<f64> {
        if side.len() < levels {
            return None;
        }
        Some(side[..levels].iter().map(|l| l.size).sum())
    }

    pub fn bid_depth(&self, levels: usize) -> Option<f64> {
        Self::aggregate(&self.bids, levels)
    }

    pub fn ask_depth(&self, levels: usize) -> Option<f64> {
        Self::aggregate(&self.asks, levels)
    }

    /// Fail when the best bid is above the best ask. A locked book
    /// (bid == ask) is accepted.
    pub fn check_not_crossed(&self) -> Result<(), CrossedBook> {
        match (self.bids.first(), self.asks.first()) {
            (Some(bid), Some(ask)) if bid.price > ask.price => Err(CrossedBook {
                best_bid: bid.price,
                best_ask: ask.price,
            }),
            _ => Ok(()),
        }
    }
}

/// Rejected book: the best bid is above the best ask.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("crossed book: best bid {best_bid} above best ask {best_ask}")]
pub struct CrossedBook {
    pub best_bid: f64,
    pub best_ask: f64,
}

// =============================================================================
// Snapshot
// =============================================================================

/// One sampled order-book observation with its derived microstructure fields.
///
/// Field names double as the dataset column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub best_bid: Option<f64>,
    #[serde(default)]
    pub best_ask: Option<f64>,
    #[serde(default)]
    pub best_bid_size: Option<f64>,
    #[serde(default)]
    pub best_ask_size: Option<f64>,
    #[serde(default)]
    pub bid_depth_5: Option<f64>,
    #[serde(default)]
    pub ask_depth_5: Option<f64>,
    #[serde(default)]
    pub bid_depth_10: Option<f64>,
    #[serde(default)]
    pub ask_depth_10: Option<f64>,
    #[serde(default)]
    pub spread: Option<f64>,
    #[serde(default)]
    pub spread_bps: Option<f64>,
    #[serde(default)]
    pub mid_price: Option<f64>,
    #[serde(default)]
    pub imbalance_5: Option<f64>,
}

impl Snapshot {
    /// Build a snapshot from a raw book, computing every derived field.
    ///
    /// Callers reject crossed books first (`check_not_crossed`); otherwise
    /// the spread comes out negative.
    pub fn from_book(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        book: &OrderBookDepth,
    ) -> Self {
        let best_bid = book.bids.first().map(|l| l.price);
        let best_ask = book.asks.first().map(|l| l.price);

        let bid_depth_5 = book.bid_depth(SHALLOW_LEVELS);
        let ask_depth_5 = book.ask_depth(SHALLOW_LEVELS);

        let (spread, spread_bps, mid_price) = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => {
                let spread = ask - bid;
                (
                    Some(spread),
                    Some(spread / bid * 10_000.0),
                    Some((bid + ask) / 2.0),
                )
            }
            _ => (None, None, None),
        };

        Self {
            timestamp,
            symbol: symbol.into(),
            best_bid,
            best_ask,
            best_bid_size: book.bids.first().map(|l| l.size),
            best_ask_size: book.asks.first().map(|l| l.size),
            bid_depth_5,
            ask_depth_5,
            bid_depth_10: book.bid_depth(DEEP_LEVELS),
            ask_depth_10: book.ask_depth(DEEP_LEVELS),
            spread,
            spread_bps,
            mid_price,
            imbalance_5: depth_imbalance(bid_depth_5, ask_depth_5),
        }
    }
}

/// Normalised depth imbalance in [-1, +1]; positive means more resting bids.
///
/// `None` when either side is missing or the book is empty on both sides.
pub fn depth_imbalance(bid_depth: Option<f64>, ask_depth: Option<f64>) -> Option<f64> {
    let (bid, ask) = (bid_depth?, ask_depth?);
    let total = bid + ask;
    if total > 0.0 {
        Some((bid - ask) / total)
    } else {
        None
    }
}

// =============================================================================
// SnapshotSeries
// =============================================================================

/// Rejected append: the timestamp does not strictly follow the last one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("snapshot at {incoming} does not follow {last}")]
pub struct OutOfOrder {
    pub last: DateTime<Utc>,
    pub incoming: DateTime<Utc>,
}

/// Ordered sequence of snapshots with strictly increasing timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSeries {
    snapshots: Vec<Snapshot>,
}

impl SnapshotSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from already-collected snapshots, enforcing ordering.
    pub fn from_snapshots(snapshots: Vec<Snapshot>) -> Result<Self, OutOfOrder> {
        let mut series = Self {
            snapshots: Vec::with_capacity(snapshots.len()),
        };
        for s in snapshots {
            series.push(s)?;
        }
        Ok(series)
    }

    /// Append a snapshot. Duplicate or earlier timestamps are rejected.
    pub fn push(&mut self, snapshot: Snapshot) -> Result<(), OutOfOrder> {
        if let Some(last) = self.snapshots.last() {
            if snapshot.timestamp <= last.timestamp {
                return Err(OutOfOrder {
                    last: last.timestamp,
                    incoming: snapshot.timestamp,
                });
            }
        }
        self.snapshots.push(snapshot);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// The `mid_price` column.
    pub fn mid_prices(&self) -> Vec<Option<f64>> {
        self.snapshots.iter().map(|s| s.mid_price).collect()
    }

    /// The `imbalance_5` column.
    pub fn imbalances(&self) -> Vec<Option<f64>> {
        self.snapshots.iter().map(|s| s.imbalance_5).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn levels(prices: &[f64], size: f64) -> Vec<BookLevel> {
        prices.iter().map(|&p| BookLevel::new(p, size)).collect()
    }

    fn deep_book() -> OrderBookDepth {
        let bids: Vec<f64> = (0..10).map(|i| 100.0 - i as f64).collect();
        let asks: Vec<f64> = (0..10).map(|i| 101.0 + i as f64).collect();
        OrderBookDepth::new(levels(&bids, 2.0), levels(&asks, 1.0))
    }

    #[test]
    fn derived_fields_from_full_book() {
        let s = Snapshot::from_book("BTC/USDT", ts(0), &deep_book());
        assert_eq!(s.best_bid, Some(100.0));
        assert_eq!(s.best_ask, Some(101.0));
        assert_eq!(s.best_bid_size, Some(2.0));
        assert_eq!(s.spread, Some(1.0));
        assert!((s.spread_bps.unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(s.mid_price, Some(100.5));
        assert_eq!(s.bid_depth_5, Some(10.0));
        assert_eq!(s.ask_depth_5, Some(5.0));
        assert_eq!(s.bid_depth_10, Some(20.0));
        assert_eq!(s.ask_depth_10, Some(10.0));
        // (10 - 5) / 15
        assert!((s.imbalance_5.unwrap() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn shallow_side_leaves_depth_and_imbalance_absent() {
        let book = OrderBookDepth::new(
            levels(&[100.0, 99.0, 98.0], 1.0),
            levels(&[101.0, 102.0, 103.0, 104.0, 105.0, 106.0], 1.0),
        );
        let s = Snapshot::from_book("BTC/USDT", ts(0), &book);
        assert_eq!(s.bid_depth_5, None);
        assert_eq!(s.ask_depth_5, Some(5.0));
        assert_eq!(s.ask_depth_10, None);
        assert_eq!(s.imbalance_5, None, "imbalance must not be a fabricated zero");
        assert_eq!(s.mid_price, Some(100.5));
    }

    #[test]
    fn empty_side_leaves_prices_absent() {
        let book = OrderBookDepth::new(Vec::new(), levels(&[101.0], 1.0));
        let s = Snapshot::from_book("BTC/USDT", ts(0), &book);
        assert_eq!(s.best_bid, None);
        assert_eq!(s.best_ask, Some(101.0));
        assert_eq!(s.spread, None);
        assert_eq!(s.spread_bps, None);
        assert_eq!(s.mid_price, None);
    }

    #[test]
    fn crossed_book_is_rejected_and_locked_book_accepted() {
        let crossed = OrderBookDepth::new(levels(&[101.0], 1.0), levels(&[100.0], 1.0));
        assert_eq!(
            crossed.check_not_crossed(),
            Err(CrossedBook {
                best_bid: 101.0,
                best_ask: 100.0
            })
        );

        let locked = OrderBookDepth::new(levels(&[100.0], 1.0), levels(&[100.0], 1.0));
        assert!(locked.check_not_crossed().is_ok());
        assert_eq!(Snapshot::from_book("X", ts(0), &locked).spread, Some(0.0));

        let one_sided = OrderBookDepth::new(Vec::new(), levels(&[100.0], 1.0));
        assert!(one_sided.check_not_crossed().is_ok());
        assert!(deep_book().check_not_crossed().is_ok());
    }

    #[test]
    fn imbalance_bounds() {
        assert_eq!(depth_imbalance(Some(5.0), Some(0.0)), Some(1.0));
        assert_eq!(depth_imbalance(Some(0.0), Some(5.0)), Some(-1.0));
        assert_eq!(depth_imbalance(Some(0.0), Some(0.0)), None);
        assert_eq!(depth_imbalance(None, Some(1.0)), None);
    }

    #[test]
    fn series_rejects_duplicate_and_earlier_timestamps() {
        let book = deep_book();
        let mut series = SnapshotSeries::new();
        series.push(Snapshot::from_book("X", ts(10), &book)).unwrap();
        assert!(series.push(Snapshot::from_book("X", ts(10), &book)).is_err());
        assert!(series.push(Snapshot::from_book("X", ts(5), &book)).is_err());
        series
            .push(Snapshot::from_book("X", ts(10) + Duration::milliseconds(1), &book))
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.mid_prices(), vec![Some(100.5), Some(100.5)]);
    }
}
