//! Multi-hop price resolution
//!
//! Turns a raw ticker snapshot into a per-asset price table denominated
//! in the quote anchor. Direct quotes win; otherwise the configured
//! bridge assets are tried in priority order and the first success is
//! taken. This is a fixed-priority lookup, not a best-price search:
//! identical inputs always produce the identical table, so a retried
//! tick is byte-for-byte reproducible.
//!
//! Coins with no resolvable path are simply absent from the table.

use crate::ticker::TickerSnapshot;
use crate::universe::CoinUniverse;
use std::collections::{BTreeMap, BTreeSet};
use types::symbol::Symbol;

/// Anchor-denominated prices for one tick, keyed by asset.
pub type PriceTable = BTreeMap<Symbol, f64>;

/// Every upstream symbol one tick may need: each coin against the
/// anchor and against each bridge, in both orientations.
pub fn candidate_symbols(universe: &CoinUniverse, bridge_priority: &[Symbol]) -> BTreeSet<String> {
    let anchor = universe.anchor();
    let mut out = BTreeSet::new();

    for bridge in bridge_priority {
        if bridge != anchor {
            out.insert(format!("{}{}", bridge, anchor));
            out.insert(format!("{}{}", anchor, bridge));
        }
    }

    for coin in universe.coins() {
        if coin == anchor {
            continue;
        }
        out.insert(format!("{}{}", coin, anchor));
        out.insert(format!("{}{}", anchor, coin));
        for bridge in bridge_priority {
            if bridge != coin {
                out.insert(format!("{}{}", coin, bridge));
                out.insert(format!("{}{}", bridge, coin));
            }
        }
    }
    out
}

/// Resolve the price table for one tick.
///
/// The anchor is 1.0 by definition. Bridges are resolved first (direct
/// quotes only, priority order) so their prices are available before any
/// coin triangulates through them; remaining coins try direct first,
/// then the first bridge with both legs known.
pub fn resolve(
    snapshot: &TickerSnapshot,
    universe: &CoinUniverse,
    bridge_priority: &[Symbol],
) -> PriceTable {
    let anchor = universe.anchor();
    let mut table = PriceTable::new();
    table.insert(anchor.clone(), 1.0);

    for bridge in bridge_priority {
        if bridge == anchor || table.contains_key(bridge) {
            continue;
        }
        if let Some(price) = direct(snapshot, bridge, anchor) {
            table.insert(bridge.clone(), price);
        }
    }

    for coin in universe.coins() {
        if coin == anchor || table.contains_key(coin) {
            continue;
        }
        if let Some(price) = direct(snapshot, coin, anchor) {
            table.insert(coin.clone(), price);
            continue;
        }
        if let Some(price) = bridged(snapshot, coin, bridge_priority, &table) {
            table.insert(coin.clone(), price);
        }
    }

    table
}

/// Direct quote against `quote`: forward pair, else inverted reverse pair.
fn direct(snapshot: &TickerSnapshot, base: &Symbol, quote: &Symbol) -> Option<f64> {
    if let Some(price) = lookup(snapshot, &format!("{}{}", base, quote)) {
        return Some(price);
    }
    lookup(snapshot, &format!("{}{}", quote, base)).map(|price| 1.0 / price)
}

/// First-match triangulation through the bridge priority list.
///
/// A bridge qualifies only if its own anchor price is already in the
/// table and a pair against the coin exists in either orientation.
fn bridged(
    snapshot: &TickerSnapshot,
    coin: &Symbol,
    bridge_priority: &[Symbol],
    table: &PriceTable,
) -> Option<f64> {
    for bridge in bridge_priority {
        if bridge == coin {
            continue;
        }
        let Some(bridge_price) = table.get(bridge) else {
            continue;
        };
        if let Some(in_bridge) = lookup(snapshot, &format!("{}{}", coin, bridge)) {
            return Some(in_bridge * bridge_price);
        }
        if let Some(inverse) = lookup(snapshot, &format!("{}{}", bridge, coin)) {
            return Some(bridge_price / inverse);
        }
    }
    None
}

fn lookup(snapshot: &TickerSnapshot, symbol: &str) -> Option<f64> {
    snapshot
        .get(symbol)
        .copied()
        .filter(|p| p.is_finite() && *p > 0.0)
}
