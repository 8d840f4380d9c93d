//! Derived matrix construction
//!
//! One call per tick turns the resolved price table plus the previous
//! snapshot context into a complete frame per matrix type. Pure and
//! CPU-only; persistence and annotation happen elsewhere.
//!
//! The sentinel rules live here: benchmark cells exist only where both
//! prices resolved (absent cells read back as NaN), while every derived
//! cell always gets a number, with 0.0 standing in wherever a baseline
//! is missing. Derived frames therefore never contain NaN.
//!
//! The scalar helpers (`pct_change`, `frame_change`, `composite_ref`)
//! are the single source of the percentage arithmetic; the on-demand
//! per-symbol path reuses them so the two paths cannot drift.

use crate::resolver::PriceTable;
use std::collections::BTreeMap;
use types::matrix::{MatrixFrame, MatrixType};
use types::symbol::{PairKey, Symbol};

/// Reference magnitudes below this are treated as "no baseline".
const MIN_DENOMINATOR: f64 = 1e-10;

// ── Scalar Primitives ───────────────────────────────────────────────

/// Percentage change of `current` against `reference`.
///
/// Returns the 0.0 bootstrap when either side is non-finite or the
/// reference is too small to divide by.
pub fn pct_change(current: f64, reference: f64) -> f64 {
    if !current.is_finite() || !reference.is_finite() || reference.abs() < MIN_DENOMINATOR {
        return 0.0;
    }
    current / reference - 1.0
}

/// Difference between consecutive percentage values.
pub fn frame_change(current: f64, previous: f64) -> f64 {
    if !current.is_finite() || !previous.is_finite() {
        return 0.0;
    }
    current - previous
}

/// Composite metric `(1 + id_pct) * pct_ref`.
pub fn composite_ref(id_pct: f64, pct_ref: f64) -> f64 {
    if !id_pct.is_finite() || !pct_ref.is_finite() {
        return 0.0;
    }
    (1.0 + id_pct) * pct_ref
}

// ── Frame Construction ──────────────────────────────────────────────

/// Previous-tick context for the derived recurrences.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrevFrames<'a> {
    /// Last committed benchmark frame, if any.
    pub benchmark: Option<&'a MatrixFrame>,
    /// Last committed id_pct frame, if any.
    pub id_pct: Option<&'a MatrixFrame>,
}

/// Build all matrix frames for one tick over `coins`.
///
/// `anchors` holds the UTC-day opening benchmark per pair; pairs absent
/// there bootstrap their pct_ref to 0.0.
pub fn build(
    coins: &[Symbol],
    prices: &PriceTable,
    prev: PrevFrames<'_>,
    anchors: &BTreeMap<PairKey, f64>,
) -> BTreeMap<MatrixType, MatrixFrame> {
    let mut benchmark = MatrixFrame::new();
    let mut pct_ref_frame = MatrixFrame::new();
    let mut id_pct_frame = MatrixFrame::new();
    let mut pct_drv_frame = MatrixFrame::new();
    let mut ref_frame = MatrixFrame::new();

    for base in coins {
        for quote in coins {
            if base == quote {
                continue;
            }
            let pair = PairKey {
                base: base.clone(),
                quote: quote.clone(),
            };

            let ratio = match (prices.get(base), prices.get(quote)) {
                (Some(pb), Some(pq)) if pq.abs() >= MIN_DENOMINATOR => Some(pb / pq),
                _ => None,
            };
            if let Some(v) = ratio {
                benchmark.insert(pair.clone(), v);
            }

            let prev_ratio = prev.benchmark.and_then(|f| f.get(&pair)).copied();
            let id_pct = match (ratio, prev_ratio) {
                (Some(current), Some(previous)) => pct_change(current, previous),
                _ => 0.0,
            };

            let pct_ref = match (ratio, anchors.get(&pair)) {
                (Some(current), Some(opening)) => pct_change(current, *opening),
                _ => 0.0,
            };

            let pct_drv = match prev.id_pct.and_then(|f| f.get(&pair)).copied() {
                Some(previous) => frame_change(id_pct, previous),
                None => 0.0,
            };

            let composite = composite_ref(id_pct, pct_ref);

            id_pct_frame.insert(pair.clone(), id_pct);
            pct_ref_frame.insert(pair.clone(), pct_ref);
            pct_drv_frame.insert(pair.clone(), pct_drv);
            ref_frame.insert(pair, composite);
        }
    }

    BTreeMap::from([
        (MatrixType::Benchmark, benchmark),
        (MatrixType::PctRef, pct_ref_frame),
        (MatrixType::IdPct, id_pct_frame),
        (MatrixType::PctDrv, pct_drv_frame),
        (MatrixType::Ref, ref_frame),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s)
    }

    fn pair(base: &str, quote: &str) -> PairKey {
        PairKey::new(sym(base), sym(quote))
    }

    fn coins(list: &[&str]) -> Vec<Symbol> {
        list.iter().map(|c| sym(c)).collect()
    }

    fn prices(list: &[(&str, f64)]) -> PriceTable {
        list.iter().map(|(s, p)| (sym(s), *p)).collect()
    }

    #[test]
    fn test_pct_change_bootstraps_on_bad_reference() {
        assert_eq!(pct_change(1.5, 0.0), 0.0);
        assert_eq!(pct_change(1.5, f64::NAN), 0.0);
        assert_eq!(pct_change(f64::NAN, 1.5), 0.0);
        assert_relative_eq!(pct_change(1.05, 1.0), 0.05, max_relative = 1e-12);
    }

    #[test]
    fn test_benchmark_scenario_values() {
        let universe = coins(&["USDT", "BTC", "ETH"]);
        let table = prices(&[("USDT", 1.0), ("BTC", 65_000.0), ("ETH", 3_200.0)]);
        let frames = build(&universe, &table, PrevFrames::default(), &BTreeMap::new());

        let benchmark = &frames[&MatrixType::Benchmark];
        assert_relative_eq!(
            *benchmark.get(&pair("BTC", "ETH")).unwrap(),
            20.3125,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            *benchmark.get(&pair("ETH", "BTC")).unwrap(),
            0.049230769,
            max_relative = 1e-6
        );
        assert_relative_eq!(
            *benchmark.get(&pair("BTC", "USDT")).unwrap(),
            65_000.0,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_first_tick_bootstraps_derived_to_zero() {
        let universe = coins(&["USDT", "BTC", "ETH"]);
        let table = prices(&[("USDT", 1.0), ("BTC", 65_000.0), ("ETH", 3_200.0)]);
        let frames = build(&universe, &table, PrevFrames::default(), &BTreeMap::new());

        for matrix_type in [
            MatrixType::PctRef,
            MatrixType::IdPct,
            MatrixType::PctDrv,
            MatrixType::Ref,
        ] {
            let frame = &frames[&matrix_type];
            assert_eq!(frame.len(), 6, "{matrix_type} should cover all pairs");
            for value in frame.values() {
                assert_eq!(*value, 0.0, "{matrix_type} must bootstrap to 0.0");
            }
        }
    }

    #[test]
    fn test_unresolved_coin_omitted_from_benchmark_only() {
        let universe = coins(&["USDT", "BTC", "XMR"]);
        let table = prices(&[("USDT", 1.0), ("BTC", 65_000.0)]);
        let frames = build(&universe, &table, PrevFrames::default(), &BTreeMap::new());

        let benchmark = &frames[&MatrixType::Benchmark];
        assert!(benchmark.get(&pair("BTC", "XMR")).is_none());
        assert!(benchmark.get(&pair("BTC", "USDT")).is_some());

        // Derived frames still carry every pair, as bootstrap zeros.
        let id_pct = &frames[&MatrixType::IdPct];
        assert_eq!(id_pct.get(&pair("BTC", "XMR")), Some(&0.0));
    }

    #[test]
    fn test_second_tick_recurrences() {
        let universe = coins(&["USDT", "BTC", "ETH"]);

        let first = prices(&[("USDT", 1.0), ("BTC", 64_000.0), ("ETH", 3_200.0)]);
        let frames_t0 = build(&universe, &first, PrevFrames::default(), &BTreeMap::new());
        let benchmark_t0 = &frames_t0[&MatrixType::Benchmark];
        let id_pct_t0 = &frames_t0[&MatrixType::IdPct];

        // Anchors seeded from the day's first frame.
        let anchors: BTreeMap<PairKey, f64> =
            benchmark_t0.iter().map(|(k, v)| (k.clone(), *v)).collect();

        let second = prices(&[("USDT", 1.0), ("BTC", 65_600.0), ("ETH", 3_200.0)]);
        let prev = PrevFrames {
            benchmark: Some(benchmark_t0),
            id_pct: Some(id_pct_t0),
        };
        let frames_t1 = build(&universe, &second, prev, &anchors);

        let key = pair("BTC", "USDT");
        let id_pct = *frames_t1[&MatrixType::IdPct].get(&key).unwrap();
        let pct_ref = *frames_t1[&MatrixType::PctRef].get(&key).unwrap();
        let pct_drv = *frames_t1[&MatrixType::PctDrv].get(&key).unwrap();
        let composite = *frames_t1[&MatrixType::Ref].get(&key).unwrap();

        assert_relative_eq!(id_pct, 0.025, max_relative = 1e-12);
        assert_relative_eq!(pct_ref, 0.025, max_relative = 1e-12);
        // Previous id_pct was the 0.0 bootstrap.
        assert_relative_eq!(pct_drv, 0.025, max_relative = 1e-12);
        assert_relative_eq!(composite, 1.025 * 0.025, max_relative = 1e-12);
    }

    #[test]
    fn test_missing_anchor_bootstraps_pct_ref() {
        let universe = coins(&["USDT", "BTC"]);
        let table = prices(&[("USDT", 1.0), ("BTC", 65_000.0)]);

        let prev_benchmark: MatrixFrame =
            [(pair("BTC", "USDT"), 64_000.0)].into_iter().collect();
        let prev = PrevFrames {
            benchmark: Some(&prev_benchmark),
            id_pct: None,
        };
        let frames = build(&universe, &table, prev, &BTreeMap::new());

        // Benchmark moved, but with no opening anchor pct_ref is 0.0.
        let key = pair("BTC", "USDT");
        assert_relative_eq!(
            *frames[&MatrixType::IdPct].get(&key).unwrap(),
            0.015625,
            max_relative = 1e-12
        );
        assert_eq!(*frames[&MatrixType::PctRef].get(&key).unwrap(), 0.0);
    }

    #[test]
    fn test_derived_frames_never_contain_nan() {
        let universe = coins(&["USDT", "BTC", "XMR"]);
        let table = prices(&[("USDT", 1.0), ("BTC", 65_000.0)]);

        // Previous frame with a pathological stored value.
        let prev_benchmark: MatrixFrame = [(pair("BTC", "XMR"), 0.0)].into_iter().collect();
        let prev = PrevFrames {
            benchmark: Some(&prev_benchmark),
            id_pct: None,
        };
        let frames = build(&universe, &table, prev, &BTreeMap::new());

        for matrix_type in [
            MatrixType::PctRef,
            MatrixType::IdPct,
            MatrixType::PctDrv,
            MatrixType::Ref,
        ] {
            for (pair_key, value) in &frames[&matrix_type] {
                assert!(
                    value.is_finite(),
                    "{matrix_type} produced non-finite value for {pair_key}"
                );
            }
        }
    }

    proptest! {
        #[test]
        fn prop_reciprocal_benchmark_cells(
            base_price in 1e-6f64..1e9,
            quote_price in 1e-6f64..1e9,
        ) {
            let universe = coins(&["USDT", "AAA", "BBB"]);
            let table = prices(&[
                ("USDT", 1.0),
                ("AAA", base_price),
                ("BBB", quote_price),
            ]);
            let frames = build(&universe, &table, PrevFrames::default(), &BTreeMap::new());
            let benchmark = &frames[&MatrixType::Benchmark];

            let forward = *benchmark.get(&pair("AAA", "BBB")).unwrap();
            let backward = *benchmark.get(&pair("BBB", "AAA")).unwrap();
            prop_assert!((forward * backward - 1.0).abs() < 1e-9);
        }
    }
}
