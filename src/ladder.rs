// ===============================
// src/ladder.rs (Ladder Reconciler)
// ===============================
//
// Ladder maker di sekitar reference price R dengan depth D (maker_number):
//   ask target : R+1 ..= R+D-1
//   bid target : R-D+1 ..= R
//
// Rekonsiliasi per siklus:
//   1) order di luar rentang  -> Cancel
//   2) tiap level target:
//        kosong               -> Place (size acak)
//        tidak aktif lagi     -> Replace (cancel best-effort + place)
//        sisa size di luar band -> Replace (cancel wajib sukses dulu)
//        sehat                -> biarkan
//   3) lookup gagal           -> level dilewati, dievaluasi siklus berikut
//
use ahash::AHashMap as HashMap;
use futures_util::{stream, StreamExt};
use rand::Rng;
use std::ops::RangeInclusive;
use tracing::warn;

use crate::domain::{Action, OrderDetails, PriceLevel, Qty, RestingOrder, Side};
use crate::error::{GatewayError, OrderLookupError};
use crate::gateway::Gateway;
use crate::mirror::OrderBookMirror;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ladder {
    pub reference: PriceLevel,
    pub depth: u32,
}

impl Ladder {
    pub fn new(reference: PriceLevel, depth: u32) -> Self { Self { reference, depth } }

    /// Levels the ladder wants filled on one side, nearest to the reference first.
    pub fn targets(&self, side: Side) -> Vec<PriceLevel> {
        let (r, d) = (self.reference, self.depth as i64);
        match side {
            Side::Sell => (r + 1..=r + d - 1).collect(),
            // harga harus positif
            Side::Buy => (r - d + 1..=r).rev().filter(|p| *p > 0).collect(),
        }
    }

    /// Orders inside this band survive the out-of-range pass.
    pub fn keep_range(&self, side: Side) -> RangeInclusive<PriceLevel> {
        let (r, d) = (self.reference, self.depth as i64);
        match side {
            Side::Sell => r..=r + d - 1,
            Side::Buy => r - d + 1..=r,
        }
    }

    pub fn in_range(&self, side: Side, price: PriceLevel) -> bool { self.keep_range(side).contains(&price) }
}

/// Inclusive per-order size band; fresh sizes are uniform integers inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBand {
    pub min: u64,
    pub max: u64,
}

impl SizeBand {
    pub fn draw(&self) -> Qty { rand::thread_rng().gen_range(self.min..=self.max) as Qty }

    pub fn contains(&self, q: Qty) -> bool { q >= self.min as Qty && q <= self.max as Qty }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelVerdict { Healthy, Terminal, MisSized }

pub fn assess(d: &OrderDetails, band: &SizeBand) -> LevelVerdict {
    if !d.is_active {
        LevelVerdict::Terminal
    } else if !band.contains(d.remaining()) {
        LevelVerdict::MisSized
    } else {
        LevelVerdict::Healthy
    }
}

/// Step 1: cancel every resting order outside the keep range, any fill state.
pub fn plan_out_of_range(ladder: &Ladder, mirror: &OrderBookMirror) -> Vec<Action> {
    let mut out = Vec::new();
    for side in [Side::Sell, Side::Buy] {
        for price in mirror.levels(side) {
            if ladder.in_range(side, price) {
                continue;
            }
            if let Some(o) = mirror.get(side, price) {
                out.push(Action::Cancel { side, price, order_id: o.order_id.clone() });
            }
        }
    }
    out
}

/// Step 2 (pure part): decide per target level given the lookups.
pub fn plan_convergence(
    ladder: &Ladder,
    mirror: &OrderBookMirror,
    lookups: &HashMap<String, Result<OrderDetails, GatewayError>>,
    band: &SizeBand,
) -> (Vec<Action>, Vec<OrderLookupError>) {
    let mut actions = Vec::new();
    let mut skipped = Vec::new();
    for side in [Side::Sell, Side::Buy] {
        for price in ladder.targets(side) {
            let Some(resting) = mirror.get(side, price) else {
                actions.push(Action::Place { side, price, size: band.draw() });
                continue;
            };
            match lookups.get(&resting.order_id) {
                Some(Ok(d)) => match assess(d, band) {
                    LevelVerdict::Healthy => {}
                    LevelVerdict::Terminal => actions.push(Action::Replace {
                        side,
                        price,
                        order_id: resting.order_id.clone(),
                        size: band.draw(),
                        require_cancel: false,
                    }),
                    LevelVerdict::MisSized => actions.push(Action::Replace {
                        side,
                        price,
                        order_id: resting.order_id.clone(),
                        size: band.draw(),
                        require_cancel: true,
                    }),
                },
                Some(Err(e)) => skipped.push(OrderLookupError {
                    order_id: resting.order_id.clone(),
                    side,
                    price,
                    source: e.clone(),
                }),
                None => skipped.push(OrderLookupError {
                    order_id: resting.order_id.clone(),
                    side,
                    price,
                    source: GatewayError::Decode("no lookup issued".into()),
                }),
            }
        }
    }
    (actions, skipped)
}

pub struct Reconciler {
    pub band: SizeBand,
    pub concurrency: usize,
}

impl Reconciler {
    pub fn new(band: SizeBand, concurrency: usize) -> Self { Self { band, concurrency: concurrency.max(1) } }

    pub fn out_of_range(&self, ladder: &Ladder, mirror: &OrderBookMirror) -> Vec<Action> {
        plan_out_of_range(ladder, mirror)
    }

    /// Step 2: fetch live details for every occupied target level (bounded
    /// parallelism), then decide. Lookup failures are logged and skipped.
    pub async fn converge(&self, ladder: &Ladder, mirror: &OrderBookMirror, gw: &dyn Gateway) -> Vec<Action> {
        let occupied: Vec<&RestingOrder> = [Side::Sell, Side::Buy]
            .into_iter()
            .flat_map(|side| ladder.targets(side).into_iter().filter_map(move |p| mirror.get(side, p)))
            .collect();

        let lookups: HashMap<String, Result<OrderDetails, GatewayError>> = stream::iter(occupied)
            .map(|o| async move { (o.order_id.clone(), gw.get_order(&o.order_id).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let (actions, skipped) = plan_convergence(ladder, mirror, &lookups, &self.band);
        for e in &skipped {
            warn!(order_id = %e.order_id, side = %e.side, price = e.price, error = %e.source, "order lookup failed, level skipped this cycle");
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ticker;
    use crate::gateway::PaperGateway;

    const BAND: SizeBand = SizeBand { min: 100, max: 10_000 };
    const SYM: &str = "BTC-USDT";

    fn resting(side: Side, price: PriceLevel, id: &str) -> RestingOrder {
        RestingOrder { price, side, size: 5000.0, order_id: id.into(), deal_size: 0.0, is_active: true }
    }

    fn details(id: &str, size: Qty, deal: Qty, active: bool) -> OrderDetails {
        OrderDetails { order_id: id.into(), size, deal_size: deal, is_active: active }
    }

    #[test]
    fn targets_are_exact_and_gap_free() {
        for r in [50_i64, 100, 30_000] {
            for d in 1..=8_u32 {
                let l = Ladder::new(r, d);
                let asks = l.targets(Side::Sell);
                let mut bids = l.targets(Side::Buy);
                bids.sort();
                assert_eq!(asks, (r + 1..=r + d as i64 - 1).collect::<Vec<_>>());
                assert_eq!(bids, (r - d as i64 + 1..=r).collect::<Vec<_>>());
                assert!(asks.iter().all(|a| !bids.contains(a)));
            }
        }
    }

    #[test]
    fn bid_levels_stay_positive() {
        let l = Ladder::new(2, 5);
        assert_eq!(l.targets(Side::Buy), vec![2, 1]);
    }

    #[test]
    fn out_of_range_orders_are_cancelled_whatever_their_state() {
        let (r, d) = (100, 3);
        let l = Ladder::new(r, d);
        let mut m = OrderBookMirror::new();
        let mut far = resting(Side::Sell, r + d as i64 + 5, "far-ask");
        far.deal_size = 4999.0;
        far.is_active = false;
        m.insert(far);
        m.insert(resting(Side::Sell, 101, "in-ask"));
        m.insert(resting(Side::Buy, 90, "far-bid"));
        m.insert(resting(Side::Buy, 98, "in-bid"));

        let acts = plan_out_of_range(&l, &m);
        assert_eq!(
            acts,
            vec![
                Action::Cancel { side: Side::Sell, price: 108, order_id: "far-ask".into() },
                Action::Cancel { side: Side::Buy, price: 90, order_id: "far-bid".into() },
            ]
        );
    }

    #[test]
    fn ask_just_beyond_the_ladder_is_cancel_only() {
        let l = Ladder::new(100, 3);
        let mut m = OrderBookMirror::new();
        m.insert(resting(Side::Sell, 104, "a104"));
        let cancels = plan_out_of_range(&l, &m);
        assert_eq!(cancels, vec![Action::Cancel { side: Side::Sell, price: 104, order_id: "a104".into() }]);
        // tidak ada place untuk 104 di fase konvergensi
        let (acts, _) = plan_convergence(&l, &m, &HashMap::new(), &BAND);
        assert!(acts.iter().all(|a| !matches!(a, Action::Place { price: 104, .. })));
    }

    #[test]
    fn healthy_level_untouched_and_gap_filled() {
        // R=100 D=3: ask 101 sehat, 102 kosong
        let l = Ladder::new(100, 3);
        let mut m = OrderBookMirror::new();
        m.insert(resting(Side::Sell, 101, "a101"));
        let mut lookups = HashMap::new();
        lookups.insert("a101".to_string(), Ok(details("a101", 5000.0, 0.0, true)));

        let (acts, skipped) = plan_convergence(&l, &m, &lookups, &BAND);
        assert!(skipped.is_empty());
        let asks: Vec<&Action> = acts.iter().filter(|a| a.side() == Side::Sell).collect();
        assert_eq!(asks.len(), 1);
        match asks[0] {
            Action::Place { price, size, .. } => {
                assert_eq!(*price, 102);
                assert!(BAND.contains(*size));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn thin_remaining_is_refreshed() {
        let l = Ladder::new(100, 3);
        let mut m = OrderBookMirror::new();
        m.insert(resting(Side::Sell, 101, "a101"));
        m.insert(resting(Side::Sell, 102, "a102"));
        let mut lookups = HashMap::new();
        // remaining 50 < sizeMin
        lookups.insert("a101".to_string(), Ok(details("a101", 5000.0, 4950.0, true)));
        lookups.insert("a102".to_string(), Ok(details("a102", 5000.0, 0.0, true)));

        let (acts, _) = plan_convergence(&l, &m, &lookups, &BAND);
        let asks: Vec<&Action> = acts.iter().filter(|a| a.side() == Side::Sell).collect();
        assert_eq!(asks.len(), 1);
        assert!(matches!(
            asks[0],
            Action::Replace { price: 101, order_id, require_cancel: true, .. } if order_id == "a101"
        ));
    }

    #[test]
    fn oversized_remaining_is_refreshed_but_band_edges_are_healthy() {
        let d_over = details("x", 20_000.0, 0.0, true);
        assert_eq!(assess(&d_over, &BAND), LevelVerdict::MisSized);
        assert_eq!(assess(&details("x", 10_000.0, 0.0, true), &BAND), LevelVerdict::Healthy);
        assert_eq!(assess(&details("x", 5_000.0, 4_900.0, true), &BAND), LevelVerdict::Healthy);
        assert_eq!(assess(&details("x", 5_000.0, 4_901.0, true), &BAND), LevelVerdict::MisSized);
        assert_eq!(assess(&details("x", 5_000.0, 5_000.0, false), &BAND), LevelVerdict::Terminal);
    }

    #[test]
    fn terminal_order_is_replaced_with_best_effort_cancel() {
        let l = Ladder::new(100, 2);
        let mut m = OrderBookMirror::new();
        m.insert(resting(Side::Buy, 100, "b100"));
        let mut lookups = HashMap::new();
        lookups.insert("b100".to_string(), Ok(details("b100", 5000.0, 5000.0, false)));
        let (acts, _) = plan_convergence(&l, &m, &lookups, &BAND);
        assert!(acts.iter().any(|a| matches!(
            a,
            Action::Replace { side: Side::Buy, price: 100, require_cancel: false, .. }
        )));
    }

    #[test]
    fn failed_lookup_skips_only_that_level() {
        let l = Ladder::new(100, 3);
        let mut m = OrderBookMirror::new();
        m.insert(resting(Side::Sell, 101, "a101"));
        let mut lookups = HashMap::new();
        lookups.insert("a101".to_string(), Err(GatewayError::RateLimited));
        let (acts, skipped) = plan_convergence(&l, &m, &lookups, &BAND);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].price, 101);
        assert!(acts.iter().all(|a| !matches!(a, Action::Replace { .. })));
        assert!(acts.iter().any(|a| matches!(a, Action::Place { side: Side::Sell, price: 102, .. })));
    }

    #[tokio::test]
    async fn converged_book_yields_no_actions() {
        let gw = PaperGateway::new(Ticker { best_ask: 101.0, best_bid: 99.0, best_ask_size: 0.0, best_bid_size: 0.0 });
        let l = Ladder::new(100, 4);
        for side in [Side::Sell, Side::Buy] {
            for p in l.targets(side) {
                gw.seed_order(SYM, side, p, 2_000.0, 0.0, true);
            }
        }
        let mut m = OrderBookMirror::new();
        m.refresh(&gw, SYM).await.unwrap();

        let rec = Reconciler::new(BAND, 4);
        assert!(rec.out_of_range(&l, &m).is_empty());
        assert!(rec.converge(&l, &m, &gw).await.is_empty());
        assert!(rec.converge(&l, &m, &gw).await.is_empty());
    }
}
