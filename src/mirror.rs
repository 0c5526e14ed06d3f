// ===============================
// src/mirror.rs (Order Book Mirror)
// ===============================
//
// Proyeksi order milik sendiri yang masih resting, per sisi, kunci = harga integer.
// - refresh(): ganti total dari listing venue (gagal -> state lama dipertahankan)
// - apply()  : hanya driver yang memanggil, di antara fase
//
use ahash::AHashMap as HashMap;
use tracing::{debug, warn};

use crate::domain::{Outcome, PriceLevel, RestingOrder, Side};
use crate::error::MirrorRefreshError;
use crate::gateway::Gateway;
use crate::metrics::MIRROR_LEVELS;

#[derive(Debug, Default, Clone)]
pub struct OrderBookMirror {
    buys: HashMap<PriceLevel, RestingOrder>,
    sells: HashMap<PriceLevel, RestingOrder>,
}

impl OrderBookMirror {
    pub fn new() -> Self { Self::default() }

    pub fn side(&self, side: Side) -> &HashMap<PriceLevel, RestingOrder> {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut HashMap<PriceLevel, RestingOrder> {
        match side {
            Side::Buy => &mut self.buys,
            Side::Sell => &mut self.sells,
        }
    }

    pub fn get(&self, side: Side, price: PriceLevel) -> Option<&RestingOrder> { self.side(side).get(&price) }

    /// Sorted price levels currently held on one side.
    pub fn levels(&self, side: Side) -> Vec<PriceLevel> {
        let mut v: Vec<PriceLevel> = self.side(side).keys().copied().collect();
        v.sort_unstable();
        v
    }

    pub fn insert(&mut self, o: RestingOrder) {
        // duplikat level: yang terakhir menang (venue menjamin unik)
        if let Some(prev) = self.side_mut(o.side).insert(o.price, o) {
            debug!(order_id = %prev.order_id, price = prev.price, "mirror level overwritten");
        }
    }

    /// Replace both sides from the venue's active-order list.
    pub async fn refresh(&mut self, gw: &dyn Gateway, symbol: &str) -> Result<(usize, usize), MirrorRefreshError> {
        let listed = match gw.list_active_orders(symbol).await {
            Ok(v) => v,
            Err(e) => {
                warn!(?e, symbol, "active order listing failed, keeping last known mirror");
                return Err(MirrorRefreshError(e));
            }
        };
        self.buys.clear();
        self.sells.clear();
        for o in listed {
            self.insert(RestingOrder::from(o));
        }
        self.export_gauges();
        Ok((self.buys.len(), self.sells.len()))
    }

    /// Tentative update from a finished action. The next refresh is authoritative.
    pub fn apply(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Cancelled { side, price, order_id } => {
                let map = self.side_mut(*side);
                if map.get(price).map(|o| &o.order_id == order_id).unwrap_or(false) {
                    map.remove(price);
                }
            }
            Outcome::Placed { side, price, size, order_id } => {
                self.insert(RestingOrder {
                    price: *price,
                    side: *side,
                    size: *size,
                    order_id: order_id.clone(),
                    deal_size: 0.0,
                    is_active: true,
                });
            }
            Outcome::Swept { .. } | Outcome::Failed { .. } => {}
        }
        self.export_gauges();
    }

    fn export_gauges(&self) {
        MIRROR_LEVELS.with_label_values(&["buy"]).set(self.buys.len() as i64);
        MIRROR_LEVELS.with_label_values(&["sell"]).set(self.sells.len() as i64);
    }
}
