// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use std::fmt;

/// Harga integer (quote unit, dipotong tanpa pecahan). Kunci level per sisi.
pub type PriceLevel = i64;
/// Jumlah (base unit).
pub type Qty = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side { Buy, Sell }
impl Side {
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
    pub fn parse(s: &str) -> Option<Side> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }
}
impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Truncate a venue decimal price to its integer level.
pub fn truncate_price(px: f64) -> PriceLevel { px.trunc() as PriceLevel }

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker { pub best_ask: f64, pub best_bid: f64, pub best_ask_size: Qty, pub best_bid_size: Qty }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck { pub order_id: String }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails { pub order_id: String, pub size: Qty, pub deal_size: Qty, pub is_active: bool }
impl OrderDetails {
    pub fn remaining(&self) -> Qty { self.size - self.deal_size }
}

/// One row of the venue's active limit-order listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveOrder { pub order_id: String, pub side: Side, pub price: f64, pub size: Qty, pub deal_size: Qty }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingOrder {
    pub price: PriceLevel,
    pub side: Side,
    pub size: Qty,
    pub order_id: String,
    pub deal_size: Qty,
    pub is_active: bool,
}

impl From<ActiveOrder> for RestingOrder {
    fn from(o: ActiveOrder) -> Self {
        RestingOrder {
            price: truncate_price(o.price),
            side: o.side,
            size: o.size,
            order_id: o.order_id,
            deal_size: o.deal_size,
            is_active: true,
        }
    }
}

/// Unit of work for the execution coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Cancel { side: Side, price: PriceLevel, order_id: String },
    Place { side: Side, price: PriceLevel, size: Qty },
    /// Cancel lalu place di level yang sama, berurutan dalam satu worker.
    /// `require_cancel`: jika cancel gagal, place dilewati.
    Replace { side: Side, price: PriceLevel, order_id: String, size: Qty, require_cancel: bool },
    Market { side: Side, size: Qty },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Cancel { .. } => "cancel",
            Action::Place { .. } => "place",
            Action::Replace { .. } => "replace",
            Action::Market { .. } => "market",
        }
    }
    pub fn side(&self) -> Side {
        match self {
            Action::Cancel { side, .. }
            | Action::Place { side, .. }
            | Action::Replace { side, .. }
            | Action::Market { side, .. } => *side,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Cancelled { side: Side, price: PriceLevel, order_id: String },
    Placed { side: Side, price: PriceLevel, size: Qty, order_id: String },
    Swept { side: Side, size: Qty, order_id: String },
    Failed { action: Action, error: String },
}

impl Outcome {
    pub fn is_failure(&self) -> bool { matches!(self, Outcome::Failed { .. }) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Price { ts_ns: i128, reference: PriceLevel, best_bid: f64, best_ask: f64 },
    Exec { ts_ns: i128, outcome: Outcome },
    GatewayFailure { ts_ns: i128, stage: String, error: String },
    Note(String),
}

pub fn now_ns() -> i128 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as i128
}
