// ===============================
// src/sweep.rs (taker)
// ===============================
use tracing::{info, warn};

use crate::domain::{Action, Qty, Side, Ticker};
use crate::error::MarketDataError;
use crate::gateway::Gateway;

/// Market legs for one sweep: ask size -> market sell, bid size -> market buy,
/// each clamped to `size_cap`. Zero/negative sizes produce no leg.
pub fn plan_sweep(t: &Ticker, size_cap: Qty) -> Vec<Action> {
    let clamp = |q: Qty| if q.is_finite() { q.min(size_cap) } else { 0.0 };
    let ask = clamp(t.best_ask_size);
    let bid = clamp(t.best_bid_size);
    let mut legs = Vec::with_capacity(2);
    if ask > 0.0 {
        legs.push(Action::Market { side: Side::Sell, size: ask });
    }
    if bid > 0.0 {
        legs.push(Action::Market { side: Side::Buy, size: bid });
    }
    legs
}

/// Read the trading venue's ticker and plan the legs. The legs are executed by
/// the coordinator so one failing leg never blocks the other.
pub async fn sweep(gw: &dyn Gateway, symbol: &str, size_cap: Qty) -> Result<Vec<Action>, MarketDataError> {
    let t = match gw.get_ticker(symbol).await {
        Ok(t) => t,
        Err(e) => {
            warn!(?e, symbol, "sweep ticker unavailable, skipping sweep");
            return Err(e.into());
        }
    };
    let legs = plan_sweep(&t, size_cap);
    info!(symbol, ask_size = t.best_ask_size, bid_size = t.best_bid_size, legs = legs.len(), "sweep planned");
    Ok(legs)
}
