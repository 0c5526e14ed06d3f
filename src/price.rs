// ===============================
// src/price.rs
// ===============================
use tracing::info;

use crate::domain::{truncate_price, PriceLevel, Ticker};
use crate::error::MarketDataError;
use crate::gateway::Gateway;
use crate::metrics::REFERENCE_PRICE;

/// Mid harga dari best bid/ask; tiap sisi dipotong ke integer dulu.
pub fn reference_price(t: &Ticker) -> Result<PriceLevel, MarketDataError> {
    let usable = |x: f64| x.is_finite() && x > 0.0;
    if !usable(t.best_ask) || !usable(t.best_bid) {
        return Err(MarketDataError::BadQuote { bid: t.best_bid, ask: t.best_ask });
    }
    let ask = truncate_price(t.best_ask);
    let bid = truncate_price(t.best_bid);
    // pair di bawah 1 unit quote (mis. ETH-BTC) terpotong jadi 0
    if ask <= 0 || bid <= 0 {
        return Err(MarketDataError::BadQuote { bid: t.best_bid, ask: t.best_ask });
    }
    Ok((ask + bid).div_euclid(2))
}

/// Fetch ticker + hitung reference. Caller wajib backoff kalau gagal.
pub async fn fetch_reference(gw: &dyn Gateway, symbol: &str) -> Result<(PriceLevel, Ticker), MarketDataError> {
    let t = gw.get_ticker(symbol).await?;
    let r = reference_price(&t)?;
    REFERENCE_PRICE.set(r);
    info!(symbol, reference = r, best_bid = t.best_bid, best_ask = t.best_ask, "price snapshot");
    Ok((r, t))
}
