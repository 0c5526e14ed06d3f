// ===============================
// src/error.rs
// ===============================
use thiserror::Error;

use crate::domain::{Action, PriceLevel, Side};

/// Every gateway call fails with one of these; the core treats them uniformly.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("venue error {code}: {msg}")]
    Api { code: String, msg: String },
    #[error("rate limited")]
    RateLimited,
    #[error("authentication rejected")]
    Auth,
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

/// Ticker unavailable or unusable. Blocks the cycle and triggers backoff.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("ticker fetch failed: {0}")]
    Fetch(#[from] GatewayError),
    #[error("unusable quote: bid={bid} ask={ask}")]
    BadQuote { bid: f64, ask: f64 },
}

/// Active-order listing unavailable. Mirror stays as it was.
#[derive(Debug, Error)]
#[error("mirror refresh failed: {0}")]
pub struct MirrorRefreshError(#[from] pub GatewayError);

/// A single cancel/place/sweep call failed.
#[derive(Debug, Error)]
#[error("{} failed: {source}", .action.kind())]
pub struct ActionError {
    pub action: Action,
    #[source]
    pub source: GatewayError,
}

/// Order-detail lookup failed during convergence; the level is skipped.
#[derive(Debug, Error)]
#[error("order lookup {order_id} ({side} @ {price}) failed: {source}")]
pub struct OrderLookupError {
    pub order_id: String,
    pub side: Side,
    pub price: PriceLevel,
    #[source]
    pub source: GatewayError,
}

/// Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("invalid config json: {0}")]
    Parse(String),
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}
