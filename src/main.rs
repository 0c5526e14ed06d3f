// ===============================
// src/main.rs
// ===============================
/*
 # jalan di paper venue, 5 siklus
 VENUE_MODE=mock cargo run --release -- --cycles 5

 # konfigurasi yang aktif
curl -s localhost:9898/metrics | egrep '^config_(venue_mode|symbol|maker_number|taker_number)'

# progres loop
curl -s localhost:9898/metrics | egrep '^(cycles_total|cycle_failures_total|actions_total)'

*/
/*
=============================================================================
Project : kucoin_ladder_mm — single-pair KuCoin market-making loop in Rust
Module  : main.rs
Version : 0.5.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Keeps a maker ladder around the mid price on one KuCoin pair,
          sweeps the top of book up to a cap, reconciles against the
          venue's active orders every cycle, exposes Prometheus metrics,
          and records JSONL events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
mod domain;
mod error;
mod config;
mod metrics;
mod recorder;
mod gateway;          // trait + paper venue (mock)
mod kucoin;           // helper (signer/types) untuk KuCoin
mod gateway_kucoin;   // KuCoin Spot REST
mod price;
mod mirror;
mod ladder;
mod sweep;
mod executor;
mod driver;

use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::{select, sync::mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Settings, VenueMode};
use crate::domain::Event;
use crate::driver::{Context, Driver, DriverCfg};
use crate::error::GatewayError;
use crate::gateway::{Gateway, PaperGateway};
use crate::gateway_kucoin::KucoinGateway;

const PAPER_LATENCY_MS: u64 = 5;

fn init_logging(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file = log_file.and_then(|p| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(p)
            .map_err(|e| eprintln!("LOG_FILE {} tidak bisa dibuka ({e}), log ke stdout", p.display()))
            .ok()
    });
    match file {
        Some(f) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(f))
            .init(),
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Harga referensi selalu dari market data live, order ke venue terpilih.
/// Mock: satu paper venue untuk keduanya.
fn build_context(s: &Settings) -> Result<Context, GatewayError> {
    match s.venue {
        VenueMode::Mock => {
            let paper: Arc<dyn Gateway> = Arc::new(PaperGateway::simulated(PAPER_LATENCY_MS));
            Ok(Context::shared(paper, s.symbol.clone()))
        }
        VenueMode::KucoinSandbox | VenueMode::KucoinLive => {
            let trade: Arc<dyn Gateway> = Arc::new(KucoinGateway::new(&s.trade_rest_url, s.auth.clone())?);
            let market: Arc<dyn Gateway> = Arc::new(KucoinGateway::new(&s.market_rest_url, None)?);
            Ok(Context::split(trade, market, s.symbol.clone()))
        }
    }
}

fn export_config(s: &Settings) {
    metrics::CONFIG_VENUE_MODE.with_label_values(&[s.venue.label()]).set(1);
    metrics::CONFIG_SYMBOL.with_label_values(&[&s.symbol]).set(1);
    metrics::CONFIG_MAKER_NUMBER.set(i64::from(s.maker_number));
    if let Some(t) = s.taker_number {
        metrics::CONFIG_TAKER_NUMBER.set(t as i64);
    }
}

#[tokio::main]
async fn main() {
    // ---- Load config ----
    let settings = match config::load() {
        Ok(s) => s,
        Err(e) => {
            init_logging(None);
            error!(error = %e, "invalid configuration, refusing to start");
            std::process::exit(2);
        }
    };

    // ---- Logging ----
    init_logging(settings.log_file.as_deref());

    info!(
        venue_mode = %settings.venue.label(),
        symbol = %settings.symbol,
        category = %settings.category.label(),
        maker_number = settings.maker_number,
        taker_number = ?settings.taker_number,
        side = ?settings.side,
        size_min = settings.size_band.min,
        size_max = settings.size_band.max,
        sweep_size_cap = settings.sweep_size_cap,
        concurrency = settings.concurrency,
        trade_rest = %settings.trade_rest_url,
        market_rest = %settings.market_rest_url,
        "startup config"
    );
    if settings.taker_number.is_some() || settings.side.is_some() {
        warn!("taker_number / side are informational only; sweep always takes both sides");
    }

    // ---- Metrics ----
    metrics::init();
    export_config(&settings);
    tokio::spawn(metrics::serve_metrics(settings.metrics_port));

    // ---- Recorder (optional) ----
    let events = settings.record_file.clone().map(|path| {
        let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
        tokio::spawn(recorder::run(rec_rx, path));
        let _ = rec_tx.try_send(Event::Note(format!(
            "start venue={} symbol={} maker_number={}",
            settings.venue.label(),
            settings.symbol,
            settings.maker_number
        )));
        rec_tx
    });

    // ---- Gateways ----
    let ctx = match build_context(&settings) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "cannot build venue gateway");
            std::process::exit(2);
        }
    };

    let driver = Driver::new(ctx, DriverCfg::from(&settings), events);

    select! {
        _ = driver.run() => info!("driver finished"),
        _ = tokio::signal::ctrl_c() => info!("ctrl-c, shutting down"),
    }
}
