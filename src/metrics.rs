// ===============================
// src/metrics.rs
// ===============================
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Cycle --------
pub static CYCLES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("cycles_total", "completed control-loop cycles").unwrap());

pub static CYCLE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cycle_failures_total", "contained failures per stage (labels: stage)"),
        &["stage"],
    )
    .unwrap()
});

// Latency of one full cycle (milliseconds)
pub static CYCLE_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("cycle_latency_ms", "Wall time of one cycle (ms)")
            .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]),
    )
    .unwrap()
});

// -------- Orders --------
pub static ACTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("actions_total", "gateway actions (labels: kind, result)"),
        &["kind", "result"],
    )
    .unwrap()
});

pub static REFERENCE_PRICE: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("reference_price", "last reference price (integer quote units)").unwrap());

pub static MIRROR_LEVELS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("mirror_levels", "resting own orders per side"),
        &["side"],
    )
    .unwrap()
});

pub static RECORDER_DROPPED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("recorder_dropped_total", "events dropped because the recorder queue was full").unwrap());

// ---- Config visibility ----
pub static CONFIG_VENUE_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_venue_mode", "venue mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_symbol", "configured symbol (label: symbol)"),
        &["symbol"],
    )
    .unwrap()
});

pub static CONFIG_MAKER_NUMBER: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_maker_number", "ladder depth").unwrap());

pub static CONFIG_TAKER_NUMBER: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_taker_number", "taker participation factor (informational)").unwrap());

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(CYCLES.clone())),
        REGISTRY.register(Box::new(CYCLE_FAILURES.clone())),
        REGISTRY.register(Box::new(CYCLE_LATENCY.clone())),
        REGISTRY.register(Box::new(ACTIONS.clone())),
        REGISTRY.register(Box::new(REFERENCE_PRICE.clone())),
        REGISTRY.register(Box::new(MIRROR_LEVELS.clone())),
        REGISTRY.register(Box::new(RECORDER_DROPPED.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_VENUE_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
        REGISTRY.register(Box::new(CONFIG_MAKER_NUMBER.clone())),
        REGISTRY.register(Box::new(CONFIG_TAKER_NUMBER.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

async fn handle(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let rsp = match req.uri().path() {
        "/" | "/metrics" => Response::builder()
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Body::from(encode_metrics())),
        _ => Response::builder().status(404).body(Body::from("not found\n")),
    };
    Ok(rsp.unwrap_or_else(|_| Response::new(Body::empty())))
}

// GET / atau /metrics
pub async fn serve_metrics(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });
    let server = match Server::try_bind(&addr) {
        Ok(b) => b.serve(make_svc),
        Err(e) => {
            error!(?e, %addr, "metrics bind failed, metrics disabled");
            return;
        }
    };
    info!("metrics listening on http://{addr}/ (and /metrics)");
    if let Err(e) = server.await {
        error!(?e, "metrics server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_endpoint_serves_registry() {
        init();
        CYCLES.inc();
        let rsp = handle(Request::get("/metrics").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(rsp.status(), 200);
        let body = hyper::body::to_bytes(rsp.into_body()).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("cycles_total"));

        let rsp = handle(Request::get("/nope").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(rsp.status(), 404);
    }
}
