// ===============================
// src/driver.rs (Cycle Driver)
// ===============================
//
// Satu siklus:
//   harga referensi -> sweep (fase 1) -> refresh mirror
//   -> cancel di luar rentang (fase 2) -> konvergensi ladder (fase 3)
// Tiap fase ditunggu selesai (barrier) sebelum fase berikut dievaluasi.
// Siklus berikut langsung jalan setelah fase 3 selesai; hanya gagal harga yang kena backoff.
//
use std::sync::Arc;
use std::time::Instant;
use tokio::{sync::mpsc, time::{sleep, Duration}};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::domain::{now_ns, Event, Outcome, PriceLevel, Qty};
use crate::error::MarketDataError;
use crate::executor::Coordinator;
use crate::gateway::Gateway;
use crate::ladder::{Ladder, Reconciler, SizeBand};
use crate::metrics::{CYCLES, CYCLE_FAILURES, CYCLE_LATENCY, RECORDER_DROPPED};
use crate::mirror::OrderBookMirror;
use crate::price::fetch_reference;
use crate::sweep::{plan_sweep, sweep};

/// Handle eksplisit ke venue: `trade` untuk order/sweep, `market` untuk harga referensi.
#[derive(Clone)]
pub struct Context {
    pub trade: Arc<dyn Gateway>,
    pub market: Arc<dyn Gateway>,
    pub symbol: String,
    /// trade dan market = buku yang sama (paper venue); sweep memakai snapshot harga siklus ini
    pub shared_book: bool,
}

impl Context {
    pub fn shared(gw: Arc<dyn Gateway>, symbol: String) -> Self {
        Self { trade: gw.clone(), market: gw, symbol, shared_book: true }
    }

    pub fn split(trade: Arc<dyn Gateway>, market: Arc<dyn Gateway>, symbol: String) -> Self {
        Self { trade, market, symbol, shared_book: false }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DriverCfg {
    pub depth: u32,
    pub size_band: SizeBand,
    pub sweep_size_cap: Qty,
    pub concurrency: usize,
    pub backoff: Duration,
    pub max_cycles: Option<u64>,
}

impl From<&Settings> for DriverCfg {
    fn from(s: &Settings) -> Self {
        Self {
            depth: s.maker_number,
            size_band: s.size_band,
            sweep_size_cap: s.sweep_size_cap,
            concurrency: s.concurrency,
            backoff: s.backoff,
            max_cycles: s.max_cycles,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    pub reference: PriceLevel,
    pub swept: usize,
    pub cancelled: usize,
    pub placed: usize,
    pub failed: usize,
}

pub struct Driver {
    ctx: Context,
    cfg: DriverCfg,
    mirror: OrderBookMirror,
    reconciler: Reconciler,
    coordinator: Coordinator,
    events: Option<mpsc::Sender<Event>>,
}

impl Driver {
    pub fn new(ctx: Context, cfg: DriverCfg, events: Option<mpsc::Sender<Event>>) -> Self {
        let coordinator = Coordinator::new(ctx.trade.clone(), ctx.symbol.clone(), cfg.concurrency);
        let reconciler = Reconciler::new(cfg.size_band, coordinator.concurrency());
        Self { ctx, cfg, mirror: OrderBookMirror::new(), reconciler, coordinator, events }
    }

    pub fn mirror(&self) -> &OrderBookMirror { &self.mirror }

    fn emit(&self, ev: Event) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(ev) {
                RECORDER_DROPPED.inc();
                debug!(error = %e, "recorder queue full or closed, event dropped");
            }
        }
    }

    fn contained_failure(&self, stage: &str, error: String) {
        CYCLE_FAILURES.with_label_values(&[stage]).inc();
        self.emit(Event::GatewayFailure { ts_ns: now_ns(), stage: stage.to_string(), error });
    }

    /// Apply one phase's outcomes to the mirror; only the driver mutates it.
    fn settle(&mut self, outcomes: Vec<Outcome>, report: &mut CycleReport) {
        for o in outcomes {
            match &o {
                Outcome::Cancelled { .. } => report.cancelled += 1,
                Outcome::Placed { .. } => report.placed += 1,
                Outcome::Swept { .. } => report.swept += 1,
                Outcome::Failed { action, .. } => {
                    report.failed += 1;
                    CYCLE_FAILURES.with_label_values(&[action.kind()]).inc();
                }
            }
            self.mirror.apply(&o);
            self.emit(Event::Exec { ts_ns: now_ns(), outcome: o });
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport, MarketDataError> {
        let started = Instant::now();
        let sym = self.ctx.symbol.clone();

        let (reference, ticker) = match fetch_reference(self.ctx.market.as_ref(), &sym).await {
            Ok(v) => v,
            Err(e) => {
                self.contained_failure("price", e.to_string());
                return Err(e);
            }
        };
        self.emit(Event::Price { ts_ns: now_ns(), reference, best_bid: ticker.best_bid, best_ask: ticker.best_ask });
        let mut report = CycleReport { reference, ..CycleReport::default() };

        // ---- Fase 1: sweep ----
        let legs = if self.ctx.shared_book {
            Ok(plan_sweep(&ticker, self.cfg.sweep_size_cap))
        } else {
            sweep(self.ctx.trade.as_ref(), &sym, self.cfg.sweep_size_cap).await
        };
        match legs {
            Ok(legs) => {
                let outs = self.coordinator.run("sweep", legs).await;
                self.settle(outs, &mut report);
            }
            Err(e) => self.contained_failure("sweep", e.to_string()),
        }

        // ---- Mirror (gagal -> lanjut dengan state terakhir) ----
        if let Err(e) = self.mirror.refresh(self.ctx.trade.as_ref(), &sym).await {
            self.contained_failure("mirror", e.to_string());
        }

        let ladder = Ladder::new(reference, self.cfg.depth);

        // ---- Fase 2: cancel di luar rentang ----
        let cancels = self.reconciler.out_of_range(&ladder, &self.mirror);
        let outs = self.coordinator.run("out_of_range", cancels).await;
        self.settle(outs, &mut report);

        // ---- Fase 3: konvergensi ----
        let actions = self.reconciler.converge(&ladder, &self.mirror, self.ctx.trade.as_ref()).await;
        let outs = self.coordinator.run("converge", actions).await;
        self.settle(outs, &mut report);

        CYCLES.inc();
        CYCLE_LATENCY.observe(started.elapsed().as_secs_f64() * 1000.0);
        Ok(report)
    }

    /// Loop utama. Berhenti hanya jika `max_cycles` tercapai.
    pub async fn run(mut self) {
        let mut attempts: u64 = 0;
        loop {
            if self.cfg.max_cycles.map(|m| attempts >= m).unwrap_or(false) {
                info!(attempts, "cycle limit reached, stopping");
                return;
            }
            attempts += 1;
            match self.run_cycle().await {
                Ok(r) => {
                    if r.failed > 0 {
                        warn!(cycle = attempts, reference = r.reference, failed = r.failed, "cycle finished with failed actions");
                    }
                    info!(
                        cycle = attempts,
                        reference = r.reference,
                        swept = r.swept,
                        cancelled = r.cancelled,
                        placed = r.placed,
                        failed = r.failed,
                        "cycle done"
                    );
                }
                Err(e) => {
                    error!(error = %e, backoff_ms = self.cfg.backoff.as_millis() as u64, "market data unavailable, backing off");
                    sleep(self.cfg.backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Side, Ticker};
    use crate::gateway::{Call, Op, PaperGateway};

    const SYM: &str = "BTC-USDT";

    fn cfg(depth: u32) -> DriverCfg {
        DriverCfg {
            depth,
            size_band: SizeBand { min: 100, max: 10_000 },
            sweep_size_cap: 100.0,
            concurrency: 10,
            backoff: Duration::from_millis(1),
            max_cycles: None,
        }
    }

    fn quiet_ticker() -> Ticker {
        Ticker { best_ask: 101.0, best_bid: 99.0, best_ask_size: 0.0, best_bid_size: 0.0 }
    }

    fn driver(gw: &Arc<PaperGateway>, c: DriverCfg) -> Driver {
        let ctx = Context::split(gw.clone(), gw.clone(), SYM.to_string());
        Driver::new(ctx, c, None)
    }

    fn limits(gw: &PaperGateway) -> Vec<(Side, PriceLevel)> {
        let mut v: Vec<(Side, PriceLevel)> = gw
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Limit { side, price, .. } => Some((side, price)),
                _ => None,
            })
            .collect();
        v.sort_by_key(|(s, p)| (s.as_str(), *p));
        v
    }

    #[tokio::test]
    async fn healthy_level_kept_gap_filled_then_idle() {
        let gw = Arc::new(PaperGateway::new(quiet_ticker()));
        gw.seed_order(SYM, Side::Sell, 101, 5000.0, 0.0, true);
        let mut d = driver(&gw, cfg(3));

        let r = d.run_cycle().await.unwrap();
        assert_eq!(r.reference, 100);
        assert_eq!(r.cancelled, 0);
        assert_eq!(
            limits(&gw),
            vec![(Side::Buy, 98), (Side::Buy, 99), (Side::Buy, 100), (Side::Sell, 102)]
        );

        gw.clear_calls();
        let r = d.run_cycle().await.unwrap();
        assert_eq!((r.placed, r.cancelled, r.failed), (0, 0, 0));
        assert!(limits(&gw).is_empty());
    }

    #[tokio::test]
    async fn thin_level_is_cancelled_then_replaced() {
        let gw = Arc::new(PaperGateway::new(quiet_ticker()));
        let thin = gw.seed_order(SYM, Side::Sell, 101, 5000.0, 4950.0, true);
        gw.seed_order(SYM, Side::Sell, 102, 5000.0, 0.0, true);
        for p in [98, 99, 100] {
            gw.seed_order(SYM, Side::Buy, p, 5000.0, 0.0, true);
        }
        let mut d = driver(&gw, cfg(3));
        let r = d.run_cycle().await.unwrap();
        assert_eq!((r.cancelled, r.placed), (1, 1));

        let calls = gw.calls();
        let cancel_at = calls.iter().position(|c| *c == Call::Cancel(thin.clone())).unwrap();
        let place_at = calls.iter().position(|c| matches!(c, Call::Limit { price: 101, .. })).unwrap();
        assert!(cancel_at < place_at);
        assert_ne!(d.mirror().get(Side::Sell, 101).unwrap().order_id, thin);
    }

    #[tokio::test]
    async fn out_of_range_cancel_failure_is_isolated() {
        let gw = Arc::new(PaperGateway::new(quiet_ticker()));
        let stuck = gw.seed_order(SYM, Side::Sell, 104, 500.0, 0.0, true);
        let gone = gw.seed_order(SYM, Side::Sell, 110, 500.0, 0.0, true);
        gw.fail_cancel_of(&stuck);
        let mut d = driver(&gw, cfg(3));

        let r = d.run_cycle().await.unwrap();
        assert_eq!(r.failed, 1);
        assert!(gw.calls().contains(&Call::Cancel(gone)));
        // ladder tetap terisi penuh
        assert_eq!(limits(&gw).len(), 5);
        // level 104 masih di mirror, dievaluasi ulang siklus berikut
        assert!(d.mirror().get(Side::Sell, 104).is_some());
        assert!(d.mirror().get(Side::Sell, 110).is_none());
    }

    #[tokio::test]
    async fn stale_mirror_prevents_double_placement() {
        let gw = Arc::new(PaperGateway::new(quiet_ticker()));
        let mut d = driver(&gw, cfg(3));
        d.run_cycle().await.unwrap();
        assert_eq!(limits(&gw).len(), 5);

        gw.fail(Op::List);
        gw.clear_calls();
        let r = d.run_cycle().await.unwrap();
        assert_eq!(r.placed, 0);
        assert!(limits(&gw).is_empty());
    }

    #[tokio::test]
    async fn sweep_is_capped_and_runs_before_reconciliation() {
        let gw = Arc::new(PaperGateway::new(Ticker { best_ask_size: 1e9, best_bid_size: 40.0, ..quiet_ticker() }));
        let mut d = driver(&gw, cfg(2));
        let r = d.run_cycle().await.unwrap();
        assert_eq!(r.swept, 2);

        let calls = gw.calls();
        assert!(calls.contains(&Call::Market { side: Side::Sell, size: 100.0 }));
        assert!(calls.contains(&Call::Market { side: Side::Buy, size: 40.0 }));
        let last_market = calls.iter().rposition(|c| matches!(c, Call::Market { .. })).unwrap();
        let first_list = calls.iter().position(|c| *c == Call::List).unwrap();
        assert!(last_market < first_list);
    }

    #[tokio::test]
    async fn price_outage_backs_off_without_trading() {
        let gw = Arc::new(PaperGateway::new(quiet_ticker()));
        gw.fail(Op::Ticker);
        let d = driver(&gw, DriverCfg { max_cycles: Some(3), ..cfg(3) });
        d.run().await;

        let calls = gw.calls();
        assert_eq!(calls.iter().filter(|c| **c == Call::Ticker).count(), 3);
        assert!(!calls.iter().any(|c| matches!(c, Call::Limit { .. } | Call::Cancel(_) | Call::Market { .. })));
    }

    #[tokio::test]
    async fn ladder_follows_a_moving_reference() {
        let gw = Arc::new(PaperGateway::new(quiet_ticker()));
        let mut d = driver(&gw, cfg(3));
        d.run_cycle().await.unwrap();

        gw.set_ticker(Ticker { best_ask: 111.0, best_bid: 109.0, best_ask_size: 0.0, best_bid_size: 0.0 });
        let r = d.run_cycle().await.unwrap();
        assert_eq!(r.reference, 110);
        assert_eq!((r.cancelled, r.placed, r.failed), (5, 5, 0));
        assert_eq!(d.mirror().levels(Side::Sell), vec![111, 112]);
        assert_eq!(d.mirror().levels(Side::Buy), vec![108, 109, 110]);
    }

    #[tokio::test]
    async fn shared_book_sweeps_against_the_price_snapshot() {
        let gw = Arc::new(PaperGateway::simulated(0));
        let mut d = Driver::new(Context::shared(gw.clone(), SYM.to_string()), cfg(3), None);
        d.run_cycle().await.unwrap();

        // satu langkah random walk per siklus
        assert_eq!(gw.calls().iter().filter(|c| **c == Call::Ticker).count(), 1);
        for c in gw.calls() {
            if let Call::Market { size, .. } = c {
                assert!(size > 0.0 && size <= 100.0);
            }
        }
    }

    #[tokio::test]
    async fn full_recorder_queue_is_counted() {
        let gw = Arc::new(PaperGateway::new(quiet_ticker()));
        let (tx, _rx) = mpsc::channel(1);
        let before = RECORDER_DROPPED.get();
        let mut d = Driver::new(Context::split(gw.clone(), gw.clone(), SYM.to_string()), cfg(2), Some(tx));
        // Price + 3 Exec, antrian cuma muat 1
        d.run_cycle().await.unwrap();
        assert!(RECORDER_DROPPED.get() - before >= 3);
    }

    #[tokio::test]
    async fn every_state_change_is_recorded() {
        let gw = Arc::new(PaperGateway::new(quiet_ticker()));
        let (tx, mut rx) = mpsc::channel(64);
        let ctx = Context::split(gw.clone(), gw.clone(), SYM.to_string());
        let mut d = Driver::new(ctx, cfg(2), Some(tx));
        let r = d.run_cycle().await.unwrap();
        drop(d);

        let mut prices = 0;
        let mut execs = 0;
        while let Some(ev) = rx.recv().await {
            match ev {
                Event::Price { reference, .. } => {
                    assert_eq!(reference, 100);
                    prices += 1;
                }
                Event::Exec { .. } => execs += 1,
                _ => {}
            }
        }
        assert_eq!(prices, 1);
        assert_eq!(execs, r.placed);
    }
}
