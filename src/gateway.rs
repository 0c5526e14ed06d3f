// ===============================
// src/gateway.rs
// ===============================
//
// Gateway capability + paper venue (mock):
// - trait Gateway   : semua operasi venue yang dibutuhkan core
// - PaperGateway    : venue in-memory (random walk harga mid),
//                     order limit terisi ketika harga menembus level,
//                     plus injeksi kegagalan untuk test.
//
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::{sleep, Duration};

use crate::domain::{ActiveOrder, OrderAck, OrderDetails, PriceLevel, Qty, Side, Ticker};
use crate::error::GatewayError;

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError>;
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        size: Qty,
        price: PriceLevel,
    ) -> Result<OrderAck, GatewayError>;
    async fn place_market_order(&self, symbol: &str, side: Side, size: Qty) -> Result<OrderAck, GatewayError>;
    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;
    async fn get_order(&self, order_id: &str) -> Result<OrderDetails, GatewayError>;
    /// Active limit orders only.
    async fn list_active_orders(&self, symbol: &str) -> Result<Vec<ActiveOrder>, GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op { Ticker, Limit, Market, Cancel, GetOrder, List }

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Ticker,
    Limit { side: Side, price: PriceLevel, size: Qty },
    Market { side: Side, size: Qty },
    Cancel(String),
    GetOrder(String),
    List,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    symbol: String,
    side: Side,
    price: PriceLevel,
    size: Qty,
    deal_size: Qty,
    active: bool,
    limit: bool,
}

struct PaperState {
    ticker: Ticker,
    orders: HashMap<String, PaperOrder>,
    next_id: u64,
    failing_ops: HashSet<Op>,
    failing_cancels: HashSet<String>,
    calls: Vec<Call>,
}

pub struct PaperGateway {
    state: Mutex<PaperState>,
    latency: Duration,
    random_walk: bool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl PaperGateway {
    pub fn new(ticker: Ticker) -> Self {
        Self {
            state: Mutex::new(PaperState {
                ticker,
                orders: HashMap::new(),
                next_id: 1,
                failing_ops: HashSet::new(),
                failing_cancels: HashSet::new(),
                calls: Vec::new(),
            }),
            latency: Duration::ZERO,
            random_walk: false,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Venue simulasi untuk VENUE_MODE=mock: mid ~30000, random walk tiap fetch ticker.
    pub fn simulated(latency_ms: u64) -> Self {
        let mut gw = Self::new(Ticker { best_ask: 30_001.25, best_bid: 29_999.75, best_ask_size: 250.0, best_bid_size: 250.0 });
        gw.latency = Duration::from_millis(latency_ms);
        gw.random_walk = true;
        gw
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperState> {
        // state tidak pernah ditinggal setengah jalan; poison aman diabaikan
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self, call: Call, op: Op) -> Result<(), GatewayError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut st = self.lock();
        st.calls.push(call);
        if st.failing_ops.contains(&op) {
            return Err(GatewayError::Transport(format!("paper venue: injected {op:?} failure")));
        }
        Ok(())
    }

    fn step_market(st: &mut PaperState) {
        let mut rng = rand::thread_rng();
        let step: i64 = rng.gen_range(-3..=3);
        let mid = (truncate_mid(&st.ticker) + step).max(50);
        st.ticker = Ticker {
            best_bid: mid as f64 - 0.75,
            best_ask: mid as f64 + 1.25,
            best_bid_size: rng.gen_range(0.0..500.0_f64).floor(),
            best_ask_size: rng.gen_range(0.0..500.0_f64).floor(),
        };

        let (bid, ask) = (st.ticker.best_bid, st.ticker.best_ask);
        for o in st.orders.values_mut().filter(|o| o.active && o.limit) {
            let px = o.price as f64;
            let crossed = match o.side {
                Side::Sell => px <= bid,
                Side::Buy => px >= ask,
            };
            if crossed {
                o.deal_size = o.size;
                o.active = false;
            } else if (px - bid).abs() <= 1.0 || (px - ask).abs() <= 1.0 {
                // level di pucuk buku: partial fill acak
                let open = o.size - o.deal_size;
                o.deal_size += (open * rng.gen_range(0.0..0.3)).floor();
            }
        }
    }
}

fn truncate_mid(t: &Ticker) -> i64 { (t.best_ask.trunc() as i64 + t.best_bid.trunc() as i64).div_euclid(2) }

#[async_trait]
impl Gateway for PaperGateway {
    async fn get_ticker(&self, _symbol: &str) -> Result<Ticker, GatewayError> {
        self.enter(Call::Ticker, Op::Ticker).await?;
        let mut st = self.lock();
        if self.random_walk {
            Self::step_market(&mut st);
        }
        Ok(st.ticker)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        size: Qty,
        price: PriceLevel,
    ) -> Result<OrderAck, GatewayError> {
        self.enter(Call::Limit { side, price, size }, Op::Limit).await?;
        if size <= 0.0 || price <= 0 {
            return Err(GatewayError::Rejected(format!("bad limit order size={size} price={price}")));
        }
        let mut st = self.lock();
        let order_id = format!("paper-{}", st.next_id);
        st.next_id += 1;
        st.orders.insert(
            order_id.clone(),
            PaperOrder { symbol: symbol.to_string(), side, price, size, deal_size: 0.0, active: true, limit: true },
        );
        Ok(OrderAck { order_id })
    }

    async fn place_market_order(&self, symbol: &str, side: Side, size: Qty) -> Result<OrderAck, GatewayError> {
        self.enter(Call::Market { side, size }, Op::Market).await?;
        if size <= 0.0 {
            return Err(GatewayError::Rejected(format!("bad market order size={size}")));
        }
        let mut st = self.lock();
        let order_id = format!("paper-{}", st.next_id);
        st.next_id += 1;
        let px = match side {
            Side::Buy => st.ticker.best_ask,
            Side::Sell => st.ticker.best_bid,
        };
        st.orders.insert(
            order_id.clone(),
            PaperOrder { symbol: symbol.to_string(), side, price: px.trunc() as PriceLevel, size, deal_size: size, active: false, limit: false },
        );
        Ok(OrderAck { order_id })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        self.enter(Call::Cancel(order_id.to_string()), Op::Cancel).await?;
        let mut st = self.lock();
        if st.failing_cancels.contains(order_id) {
            return Err(GatewayError::Transport(format!("paper venue: injected cancel failure for {order_id}")));
        }
        match st.orders.get_mut(order_id) {
            Some(o) if o.active => {
                o.active = false;
                Ok(())
            }
            Some(_) => Err(GatewayError::Api { code: "400100".into(), msg: "order not active".into() }),
            None => Err(GatewayError::Api { code: "400100".into(), msg: "order not exist".into() }),
        }
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderDetails, GatewayError> {
        self.enter(Call::GetOrder(order_id.to_string()), Op::GetOrder).await?;
        let st = self.lock();
        st.orders
            .get(order_id)
            .map(|o| OrderDetails { order_id: order_id.to_string(), size: o.size, deal_size: o.deal_size, is_active: o.active })
            .ok_or_else(|| GatewayError::Api { code: "400100".into(), msg: "order not exist".into() })
    }

    async fn list_active_orders(&self, symbol: &str) -> Result<Vec<ActiveOrder>, GatewayError> {
        self.enter(Call::List, Op::List).await?;
        let st = self.lock();
        let mut out: Vec<ActiveOrder> = st
            .orders
            .iter()
            .filter(|(_, o)| o.active && o.limit && o.symbol == symbol)
            .map(|(id, o)| ActiveOrder {
                order_id: id.clone(),
                side: o.side,
                price: o.price as f64,
                size: o.size,
                deal_size: o.deal_size,
            })
            .collect();
        out.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(out)
    }
}

// ---- helper khusus test ----
#[cfg(test)]
impl PaperGateway {
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn peak_in_flight(&self) -> usize { self.peak_in_flight.load(Ordering::SeqCst) }

    pub fn calls(&self) -> Vec<Call> { self.lock().calls.clone() }

    pub fn seed_order(&self, symbol: &str, side: Side, price: PriceLevel, size: Qty, deal_size: Qty, active: bool) -> String {
        let mut st = self.lock();
        let order_id = format!("seed-{}", st.next_id);
        st.next_id += 1;
        st.orders.insert(
            order_id.clone(),
            PaperOrder { symbol: symbol.to_string(), side, price, size, deal_size, active, limit: true },
        );
        order_id
    }

    pub fn fail(&self, op: Op) { self.lock().failing_ops.insert(op); }

    pub fn heal(&self, op: Op) { self.lock().failing_ops.remove(&op); }

    pub fn fail_cancel_of(&self, order_id: &str) { self.lock().failing_cancels.insert(order_id.to_string()); }

    pub fn set_ticker(&self, ticker: Ticker) { self.lock().ticker = ticker; }

    pub fn set_fill(&self, order_id: &str, deal_size: Qty, active: bool) {
        if let Some(o) = self.lock().orders.get_mut(order_id) {
            o.deal_size = deal_size;
            o.active = active;
        }
    }

    pub fn clear_calls(&self) { self.lock().calls.clear(); }
}
