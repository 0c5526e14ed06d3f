// ===============================
// src/executor.rs (Execution Coordinator)
// ===============================
//
// Satu fase = satu panggilan run(): semua action jalan paralel (maks `concurrency`),
// run() baru kembali setelah semuanya selesai/gagal -> barrier antar fase.
// Worker hanya mengembalikan Outcome; mirror diubah driver, bukan di sini.
//
use futures_util::{stream, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Action, Outcome};
use crate::error::{ActionError, GatewayError};
use crate::gateway::Gateway;
use crate::metrics::ACTIONS;

pub struct Coordinator {
    gw: Arc<dyn Gateway>,
    symbol: String,
    concurrency: usize,
}

impl Coordinator {
    pub fn new(gw: Arc<dyn Gateway>, symbol: String, concurrency: usize) -> Self {
        Self { gw, symbol, concurrency: concurrency.max(1) }
    }

    pub fn concurrency(&self) -> usize { self.concurrency }

    /// Run one phase to completion. Never fails as a whole.
    pub async fn run(&self, phase: &str, actions: Vec<Action>) -> Vec<Outcome> {
        if actions.is_empty() {
            return Vec::new();
        }
        let n = actions.len();
        let outcomes: Vec<Outcome> = stream::iter(actions)
            .map(|a| self.execute(a))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<Vec<Outcome>>>()
            .await
            .into_iter()
            .flatten()
            .collect();
        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        info!(phase, actions = n, outcomes = outcomes.len(), failed, "phase complete");
        outcomes
    }

    async fn execute(&self, action: Action) -> Vec<Outcome> {
        let gw = self.gw.as_ref();
        let sym = self.symbol.as_str();
        let out = match &action {
            Action::Cancel { side, price, order_id } => match gw.cancel_order(order_id).await {
                Ok(()) => {
                    info!(%side, price, order_id = %order_id, "order cancelled");
                    vec![Outcome::Cancelled { side: *side, price: *price, order_id: order_id.clone() }]
                }
                Err(e) => vec![fail(&action, e)],
            },
            Action::Place { side, price, size } => match gw.place_limit_order(sym, *side, *size, *price).await {
                Ok(ack) => {
                    info!(symbol = sym, %side, price, size, order_id = %ack.order_id, "maker order placed");
                    vec![Outcome::Placed { side: *side, price: *price, size: *size, order_id: ack.order_id }]
                }
                Err(e) => vec![fail(&action, e)],
            },
            Action::Replace { side, price, order_id, size, require_cancel } => {
                let mut out = Vec::with_capacity(2);
                let proceed = match gw.cancel_order(order_id).await {
                    Ok(()) => {
                        info!(%side, price, order_id = %order_id, "order cancelled for refresh");
                        out.push(Outcome::Cancelled { side: *side, price: *price, order_id: order_id.clone() });
                        true
                    }
                    Err(e) if *require_cancel => {
                        // order masih hidup di venue; jangan dobel eksposur
                        out.push(fail(&action, e));
                        false
                    }
                    Err(e) => {
                        warn!(%side, price, order_id = %order_id, error = %e, "best-effort cancel of finished order failed");
                        true
                    }
                };
                if proceed {
                    match gw.place_limit_order(sym, *side, *size, *price).await {
                        Ok(ack) => {
                            info!(symbol = sym, %side, price, size, order_id = %ack.order_id, "maker order refreshed");
                            out.push(Outcome::Placed { side: *side, price: *price, size: *size, order_id: ack.order_id });
                        }
                        Err(e) => out.push(fail(&action, e)),
                    }
                }
                out
            }
            Action::Market { side, size } => match gw.place_market_order(sym, *side, *size).await {
                Ok(ack) => {
                    info!(symbol = sym, %side, size, order_id = %ack.order_id, "taker order sent");
                    vec![Outcome::Swept { side: *side, size: *size, order_id: ack.order_id }]
                }
                Err(e) => vec![fail(&action, e)],
            },
        };
        for o in &out {
            let result = if o.is_failure() { "failed" } else { "ok" };
            ACTIONS.with_label_values(&[action.kind(), result]).inc();
        }
        out
    }
}

fn fail(action: &Action, source: GatewayError) -> Outcome {
    let err = ActionError { action: action.clone(), source };
    warn!(error = %err, side = %err.action.side(), action = ?err.action, "action failed");
    Outcome::Failed { action: err.action, error: err.source.to_string() }
}
