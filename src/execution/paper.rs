//! Paper order placer - fills every order at the requested price

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use super::{OrderOutcome, OrderPlacer, OrderRequest};

#[derive(Debug, Default)]
pub struct PaperOrderPlacer {
    sequence: AtomicU64,
}

impl PaperOrderPlacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders placed so far
    pub fn placed(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OrderPlacer for PaperOrderPlacer {
    async fn place_order(&self, request: OrderRequest) -> OrderOutcome {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let order_id = format!("{}-paper-{}", request.venue, n);
        info!(
            venue = %request.venue,
            symbol = %request.symbol,
            side = %request.side,
            amount = request.amount,
            price = request.price,
            order_id = %order_id,
            "[PAPER] Order filled"
        );
        OrderOutcome::filled(order_id)
    }
}
