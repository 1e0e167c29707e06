//! Tick Processor
//!
//! Applies the trailing-stop decision to the open order for a tick's
//! instrument and carries out its side effects against the store and the
//! exit queue.

use std::sync::Arc;

use crate::application::ports::{OrderStore, StoreError};
use crate::domain::order::{Broker, OrderStatus};
use crate::domain::stop_loss::{StopDecision, evaluate};
use crate::domain::tick::Tick;
use crate::infrastructure::metrics;

use super::exit_queue::{ExitOrderQueue, QueueClosed};

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No open order, no price, or another tick already triggered the order.
    Ignored,
    /// Stop unchanged.
    Held,
    /// Stop ratcheted upward.
    Trailed,
    /// Order marked `TRIGGERED` and its exit queued.
    Triggered,
}

/// Tick processing error.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// Order store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Exit queue closed after the order was marked `TRIGGERED`.
    #[error(transparent)]
    Queue(#[from] QueueClosed),
}

/// Tick evaluator bound to an order store and the exit queue.
pub struct TickProcessor<S>
where
    S: OrderStore,
{
    store: Arc<S>,
    exits: ExitOrderQueue,
}

impl<S> TickProcessor<S>
where
    S: OrderStore,
{
    /// Create a processor.
    pub const fn new(store: Arc<S>, exits: ExitOrderQueue) -> Self {
        Self { store, exits }
    }

    /// Evaluate one tick.
    ///
    /// The `OPEN → TRIGGERED` transition is conditional, so of two ticks
    /// racing on the same order only the one that wins the transition
    /// queues an exit.
    pub async fn process(&self, broker: Broker, tick: &Tick) -> Result<TickOutcome, TickError> {
        if tick.last_price.is_none() {
            return Ok(TickOutcome::Ignored);
        }

        let Some(order) = self
            .store
            .find_open_by_instrument(broker, &tick.instrument_key)
            .await?
        else {
            return Ok(TickOutcome::Ignored);
        };

        match evaluate(&order, tick) {
            StopDecision::Ignore => Ok(TickOutcome::Ignored),
            StopDecision::Hold => Ok(TickOutcome::Held),
            StopDecision::Trail {
                stop_price,
                profit_pct,
            } => {
                self.store
                    .update_trailing_state(order.id, stop_price, profit_pct)
                    .await?;
                metrics::record_trail(broker);
                tracing::debug!(
                    %broker,
                    order_id = %order.id,
                    instrument = %order.instrument_key,
                    stop_price = %stop_price,
                    profit_pct = %profit_pct,
                    "Trailing stop raised"
                );
                Ok(TickOutcome::Trailed)
            }
            StopDecision::Trigger(exit) => {
                let won = self
                    .store
                    .transition_status(order.id, OrderStatus::Open, OrderStatus::Triggered)
                    .await?;
                if !won {
                    return Ok(TickOutcome::Ignored);
                }

                tracing::info!(
                    %broker,
                    order_id = %order.id,
                    symbol = %order.symbol,
                    last_price = ?tick.last_price,
                    stop_price = %order.stop_price(),
                    exit_side = %exit.side,
                    "Stop-loss triggered"
                );
                self.exits.enqueue(exit)?;
                metrics::record_trigger(broker);
                Ok(TickOutcome::Triggered)
            }
        }
    }
}
