//! Trailing Stop Decision
//!
//! Pure decision function over an open order and a tick. The caller owns
//! all side effects: persisting a trail, transitioning status, queueing the
//! exit.
//!
//! # Rules
//!
//! 1. No last traded price → ignore the tick.
//! 2. `ltp <= stop` → trigger. The trigger check always uses the LTP and
//!    runs before any trailing.
//! 3. Otherwise trail on the best bid for long MIS/CNC positions when the
//!    tick has one, else on the LTP. The new stop is only taken when it is
//!    strictly above the current stop.
//!
//! Short positions are evaluated for the trigger only against the same
//! `ltp <= stop` rule and trail on the LTP; there is no ask-side logic.

use rust_decimal::Decimal;

use crate::domain::order::{ExitOrderRequest, Order, OrderSide, profit_percent, stop_below};
use crate::domain::tick::Tick;

/// Outcome of evaluating one tick against one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopDecision {
    /// Tick carried no usable price.
    Ignore,
    /// Stop stays where it is.
    Hold,
    /// Ratchet the stop upward.
    Trail {
        /// New stop price.
        stop_price: Decimal,
        /// Unrealized profit in percent at this tick.
        profit_pct: Decimal,
    },
    /// Stop breached; flatten the position.
    Trigger(ExitOrderRequest),
}

/// Price the stop is trailed against.
#[must_use]
pub fn trailing_reference(order: &Order, tick: &Tick, ltp: Decimal) -> Decimal {
    match tick.best_bid {
        Some(bid) if order.side == OrderSide::Buy && order.product.prefers_bid_for_trailing() => {
            bid
        }
        _ => ltp,
    }
}

/// Decide what a tick means for an order.
#[must_use]
pub fn evaluate(order: &Order, tick: &Tick) -> StopDecision {
    let Some(ltp) = tick.last_price else {
        return StopDecision::Ignore;
    };

    let stop = order.stop_price();
    if ltp <= stop {
        return StopDecision::Trigger(order.exit_request());
    }

    let candidate = stop_below(trailing_reference(order, tick, ltp), order.stoploss_percent);
    if candidate > stop {
        StopDecision::Trail {
            stop_price: candidate,
            profit_pct: profit_percent(order.entry_price, ltp),
        }
    } else {
        StopDecision::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Broker, ProductType, fixtures};
    use rust_decimal_macros::dec;

    fn order() -> Order {
        fixtures::open_order(1, Broker::Zerodha, "408065")
    }

    #[test]
    fn missing_ltp_is_ignored() {
        let tick = Tick {
            instrument_key: "408065".into(),
            last_price: None,
            best_bid: Some(dec!(120)),
            best_ask: None,
        };
        assert_eq!(evaluate(&order(), &tick), StopDecision::Ignore);
    }

    #[test]
    fn breach_triggers_with_opposite_side() {
        let decision = evaluate(&order(), &Tick::ltp("408065", dec!(94)));
        let StopDecision::Trigger(exit) = decision else {
            panic!("expected trigger, got {decision:?}");
        };
        assert_eq!(exit.side, OrderSide::Sell);
        assert_eq!(exit.quantity, 10);
    }

    #[test]
    fn touching_the_stop_triggers() {
        let decision = evaluate(&order(), &Tick::ltp("408065", dec!(95)));
        assert!(matches!(decision, StopDecision::Trigger(_)));
    }

    #[test]
    fn rise_trails_stop() {
        let decision = evaluate(&order(), &Tick::ltp("408065", dec!(102)));
        assert_eq!(
            decision,
            StopDecision::Trail {
                stop_price: dec!(96.90),
                profit_pct: dec!(2),
            }
        );
    }

    #[test]
    fn small_move_holds() {
        let decision = evaluate(&order(), &Tick::ltp("408065", dec!(99)));
        assert_eq!(decision, StopDecision::Hold);
    }

    #[test]
    fn intraday_long_trails_on_bid() {
        let tick = Tick::ltp("408065", dec!(110)).with_bid(dec!(104));
        let StopDecision::Trail { stop_price, profit_pct } = evaluate(&order(), &tick) else {
            panic!("expected trail");
        };
        assert_eq!(stop_price, dec!(98.80));
        assert_eq!(profit_pct, dec!(10));
    }

    #[test]
    fn carry_forward_ignores_bid() {
        let mut order = order();
        order.product = ProductType::CarryForward;
        let tick = Tick::ltp("408065", dec!(110)).with_bid(dec!(104));
        let StopDecision::Trail { stop_price, .. } = evaluate(&order, &tick) else {
            panic!("expected trail");
        };
        assert_eq!(stop_price, dec!(104.50));
    }

    #[test]
    fn short_position_ignores_bid() {
        let mut order = order();
        order.side = OrderSide::Sell;
        let tick = Tick::ltp("408065", dec!(110)).with_bid(dec!(104));
        assert_eq!(trailing_reference(&order, &tick, dec!(110)), dec!(110));
    }

    #[test]
    fn trigger_uses_ltp_not_bid() {
        let tick = Tick::ltp("408065", dec!(96)).with_bid(dec!(90));
        assert_eq!(evaluate(&order(), &tick), StopDecision::Hold);
    }

    #[test]
    fn zero_entry_reports_zero_profit() {
        let mut order = order();
        order.entry_price = Decimal::ZERO;
        order.current_stop_price = Some(dec!(1));
        let StopDecision::Trail { profit_pct, .. } = evaluate(&order, &Tick::ltp("408065", dec!(50)))
        else {
            panic!("expected trail");
        };
        assert_eq!(profit_pct, Decimal::ZERO);
    }
}
