//! Position sizing for new entries.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tracing::debug;

/// Share of cash that may be spent on one entry; the rest is a reserve.
const CASH_USABLE: Decimal = dec!(0.9);
/// Orders below this notional are dust and are rejected.
const MIN_ORDER_VALUE: Decimal = dec!(10);
/// Fractional units are allowed for every asset type, to this many places.
const QUANTITY_DP: u32 = 4;

#[derive(Debug, Clone)]
pub struct PositionSizer {
    max_position_pct: Decimal,
}

impl PositionSizer {
    pub fn new(max_position_pct: Decimal) -> Self {
        Self { max_position_pct }
    }

    /// Quantity to buy at `price`, or zero when the order should be skipped.
    ///
    /// `max_spend = min(total_value × max_position_pct, cash × 0.9)`, floored
    /// to four decimal places.
    pub fn size(&self, total_value: Decimal, cash: Decimal, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let caps = total_value
            .checked_mul(self.max_position_pct)
            .zip(cash.checked_mul(CASH_USABLE));
        let Some((position_cap, cash_cap)) = caps else {
            debug!(%total_value, %cash, "Sizing inputs overflow");
            return Decimal::ZERO;
        };
        let max_spend = position_cap.min(cash_cap);
        if max_spend <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let Some(raw) = max_spend.checked_div(price) else {
            debug!(%price, %max_spend, "Order quantity overflows");
            return Decimal::ZERO;
        };
        let quantity = raw.round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero);
        if quantity * price < MIN_ORDER_VALUE {
            debug!(%price, %max_spend, %quantity, "Order below minimum notional");
            return Decimal::ZERO;
        }
        quantity
    }
}
