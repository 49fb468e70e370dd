// Risk sizing module
//
// Converts account balance, risk-per-trade, and stop-loss distance into an
// order quantity that respects the instrument's lot-size and notional limits.

use crate::exchange::InstrumentLimits;

/// Sizing failures are reported, never silently dropped: a trade the
/// strategy wanted but could not express is operationally relevant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SizingError {
    #[error("no free balance available")]
    NoBalance,
    #[error("quantity {quantity} below instrument minimum {minimum}")]
    BelowMinQuantity { quantity: f64, minimum: f64 },
    #[error("notional {notional:.2} below instrument minimum {minimum:.2}")]
    BelowMinNotional { notional: f64, minimum: f64 },
}

/// Immutable risk configuration for the process lifetime.
#[derive(Debug, Clone, Copy)]
pub struct RiskParams {
    /// Fraction of balance risked per trade (e.g. 0.01)
    pub risk_per_trade: f64,
    /// Stop-loss distance as a fraction of entry price (e.g. 0.02)
    pub stop_loss_pct: f64,
    /// Cap on notional relative to balance
    pub max_leverage: u32,
}

/// Fixed-fractional position size.
///
/// quantity = (balance * risk_per_trade) / (price * stop_loss_pct), clamped
/// so notional never exceeds balance * max_leverage, then floored to the
/// instrument's quantity step.
pub fn size_position(
    balance: f64,
    current_price: f64,
    params: &RiskParams,
    limits: &InstrumentLimits,
) -> Result<f64, SizingError> {
    if balance <= 0.0 {
        return Err(SizingError::NoBalance);
    }

    let risk_amount = balance * params.risk_per_trade;
    let mut quantity = risk_amount / (current_price * params.stop_loss_pct);

    // Leverage cap on notional
    let max_notional = balance * params.max_leverage as f64;
    if quantity * current_price > max_notional {
        quantity = max_notional / current_price;
    }

    // Exchange max lot
    if let Some(max_quantity) = limits.max_quantity {
        if quantity > max_quantity {
            quantity = max_quantity;
        }
    }

    let quantity = limits.round_down(quantity);

    if quantity <= 0.0 || quantity < limits.min_quantity {
        return Err(SizingError::BelowMinQuantity {
            quantity,
            minimum: limits.min_quantity,
        });
    }

    let notional = quantity * current_price;
    if notional < limits.min_notional {
        return Err(SizingError::BelowMinNotional {
            notional,
            minimum: limits.min_notional,
        });
    }

    Ok(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> InstrumentLimits {
        InstrumentLimits {
            quantity_step: 0.01,
            min_quantity: 0.01,
            max_quantity: None,
            min_notional: 5.0,
        }
    }

    fn params() -> RiskParams {
        RiskParams {
            risk_per_trade: 0.01,
            stop_loss_pct: 0.02,
            max_leverage: 10,
        }
    }

    #[test]
    fn test_fixed_fractional_sizing() {
        // (10000 * 0.01) / (600 * 0.02) = 8.333.. -> floored to 8.33
        let quantity = size_position(10_000.0, 600.0, &params(), &limits()).unwrap();
        assert!((quantity - 8.33).abs() < 1e-9, "got {quantity}");
    }

    #[test]
    fn test_notional_never_exceeds_leverage_cap() {
        let p = RiskParams {
            risk_per_trade: 0.5,
            stop_loss_pct: 0.001,
            max_leverage: 5,
        };
        for balance in [100.0, 1_000.0, 10_000.0] {
            for price in [0.5, 60.0, 600.0] {
                let quantity = size_position(balance, price, &p, &limits()).unwrap();
                assert!(
                    quantity * price <= balance * p.max_leverage as f64 + 1e-6,
                    "notional {} exceeds cap at balance {balance} price {price}",
                    quantity * price
                );
            }
        }
    }

    #[test]
    fn test_no_balance() {
        assert_eq!(
            size_position(0.0, 600.0, &params(), &limits()),
            Err(SizingError::NoBalance)
        );
    }

    #[test]
    fn test_below_min_quantity_reported() {
        let tight = InstrumentLimits {
            quantity_step: 1.0,
            min_quantity: 1.0,
            max_quantity: None,
            min_notional: 5.0,
        };
        // (10 * 0.01) / (600 * 0.02) = 0.0083 -> floors to 0
        let result = size_position(10.0, 600.0, &params(), &tight);
        assert!(matches!(result, Err(SizingError::BelowMinQuantity { .. })));
    }

    #[test]
    fn test_below_min_notional_reported() {
        let expensive = InstrumentLimits {
            quantity_step: 0.01,
            min_quantity: 0.01,
            max_quantity: None,
            min_notional: 10_000.0,
        };
        let result = size_position(1_000.0, 600.0, &params(), &expensive);
        assert!(matches!(result, Err(SizingError::BelowMinNotional { .. })));
    }

    #[test]
    fn test_max_quantity_clamp() {
        let capped = InstrumentLimits {
            max_quantity: Some(2.0),
            ..limits()
        };
        let quantity = size_position(10_000.0, 600.0, &params(), &capped).unwrap();
        assert_eq!(quantity, 2.0);
    }

    #[test]
    fn test_rounds_down_to_step() {
        let coarse = InstrumentLimits {
            quantity_step: 0.5,
            min_quantity: 0.5,
            max_quantity: None,
            min_notional: 5.0,
        };
        // 8.333.. floors to 8.0 with a 0.5 step
        let quantity = size_position(10_000.0, 600.0, &params(), &coarse).unwrap();
        assert_eq!(quantity, 8.0);
    }
}
