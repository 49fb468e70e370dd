use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::exchange::ExchangePosition;
use crate::models::{ExitReason, Position, Side};

/// Lifecycle of the single position for one symbol.
///
/// Opening and Closing are transient: they exist only between order
/// submission and fill confirmation. A process that dies inside one of them
/// recovers through reconciliation, never through the cached state.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionState {
    Flat,
    Opening {
        side: Side,
        quantity: f64,
        client_order_id: String,
        order_id: Option<String>,
    },
    Open(Position),
    Closing {
        position: Position,
        reason: ExitReason,
        client_order_id: String,
        order_id: Option<String>,
    },
}

impl PositionState {
    pub fn name(&self) -> &'static str {
        match self {
            PositionState::Flat => "FLAT",
            PositionState::Opening { .. } => "OPENING",
            PositionState::Open(_) => "OPEN",
            PositionState::Closing { .. } => "CLOSING",
        }
    }
}

/// Derive a position from what the exchange reports. Pure: the adopted state
/// depends on the report alone, never on what was cached locally.
pub fn position_from_report(
    report: Option<&ExchangePosition>,
    stop_loss_pct: f64,
) -> Option<Position> {
    report.filter(|r| r.quantity > 0.0).map(|r| Position {
        side: r.side,
        entry_price: r.entry_price,
        quantity: r.quantity,
        stop_loss: r.side.stop_loss_price(r.entry_price, stop_loss_pct),
        opened_at: Utc::now(),
        order_id: None,
        protective_order_id: None,
    })
}

/// Single writer of the position. Every mutation goes through a named
/// transition; invalid transitions are bugs and fail the cycle loudly.
pub struct PositionTracker {
    symbol: String,
    stop_loss_pct: f64,
    state: PositionState,
}

impl PositionTracker {
    pub fn new(symbol: impl Into<String>, stop_loss_pct: f64) -> Self {
        Self {
            symbol: symbol.into(),
            stop_loss_pct,
            state: PositionState::Flat,
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn position(&self) -> Option<&Position> {
        match &self.state {
            PositionState::Open(position) => Some(position),
            _ => None,
        }
    }

    /// True in OPENING/CLOSING, where an order's outcome is unknown.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.state,
            PositionState::Opening { .. } | PositionState::Closing { .. }
        )
    }

    fn transition(&mut self, next: PositionState, detail: &str) {
        info!(
            symbol = %self.symbol,
            from = self.state.name(),
            to = next.name(),
            %detail,
            "position state transition"
        );
        self.state = next;
    }

    /// FLAT -> OPENING, called once the entry intent is about to be
    /// submitted. From here on only a confirmed outcome or reconciliation
    /// moves the state.
    pub fn begin_entry(
        &mut self,
        side: Side,
        quantity: f64,
        client_order_id: String,
    ) -> Result<()> {
        if !matches!(self.state, PositionState::Flat) {
            bail!(
                "begin_entry from {}: only one position per symbol",
                self.state.name()
            );
        }
        self.transition(
            PositionState::Opening {
                side,
                quantity,
                client_order_id,
                order_id: None,
            },
            &format!("{side} entry submitted, qty {quantity}"),
        );
        Ok(())
    }

    /// Record the exchange order id once submission is acknowledged.
    pub fn entry_order_accepted(&mut self, id: String) -> Result<()> {
        match &mut self.state {
            PositionState::Opening { order_id, .. } => {
                *order_id = Some(id);
                Ok(())
            }
            other => bail!("entry_order_accepted from {}", other.name()),
        }
    }

    /// OPENING -> OPEN on a confirmed fill. The position records the actual
    /// fill price, not the signal-time price.
    pub fn entry_filled(&mut self, fill_price: f64, fill_quantity: f64) -> Result<()> {
        let PositionState::Opening { side, order_id, .. } = &self.state else {
            bail!("entry_filled from {}", self.state.name());
        };
        let side = *side;
        let position = Position {
            side,
            entry_price: fill_price,
            quantity: fill_quantity,
            stop_loss: side.stop_loss_price(fill_price, self.stop_loss_pct),
            opened_at: Utc::now(),
            order_id: order_id.clone(),
            protective_order_id: None,
        };
        self.transition(
            PositionState::Open(position),
            &format!("{side} filled at {fill_price}, qty {fill_quantity}"),
        );
        Ok(())
    }

    /// OPENING -> FLAT after retries were exhausted; no position was opened.
    pub fn entry_failed(&mut self, attempts: u32, error: &str) -> Result<()> {
        if !matches!(self.state, PositionState::Opening { .. }) {
            bail!("entry_failed from {}", self.state.name());
        }
        warn!(
            symbol = %self.symbol,
            attempts,
            %error,
            "entry abandoned, no position opened"
        );
        self.transition(PositionState::Flat, "entry failed");
        Ok(())
    }

    /// Attach the resting protective stop's order id to the open position.
    pub fn set_protective_order(&mut self, id: String) -> Result<()> {
        match &mut self.state {
            PositionState::Open(position) => {
                position.protective_order_id = Some(id);
                Ok(())
            }
            other => bail!("set_protective_order from {}", other.name()),
        }
    }

    /// OPEN -> CLOSING once the close intent is about to be submitted.
    pub fn begin_close(&mut self, reason: ExitReason, client_order_id: String) -> Result<()> {
        let PositionState::Open(position) = &self.state else {
            bail!("begin_close from {}", self.state.name());
        };
        let position = position.clone();
        self.transition(
            PositionState::Closing {
                position,
                reason,
                client_order_id,
                order_id: None,
            },
            &format!("close submitted ({reason})"),
        );
        Ok(())
    }

    pub fn close_order_accepted(&mut self, id: String) -> Result<()> {
        match &mut self.state {
            PositionState::Closing { order_id, .. } => {
                *order_id = Some(id);
                Ok(())
            }
            other => bail!("close_order_accepted from {}", other.name()),
        }
    }

    /// CLOSING -> FLAT on a confirmed close fill. Returns the realized pnl.
    pub fn close_filled(&mut self, fill_price: f64) -> Result<f64> {
        let PositionState::Closing {
            position, reason, ..
        } = &self.state
        else {
            bail!("close_filled from {}", self.state.name());
        };
        let pnl = position.unrealized_pnl(fill_price);
        let detail = format!(
            "{} closed at {fill_price} ({reason}), pnl {pnl:.4}",
            position.side
        );
        self.transition(PositionState::Flat, &detail);
        Ok(pnl)
    }

    /// CLOSING -> OPEN after close retries were exhausted. The position is
    /// still live and its stop-loss protection may now be a cycle late, so
    /// this is escalated for manual attention.
    pub fn close_failed(&mut self, attempts: u32, error: &str) -> Result<()> {
        let PositionState::Closing { position, .. } = &self.state else {
            bail!("close_failed from {}", self.state.name());
        };
        let position = position.clone();
        warn!(
            symbol = %self.symbol,
            attempts,
            %error,
            side = %position.side,
            "RISK: close failed, position remains open; manual attention may be required"
        );
        self.transition(PositionState::Open(position), "close failed, still open");
        Ok(())
    }

    /// Adopt the exchange's report as ground truth, from any state.
    ///
    /// The resulting state is a pure function of the report: an open
    /// exchange position becomes OPEN with entry and stop derived from the
    /// report; no position forces FLAT. The locally cached state only
    /// appears in the log line.
    pub fn reconcile(&mut self, report: Option<&ExchangePosition>) {
        let adopted = position_from_report(report, self.stop_loss_pct);
        let detail = match &adopted {
            Some(p) => format!(
                "exchange reports {} qty {} at {}, adopting",
                p.side, p.quantity, p.entry_price
            ),
            None => "exchange reports no position, forcing FLAT".to_string(),
        };
        let next = match adopted {
            Some(position) => PositionState::Open(position),
            None => PositionState::Flat,
        };
        self.transition(next, &detail);
    }

    /// Per-cycle check while OPEN: if the exchange no longer reports the
    /// position, it was closed on the exchange side (protective stop fill or
    /// manual intervention). Returns true when the position vanished.
    pub fn sync_open(&mut self, report: Option<&ExchangePosition>) -> Result<bool> {
        let PositionState::Open(position) = &self.state else {
            bail!("sync_open from {}", self.state.name());
        };
        match report.filter(|r| r.quantity > 0.0) {
            Some(_) => Ok(false),
            None => {
                let detail = format!(
                    "{} position no longer on exchange, assuming stop filled",
                    position.side
                );
                self.transition(PositionState::Flat, &detail);
                Ok(true)
            }
        }
    }

    /// Force FLAT after an emergency close was confirmed.
    pub fn emergency_flatten(&mut self, reason: &str) {
        warn!(symbol = %self.symbol, %reason, "emergency flatten");
        self.transition(PositionState::Flat, reason);
    }
}
