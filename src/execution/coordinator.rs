use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::exchange::{
    ExchangeGateway, ExchangePosition, InstrumentLimits, MarginMode, OrderRequest, OrderStatus,
    OrderType,
};
use crate::execution::retry::RetryPolicy;
use crate::execution::schedule;
use crate::execution::state_machine::{PositionState, PositionTracker};
use crate::execution::window::CandleWindow;
use crate::models::{ExitReason, OrderIntent, Side, Signal};
use crate::risk::{size_position, RiskParams};
use crate::strategy::Strategy;

/// Extra candles kept beyond the strategy's minimum so one missed fetch
/// never starves the indicators.
const WINDOW_MARGIN: usize = 10;

/// Immutable per-symbol engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub symbol: String,
    pub timeframe: String,
    pub margin_asset: String,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub risk: RiskParams,
}

/// What one decision cycle resolved to. Mostly consumed by tests and logs.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Held,
    Entered(Side),
    EntryFailed,
    Exited { reason: ExitReason, pnl: f64 },
    CloseFailed,
    /// Position vanished on the exchange side (protective stop fill).
    StopFilledExternally,
    /// Order submitted but the fill was not confirmed within the polling
    /// budget; the next cycle reconciles before any new decision.
    AwaitingConfirmation,
    /// The strategy wanted a trade the instrument limits cannot express.
    SizingRejected,
    /// Position was emergency-closed because its protective stop could not
    /// be placed.
    EmergencyClosed,
}

enum FillOutcome {
    Filled { price: f64, quantity: f64 },
    Rejected,
    Canceled,
    Unconfirmed,
}

/// Drives one decision cycle at a time: fetch, evaluate, size, submit,
/// confirm, then sleep until the next candle close. All exchange I/O for a
/// decision completes before the next cycle starts, so cycle logic never
/// races itself.
pub struct Coordinator {
    gateway: Arc<dyn ExchangeGateway>,
    strategy: Box<dyn Strategy>,
    settings: EngineSettings,
    retry: RetryPolicy,
    window: CandleWindow,
    tracker: PositionTracker,
    limits: Option<InstrumentLimits>,
    tf_secs: i64,
    poll_interval: Duration,
    max_fill_polls: u32,
}

impl Coordinator {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        strategy: Box<dyn Strategy>,
        settings: EngineSettings,
    ) -> Result<Self> {
        let tf_secs = schedule::timeframe_secs(&settings.timeframe)
            .with_context(|| format!("invalid timeframe {:?}", settings.timeframe))?;
        let capacity = strategy.min_candles_required() + WINDOW_MARGIN;
        let tracker = PositionTracker::new(settings.symbol.clone(), settings.risk.stop_loss_pct);
        Ok(Self {
            gateway,
            strategy,
            settings,
            retry: RetryPolicy::default(),
            window: CandleWindow::new(capacity),
            tracker,
            limits: None,
            tf_secs,
            poll_interval: Duration::from_millis(500),
            max_fill_polls: 10,
        })
    }

    /// Shrink retry backoff and fill polling, used by tests.
    pub fn with_timings(
        mut self,
        retry: RetryPolicy,
        poll_interval: Duration,
        max_fill_polls: u32,
    ) -> Self {
        self.retry = retry;
        self.poll_interval = poll_interval;
        self.max_fill_polls = max_fill_polls;
        self
    }

    pub fn state(&self) -> &PositionState {
        self.tracker.state()
    }

    /// One-time setup: leverage and margin mode (idempotent), instrument
    /// limits, then reconcile against whatever the exchange already holds.
    /// Local assumptions never survive a restart.
    pub async fn startup(&mut self) -> Result<()> {
        let gateway = Arc::clone(&self.gateway);
        let symbol = self.settings.symbol.clone();
        let leverage = self.settings.leverage;
        let mode = self.settings.margin_mode;

        self.retry
            .run("set leverage", || {
                let gateway = Arc::clone(&gateway);
                let symbol = symbol.clone();
                async move { gateway.set_leverage(&symbol, leverage).await }
            })
            .await
            .context("setting leverage")?;

        self.retry
            .run("set margin mode", || {
                let gateway = Arc::clone(&gateway);
                let symbol = symbol.clone();
                async move { gateway.set_margin_mode(&symbol, mode).await }
            })
            .await
            .context("setting margin mode")?;

        let limits = self
            .retry
            .run("fetch instrument limits", || {
                let gateway = Arc::clone(&gateway);
                let symbol = symbol.clone();
                async move { gateway.get_instrument_limits(&symbol).await }
            })
            .await
            .context("fetching instrument limits")?;
        info!(symbol = %self.settings.symbol, ?limits, "instrument limits loaded");
        self.limits = Some(limits);

        let report = self.fetch_open_position().await.context("reconciling")?;
        self.tracker.reconcile(report.as_ref());
        Ok(())
    }

    /// Run cycles forever, aligned to candle closes. A failed cycle is
    /// logged and the loop continues; ambiguous order state is resolved by
    /// the next cycle's reconciliation. Ctrl-C exits between cycles, so an
    /// in-flight confirmation always completes first.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            strategy = self.strategy.name(),
            symbol = %self.settings.symbol,
            timeframe = %self.settings.timeframe,
            "engine started"
        );
        loop {
            let delay = schedule::next_cycle_delay(Utc::now(), self.tf_secs);
            info!(sleep_secs = delay.as_secs(), "waiting for next candle close");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    match self.run_cycle().await {
                        Ok(outcome) => info!(?outcome, "cycle complete"),
                        Err(e) => {
                            error!(error = %e, "cycle failed; reconciling next cycle");
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    /// One full decision cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        // An unresolved order from a previous cycle blocks every decision
        // until the exchange has been consulted.
        let mut report = None;
        if self.tracker.is_transient() {
            let fetched = self.fetch_open_position().await?;
            self.tracker.reconcile(fetched.as_ref());
            report = Some(fetched);
        }

        // While open, the exchange remains ground truth: the protective stop
        // may have filled between cycles. A report fetched for
        // reconciliation above is current enough to reuse here.
        if self.tracker.position().is_some() {
            let report = match report {
                Some(fetched) => fetched,
                None => self.fetch_open_position().await?,
            };
            if self.tracker.sync_open(report.as_ref())? {
                self.cancel_stop_orders().await;
                return Ok(CycleOutcome::StopFilledExternally);
            }
            if let Some(outcome) = self.ensure_protective_stop().await? {
                return Ok(outcome);
            }
        }

        self.refresh_window().await?;

        let decision = self
            .strategy
            .evaluate(self.window.as_slice(), self.tracker.position());
        match &decision.snapshot {
            Some(s) => info!(
                signal = ?decision.signal,
                z_score = s.z_score,
                adx = s.adx,
                reason = %decision.reason,
                "signal evaluated"
            ),
            None => info!(signal = ?decision.signal, reason = %decision.reason, "signal evaluated"),
        }

        match decision.signal {
            Signal::Hold => Ok(CycleOutcome::Held),
            Signal::EnterLong => self.open_position(Side::Long, decision.reason).await,
            Signal::EnterShort => self.open_position(Side::Short, decision.reason).await,
            Signal::Exit(reason) => self.close_position(reason).await,
        }
    }

    async fn refresh_window(&mut self) -> Result<()> {
        let gateway = Arc::clone(&self.gateway);
        let symbol = self.settings.symbol.clone();
        let timeframe = self.settings.timeframe.clone();
        let limit = self.window.capacity();

        let batch = self
            .retry
            .run("fetch candles", || {
                let gateway = Arc::clone(&gateway);
                let symbol = symbol.clone();
                let timeframe = timeframe.clone();
                async move { gateway.get_candles(&symbol, &timeframe, limit).await }
            })
            .await
            .context("fetching candles")?;

        let now = Utc::now();
        let closed: Vec<_> = batch
            .into_iter()
            .filter(|c| schedule::is_closed(c, now, self.tf_secs))
            .collect();
        self.window.merge(closed);
        Ok(())
    }

    async fn open_position(&mut self, side: Side, reason: String) -> Result<CycleOutcome> {
        let limits = self
            .limits
            .clone()
            .context("instrument limits not loaded; startup() must run first")?;
        let price = self.window.last_close().context("empty candle window")?;

        let gateway = Arc::clone(&self.gateway);
        let asset = self.settings.margin_asset.clone();
        let balance = self
            .retry
            .run("fetch balance", || {
                let gateway = Arc::clone(&gateway);
                let asset = asset.clone();
                async move { gateway.get_balance(&asset).await }
            })
            .await
            .context("fetching balance")?;

        let quantity = match size_position(balance, price, &self.settings.risk, &limits) {
            Ok(q) => q,
            Err(e) => {
                warn!(%side, balance, price, error = %e, "intended trade cannot be sized");
                return Ok(CycleOutcome::SizingRejected);
            }
        };

        let intent = OrderIntent::entry(side, quantity, reason);
        self.tracker
            .begin_entry(side, quantity, intent.client_order_id.clone())?;

        let request = OrderRequest {
            symbol: self.settings.symbol.clone(),
            side: side.entry_order_side(),
            quantity,
            order_type: OrderType::Market,
            reduce_only: false,
            client_order_id: Some(intent.client_order_id.clone()),
        };
        info!(%side, quantity, price, reason = %intent.reason, "submitting entry order");

        let order_id = match self.submit_order(&request, "entry order").await {
            Ok(id) => id,
            Err(e) => {
                let attempts = if e.is_transient() {
                    self.retry.max_attempts
                } else {
                    1
                };
                self.tracker.entry_failed(attempts, &e.to_string())?;
                return Ok(CycleOutcome::EntryFailed);
            }
        };
        self.tracker.entry_order_accepted(order_id.clone())?;

        match self.confirm_fill(&order_id).await? {
            FillOutcome::Filled {
                price: fill_price,
                quantity: fill_quantity,
            } => {
                self.tracker.entry_filled(fill_price, fill_quantity)?;
                self.place_protective_stop().await
            }
            FillOutcome::Rejected => {
                self.tracker.entry_failed(1, "order rejected")?;
                Ok(CycleOutcome::EntryFailed)
            }
            FillOutcome::Canceled => {
                self.tracker.entry_failed(1, "order canceled")?;
                Ok(CycleOutcome::EntryFailed)
            }
            FillOutcome::Unconfirmed => {
                warn!(%order_id, "entry fill unconfirmed; deferring to reconciliation");
                Ok(CycleOutcome::AwaitingConfirmation)
            }
        }
    }

    /// Rest a reduce-only STOP_MARKET at the position's stop level. If the
    /// exchange will not accept it the position is closed at market rather
    /// than left unprotected.
    async fn place_protective_stop(&mut self) -> Result<CycleOutcome> {
        let position = self
            .tracker
            .position()
            .context("no open position to protect")?
            .clone();

        let request = OrderRequest {
            symbol: self.settings.symbol.clone(),
            side: position.side.close_order_side(),
            quantity: position.quantity,
            order_type: OrderType::StopMarket {
                stop_price: position.stop_loss,
            },
            reduce_only: true,
            client_order_id: None,
        };

        match self.submit_order(&request, "protective stop").await {
            Ok(stop_id) => {
                info!(%stop_id, stop_price = position.stop_loss, "protective stop placed");
                self.tracker.set_protective_order(stop_id)?;
                Ok(CycleOutcome::Entered(position.side))
            }
            Err(e) => {
                warn!(error = %e, "protective stop rejected; closing position at market");
                let close = OrderRequest {
                    symbol: self.settings.symbol.clone(),
                    side: position.side.close_order_side(),
                    quantity: position.quantity,
                    order_type: OrderType::Market,
                    reduce_only: true,
                    client_order_id: None,
                };
                match self.submit_order(&close, "emergency close").await {
                    Ok(_) => {
                        self.tracker
                            .emergency_flatten("protective stop rejected, closed at market");
                        Ok(CycleOutcome::EmergencyClosed)
                    }
                    Err(close_err) => {
                        error!(
                            error = %close_err,
                            "RISK: position open without protective stop and emergency close failed"
                        );
                        Ok(CycleOutcome::Entered(position.side))
                    }
                }
            }
        }
    }

    /// An adopted position (startup reconciliation, or recovery after an
    /// unconfirmed fill) has no protective order on record. Re-attach a stop
    /// still resting on the exchange, or place a fresh one, before any
    /// trading decision runs against the position.
    async fn ensure_protective_stop(&mut self) -> Result<Option<CycleOutcome>> {
        let position = match self.tracker.position() {
            Some(p) if p.protective_order_id.is_none() => p.clone(),
            _ => return Ok(None),
        };

        let gateway = Arc::clone(&self.gateway);
        let symbol = self.settings.symbol.clone();
        let open_orders = self
            .retry
            .run("fetch open orders", || {
                let gateway = Arc::clone(&gateway);
                let symbol = symbol.clone();
                async move { gateway.get_open_orders(&symbol).await }
            })
            .await;

        match open_orders {
            Ok(orders) => {
                if let Some(stop) = orders
                    .iter()
                    .find(|o| o.is_stop && o.side == position.side.close_order_side())
                {
                    info!(order_id = %stop.order_id, "re-attached resting protective stop");
                    self.tracker.set_protective_order(stop.order_id.clone())?;
                    return Ok(None);
                }
            }
            Err(e) => {
                warn!(error = %e, "could not list open orders; placing a fresh protective stop");
            }
        }

        match self.place_protective_stop().await? {
            CycleOutcome::Entered(_) => Ok(None),
            outcome => Ok(Some(outcome)),
        }
    }

    async fn close_position(&mut self, reason: ExitReason) -> Result<CycleOutcome> {
        let position = self
            .tracker
            .position()
            .context("exit signal without open position")?
            .clone();

        // Resting stops must go first or the close could double-fill.
        self.cancel_stop_orders().await;

        let intent = OrderIntent::exit(position.side, position.quantity, reason.to_string());
        self.tracker
            .begin_close(reason, intent.client_order_id.clone())?;

        let request = OrderRequest {
            symbol: self.settings.symbol.clone(),
            side: position.side.close_order_side(),
            quantity: position.quantity,
            order_type: OrderType::Market,
            reduce_only: true,
            client_order_id: Some(intent.client_order_id.clone()),
        };
        info!(side = %position.side, quantity = position.quantity, %reason, "submitting close order");

        let order_id = match self.submit_order(&request, "close order").await {
            Ok(id) => id,
            Err(e) => {
                let attempts = if e.is_transient() {
                    self.retry.max_attempts
                } else {
                    1
                };
                self.tracker.close_failed(attempts, &e.to_string())?;
                return Ok(CycleOutcome::CloseFailed);
            }
        };
        self.tracker.close_order_accepted(order_id.clone())?;

        match self.confirm_fill(&order_id).await? {
            FillOutcome::Filled { price, .. } => {
                let pnl = self.tracker.close_filled(price)?;
                info!(%reason, fill_price = price, pnl, "position closed");
                Ok(CycleOutcome::Exited { reason, pnl })
            }
            FillOutcome::Rejected => {
                self.tracker.close_failed(1, "close order rejected")?;
                Ok(CycleOutcome::CloseFailed)
            }
            FillOutcome::Canceled => {
                self.tracker.close_failed(1, "close order canceled")?;
                Ok(CycleOutcome::CloseFailed)
            }
            FillOutcome::Unconfirmed => {
                warn!(%order_id, "close fill unconfirmed; deferring to reconciliation");
                Ok(CycleOutcome::AwaitingConfirmation)
            }
        }
    }

    async fn submit_order(
        &self,
        request: &OrderRequest,
        label: &str,
    ) -> Result<String, crate::exchange::ExchangeError> {
        let gateway = Arc::clone(&self.gateway);
        self.retry
            .run(label, || {
                let gateway = Arc::clone(&gateway);
                let request = request.clone();
                async move { gateway.place_order(&request).await }
            })
            .await
    }

    /// Poll order status until it resolves or the polling budget runs out.
    /// An order is never resubmitted while its outcome is unknown.
    async fn confirm_fill(&self, order_id: &str) -> Result<FillOutcome> {
        let gateway = Arc::clone(&self.gateway);
        let symbol = self.settings.symbol.clone();

        for _ in 0..self.max_fill_polls {
            let status = self
                .retry
                .run("order status", || {
                    let gateway = Arc::clone(&gateway);
                    let symbol = symbol.clone();
                    let order_id = order_id.to_string();
                    async move { gateway.get_order_status(&symbol, &order_id).await }
                })
                .await
                .context("polling order status")?;

            match status {
                OrderStatus::Pending => tokio::time::sleep(self.poll_interval).await,
                OrderStatus::Filled { price, quantity } => {
                    return Ok(FillOutcome::Filled { price, quantity })
                }
                OrderStatus::Rejected => return Ok(FillOutcome::Rejected),
                OrderStatus::Canceled => return Ok(FillOutcome::Canceled),
            }
        }
        Ok(FillOutcome::Unconfirmed)
    }

    /// Cancel any resting stop orders for the symbol. Failures here are
    /// logged, not fatal: a stale stop is reported and swept again next
    /// cycle.
    async fn cancel_stop_orders(&mut self) {
        let gateway = Arc::clone(&self.gateway);
        let symbol = self.settings.symbol.clone();

        let open_orders = self
            .retry
            .run("fetch open orders", || {
                let gateway = Arc::clone(&gateway);
                let symbol = symbol.clone();
                async move { gateway.get_open_orders(&symbol).await }
            })
            .await;

        let open_orders = match open_orders {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "could not list open orders; stops not swept");
                return;
            }
        };

        for order in open_orders.iter().filter(|o| o.is_stop) {
            let result = self
                .retry
                .run("cancel stop order", || {
                    let gateway = Arc::clone(&gateway);
                    let symbol = symbol.clone();
                    let order_id = order.order_id.clone();
                    async move { gateway.cancel_order(&symbol, &order_id).await }
                })
                .await;
            match result {
                Ok(()) => info!(order_id = %order.order_id, "stop order canceled"),
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "stop order cancel failed")
                }
            }
        }
    }

    async fn fetch_open_position(
        &self,
    ) -> Result<Option<ExchangePosition>, crate::exchange::ExchangeError> {
        let gateway = Arc::clone(&self.gateway);
        let symbol = self.settings.symbol.clone();
        self.retry
            .run("fetch open position", || {
                let gateway = Arc::clone(&gateway);
                let symbol = symbol.clone();
                async move { gateway.get_open_position(&symbol).await }
            })
            .await
    }
}
