//! Tick scheduler: drives the main loop and the stop-loss monitor.
//!
//! Two cooperating periodic jobs share the strategy core behind one mutex:
//!
//! - the main tick (default 500 ms) handles market management, spot and book
//!   ingestion, paper fills, order reconciliation and entries
//! - the stop-loss monitor (default 150 ms) watches active positions and the
//!   circuit breaker's stability gate, guarded against itself by a single
//!   re-entrancy flag
//!
//! Ordering guarantee: fills observed on a tick are applied before order
//! reconciliation and before any new entry is considered, so cash freed by a
//! SELL this tick is available to an entry this tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use scalp_market::{BookSnapshot, ClobBookClient, Market, MarketDiscovery, StrikeOracle};

use crate::config::BotConfig;
use crate::executor::Executor;
use crate::quant::QuantEngine;
use crate::session::SessionReporter;
use crate::spot::SpotFeed;
use crate::strategy::StrategyCore;

/// Ticks between periodic statistics log lines.
const STATS_LOG_EVERY: u64 = 40;

/// The trading engine: one active market at a time.
pub struct Engine<E: Executor + 'static> {
    config: BotConfig,
    discovery: MarketDiscovery,
    strike: StrikeOracle,
    books: ClobBookClient,
    spot: SpotFeed,
    quant: QuantEngine,
    gateway: Arc<Mutex<E>>,
    strategy: Arc<Mutex<StrategyCore>>,
    reporter: Option<SessionReporter>,
    market: Option<Market>,
    shutdown_tx: broadcast::Sender<()>,
    tick_count: u64,
    sessions_traded: u64,
}

impl<E: Executor + 'static> Engine<E> {
    pub fn new(
        config: BotConfig,
        discovery: MarketDiscovery,
        strike: StrikeOracle,
        books: ClobBookClient,
        spot: SpotFeed,
        gateway: E,
    ) -> Self {
        let strategy = StrategyCore::new(config.strategy.clone(), "");
        let (shutdown_tx, _) = broadcast::channel(8);

        Self {
            config,
            discovery,
            strike,
            books,
            spot,
            quant: QuantEngine::new(),
            gateway: Arc::new(Mutex::new(gateway)),
            strategy: Arc::new(Mutex::new(strategy)),
            reporter: None,
            market: None,
            shutdown_tx,
            tick_count: 0,
            sessions_traded: 0,
        }
    }

    /// Handle for requesting shutdown (signal handlers).
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run until shutdown. Finalizes the session report on the way out.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            tick_ms = self.config.tick_interval_ms,
            monitor_ms = self.config.stop_loss_check_interval_ms,
            "engine starting"
        );

        // Stop-loss monitor task.
        let monitor_handle = tokio::spawn(run_monitor(
            self.strategy.clone(),
            self.gateway.clone(),
            self.books.clone(),
            self.config.stop_loss_check_interval_ms,
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut timer = interval(Duration::from_millis(self.config.tick_interval_ms));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("tick error: {:#}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping ticks");
                    break;
                }
            }
        }

        // Stop the monitor before the final report so no mutation races it.
        let _ = self.shutdown_tx.send(());
        let _ = monitor_handle.await;

        self.finalize_session().await;
        self.spot.close();
        info!(ticks = self.tick_count, sessions = self.sessions_traded, "engine stopped");
        Ok(())
    }

    /// One main-loop iteration. Recoverable failures skip the tick.
    async fn tick(&mut self) -> Result<()> {
        self.tick_count += 1;

        // 1. Market management: rotate away from an expiring window, then
        // make sure an active one is selected.
        let expiring = self
            .market
            .as_ref()
            .map(|m| m.is_expiring(self.config.market_rotation_threshold_s))
            .unwrap_or(false);
        if expiring {
            if let Some(market) = &self.market {
                info!(slug = %market.slug, "MARKET ROTATION: window expiring");
            }
            self.rotate().await;
        }

        if self.market.is_none() {
            match self.discovery.active_market().await {
                Ok(Some(market)) => self.start_session(market).await,
                Ok(None) => {
                    debug!("no active market window");
                    return Ok(());
                }
                Err(e) => {
                    warn!("market discovery failed: {}", e);
                    return Ok(());
                }
            }
        }

        let market = match self.market.clone() {
            Some(m) => m,
            None => return Ok(()),
        };

        // 2. Strike: the engine must not trade until one is known.
        let strike = if market.strike_price > Decimal::ZERO {
            market.strike_price
        } else {
            match self
                .strike
                .strike(&market.slug, market.start, market.end)
                .await
            {
                Some(s) => {
                    if let Some(m) = self.market.as_mut() {
                        m.strike_price = s;
                    }
                    s
                }
                None => {
                    debug!(slug = %market.slug, "awaiting strike price; not trading");
                    return Ok(());
                }
            }
        };

        // 3. Spot: absence means skip, never trade on stale data.
        let spot = match self.spot.latest().await {
            Some(s) => s,
            None => {
                debug!("spot price not available yet");
                return Ok(());
            }
        };
        let now = Utc::now();
        self.quant.record_spot(spot, now);

        // 4. Both books. Empty or unreachable books skip the tick.
        let up = match self.books.book(&market.token_id_up).await {
            Ok(b) => b,
            Err(e) => {
                warn!("UP book fetch failed: {}", e);
                return Ok(());
            }
        };
        let down = match self.books.book(&market.token_id_down).await {
            Ok(b) => b,
            Err(e) => {
                warn!("DOWN book fetch failed: {}", e);
                return Ok(());
            }
        };

        let remaining = market.time_remaining();
        let direction = StrategyCore::candidate_direction(spot, strike);
        let fair = self.quant.fair_value(direction, spot, strike, remaining);

        debug!(
            tick = self.tick_count,
            %spot,
            %strike,
            %direction,
            fair = format!("{:.4}", fair),
            up_bid = %up.best_bid,
            up_ask = %up.best_ask,
            down_bid = %down.best_bid,
            down_ask = %down.best_ask,
            remaining_s = remaining,
            "tick"
        );

        let mut bids = HashMap::new();
        bids.insert(market.token_id_up.clone(), up.best_bid);
        bids.insert(market.token_id_down.clone(), down.best_bid);

        {
            let mut strat = self.strategy.lock().await;
            let mut gw = self.gateway.lock().await;

            strat.observe_books(&up, &down, now);

            // Fills first: cash freed this tick is usable this tick.
            gw.apply_fills(&market.token_id_up, up.best_bid, up.best_ask)
                .await;
            gw.apply_fills(&market.token_id_down, down.best_bid, down.best_ask)
                .await;

            strat.update_order_status(&mut *gw, remaining, &bids).await;

            // Safe-zone pre-filter: skip entry evaluation when the whole
            // book sits in the kill zone.
            if strat.in_safe_zone(up.mid(), down.mid()) {
                let cash = gw.cash().await;
                let position_count = gw.all_positions().await.len();

                match strat.should_enter(
                    spot,
                    strike,
                    &up,
                    &down,
                    remaining,
                    cash,
                    position_count,
                    now,
                ) {
                    Ok(direction) => {
                        let token_id = match direction {
                            scalp_common::Direction::Up => &market.token_id_up,
                            scalp_common::Direction::Down => &market.token_id_down,
                        };
                        // Refresh top-of-book for the chosen token before
                        // committing.
                        match self.books.book(token_id).await {
                            Ok(fresh) => {
                                match strat
                                    .execute_entry(&mut *gw, token_id, direction, fresh, now)
                                    .await
                                {
                                    Ok(buy_id) => {
                                        info!(buy_id, %direction, "entry executed")
                                    }
                                    Err(rejection) => info!("entry aborted: {}", rejection),
                                }
                            }
                            Err(e) => warn!("book refresh failed, entry skipped: {}", e),
                        }
                    }
                    Err(rejection) => debug!("no entry: {}", rejection),
                }
            } else {
                debug!("kill zone: neither mid inside the entry band");
            }

            if self.tick_count % STATS_LOG_EVERY == 0 {
                let stats = strat.stats(&bids);
                let cash = gw.cash().await;
                info!(
                    session_pnl = %strat.session().pnl,
                    realized = %stats.realized_pnl,
                    unrealized = %stats.unrealized_pnl,
                    buys = stats.executed_buys,
                    limit_sells = stats.limit_sells,
                    stop_losses = stats.stop_losses,
                    naked = stats.naked_positions,
                    cash = %cash,
                    "session statistics"
                );
            }
        }

        if let Some(reporter) = self.reporter.as_mut() {
            reporter.record_tick();
        }

        Ok(())
    }

    /// Begin a new session on a freshly-discovered market.
    async fn start_session(&mut self, market: Market) {
        if let Err(e) = market.validate() {
            warn!("discovered market failed validation: {}", e);
            return;
        }

        self.sessions_traded += 1;
        let starting_cash = self.gateway.lock().await.cash().await;

        info!(
            session = self.sessions_traded,
            slug = %market.slug,
            question = %market.question,
            ends = %market.end,
            %starting_cash,
            "session started"
        );

        self.strategy.lock().await.reset(market.slug.as_str());
        self.quant.reset();
        self.strike.retain_session(&market.slug);
        self.reporter = Some(SessionReporter::new(market.slug.as_str(), starting_cash));
        self.market = Some(market);
    }

    /// Rotate away from the current market: emergency-exit open positions,
    /// emit the session report, clear the gateway, reset strategy state.
    async fn rotate(&mut self) {
        let market = match self.market.take() {
            Some(m) => m,
            None => return,
        };

        // Best bids for the emergency exit and final mark-to-market.
        let mut bids = HashMap::new();
        for token in [&market.token_id_up, &market.token_id_down] {
            if let Ok(snap) = self.books.book(token).await {
                bids.insert(token.clone(), snap.best_bid);
            }
        }

        {
            let mut strat = self.strategy.lock().await;
            let mut gw = self.gateway.lock().await;

            if strat.has_open_position() {
                warn!(slug = %market.slug, "open position at rotation, exiting");
                strat.emergency_exit_all(&mut *gw, &bids).await;
            }

            if let Some(reporter) = self.reporter.take() {
                let stats = strat.stats(&bids);
                let report = reporter.finalize(strat.ledger(), &stats, gw.cash().await);
                if let Err(e) = SessionReporter::write(&report, &self.config.report_dir).await {
                    error!("failed to write session report: {:#}", e);
                }
            }

            if let Err(e) = gw.clear_all().await {
                error!("clear_all failed at rotation: {}", e);
            }

            strat.reset(market.next_slug.as_deref().unwrap_or(""));
        }

        self.quant.reset();
        info!(old_slug = %market.slug, "rotation complete");
    }

    /// Final report at shutdown. Open positions are left alone - winding
    /// them down is the live operator's policy.
    async fn finalize_session(&mut self) {
        let reporter = match self.reporter.take() {
            Some(r) => r,
            None => return,
        };

        let mut bids = HashMap::new();
        if let Some(market) = &self.market {
            for token in [&market.token_id_up, &market.token_id_down] {
                if let Ok(snap) = self.books.book(token).await {
                    bids.insert(token.clone(), snap.best_bid);
                }
            }
        }

        let strat = self.strategy.lock().await;
        let gw = self.gateway.lock().await;
        let stats = strat.stats(&bids);
        let ending_cash = gw.cash().await;
        let report = reporter.finalize(strat.ledger(), &stats, ending_cash);

        info!(
            starting = %report.wallet.starting,
            ending = %report.wallet.ending,
            net = %report.wallet.net_change,
            profitable = report.wallet.profitable,
            "wallet summary"
        );

        if let Err(e) = SessionReporter::write(&report, &self.config.report_dir).await {
            error!("failed to write final session report: {:#}", e);
        }
    }
}

/// Stop-loss monitor loop. A single boolean flag serializes the monitor
/// against itself; the strategy mutex serializes it against the main tick.
async fn run_monitor<E: Executor + 'static>(
    strategy: Arc<Mutex<StrategyCore>>,
    gateway: Arc<Mutex<E>>,
    books: ClobBookClient,
    interval_ms: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let busy = AtomicBool::new(false);
    let mut timer = interval(Duration::from_millis(interval_ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_ms, "stop-loss monitor running");

    loop {
        tokio::select! {
            _ = timer.tick() => {
                if busy.swap(true, Ordering::AcqRel) {
                    continue;
                }
                if let Err(e) = monitor_pass(&strategy, &gateway, &books).await {
                    error!("monitor pass error: {:#}", e);
                }
                busy.store(false, Ordering::Release);
            }
            _ = shutdown.recv() => {
                info!("stop-loss monitor stopped");
                return;
            }
        }
    }
}

/// One monitor pass: snapshot watch targets, fetch bids, apply the stop
/// logic under the strategy mutex.
async fn monitor_pass<E: Executor + 'static>(
    strategy: &Arc<Mutex<StrategyCore>>,
    gateway: &Arc<Mutex<E>>,
    books: &ClobBookClient,
) -> Result<()> {
    // Watch list: every active position plus, while the breaker is engaged,
    // the crashed token (its stability gate needs observations even after
    // the position is gone).
    let tokens: Vec<String> = {
        let strat = strategy.lock().await;
        let mut tokens: Vec<String> = strat
            .active_positions()
            .map(|p| p.token_id.clone())
            .collect();
        if let Some(crash_token) = strat.breaker().crash_token() {
            if !tokens.iter().any(|t| t == crash_token) {
                tokens.push(crash_token.to_string());
            }
        }
        tokens
    };

    if tokens.is_empty() {
        return Ok(());
    }

    let mut bids: HashMap<String, Decimal> = HashMap::new();
    for token in &tokens {
        match books.book(token).await {
            Ok(BookSnapshot { best_bid, .. }) => {
                bids.insert(token.clone(), best_bid);
            }
            Err(e) => debug!(token = %token, "monitor book fetch failed: {}", e),
        }
    }

    if bids.is_empty() {
        return Ok(());
    }

    let mut strat = strategy.lock().await;
    let mut gw = gateway.lock().await;
    strat.check_stops(&mut *gw, &bids, Utc::now()).await;
    Ok(())
}
