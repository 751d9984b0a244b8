//! Rebalance scheduler.
//!
//! Runs one cycle at start-up and then one after every 4-hour UTC boundary.
//! A cycle is list symbols → rank → allocate → snapshot holdings → quote →
//! reconcile. The scheduler owns the reconciler by value and takes `&mut self`
//! for a cycle, so two cycles can never overlap.

mod clock;

pub use clock::{next_rebalance_time, sleep_duration, REBALANCE_INTERVAL_HOURS, SETTLE_BUFFER_SECS};

use crate::config::StrategyConfig;
use crate::error::CycleError;
use crate::exchange::MarketDataGateway;
use crate::ledger::{exposure_by_side, fetch_quotes, ReconcileReport, Reconciler, Valuation};
use crate::strategy::{compute_targets, TargetAllocation, VolatilityRanker};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Rebalancing,
}

/// Everything one completed cycle produced.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub ranked: usize,
    pub targets: TargetAllocation,
    pub report: ReconcileReport,
    pub valuation: Valuation,
}

pub struct RebalanceScheduler {
    gateway: Arc<dyn MarketDataGateway>,
    ranker: VolatilityRanker,
    reconciler: Box<dyn Reconciler>,
    strategy: StrategyConfig,
    state: SchedulerState,
    cycles: u64,
}

impl RebalanceScheduler {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        ranker: VolatilityRanker,
        reconciler: Box<dyn Reconciler>,
        strategy: StrategyConfig,
    ) -> Self {
        Self {
            gateway,
            ranker,
            reconciler,
            strategy,
            state: SchedulerState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Cycles attempted so far, failed ones included.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn reconciler(&self) -> &dyn Reconciler {
        self.reconciler.as_ref()
    }

    /// Run one complete rebalance cycle.
    ///
    /// A `CycleError` means the cycle stopped before reconciliation and the
    /// ledger was not touched.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary, CycleError> {
        self.state = SchedulerState::Rebalancing;
        self.cycles += 1;
        let result = self.cycle().await;
        self.state = SchedulerState::Idle;
        result
    }

    #[instrument(skip(self), fields(cycle = self.cycles, mode = self.reconciler.mode()))]
    async fn cycle(&mut self) -> Result<CycleSummary, CycleError> {
        let started_at = Utc::now();
        info!(at = %started_at.format("%Y-%m-%d %H:%M:%S"), "REBALANCE");

        let symbols = self.gateway.list_tradable_symbols().await?;
        info!(count = symbols.len(), "Found active USDT perps");

        let ranking = self.ranker.rank(self.gateway.as_ref(), &symbols).await;
        let targets = compute_targets(
            &ranking.scores,
            &self.strategy.reference_symbol,
            self.strategy.capital,
            self.strategy.n_shorts,
        )
        .inspect_err(|e| warn!(error = %e, "Skipping rebalance"))?;

        let holdings = self.reconciler.snapshot().await?;
        let quotes = fetch_quotes(
            self.gateway.as_ref(),
            holdings.keys().chain(targets.symbols()),
        )
        .await;

        let report = self.reconciler.reconcile(holdings, &targets, &quotes).await;
        let valuation = Valuation::compute(
            self.reconciler.starting_capital(),
            self.reconciler.realized_pnl(),
            &report.positions_after,
            &quotes,
        );

        let counts = report.counts();
        let (long_exposure, short_exposure) = exposure_by_side(&report.positions_after);
        info!(
            opened = counts.opened,
            held = counts.held,
            reversed = counts.reversed,
            closed = counts.closed,
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            long_exposure = %long_exposure.round_dp(2),
            short_exposure = %short_exposure.round_dp(2),
            "Rebalance complete"
        );
        for skipped in &report.skipped {
            warn!(symbol = %skipped.symbol, reason = %skipped.reason, "Skipped this cycle");
        }
        valuation.log();

        Ok(CycleSummary {
            cycle: self.cycles,
            started_at,
            ranked: ranking.len(),
            targets,
            report,
            valuation,
        })
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// Shutdown is only observed between cycles; an in-flight cycle always
    /// runs to completion.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Starting rebalance loop");

        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "Rebalance cycle aborted");
            }

            let now = Utc::now();
            let next = next_rebalance_time(now);
            let wait = sleep_duration(now);
            info!(
                next = %next.format("%Y-%m-%d %H:%M"),
                hours = %format_args!("{:.1}", (next - now).num_seconds() as f64 / 3600.0),
                "Next rebalance scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping rebalance loop");
                    return;
                }
            }
        }
    }
}
