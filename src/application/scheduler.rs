use super::progression::{ProgressionEngine, ScanReport};
use super::reconciliation::PaymentReconciliation;
use crate::config::{AdvancePolicy, SchedulerConfig};
use crate::error::{Result, TontineError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

/// Periodic driver of the progression engine.
///
/// Nothing about previous passes is remembered: every pass re-evaluates all
/// tours against the clock, so a late or skipped tick only delays work.
pub struct SchedulerDriver {
    engine: Arc<ProgressionEngine>,
    reconciliation: Option<Arc<PaymentReconciliation>>,
    config: SchedulerConfig,
}

impl SchedulerDriver {
    pub fn new(engine: Arc<ProgressionEngine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            reconciliation: None,
            config,
        }
    }

    /// Required by `AdvancePolicy::SettlementGated`.
    pub fn with_reconciliation(mut self, reconciliation: Arc<PaymentReconciliation>) -> Self {
        self.reconciliation = Some(reconciliation);
        self
    }

    /// Runs one full pass inline and reports what moved.
    pub async fn run_once(&self) -> Result<ScanReport> {
        match self.config.policy {
            AdvancePolicy::TimeDriven => self.engine.check_and_advance_tours().await,
            AdvancePolicy::SettlementGated => {
                let reconciliation = self.reconciliation.as_ref().ok_or_else(|| {
                    TontineError::ValidationError(
                        "settlement-gated policy needs a payment reconciliation".to_string(),
                    )
                })?;
                reconciliation.reconcile_due_tours().await
            }
        }
    }

    /// Spawns the recurring task. The first pass runs one interval after start.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.config.scan_interval;
        info!(interval_secs = period.as_secs(), policy = ?self.config.policy, "Tour progression scheduler started");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                // A pass always runs to completion; shutdown is only observed
                // between passes.
                info!("Checking tours for round progression");
                match self.run_once().await {
                    Ok(report) if report.tours_advanced + report.tours_completed > 0 => {
                        info!(
                            advanced = report.tours_advanced,
                            completed = report.tours_completed,
                            failures = report.failures,
                            "Scheduled pass finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(kind = e.kind(), "Scheduled pass failed: {e}"),
                }
            }
            info!("Tour progression scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals shutdown and waits for any in-flight pass to finish.
    pub async fn stop(self) -> Result<()> {
        // The receiver only disappears once the task has already ended.
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| TontineError::InternalError(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconciliationConfig;
    use crate::domain::clock::FixedClock;
    use crate::domain::ports::TourStore;
    use crate::domain::schedule::Frequency;
    use crate::domain::tour::tests::sample_tour;
    use crate::domain::tour::{TourId, TourStatus};
    use crate::infrastructure::in_memory::{
        InMemoryGroupDirectory, InMemoryLedgerStore, InMemoryTourStore, SimulatedPaymentProcessor,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::time::Duration as StdDuration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    }

    async fn setup() -> (InMemoryTourStore, FixedClock, Arc<ProgressionEngine>) {
        let store = InMemoryTourStore::new();
        let clock = FixedClock::new(now());
        let mut tour = sample_tour(4, Frequency::Daily);
        tour.status = TourStatus::Active;
        tour.next_round_date = Some(now() - Duration::hours(2));
        store.insert(tour).await.unwrap();
        let engine = Arc::new(ProgressionEngine::new(
            Box::new(store.clone()),
            Box::new(InMemoryGroupDirectory::new()),
            Arc::new(clock.clone()),
        ));
        (store, clock, engine)
    }

    #[tokio::test]
    async fn test_run_once_reports_advanced_tours() {
        let (store, _clock, engine) = setup().await;
        let driver = SchedulerDriver::new(engine, SchedulerConfig::default());

        let report = driver.run_once().await.unwrap();
        assert_eq!(report.tours_advanced, 1);
        assert_eq!(store.get(TourId(1)).await.unwrap().unwrap().current_round, 2);

        let again = driver.run_once().await.unwrap();
        assert_eq!(again.tours_advanced, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_task_ticks_on_interval() {
        let (store, clock, engine) = setup().await;
        let driver = Arc::new(SchedulerDriver::new(
            engine,
            SchedulerConfig {
                scan_interval: StdDuration::from_secs(3600),
                policy: AdvancePolicy::TimeDriven,
            },
        ));
        let handle = driver.start();

        tokio::time::sleep(StdDuration::from_secs(1800)).await;
        assert_eq!(
            store.get(TourId(1)).await.unwrap().unwrap().current_round,
            1,
            "no pass before the first interval"
        );

        tokio::time::sleep(StdDuration::from_secs(1801)).await;
        assert_eq!(store.get(TourId(1)).await.unwrap().unwrap().current_round, 2);

        // Next due date is a day out; the following tick finds nothing.
        tokio::time::sleep(StdDuration::from_secs(3600)).await;
        assert_eq!(store.get(TourId(1)).await.unwrap().unwrap().current_round, 2);

        clock.advance(Duration::days(1));
        tokio::time::sleep(StdDuration::from_secs(3600)).await;
        assert_eq!(store.get(TourId(1)).await.unwrap().unwrap().current_round, 3);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_scheduler_no_longer_ticks() {
        let (store, _clock, engine) = setup().await;
        let driver = Arc::new(SchedulerDriver::new(engine, SchedulerConfig::default()));
        let handle = driver.start();
        handle.stop().await.unwrap();

        tokio::time::sleep(StdDuration::from_secs(7200)).await;
        assert_eq!(store.get(TourId(1)).await.unwrap().unwrap().current_round, 1);
    }

    #[tokio::test]
    async fn test_settlement_gated_policy() {
        let (store, _clock, engine) = setup().await;
        let config = SchedulerConfig {
            policy: AdvancePolicy::SettlementGated,
            ..SchedulerConfig::default()
        };

        let without_bridge = SchedulerDriver::new(engine.clone(), config.clone());
        assert!(matches!(
            without_bridge.run_once().await,
            Err(TontineError::ValidationError(_))
        ));

        let processor = SimulatedPaymentProcessor::default();
        let bridge = Arc::new(PaymentReconciliation::new(
            engine.clone(),
            Box::new(InMemoryLedgerStore::new()),
            Box::new(processor.clone()),
            ReconciliationConfig {
                status_check_delay: None,
                ..ReconciliationConfig::default()
            },
        ));
        let driver = SchedulerDriver::new(engine, config).with_reconciliation(bridge);

        let charged = driver.run_once().await.unwrap();
        assert_eq!(charged.tours_advanced, 0);
        assert_eq!(processor.charge_requests().await.len(), 3);

        let settled = driver.run_once().await.unwrap();
        assert_eq!(settled.tours_advanced, 1);
        assert_eq!(store.get(TourId(1)).await.unwrap().unwrap().current_round, 2);
    }
}
