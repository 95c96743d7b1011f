use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

/// How the recurring pass decides that a due round may close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AdvancePolicy {
    /// Rounds advance as soon as their due date has passed.
    #[default]
    TimeDriven,
    /// Due rounds are charged first and advance once every charge succeeded.
    SettlementGated,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scan_interval: Duration,
    pub policy: AdvancePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60 * 60),
            policy: AdvancePolicy::TimeDriven,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Share of each round's pot kept by the platform.
    pub platform_fee_rate: Decimal,
    /// Delay before the automatic status check that follows a charge run.
    /// `None` leaves polling to the scheduler.
    pub status_check_delay: Option<Duration>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            platform_fee_rate: dec!(0.03),
            status_check_delay: Some(Duration::from_secs(5)),
        }
    }
}
