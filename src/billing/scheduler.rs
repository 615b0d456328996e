use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{info, warn};

use crate::config;

use super::processor::{BillingCycleProcessor, SweepError};

/// One of the three billing sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    Usage,
    Recurring,
    Termination,
}

impl Sweep {
    pub const ALL: [Sweep; 3] = [Sweep::Usage, Sweep::Recurring, Sweep::Termination];

    pub fn as_str(self) -> &'static str {
        match self {
            Sweep::Usage => "usage",
            Sweep::Recurring => "recurring",
            Sweep::Termination => "termination",
        }
    }
}

impl fmt::Display for Sweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sweep {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "usage" => Ok(Sweep::Usage),
            "recurring" => Ok(Sweep::Recurring),
            "termination" => Ok(Sweep::Termination),
            other => Err(format!(
                "unknown sweep `{other}` (expected usage, recurring or termination)"
            )),
        }
    }
}

/// Cadence of each sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub usage_interval: Duration,
    pub recurring_interval: Duration,
    pub termination_interval: Duration,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            usage_interval: Duration::from_secs(*config::BILLING_USAGE_SWEEP_INTERVAL_SECS),
            recurring_interval: Duration::from_secs(
                *config::BILLING_RECURRING_SWEEP_INTERVAL_SECS,
            ),
            termination_interval: Duration::from_secs(
                *config::BILLING_TERMINATION_SWEEP_INTERVAL_SECS,
            ),
        }
    }

    pub fn interval(&self, sweep: Sweep) -> Duration {
        match sweep {
            Sweep::Usage => self.usage_interval,
            Sweep::Recurring => self.recurring_interval,
            Sweep::Termination => self.termination_interval,
        }
    }
}

/// key: billing-scheduler -> one periodic task per sweep
///
/// A sweep finishes before its next tick is taken; different sweeps run
/// concurrently.
pub fn spawn(
    processor: Arc<BillingCycleProcessor>,
    config: SchedulerConfig,
) -> Vec<JoinHandle<()>> {
    Sweep::ALL
        .into_iter()
        .map(|sweep| {
            let processor = processor.clone();
            let period = config.interval(sweep);
            tokio::spawn(async move {
                let mut ticker = time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    process_tick(&processor, sweep, Utc::now()).await;
                }
            })
        })
        .collect()
}

/// key: billing-scheduler -> tick handler
pub async fn process_tick(
    processor: &BillingCycleProcessor,
    sweep: Sweep,
    now: DateTime<Utc>,
) -> Vec<SweepError> {
    info!(%sweep, "billing sweep started");
    let errors = match sweep {
        Sweep::Usage => processor.hourly_usage_billing(now).await,
        Sweep::Recurring => processor.daily_recurring_billing(now).await,
        Sweep::Termination => processor.hourly_product_termination(now).await,
    };
    for err in &errors {
        warn!(
            %sweep,
            scope = %err.scope,
            step = err.step,
            retryable = err.source.is_retryable(),
            error = %err.source,
            "billing sweep item failed"
        );
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweeps_parse_from_cli_names() {
        for sweep in Sweep::ALL {
            assert_eq!(sweep.as_str().parse::<Sweep>(), Ok(sweep));
        }
        assert_eq!(" Usage ".parse::<Sweep>(), Ok(Sweep::Usage));
        assert!("weekly".parse::<Sweep>().is_err());
    }

    #[test]
    fn intervals_map_to_sweeps() {
        let config = SchedulerConfig {
            usage_interval: Duration::from_secs(1),
            recurring_interval: Duration::from_secs(2),
            termination_interval: Duration::from_secs(3),
        };
        assert_eq!(config.interval(Sweep::Recurring), Duration::from_secs(2));
        assert_eq!(config.interval(Sweep::Termination), Duration::from_secs(3));
    }
}
