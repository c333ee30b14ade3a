use std::time::Duration;

use chrono::Duration as ChronoDuration;
use rand::Rng;
use serde_json::json;
use storefront_storage::DomainError;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use storefront_core::DomainStatus;

use crate::domains::DomainService;
use crate::router::Clock;
use crate::tap::{StageEvent, StageKind, StageMetadata, TapHub};

const BATCH_LIMIT: i64 = 100;

/// Outcome of a DNS check for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    Failed(String),
}

/// Checks whether a domain points at the storefront.
pub trait DomainVerifier: Send + Sync {
    fn verify(&self, domain: &str) -> VerificationOutcome;
}

/// Stand-in for real DNS lookups: succeeds with a fixed probability.
#[derive(Debug, Clone)]
pub struct SimulatedVerifier {
    success_rate: f64,
}

impl SimulatedVerifier {
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
        }
    }
}

impl DomainVerifier for SimulatedVerifier {
    fn verify(&self, domain: &str) -> VerificationOutcome {
        if rand::thread_rng().gen_bool(self.success_rate) {
            VerificationOutcome::Verified
        } else {
            VerificationOutcome::Failed(format!(
                "DNS records for {domain} do not point at the storefront yet"
            ))
        }
    }
}

/// Totals for one verification sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub verified: usize,
    pub failed: usize,
}

/// Background worker that re-checks pending domains.
#[derive(Clone)]
pub struct VerificationWorker {
    domains: DomainService,
    tap: TapHub,
    clock: Clock,
    interval: Duration,
}

impl VerificationWorker {
    pub fn new(domains: DomainService, tap: TapHub, clock: Clock, interval: Duration) -> Self {
        Self {
            domains,
            tap,
            clock,
            interval,
        }
    }

    /// Runs the worker loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(stage = "verify", error = %err, "domain verification sweep failed");
            }
        }
    }

    /// Checks every pending domain not checked within the last interval.
    pub async fn run_once(&self) -> Result<SweepSummary, DomainError> {
        let now = (self.clock)();
        let threshold = now
            - ChronoDuration::from_std(self.interval).unwrap_or_else(|_| ChronoDuration::minutes(5));
        let due = self
            .domains
            .repository()
            .list_due_for_check(threshold, BATCH_LIMIT)
            .await?;

        let mut summary = SweepSummary::default();
        for record in &due {
            let updated = self.domains.check(record).await?;
            summary.checked += 1;
            match updated.status {
                DomainStatus::Verified => summary.verified += 1,
                _ => summary.failed += 1,
            }
        }

        info!(
            stage = "verify",
            checked = summary.checked,
            verified = summary.verified,
            failed = summary.failed,
            threshold = %threshold.to_rfc3339(),
            "domain verification sweep completed"
        );
        self.tap.publish(StageEvent::new(
            now,
            StageKind::Verify,
            StageMetadata {
                message: Some("verify.sweep".to_string()),
                ..StageMetadata::default()
            },
            json!({
                "checked": summary.checked,
                "verified": summary.verified,
                "failed": summary.failed,
            }),
        ));

        Ok(summary)
    }
}
