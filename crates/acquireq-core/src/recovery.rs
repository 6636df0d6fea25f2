//! Startup recovery of offer timers.
//!
//! Timers live only in memory; deadlines are persisted. On start every
//! outstanding offer either gets a timer for the time it has left or, when
//! its deadline passed while nothing was running, is expired on the spot.

use serde::Serialize;

use crate::{engine::LeaseEngine, Result};

/// What [`LeaseEngine::recover`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Offers still open, timers armed for their remaining time
    pub rearmed: usize,
    /// Offers whose deadline had already passed
    pub expired: usize,
}

impl LeaseEngine {
    /// Rebuild timer state from persisted deadlines.
    ///
    /// Call once at process start, before serving operations.
    ///
    /// # Errors
    ///
    /// Returns a store error if offers cannot be listed or updated.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let now = self.now();
        let mut report = RecoveryReport::default();

        for offer in self.store().pending_offers().await? {
            if offer.deadline > now && self.rearm_offer(&offer.resource_id, offer.deadline).await? {
                tracing::debug!(
                    resource = %offer.resource_id,
                    deadline = %offer.deadline,
                    "re-armed offer timer"
                );
                report.rearmed += 1;
            }
        }
        report.expired = self.sweep_expired().await?;

        tracing::info!(
            rearmed = report.rearmed,
            expired = report.expired,
            "recovered offer timers"
        );
        Ok(report)
    }

    /// Expire every offer whose deadline is at or before now.
    ///
    /// Returns how many offers were expired. Offers that changed since they
    /// were listed are skipped.
    ///
    /// # Errors
    ///
    /// Returns a store error if offers cannot be listed or updated.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let overdue = self.store().offers_past_deadline(self.now()).await?;
        let mut expired = 0;
        for offer in overdue {
            if self.expire_offer(&offer.resource_id, offer.deadline).await? {
                expired += 1;
            }
        }
        Ok(expired)
    }
}
