// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of TrustRoot Updater.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Update-freshness gate
//!
//! The updater is triggered far more often than it should actually do
//! work (typically hourly from cron, acting once a day). This module is
//! the pure decision: given the persisted status and the clock, does
//! this invocation proceed or exit early? It has no side effects; the
//! orchestrator honors `Skip` by terminating without touching the
//! status file or the lock.

use crate::status::RunStatus;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed(&'static str),
    Skip,
}

impl Decision {
    pub fn is_proceed(self) -> bool {
        matches!(self, Self::Proceed(_))
    }
}

/// Decide whether this run should do any work.
///
/// `scheduled_invocation` is true when the periodic scheduler (not an
/// interactive user) started us; only then does the scheduled-hour rule
/// apply. `local_hour` is the current hour in local time, matching how
/// the scheduled hour was assigned.
pub fn should_run(
    status: &RunStatus,
    now: DateTime<Utc>,
    local_hour: u32,
    scheduled_invocation: bool,
    forced: bool,
) -> Decision {
    if forced {
        return Decision::Proceed("forced");
    }

    let Some(checked_at) = status.checked_at else {
        return Decision::Proceed("no previous run recorded");
    };

    if !status.success {
        return Decision::Proceed("previous run failed");
    }

    let elapsed = now.signed_duration_since(checked_at);
    if elapsed >= Duration::hours(24) {
        return Decision::Proceed("last check older than 24h");
    }
    if elapsed < Duration::zero() {
        // Clock moved backwards; better to check than to skip forever
        return Decision::Proceed("clock skew detected");
    }

    if scheduled_invocation && Some(local_hour) == status.scheduled_hour {
        return Decision::Proceed("scheduled check hour");
    }

    Decision::Skip
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_status(now: DateTime<Utc>, hours_ago: i64) -> RunStatus {
        RunStatus {
            checked_at: Some(now - Duration::hours(hours_ago)),
            success: true,
            scheduled_hour: Some(3),
            ..RunStatus::default()
        }
    }

    #[test]
    fn test_forced_always_proceeds() {
        let now = Utc::now();
        let status = fresh_status(now, 1);
        assert!(should_run(&status, now, 12, false, true).is_proceed());
    }

    #[test]
    fn test_no_prior_run_proceeds() {
        let status = RunStatus::default();
        assert!(should_run(&status, Utc::now(), 12, false, false).is_proceed());
    }

    #[test]
    fn test_failed_prior_run_retries() {
        let now = Utc::now();
        let status = RunStatus {
            success: false,
            ..fresh_status(now, 1)
        };
        assert!(should_run(&status, now, 12, true, false).is_proceed());
    }

    #[test]
    fn test_recent_success_skips() {
        let now = Utc::now();
        let status = fresh_status(now, 1);
        assert_eq!(should_run(&status, now, 12, false, false), Decision::Skip);
    }

    #[test]
    fn test_stale_success_proceeds() {
        let now = Utc::now();
        let status = fresh_status(now, 25);
        assert!(should_run(&status, now, 12, false, false).is_proceed());
    }

    #[test]
    fn test_exactly_24h_proceeds() {
        let now = Utc::now();
        let status = fresh_status(now, 24);
        assert!(should_run(&status, now, 12, false, false).is_proceed());
    }

    #[test]
    fn test_clock_skew_proceeds() {
        let now = Utc::now();
        let status = fresh_status(now, -2);
        assert!(should_run(&status, now, 12, false, false).is_proceed());
    }

    #[test]
    fn test_scheduled_hour_forces_daily_check() {
        let now = Utc::now();
        // 23h old success would otherwise skip
        let status = fresh_status(now, 23);
        assert_eq!(should_run(&status, now, 12, true, false), Decision::Skip);
        assert!(should_run(&status, now, 3, true, false).is_proceed());
    }

    #[test]
    fn test_scheduled_hour_ignored_for_manual_runs() {
        let now = Utc::now();
        let status = fresh_status(now, 23);
        assert_eq!(should_run(&status, now, 3, false, false), Decision::Skip);
    }
}
