//! Account status monitor.
//!
//! Suspends trading when the exchange reports an authentication or
//! authorization failure, or when too many other API errors pile up without
//! an intervening success. A suspension lifts on its own after the cooldown
//! or when cleared by an operator.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use spikebot_core::RiskConfig;
use tracing::{error, info, warn};

/// Effective account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended {
        until: DateTime<Utc>,
        /// Status code that caused the suspension.
        cause: u16,
    },
}

/// Coarse classification of an API status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorClass {
    /// Configured to suspend trading immediately.
    Suspension,
    /// Rate limiting, timeouts, and server errors.
    Transient,
    Other,
}

/// Read-only view for the risk summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub status: AccountStatus,
    pub error_count: u32,
    pub error_threshold: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub suspensions: u32,
}

#[derive(Debug, Clone)]
pub struct AccountStatusMonitor {
    suspension_codes: Vec<u16>,
    cooldown: Duration,
    error_threshold: u32,
    recovery_window: Duration,
    status: AccountStatus,
    error_count: u32,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    suspensions: u32,
}

impl AccountStatusMonitor {
    #[must_use]
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            suspension_codes: config.suspension_status_codes.clone(),
            cooldown: config.suspension_cooldown(),
            error_threshold: config.api_error_threshold,
            recovery_window: config.error_recovery_window(),
            status: AccountStatus::Active,
            error_count: 0,
            last_error: None,
            last_error_at: None,
            suspensions: 0,
        }
    }

    #[must_use]
    pub fn classify(&self, status_code: u16) -> ApiErrorClass {
        if self.suspension_codes.contains(&status_code) {
            ApiErrorClass::Suspension
        } else if status_code == 408 || status_code == 429 || status_code >= 500 {
            ApiErrorClass::Transient
        } else {
            ApiErrorClass::Other
        }
    }

    /// Records a terminal API failure and returns whether trading is now suspended.
    ///
    /// Call once per failed operation, after retries are exhausted.
    pub fn on_api_error(&mut self, status_code: u16, message: &str, now: DateTime<Utc>) -> bool {
        self.refresh(now);

        self.error_count += 1;
        self.last_error = Some(format!("{status_code}: {message}"));
        self.last_error_at = Some(now);

        let class = self.classify(status_code);
        if class == ApiErrorClass::Suspension {
            self.suspend(status_code, now);
            error!(
                status_code,
                message,
                until = %(now + self.cooldown),
                "account suspended by exchange response"
            );
        } else if self.error_count >= self.error_threshold {
            self.suspend(status_code, now);
            error!(
                status_code,
                message,
                error_count = self.error_count,
                threshold = self.error_threshold,
                "account suspended after repeated API errors"
            );
        } else {
            warn!(
                status_code,
                message,
                ?class,
                error_count = self.error_count,
                threshold = self.error_threshold,
                "API error recorded"
            );
        }

        !self.is_trading_allowed(now)
    }

    /// Records a successful API call; resets the error count once the
    /// recovery window has passed since the last error.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        if self.error_count == 0 {
            return;
        }
        let recovered = self
            .last_error_at
            .map_or(true, |at| now - at >= self.recovery_window);
        if recovered {
            info!(previous_errors = self.error_count, "API error count reset");
            self.error_count = 0;
        }
    }

    fn suspend(&mut self, cause: u16, now: DateTime<Utc>) {
        self.status = AccountStatus::Suspended {
            until: now + self.cooldown,
            cause,
        };
        self.suspensions += 1;
    }

    /// Lifts an expired suspension.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        if let AccountStatus::Suspended { until, cause } = self.status {
            if now >= until {
                info!(cause, "account suspension cooldown elapsed");
                self.status = AccountStatus::Active;
                self.error_count = 0;
            }
        }
    }

    /// Lifts a suspension immediately.
    pub fn clear(&mut self) {
        if matches!(self.status, AccountStatus::Suspended { .. }) {
            info!("account suspension cleared manually");
        }
        self.status = AccountStatus::Active;
        self.error_count = 0;
    }

    #[must_use]
    pub fn is_trading_allowed(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            AccountStatus::Active => true,
            AccountStatus::Suspended { until, .. } => now >= until,
        }
    }

    /// Status as of `now`, treating an expired suspension as active.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> AccountStatus {
        if self.is_trading_allowed(now) {
            AccountStatus::Active
        } else {
            self.status
        }
    }

    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> AccountSnapshot {
        AccountSnapshot {
            status: self.status(now),
            error_count: self.error_count,
            error_threshold: self.error_threshold,
            last_error: self.last_error.clone(),
            last_error_at: self.last_error_at,
            suspensions: self.suspensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap()
    }

    fn monitor() -> AccountStatusMonitor {
        AccountStatusMonitor::new(&RiskConfig::default())
    }

    // ===== Classification =====

    #[test]
    fn classifies_status_codes() {
        let monitor = monitor();
        assert_eq!(monitor.classify(401), ApiErrorClass::Suspension);
        assert_eq!(monitor.classify(403), ApiErrorClass::Suspension);
        assert_eq!(monitor.classify(429), ApiErrorClass::Transient);
        assert_eq!(monitor.classify(503), ApiErrorClass::Transient);
        assert_eq!(monitor.classify(400), ApiErrorClass::Other);
    }

    // ===== Suspension =====

    #[test]
    fn forbidden_suspends_immediately() {
        let mut monitor = monitor();
        assert!(monitor.is_trading_allowed(t0()));

        assert!(monitor.on_api_error(403, "account restricted", t0()));
        assert!(!monitor.is_trading_allowed(t0()));
        assert_eq!(
            monitor.status(t0()),
            AccountStatus::Suspended {
                until: t0() + Duration::minutes(15),
                cause: 403,
            }
        );
    }

    #[test]
    fn other_errors_suspend_at_threshold() {
        let mut monitor = monitor();
        for i in 0..4 {
            assert!(!monitor.on_api_error(500, "internal", t0() + Duration::seconds(i)));
        }
        assert!(monitor.on_api_error(400, "bad request", t0() + Duration::seconds(5)));
        assert_eq!(monitor.snapshot(t0()).suspensions, 1);
    }

    #[test]
    fn suspension_lifts_after_cooldown() {
        let mut monitor = monitor();
        monitor.on_api_error(401, "unauthorized", t0());

        assert!(!monitor.is_trading_allowed(t0() + Duration::minutes(14)));
        assert!(monitor.is_trading_allowed(t0() + Duration::minutes(15)));

        monitor.refresh(t0() + Duration::minutes(15));
        assert_eq!(monitor.snapshot(t0()).error_count, 0);
        assert_eq!(monitor.status(t0()), AccountStatus::Active);
    }

    #[test]
    fn clear_lifts_suspension() {
        let mut monitor = monitor();
        monitor.on_api_error(403, "forbidden", t0());
        monitor.clear();
        assert!(monitor.is_trading_allowed(t0()));
    }

    // ===== Recovery =====

    #[test]
    fn success_resets_count_after_recovery_window() {
        let mut monitor = monitor();
        monitor.on_api_error(500, "internal", t0());
        monitor.on_api_error(500, "internal", t0());

        monitor.record_success(t0() + Duration::seconds(60));
        assert_eq!(monitor.snapshot(t0()).error_count, 2);

        monitor.record_success(t0() + Duration::seconds(300));
        assert_eq!(monitor.snapshot(t0()).error_count, 0);
    }

    #[test]
    fn snapshot_records_last_error() {
        let mut monitor = monitor();
        monitor.on_api_error(429, "slow down", t0());
        let snapshot = monitor.snapshot(t0());
        assert_eq!(snapshot.last_error.as_deref(), Some("429: slow down"));
        assert_eq!(snapshot.last_error_at, Some(t0()));
        assert_eq!(snapshot.status, AccountStatus::Active);
    }
}
