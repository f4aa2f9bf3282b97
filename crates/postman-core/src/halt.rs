//! Halt circuit breaker
//!
//! A campaign is halted when its delivery failures exceed both an
//! absolute count and a percentage of attempted sends at the same time.
//! This is a business-level breaker: jobs are stopped, nothing crashes.

use postman_common::config::HaltConfig;

/// Halt thresholds
#[derive(Debug, Clone, Copy)]
pub struct HaltPolicy {
    pub min_number: i64,
    pub min_percentage: f64,
}

impl From<&HaltConfig> for HaltPolicy {
    fn from(config: &HaltConfig) -> Self {
        Self {
            min_number: config.min_halt_number,
            min_percentage: config.min_halt_percentage,
        }
    }
}

/// Whether a campaign should be halted
///
/// `errored` is the failed-send count, `attempted` the total number of
/// messages handed to the provider (successes plus failures). Both the
/// absolute and the percentage threshold must be exceeded strictly.
pub fn should_halt(errored: i64, attempted: i64, policy: &HaltPolicy) -> bool {
    if attempted <= 0 {
        return false;
    }
    errored > policy.min_number
        && (errored as f64) / (attempted as f64) > policy.min_percentage
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> HaltPolicy {
        HaltPolicy {
            min_number: 10,
            min_percentage: 0.1,
        }
    }

    #[test]
    fn test_halts_when_both_thresholds_exceeded() {
        // 11 errored out of 11 attempted
        assert!(should_halt(11, 11, &policy()));
    }

    #[test]
    fn test_no_halt_at_percentage_boundary() {
        // 11 errored out of 110 attempted is exactly 10%, not above it
        assert!(!should_halt(11, 110, &policy()));
    }

    #[test]
    fn test_no_halt_below_absolute_threshold() {
        // 100% failure but only 5 errors
        assert!(!should_halt(5, 5, &policy()));
        assert!(!should_halt(10, 10, &policy()));
    }

    #[test]
    fn test_no_halt_with_nothing_attempted() {
        assert!(!should_halt(0, 0, &policy()));
    }

    #[test]
    fn test_halts_just_past_both_thresholds() {
        assert!(should_halt(11, 100, &policy()));
        assert!(!should_halt(10, 100, &policy()));
    }
}
