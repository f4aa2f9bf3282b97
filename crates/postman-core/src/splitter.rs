//! Job splitter - partitions a campaign's requested rate across workers

use postman_common::config::RateConfig;
use postman_common::types::ChannelType;
use thiserror::Error;

/// Splitter failure
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SplitError {
    #[error("Requested rate must be positive")]
    ZeroRate,

    #[error("Computed per-job rate {rate} exceeds the cap of {max}")]
    RateAboveCap { rate: u32, max: u32 },
}

/// Compute the per-job rate plan for a campaign
///
/// Email always gets exactly one job at the configured default rate: the
/// email channel is shared across campaigns, so a single large campaign
/// must not hog it. Every other channel splits the requested rate into
/// `ceil(rate / max_rate_per_job)` jobs: each job gets the ceiling
/// average and the last job absorbs the remainder, so the rates sum to
/// the requested rate exactly.
///
/// The remainder is checked against `1..=max_rate_per_job` as an explicit
/// postcondition rather than assumed correct.
pub fn plan_jobs(
    channel: ChannelType,
    requested_rate: u32,
    limits: &RateConfig,
) -> Result<Vec<u32>, SplitError> {
    if channel == ChannelType::Email {
        return Ok(vec![limits.default_email_rate]);
    }

    if requested_rate == 0 {
        return Err(SplitError::ZeroRate);
    }

    let max = limits.max_rate_per_job;
    let workers_needed = requested_rate.div_ceil(max);
    let average_rate = requested_rate.div_ceil(workers_needed);
    let last_rate = requested_rate - average_rate * (workers_needed - 1);

    if average_rate > max {
        return Err(SplitError::RateAboveCap {
            rate: average_rate,
            max,
        });
    }
    if last_rate == 0 || last_rate > max {
        return Err(SplitError::RateAboveCap {
            rate: last_rate,
            max,
        });
    }

    let mut rates = vec![average_rate; (workers_needed - 1) as usize];
    rates.push(last_rate);
    Ok(rates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn limits(max_rate_per_job: u32) -> RateConfig {
        RateConfig {
            max_rate_per_job,
            default_email_rate: 35,
        }
    }

    #[test]
    fn test_split_example() {
        let rates = plan_jobs(ChannelType::Sms, 350, &limits(150)).unwrap();
        assert_eq!(rates, vec![117, 117, 116]);
        assert_eq!(rates.iter().sum::<u32>(), 350);
        assert!(rates.iter().all(|&r| r <= 150));
    }

    #[test]
    fn test_split_single_worker() {
        assert_eq!(plan_jobs(ChannelType::Sms, 100, &limits(150)).unwrap(), vec![100]);
        assert_eq!(plan_jobs(ChannelType::Sms, 150, &limits(150)).unwrap(), vec![150]);
    }

    #[test]
    fn test_split_exact_multiple() {
        let rates = plan_jobs(ChannelType::Telegram, 300, &limits(150)).unwrap();
        assert_eq!(rates, vec![150, 150]);
    }

    #[test]
    fn test_split_one_over_cap() {
        let rates = plan_jobs(ChannelType::Sms, 151, &limits(150)).unwrap();
        assert_eq!(rates.len(), 2);
        assert_eq!(rates.iter().sum::<u32>(), 151);
        assert!(rates.iter().all(|&r| r >= 1 && r <= 150));
    }

    #[test]
    fn test_email_always_single_job() {
        for requested in [1, 35, 500, 10_000] {
            let rates = plan_jobs(ChannelType::Email, requested, &limits(150)).unwrap();
            assert_eq!(rates, vec![35]);
        }
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert_eq!(
            plan_jobs(ChannelType::Govsg, 0, &limits(150)),
            Err(SplitError::ZeroRate)
        );
        // Email ignores the requested rate entirely
        assert!(plan_jobs(ChannelType::Email, 0, &limits(150)).is_ok());
    }

    #[test]
    fn test_invariants_hold_over_range() {
        // Sum, bounds, and worker count hold for every rate up to 4x the cap
        let l = limits(150);
        for rate in 1..=600u32 {
            let rates = plan_jobs(ChannelType::Sms, rate, &l).unwrap();
            assert_eq!(rates.iter().sum::<u32>(), rate, "sum mismatch at {}", rate);
            assert_eq!(rates.len() as u32, rate.div_ceil(150), "count at {}", rate);
            assert!(
                rates.iter().all(|&r| r >= 1 && r <= 150),
                "bounds at {}",
                rate
            );
        }
    }

    #[test]
    fn test_invariants_small_cap() {
        let l = limits(1);
        let rates = plan_jobs(ChannelType::Sms, 4, &l).unwrap();
        assert_eq!(rates, vec![1, 1, 1, 1]);
    }
}
