//! Per job type retry ceilings, backoff and retention.

use std::time::Duration;

use crate::domain::types::JobType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^(n-1)` after attempt `n`.
    Exponential(Duration),
    Fixed(Duration),
}

impl Backoff {
    /// Delay before the next attempt, given how many attempts have already been made (>= 1).
    pub fn delay_after(self, attempts_made: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential(base) => {
                let exponent = attempts_made.saturating_sub(1).min(20);
                base.saturating_mul(1u32 << exponent)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPolicy {
    pub attempts: u32,
    pub backoff: Backoff,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl JobPolicy {
    pub const fn for_type(job_type: JobType) -> Self {
        match job_type {
            JobType::Order => JobPolicy {
                attempts: 3,
                backoff: Backoff::Exponential(Duration::from_secs(2)),
                keep_completed: 100,
                keep_failed: 50,
            },
            JobType::Email => JobPolicy {
                attempts: 5,
                backoff: Backoff::Exponential(Duration::from_secs(1)),
                keep_completed: 50,
                keep_failed: 25,
            },
            JobType::Payment => JobPolicy {
                attempts: 3,
                backoff: Backoff::Fixed(Duration::from_secs(5)),
                keep_completed: 100,
                keep_failed: 50,
            },
        }
    }
}

pub const ORDER_PRIORITY: u32 = 1;
pub const PAYMENT_PRIORITY: u32 = 1;
pub const URGENT_EMAIL_PRIORITY: u32 = 2;
pub const EMAIL_PRIORITY: u32 = 3;

/// Priority used when the producer does not pick one. Lower runs first.
pub fn default_priority(job_type: JobType) -> u32 {
    match job_type {
        JobType::Order => ORDER_PRIORITY,
        JobType::Payment => PAYMENT_PRIORITY,
        JobType::Email => EMAIL_PRIORITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_from_base() {
        let backoff = JobPolicy::for_type(JobType::Order).backoff;
        assert_eq!(backoff.delay_after(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_after(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_after(3), Duration::from_secs(8));

        let email = JobPolicy::for_type(JobType::Email).backoff;
        assert_eq!(email.delay_after(4), Duration::from_secs(8));
    }

    #[test]
    fn payment_backoff_is_fixed() {
        let backoff = JobPolicy::for_type(JobType::Payment).backoff;
        assert_eq!(backoff.delay_after(1), Duration::from_secs(5));
        assert_eq!(backoff.delay_after(2), Duration::from_secs(5));
    }

    #[test]
    fn ceilings_and_retention_differ_per_type() {
        let email = JobPolicy::for_type(JobType::Email);
        assert_eq!((email.attempts, email.keep_completed, email.keep_failed), (5, 50, 25));
        let order = JobPolicy::for_type(JobType::Order);
        assert_eq!((order.attempts, order.keep_completed, order.keep_failed), (3, 100, 50));
    }
}
