//! Per-address backoff for failed node registrations (spec §6: on
//! `AuthFailed`, "reply with `error`, close the connection, rate-limit the
//! peer's address").

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::net::IpAddr;

pub struct RegistrationLimiter {
    failures: DashMap<IpAddr, (u32, DateTime<Utc>)>,
    max_failures: u32,
    window: ChronoDuration,
}

impl RegistrationLimiter {
    pub fn new(max_failures: u32, window_seconds: i64) -> Self {
        Self {
            failures: DashMap::new(),
            max_failures,
            window: ChronoDuration::seconds(window_seconds),
        }
    }

    /// `false` once `addr` has accumulated `max_failures` within the
    /// window; the count resets once the window has elapsed since the
    /// last failure.
    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        match self.failures.get(&addr) {
            Some(entry) => {
                let (count, last_failure) = *entry;
                Utc::now().signed_duration_since(last_failure) > self.window || count < self.max_failures
            }
            None => true,
        }
    }

    pub fn record_failure(&self, addr: IpAddr) {
        let now = Utc::now();
        let mut entry = self.failures.entry(addr).or_insert((0, now));
        if now.signed_duration_since(entry.1) > self.window {
            *entry = (0, now);
        }
        entry.0 += 1;
        entry.1 = now;
    }

    pub fn record_success(&self, addr: IpAddr) {
        self.failures.remove(&addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_until_threshold_then_blocks() {
        let limiter = RegistrationLimiter::new(3, 60);
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..3 {
            assert!(limiter.is_allowed(addr));
            limiter.record_failure(addr);
        }
        assert!(!limiter.is_allowed(addr));
    }

    #[test]
    fn success_clears_the_failure_count() {
        let limiter = RegistrationLimiter::new(2, 60);
        let addr: IpAddr = "10.0.0.2".parse().unwrap();
        limiter.record_failure(addr);
        limiter.record_success(addr);
        assert!(limiter.is_allowed(addr));
        limiter.record_failure(addr);
        assert!(limiter.is_allowed(addr));
    }
}
