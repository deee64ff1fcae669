//! # Throttler
//!
//! Sliding-window rate limiting. A window remembers the timestamps of the
//! last `rate` calls; a call is throttled when the oldest of them is still
//! within `period`. Every call is recorded, throttled or not, so a client
//! that keeps hammering stays throttled.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::{ConfigError, RateLimit};

#[derive(Debug)]
struct Window {
    /// `None` is a slot that has never been used.
    times: VecDeque<Option<Instant>>,
}

impl Window {
    fn new(rate: usize) -> Self {
        Self {
            times: VecDeque::from(vec![None; rate]),
        }
    }

    fn hit(&mut self, now: Instant, period: Duration) -> bool {
        let throttled = matches!(
            self.times.front(),
            Some(Some(oldest)) if now.saturating_duration_since(*oldest) <= period
        );
        self.times.pop_front();
        self.times.push_back(Some(now));
        throttled
    }
}

/// One global window plus one window per client address.
#[derive(Debug)]
pub struct Throttler {
    limit: RateLimit,
    global: Mutex<Window>,
    per_client: DashMap<SocketAddr, Window>,
}

impl Throttler {
    pub fn new(limit: RateLimit) -> Result<Self, ConfigError> {
        if limit.rate == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if limit.period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(Self {
            limit,
            global: Mutex::new(Window::new(limit.rate)),
            per_client: DashMap::new(),
        })
    }

    /// Records a call and reports whether it exceeded the limit. `None`
    /// counts against the global window.
    pub fn is_throttling(&self, client: Option<SocketAddr>) -> bool {
        self.is_throttling_at(client, Instant::now())
    }

    pub fn is_throttling_at(&self, client: Option<SocketAddr>, now: Instant) -> bool {
        match client {
            Some(addr) => self
                .per_client
                .entry(addr)
                .or_insert_with(|| Window::new(self.limit.rate))
                .hit(now, self.limit.period),
            None => {
                let mut global = match self.global.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                global.hit(now, self.limit.period)
            }
        }
    }

    /// Drops a client's window once its connection is gone.
    pub fn forget(&self, client: &SocketAddr) {
        self.per_client.remove(client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn throttler(rate: usize, secs: u64) -> Throttler {
        Throttler::new(RateLimit::new(rate, Duration::from_secs(secs))).unwrap()
    }

    #[test]
    fn allows_up_to_rate_within_period() {
        let t = throttler(3, 10);
        let now = Instant::now();
        assert!(!t.is_throttling_at(None, now));
        assert!(!t.is_throttling_at(None, now));
        assert!(!t.is_throttling_at(None, now));
        assert!(t.is_throttling_at(None, now));
    }

    #[test]
    fn window_slides_after_period() {
        let t = throttler(2, 10);
        let start = Instant::now();
        assert!(!t.is_throttling_at(None, start));
        assert!(!t.is_throttling_at(None, start + Duration::from_secs(5)));
        assert!(t.is_throttling_at(None, start + Duration::from_secs(9)));
        // The throttled call at 9s was recorded too; the 5s call is now oldest.
        assert!(t.is_throttling_at(None, start + Duration::from_secs(12)));
        assert!(!t.is_throttling_at(None, start + Duration::from_secs(20)));
    }

    #[test]
    fn clients_are_limited_independently() {
        let t = throttler(1, 30);
        let now = Instant::now();
        assert!(!t.is_throttling_at(Some(addr(1)), now));
        assert!(t.is_throttling_at(Some(addr(1)), now));
        assert!(!t.is_throttling_at(Some(addr(2)), now));
        assert!(!t.is_throttling_at(None, now));

        t.forget(&addr(1));
        assert!(!t.is_throttling_at(Some(addr(1)), now));
        assert!(t.is_throttling_at(Some(addr(2)), now));
    }

    #[test]
    fn rejects_degenerate_limits() {
        assert!(matches!(
            Throttler::new(RateLimit::new(0, Duration::from_secs(1))),
            Err(ConfigError::ZeroRate)
        ));
        assert!(matches!(
            Throttler::new(RateLimit::new(1, Duration::ZERO)),
            Err(ConfigError::ZeroPeriod)
        ));
    }
}
