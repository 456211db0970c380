use std::{
    collections::HashMap,
    sync::Mutex,
};

use chrono::{DateTime, Duration, Utc};

/// Fixed-window counter per actor key. Approximate by design: a burst
/// straddling a window boundary can see up to 2x the limit, in exchange
/// for O(1) memory per key and no background bookkeeping beyond `sweep`.
#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: Mutex<HashMap<String, WindowEntry>>,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateGate {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateGate {
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_seconds().max(1) as u64
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateGate {
        self.check_at(key, limit, window, Utc::now())
    }

    /// Check-and-increment under one lock. The request that would exceed
    /// `limit` is rejected without incrementing further.
    fn check_at(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> RateGate {
        let mut entries = self.entries.lock().expect("rate limit table poisoned");

        match entries.get_mut(key) {
            Some(entry) if entry.reset_at > now => {
                if entry.count >= limit {
                    return RateGate {
                        allowed: false,
                        remaining: 0,
                        reset_at: entry.reset_at,
                    };
                }
                entry.count += 1;
                RateGate {
                    allowed: true,
                    remaining: limit - entry.count,
                    reset_at: entry.reset_at,
                }
            }
            _ => {
                let reset_at = now + window;
                entries.insert(key.to_string(), WindowEntry { count: 1, reset_at });
                RateGate {
                    allowed: true,
                    remaining: limit.saturating_sub(1),
                    reset_at,
                }
            }
        }
    }

    /// Drop entries whose window has elapsed. Driven by a periodic task;
    /// also safe to call from tests.
    pub fn sweep(&self) {
        self.sweep_at(Utc::now());
    }

    fn sweep_at(&self, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().expect("rate limit table poisoned");
        entries.retain(|_, entry| entry.reset_at > now);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
