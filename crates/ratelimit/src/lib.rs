//! Sliding-window rate limiter (spec §4.2, §6) covering per-IP connect
//! attempts and per-MUD message/tell/channel traffic.
//!
//! Grounded in the teacher's request-path throttle: a lock-free map of
//! windows keyed by scope, checked and advanced on every call, swept
//! periodically instead of via a background task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{mapref::entry::Entry, DashMap};

const CLEANUP_EVERY_CHECKS: u64 = 512;

/// What is being throttled and who the bucket belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// New connection attempts, keyed by remote IP.
    Connect(String),
    /// Routed messages (tell/emote/channel/who/finger/locate), keyed by MUD.
    Message(String),
    /// Tells specifically, keyed by MUD (spec carves tells out with their
    /// own budget so a noisy tell sender can't starve other traffic).
    Tell(String),
    /// Channel posts, keyed by MUD.
    Channel(String),
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
}

impl RateLimit {
    pub fn per_minute(max_requests: usize) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub connect: RateLimit,
    pub message: RateLimit,
    pub tell: RateLimit,
    pub channel: RateLimit,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            connect: RateLimit::per_minute(10),
            message: RateLimit::per_minute(100),
            tell: RateLimit::per_minute(30),
            channel: RateLimit::per_minute(50),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied { retry_after: Duration },
}

/// Lock-free sliding-window limiter, cheap to clone and share across
/// connection tasks.
#[derive(Clone)]
pub struct RateLimiter {
    limits: Limits,
    buckets: Arc<DashMap<Scope, WindowState>>,
    checks_seen: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            buckets: Arc::new(DashMap::new()),
            checks_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    fn limit_for(&self, scope: &Scope) -> RateLimit {
        match scope {
            Scope::Connect(_) => self.limits.connect,
            Scope::Message(_) => self.limits.message,
            Scope::Tell(_) => self.limits.tell,
            Scope::Channel(_) => self.limits.channel,
        }
    }

    pub fn check(&self, scope: Scope) -> Decision {
        self.check_at(scope, Instant::now())
    }

    fn check_at(&self, scope: Scope, now: Instant) -> Decision {
        let limit = self.limit_for(&scope);
        if limit.max_requests == 0 {
            return Decision::Denied {
                retry_after: limit.window.max(Duration::from_secs(1)),
            };
        }

        let decision = match self.buckets.entry(scope) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.duration_since(state.started_at);
                if elapsed >= limit.window {
                    state.started_at = now;
                    state.count = 1;
                    Decision::Allowed
                } else if state.count < limit.max_requests {
                    state.count += 1;
                    Decision::Allowed
                } else {
                    Decision::Denied {
                        retry_after: limit.window.saturating_sub(elapsed),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                Decision::Allowed
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.checks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % CLEANUP_EVERY_CHECKS != 0 {
            return;
        }
        let stale_after = self.max_window().saturating_mul(3);
        self.buckets
            .retain(|_, state| now.duration_since(state.started_at) <= stale_after);
    }

    fn max_window(&self) -> Duration {
        [
            self.limits.connect.window,
            self.limits.message.window,
            self.limits.tell.window,
            self.limits.channel.window,
        ]
        .into_iter()
        .max()
        .unwrap_or(Duration::from_secs(60))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_denies() {
        let limiter = RateLimiter::new(Limits {
            connect: RateLimit::per_minute(2),
            ..Limits::default()
        });
        let now = Instant::now();
        let scope = || Scope::Connect("1.2.3.4".to_string());

        assert_eq!(limiter.check_at(scope(), now), Decision::Allowed);
        assert_eq!(limiter.check_at(scope(), now), Decision::Allowed);
        assert!(matches!(
            limiter.check_at(scope(), now),
            Decision::Denied { .. }
        ));
    }

    #[test]
    fn window_resets_after_elapsed_time() {
        let limiter = RateLimiter::new(Limits {
            tell: RateLimit::per_minute(1),
            ..Limits::default()
        });
        let now = Instant::now();
        let scope = || Scope::Tell("MudA".to_string());

        assert_eq!(limiter.check_at(scope(), now), Decision::Allowed);
        assert!(matches!(
            limiter.check_at(scope(), now),
            Decision::Denied { .. }
        ));
        assert_eq!(
            limiter.check_at(scope(), now + Duration::from_secs(61)),
            Decision::Allowed
        );
    }

    #[test]
    fn scopes_are_independent_per_mud() {
        let limiter = RateLimiter::new(Limits {
            message: RateLimit::per_minute(1),
            ..Limits::default()
        });
        let now = Instant::now();

        assert_eq!(
            limiter.check_at(Scope::Message("MudA".to_string()), now),
            Decision::Allowed
        );
        assert_eq!(
            limiter.check_at(Scope::Message("MudB".to_string()), now),
            Decision::Allowed
        );
    }

    #[test]
    fn zero_max_requests_always_denies() {
        let limiter = RateLimiter::new(Limits {
            channel: RateLimit {
                max_requests: 0,
                window: Duration::from_secs(60),
            },
            ..Limits::default()
        });
        assert!(matches!(
            limiter.check(Scope::Channel("MudA".to_string())),
            Decision::Denied { .. }
        ));
    }
}
