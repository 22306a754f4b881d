use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use agency_common::{CommonResult, PolicyName, RatePolicy};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::clock::Clock;

/// How often idle identifiers are swept out of each limiter.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Per-identifier counter for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    /// Epoch milliseconds at which the window ends.
    pub reset_time_ms: u64,
}

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_time_ms: u64,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_time_ms.saturating_sub(now_ms).div_ceil(1000)
    }
}

struct Inner {
    name: PolicyName,
    policy: RatePolicy,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

/// In-memory fixed-window rate limiter keyed by client identifier.
///
/// State is local to this process. Behind several replicas each one enforces
/// its own limit, so the effective limit is multiplied by the replica count.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    pub fn with_clock(
        name: PolicyName,
        policy: RatePolicy,
        clock: Arc<dyn Clock>,
    ) -> CommonResult<Self> {
        // Fields are public, so re-validate whatever the caller built.
        let policy = RatePolicy::new(policy.max_requests, policy.window_ms)?;

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                policy,
                clock,
                entries: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn name(&self) -> PolicyName {
        self.inner.name
    }

    pub fn policy(&self) -> RatePolicy {
        self.inner.policy
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RateLimitEntry>> {
        // The map holds plain counters, so a panic elsewhere cannot leave it torn.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a request from `identifier` against the current window.
    ///
    /// The lookup and update happen under a single lock, so concurrent checks
    /// for the same identifier can neither lose an increment nor open two
    /// windows. Rejected requests leave the entry untouched.
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        let now = self.now_ms();
        let limit = self.inner.policy.max_requests;
        let mut entries = self.entries();

        if let Some(entry) = entries.get_mut(identifier) {
            if now <= entry.reset_time_ms {
                if entry.count < limit {
                    entry.count += 1;
                    return RateLimitDecision {
                        allowed: true,
                        limit,
                        remaining: limit - entry.count,
                        reset_time_ms: entry.reset_time_ms,
                    };
                }
                return RateLimitDecision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    reset_time_ms: entry.reset_time_ms,
                };
            }
        }

        // First request, or the previous window has expired.
        let reset_time_ms = now.saturating_add(self.inner.policy.window_ms);
        entries.insert(
            identifier.to_string(),
            RateLimitEntry {
                count: 1,
                reset_time_ms,
            },
        );

        RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit - 1,
            reset_time_ms,
        }
    }

    /// Forget `identifier` entirely. No-op if it is not tracked.
    pub fn reset(&self, identifier: &str) -> bool {
        self.entries().remove(identifier).is_some()
    }

    /// Drop every entry whose window has already ended. Returns how many
    /// entries were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.now_ms();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.reset_time_ms);
        before - entries.len()
    }

    /// Number of identifiers currently held in memory, expired or not.
    pub fn tracked(&self) -> usize {
        self.entries().len()
    }

    #[cfg(test)]
    fn entry(&self, identifier: &str) -> Option<RateLimitEntry> {
        self.entries().get(identifier).copied()
    }

    /// Spawn the periodic sweep for this limiter.
    ///
    /// The task holds only a weak reference: it stops by itself once every
    /// clone of the limiter is gone, and [`CleanupTask::shutdown`] (or
    /// dropping the returned handle) stops it earlier.
    pub fn spawn_cleanup(&self, every: Duration) -> CleanupTask {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let policy = self.inner.name;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let limiter = RateLimiter { inner };
                let removed = limiter.cleanup();
                if removed > 0 {
                    tracing::debug!(
                        policy = %policy,
                        removed,
                        remaining = limiter.tracked(),
                        "rate limiter cleanup"
                    );
                }
            }

            tracing::debug!(policy = %policy, "rate limiter dropped, cleanup task exiting");
        });

        CleanupTask {
            policy,
            handle: Some(handle),
        }
    }
}

/// Owned handle to a limiter's background sweep. Aborts the task on drop.
pub struct CleanupTask {
    policy: PolicyName,
    handle: Option<JoinHandle<()>>,
}

impl CleanupTask {
    pub fn policy(&self) -> PolicyName {
        self.policy
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the sweep and wait for the task to wind down.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            // An aborted task resolves to a cancellation error; nothing to report.
            let _ = handle.await;
        }
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// The four limiters shared by the whole process, one per endpoint class.
#[derive(Clone)]
pub struct RateLimiters {
    pub contact: RateLimiter,
    pub upload: RateLimiter,
    pub api: RateLimiter,
    pub auth: RateLimiter,
}

impl RateLimiters {
    /// Build every limiter from `policy_for`, sharing one clock.
    pub fn build(
        policy_for: impl Fn(PolicyName) -> RatePolicy,
        clock: Arc<dyn Clock>,
    ) -> CommonResult<Self> {
        let make =
            |name: PolicyName| RateLimiter::with_clock(name, policy_for(name), clock.clone());

        Ok(Self {
            contact: make(PolicyName::Contact)?,
            upload: make(PolicyName::Upload)?,
            api: make(PolicyName::Api)?,
            auth: make(PolicyName::Auth)?,
        })
    }

    pub fn get(&self, name: PolicyName) -> &RateLimiter {
        match name {
            PolicyName::Contact => &self.contact,
            PolicyName::Upload => &self.upload,
            PolicyName::Api => &self.api,
            PolicyName::Auth => &self.auth,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateLimiter> {
        PolicyName::ALL.into_iter().map(|name| self.get(name))
    }

    pub fn spawn_cleanup(&self, every: Duration) -> Vec<CleanupTask> {
        self.iter().map(|limiter| limiter.spawn_cleanup(every)).collect()
    }
}
