//! Per-application policy enforcement (spec.md 4.4, 5): consistency tier
//! gating and a request-rate limit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::{ApplicationId, ApplicationPolicy, Consistency};

/// A single atomic counter with a timestamped reset window (spec.md 5:
/// "single atomic integer with a timestamped reset"), one per application.
pub struct RateLimiter {
    limit_per_sec: u32,
    count: AtomicU64,
    window_started: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(limit_per_sec: u32) -> Self {
        Self {
            limit_per_sec,
            count: AtomicU64::new(0),
            window_started: Mutex::new(Instant::now()),
        }
    }

    /// Returns `Ok(())` or `Error::RateLimited`. Resets the window and the
    /// count together whenever a full second has elapsed since the window
    /// began (spec.md 5).
    pub fn check(&self) -> Result<()> {
        let now = Instant::now();
        {
            let mut window_started = self.window_started.lock().unwrap();
            if now.duration_since(*window_started) >= Duration::from_secs(1) {
                *window_started = now;
                self.count.store(0, Ordering::SeqCst);
            }
        }
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.limit_per_sec as u64 {
            return Err(Error::RateLimited(format!(
                "rate limit of {} requests/sec exceeded",
                self.limit_per_sec
            )));
        }
        Ok(())
    }
}

/// Holds per-application tier rules and the matching rate limiter, sourced
/// from the `Application` record (spec.md 4.4).
pub struct PolicyEngine {
    entries: RwLock<HashMap<ApplicationId, Arc<Entry>>>,
    default_rate_limit_per_sec: u32,
}

struct Entry {
    policy: ApplicationPolicy,
    limiter: RateLimiter,
}

impl PolicyEngine {
    pub fn new(default_rate_limit_per_sec: u32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_rate_limit_per_sec,
        }
    }

    pub async fn refresh(&self, app_id: &ApplicationId, policy: ApplicationPolicy) {
        let limit = if policy.requests_per_second > 0 {
            policy.requests_per_second
        } else {
            self.default_rate_limit_per_sec
        };
        let entry = Arc::new(Entry {
            policy,
            limiter: RateLimiter::new(limit),
        });
        self.entries.write().await.insert(app_id.clone(), entry);
    }

    /// Step 1 of `execute()` (spec.md 4.4): reject `strong` when the tier
    /// disallows it, then enforce the per-second rate limit.
    pub async fn enforce(&self, app_id: &ApplicationId, consistency: Consistency) -> Result<bool> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(app_id).cloned()
        };
        let entry = match entry {
            Some(entry) => entry,
            None => {
                // No policy on file yet: default-permissive with the
                // process-wide rate limit, mirroring Application's Default.
                let limiter = RateLimiter::new(self.default_rate_limit_per_sec);
                limiter.check()?;
                return Ok(true);
            }
        };
        if consistency == Consistency::Strong && !entry.policy.allow_strong_consistency {
            return Err(Error::PolicyDenied(
                "strong consistency is not permitted for this application".into(),
            ));
        }
        entry.limiter.check()?;
        Ok(entry.policy.allow_strong_consistency)
    }
}
