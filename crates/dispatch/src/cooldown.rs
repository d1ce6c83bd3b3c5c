use std::{collections::HashMap, sync::Mutex, time::Duration};

use {dbhq_common::Snowflake, tokio::time::Instant};

/// Entries beyond this count trigger a sweep of expired ones.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownCheck {
    Accepted,
    /// `notify` is true for the first rejection in a cooldown period only.
    Rejected { remaining: Duration, notify: bool },
}

#[derive(Debug, Clone, Copy)]
struct Usage {
    last_accepted: Instant,
    notified: bool,
}

/// Per user and guild (or DM) command cooldown.
#[derive(Debug)]
pub struct CommandCooldown {
    period: Duration,
    usage: Mutex<HashMap<(Snowflake, Option<Snowflake>), Usage>>,
}

impl CommandCooldown {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            usage: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Check and, if accepted, start a new period for `user` in `guild`
    /// (`None` for direct messages).
    pub fn check(&self, user: Snowflake, guild: Option<Snowflake>) -> CooldownCheck {
        if self.period.is_zero() {
            return CooldownCheck::Accepted;
        }
        let now = Instant::now();
        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = usage.get_mut(&(user, guild)) {
            let elapsed = now.saturating_duration_since(entry.last_accepted);
            if elapsed < self.period {
                let notify = !entry.notified;
                entry.notified = true;
                return CooldownCheck::Rejected {
                    remaining: self.period - elapsed,
                    notify,
                };
            }
        }

        if usage.len() >= SWEEP_THRESHOLD {
            let period = self.period;
            usage.retain(|_, u| now.saturating_duration_since(u.last_accepted) < period);
        }
        usage.insert((user, guild), Usage {
            last_accepted: now,
            notified: false,
        });
        CooldownCheck::Accepted
    }
}
