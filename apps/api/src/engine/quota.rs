//! Per-user daily application counter.
//!
//! Each (user, local day) pair owns one slot in a `DashMap`. A new day is a new
//! key, so earlier days stay readable. Reserve and release go through the
//! entry API, so operations on one slot are linearizable and different users
//! only meet on shard locks, never across an await.
//!
//! The map is a cache over the application records: a slot missing after a
//! restart is seeded from the records before the first reservation of the day.

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;

use crate::models::user::UserId;

/// Applications used against the cap for one user on one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyQuota {
    pub day: NaiveDate,
    pub count: u32,
    pub cap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Granted,
    Denied { used: u32, cap: u32 },
}

#[derive(Default)]
pub struct QuotaTracker {
    slots: DashMap<(UserId, NaiveDate), DailyQuota>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `day` already has a slot in this process.
    pub fn is_tracked(&self, user: UserId, day: NaiveDate) -> bool {
        self.slots.contains_key(&(user, day))
    }

    /// Creates the slot for `day` with `used` applications already counted.
    /// A slot that exists is left alone.
    pub fn seed(&self, user: UserId, day: NaiveDate, used: u32, cap: u32) {
        self.slots.entry((user, day)).or_insert(DailyQuota {
            day,
            count: used,
            cap,
        });
    }

    /// Takes one slot for `day` if the count is below `cap`.
    pub fn reserve(&self, user: UserId, day: NaiveDate, cap: u32) -> Reservation {
        let mut slot = self.slots.entry((user, day)).or_insert(DailyQuota {
            day,
            count: 0,
            cap,
        });
        // The cap is per-user config and may change between cycles.
        slot.cap = cap;

        if slot.count >= cap {
            return Reservation::Denied {
                used: slot.count,
                cap,
            };
        }
        slot.count += 1;
        Reservation::Granted
    }

    /// Gives back a slot taken for `day`.
    pub fn release(&self, user: UserId, day: NaiveDate) {
        if let Some(mut slot) = self.slots.get_mut(&(user, day)) {
            slot.count = slot.count.saturating_sub(1);
        }
    }

    /// Snapshot for `day`, or `None` if nothing was tracked that day.
    pub fn usage(&self, user: UserId, day: NaiveDate) -> Option<DailyQuota> {
        self.slots.get(&(user, day)).map(|slot| *slot)
    }
}
