use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AutoApplyDefaults;

pub type UserId = Uuid;

/// A job seeker as seen by the engine. Owned by the collaborator store and
/// read-only here, except for the auto-apply flag which start/stop persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub telegram_chat_id: Option<i64>,
    /// Offset from UTC in minutes. Quota days roll over at local midnight.
    pub utc_offset_minutes: i32,
    /// `None` means the process-wide default applies.
    pub auto_apply_enabled: Option<bool>,
    pub preferences: SearchPreferences,
    pub profile: ApplicantProfile,
    pub max_applications_per_day: Option<u32>,
    pub cover_letter_max_length: Option<usize>,
    pub auto_apply_interval_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPreferences {
    pub text: String,
    pub area: Option<String>,
    pub salary_from: Option<u32>,
    pub salary_to: Option<u32>,
    /// Platform experience code, e.g. `between1And3`.
    pub experience: Option<String>,
    /// Platform employment code, e.g. `full`.
    pub employment: Option<String>,
}

/// What the cover-letter generator knows about the applicant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicantProfile {
    /// The resume on the recruitment platform that applications are sent with.
    pub platform_resume_id: String,
    pub experience_summary: String,
    pub skills: Vec<String>,
    pub additional_info: Option<String>,
}

/// Per-user settings after layering the user's overrides on top of the
/// process-wide defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub auto_apply_enabled: bool,
    pub daily_cap: u32,
    pub cover_letter_max_length: usize,
    pub interval: Duration,
}

impl User {
    pub fn settings(&self, defaults: &AutoApplyDefaults) -> EffectiveSettings {
        let minutes = self
            .auto_apply_interval_minutes
            .unwrap_or(defaults.auto_apply_interval_minutes)
            .max(1);
        EffectiveSettings {
            auto_apply_enabled: self
                .auto_apply_enabled
                .unwrap_or(defaults.auto_apply_enabled),
            daily_cap: self
                .max_applications_per_day
                .unwrap_or(defaults.max_applications_per_day),
            cover_letter_max_length: self
                .cover_letter_max_length
                .unwrap_or(defaults.cover_letter_max_length),
            interval: Duration::from_secs(u64::from(minutes) * 60),
        }
    }

    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
    }

    /// Calendar day in the user's timezone at `now`. Used as the quota key.
    pub fn local_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone()).date_naive()
    }

    /// UTC instants of local midnight at the start of `day` and of the next day.
    pub fn day_bounds(&self, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let offset = chrono::Duration::seconds(i64::from(self.timezone().local_minus_utc()));
        let start = Utc.from_utc_datetime(&(day.and_time(NaiveTime::MIN) - offset));
        (start, start + chrono::Duration::days(1))
    }
}
