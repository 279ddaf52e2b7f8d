use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A vacancy returned by search and not yet acted upon. Lives for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VacancyCandidate {
    pub id: String,
    pub title: String,
    pub employer: String,
    pub salary_from: Option<u32>,
    pub salary_to: Option<u32>,
    pub posted_at: DateTime<Utc>,
    pub requirement: Option<String>,
    pub responsibility: Option<String>,
}

impl VacancyCandidate {
    /// Highest salary the vacancy advertises, if any bound is present.
    pub fn salary_ceiling(&self) -> Option<u32> {
        self.salary_to.or(self.salary_from)
    }
}

/// Processing order within a cycle: most recent first, then higher
/// `salary_from` (missing salary sorts last), then ascending ID.
pub fn rank_order(a: &VacancyCandidate, b: &VacancyCandidate) -> Ordering {
    b.posted_at
        .cmp(&a.posted_at)
        .then_with(|| b.salary_from.cmp(&a.salary_from))
        .then_with(|| a.id.cmp(&b.id))
}

/// Query sent to the platform's search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchParams {
    pub text: String,
    pub area: Option<String>,
    pub salary: Option<u32>,
    pub experience: Option<String>,
    pub employment: Option<String>,
    pub per_page: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<VacancyCandidate>,
    pub found: u64,
    pub pages: u32,
}

/// Platform acknowledgement of a submitted application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub application_id: String,
    pub state: String,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn candidate(id: &str, hour: u32, salary_from: Option<u32>) -> VacancyCandidate {
        VacancyCandidate {
            id: id.to_string(),
            title: format!("Rust developer {id}"),
            employer: "Acme".to_string(),
            salary_from,
            salary_to: None,
            posted_at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
            requirement: None,
            responsibility: None,
        }
    }

    #[test]
    fn test_rank_prefers_recent_then_salary_then_id() {
        let mut items = vec![
            candidate("30", 9, Some(100)),
            candidate("20", 12, None),
            candidate("10", 12, Some(200)),
            candidate("05", 12, Some(200)),
        ];
        items.sort_by(rank_order);
        let ids: Vec<_> = items.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["05", "10", "20", "30"]);
    }

    #[test]
    fn test_salary_ceiling_prefers_upper_bound() {
        let mut c = candidate("1", 1, Some(100));
        assert_eq!(c.salary_ceiling(), Some(100));
        c.salary_to = Some(150);
        assert_eq!(c.salary_ceiling(), Some(150));
    }
}
