//! HTTP client for the recruitment platform (hh.ru-compatible API).
//!
//! Search and token refresh retry transient failures in-call and honor
//! `Retry-After`. Submission is sent exactly once per call.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::PlatformConfig;
use crate::errors::ExternalError;
use crate::models::credential::{AccessToken, RefreshToken, TokenGrant};
use crate::models::vacancy::{SearchPage, SearchParams, SubmitReceipt, VacancyCandidate};
use crate::platform::{OAuthProvider, VacancySource};
use crate::retry::{parse_retry_after, with_retry, RetryPolicy};

/// Wait applied when the platform reports its own daily application limit
/// without a `Retry-After` header.
const PLATFORM_LIMIT_BACKOFF: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct HhClient {
    client: Client,
    api_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
    user_agent: String,
    retry: RetryPolicy,
}

impl HhClient {
    pub fn new(config: &PlatformConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            oauth_url: config.oauth_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            user_agent: config.user_agent.clone(),
            retry: RetryPolicy::default(),
        })
    }

    async fn search_once(
        &self,
        token: &AccessToken,
        query: &[(&str, String)],
    ) -> Result<SearchPage, ExternalError> {
        let response = self
            .client
            .get(format!("{}/vacancies", self.api_url))
            .bearer_auth(token.expose())
            .header("HH-User-Agent", &self.user_agent)
            .query(query)
            .send()
            .await?;

        let body: SearchResponse = ensure_success(response).await?.json().await?;
        Ok(body.into_page())
    }

    async fn refresh_once(&self, refresh_token: &str) -> Result<TokenGrant, ExternalError> {
        let response = self
            .client
            .post(format!("{}/token", self.oauth_url))
            .header("HH-User-Agent", &self.user_agent)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            // invalid_grant and friends: the refresh token is dead.
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<OAuthErrorBody>(&body)
                .map(|e| e.error_description.unwrap_or(e.error))
                .unwrap_or(body);
            return Err(ExternalError::Rejected(reason));
        }

        let grant: TokenResponse = ensure_success(response).await?.json().await?;
        Ok(TokenGrant {
            access_token: AccessToken::new(grant.access_token),
            refresh_token: RefreshToken::new(grant.refresh_token),
            expires_in_secs: grant.expires_in,
        })
    }
}

#[async_trait]
impl VacancySource for HhClient {
    async fn search(
        &self,
        token: &AccessToken,
        params: &SearchParams,
    ) -> Result<SearchPage, ExternalError> {
        let query = search_query(params);
        let page = with_retry(&self.retry, "vacancy search", || {
            self.search_once(token, &query)
        })
        .await?;
        debug!("Vacancy search returned {} of {} found", page.items.len(), page.found);
        Ok(page)
    }

    async fn submit(
        &self,
        token: &AccessToken,
        vacancy_id: &str,
        resume_id: &str,
        cover_letter: &str,
    ) -> Result<SubmitReceipt, ExternalError> {
        let response = self
            .client
            .post(format!("{}/negotiations", self.api_url))
            .bearer_auth(token.expose())
            .header("HH-User-Agent", &self.user_agent)
            .form(&[
                ("vacancy_id", vacancy_id),
                ("resume_id", resume_id),
                ("message", cover_letter),
            ])
            .send()
            .await?;

        let response = ensure_success(response).await?;
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        Ok(SubmitReceipt {
            application_id: application_id_from_location(location),
            state: "response".to_string(),
        })
    }
}

#[async_trait]
impl OAuthProvider for HhClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ExternalError> {
        with_retry(&self.retry, "token refresh", || self.refresh_once(refresh_token)).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<VacancyItem>,
    #[serde(default)]
    found: u64,
    #[serde(default)]
    pages: u32,
}

#[derive(Debug, Deserialize)]
struct VacancyItem {
    id: String,
    name: String,
    employer: Option<EmployerRef>,
    salary: Option<Salary>,
    published_at: String,
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
struct EmployerRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Salary {
    from: Option<u32>,
    to: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    requirement: Option<String>,
    responsibility: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlatformErrorBody {
    #[serde(default)]
    errors: Vec<PlatformErrorItem>,
}

#[derive(Debug, Deserialize)]
struct PlatformErrorItem {
    #[serde(rename = "type")]
    kind: String,
    value: Option<String>,
}

impl SearchResponse {
    fn into_page(self) -> SearchPage {
        let items = self
            .items
            .into_iter()
            .filter_map(|item| {
                let posted_at = match parse_published_at(&item.published_at) {
                    Some(at) => at,
                    None => {
                        warn!(
                            "Skipping vacancy {} with unparseable published_at '{}'",
                            item.id, item.published_at
                        );
                        return None;
                    }
                };
                let (requirement, responsibility) = item
                    .snippet
                    .map(|s| (s.requirement.map(strip_highlight), s.responsibility.map(strip_highlight)))
                    .unwrap_or((None, None));
                Some(VacancyCandidate {
                    id: item.id,
                    title: item.name,
                    employer: item.employer.map(|e| e.name).unwrap_or_default(),
                    salary_from: item.salary.as_ref().and_then(|s| s.from),
                    salary_to: item.salary.as_ref().and_then(|s| s.to),
                    posted_at,
                    requirement,
                    responsibility,
                })
            })
            .collect();

        SearchPage {
            items,
            found: self.found,
            pages: self.pages,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn search_query(params: &SearchParams) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("text", params.text.clone()),
        ("per_page", params.per_page.to_string()),
        ("order_by", "publication_time".to_string()),
    ];
    if let Some(area) = &params.area {
        query.push(("area", area.clone()));
    }
    if let Some(salary) = params.salary {
        query.push(("salary", salary.to_string()));
    }
    if let Some(experience) = &params.experience {
        query.push(("experience", experience.clone()));
    }
    if let Some(employment) = &params.employment {
        query.push(("employment", employment.clone()));
    }
    query
}

/// The platform sends `2026-03-01T12:00:00+0300`; accept RFC 3339 as well.
fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn strip_highlight(text: String) -> String {
    text.replace("<highlighttext>", "")
        .replace("</highlighttext>", "")
}

fn application_id_from_location(location: &str) -> String {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

async fn ensure_success(response: Response) -> Result<Response, ExternalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status, retry_after, &body))
}

/// Maps a non-2xx platform response onto the engine's error taxonomy.
fn classify_failure(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ExternalError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        return ExternalError::Transient {
            message: format!("platform returned {status}"),
            retry_after,
        };
    }
    if status == StatusCode::UNAUTHORIZED {
        return ExternalError::Unauthorized(format!("platform returned {status}"));
    }

    let errors = serde_json::from_str::<PlatformErrorBody>(body)
        .map(|b| b.errors)
        .unwrap_or_default();

    if errors.iter().any(|e| e.kind == "oauth") {
        return ExternalError::Unauthorized(describe(&errors, status));
    }
    if errors
        .iter()
        .any(|e| e.value.as_deref() == Some("limit_exceeded"))
    {
        return ExternalError::Transient {
            message: "platform application limit exceeded".to_string(),
            retry_after: Some(retry_after.unwrap_or(PLATFORM_LIMIT_BACKOFF)),
        };
    }

    ExternalError::Rejected(describe(&errors, status))
}

fn describe(errors: &[PlatformErrorItem], status: StatusCode) -> String {
    let parts: Vec<String> = errors
        .iter()
        .map(|e| match &e.value {
            Some(value) => format!("{}:{}", e.kind, value),
            None => e.kind.clone(),
        })
        .collect();
    if parts.is_empty() {
        format!("platform returned {status}")
    } else {
        parts.join(", ")
    }
}
