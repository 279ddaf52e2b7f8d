//! Recruitment platform ports. The engine depends on these traits only; the
//! HTTP client in `hh_client` is the production implementation.

use async_trait::async_trait;

use crate::errors::ExternalError;
use crate::models::credential::{AccessToken, TokenGrant};
use crate::models::vacancy::{SearchPage, SearchParams, SubmitReceipt};

pub mod hh_client;

#[async_trait]
pub trait VacancySource: Send + Sync {
    async fn search(
        &self,
        token: &AccessToken,
        params: &SearchParams,
    ) -> Result<SearchPage, ExternalError>;

    /// Sends one application. Implementations must not retry internally.
    async fn submit(
        &self,
        token: &AccessToken,
        vacancy_id: &str,
        resume_id: &str,
        cover_letter: &str,
    ) -> Result<SubmitReceipt, ExternalError>;
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Exchanges a refresh token for a new token pair. A revoked or expired
    /// refresh token comes back as `Rejected` or `Unauthorized`.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ExternalError>;
}
