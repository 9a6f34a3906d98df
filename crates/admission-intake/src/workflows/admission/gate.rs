use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use cookie::Cookie;
use tracing::{debug, info};

use super::domain::{Draft, SecretCredential};
use super::repository::{DraftRepository, RepositoryError};

/// Why the resume gate turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    MissingCredential,
    UnknownCredential,
    Expired,
}

impl GateRejection {
    /// Short key carried in the flash cookie on redirect.
    pub fn flash_key(self) -> &'static str {
        match self {
            GateRejection::MissingCredential => "session_not_found",
            GateRejection::UnknownCredential => "invalid_token",
            GateRejection::Expired => "session_expired",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            GateRejection::MissingCredential => {
                "Registration session not found. Please start the registration form again."
            }
            GateRejection::UnknownCredential => {
                "Invalid registration token. Please start the registration form again."
            }
            GateRejection::Expired => {
                "Your registration session has expired. Please start the registration form again."
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("{}", .0.message())]
    Rejected(GateRejection),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Draft resolved by the gate, attached to the request for gated handlers.
#[derive(Debug, Clone)]
pub struct GatedDraft(pub Draft);

/// Resolves a resume credential to the draft it unlocks.
pub struct ResumeGate<'a, R> {
    drafts: &'a R,
}

impl<'a, R> ResumeGate<'a, R>
where
    R: DraftRepository,
{
    pub fn new(drafts: &'a R) -> Self {
        Self { drafts }
    }

    /// An expired draft is purged on the way out so it cannot be presented again.
    pub fn authorize(
        &self,
        credential: Option<&SecretCredential>,
        now: DateTime<Utc>,
    ) -> Result<Draft, GateError> {
        let Some(credential) = credential else {
            return Err(GateError::Rejected(GateRejection::MissingCredential));
        };

        let Some(draft) = self.drafts.find_by_credential(credential)? else {
            debug!("resume credential did not match any draft");
            return Err(GateError::Rejected(GateRejection::UnknownCredential));
        };

        if draft.is_expired(now) {
            let purged = self.drafts.purge(draft.id)?;
            info!(draft_id = %draft.id, purged, "expired draft rejected at resume gate");
            return Err(GateError::Rejected(GateRejection::Expired));
        }

        Ok(draft)
    }
}

/// Pull the named cookie out of every `Cookie` header on the request.
pub fn credential_from_headers(headers: &HeaderMap, name: &str) -> Option<SecretCredential> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name && !cookie.value().is_empty())
        .map(|cookie| SecretCredential::new(cookie.value()))
}
