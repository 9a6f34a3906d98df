use chrono::{DateTime, Utc};

use super::domain::{Draft, DraftId, NewDraft, SecretCredential};

/// Storage abstraction for registration drafts.
///
/// Implementations enforce the uniqueness rules at write time:
/// `insert` fails with [`RepositoryError::Conflict`] when another active draft
/// (not deleted, not expired at `created_at`) already claims the NISN or NIK, and
/// `update` fails the same way when the registration code or credential is
/// already held by a different stored draft. `update` is also a compare-and-set
/// on finalization: it fails with [`RepositoryError::Finalized`] when the stored
/// draft already holds a code or credential different from the incoming one.
pub trait DraftRepository: Send + Sync {
    fn insert(&self, draft: NewDraft) -> Result<Draft, RepositoryError>;
    fn update(&self, draft: Draft) -> Result<(), RepositoryError>;
    /// Any stored draft, including soft-deleted ones.
    fn fetch(&self, id: DraftId) -> Result<Option<Draft>, RepositoryError>;
    /// Non-deleted drafts claiming either identity field, regardless of expiry.
    fn find_by_identity(&self, nisn: &str, nik: &str) -> Result<Vec<Draft>, RepositoryError>;
    /// The non-deleted draft holding `credential`, if any.
    fn find_by_credential(
        &self,
        credential: &SecretCredential,
    ) -> Result<Option<Draft>, RepositoryError>;
    fn soft_delete(&self, id: DraftId, at: DateTime<Utc>) -> Result<(), RepositoryError>;
    /// Permanently remove a draft. Returns `false` when it was already gone.
    fn purge(&self, id: DraftId) -> Result<bool, RepositoryError>;
    /// Every draft, soft-deleted included, whose expiry is set and strictly before `now`.
    fn expired_before(&self, now: DateTime<Utc>) -> Result<Vec<DraftId>, RepositoryError>;
}

/// Error enumeration for storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record conflicts with an existing record")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("draft already holds a different registration code")]
    Finalized,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
