//! Completed-registration side of the intake flow.
//!
//! Accounts and candidate records live outside the draft store; this module
//! only describes the contract the draft lifecycle needs from them.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{AddressDetail, Draft, DraftId, Gender};
use super::repository::RepositoryError;
use super::waves::WaveId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Candidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: AccountRole,
    pub created_at: DateTime<Utc>,
}

/// Admission progress of a converted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Draft,
    Submitted,
    Verified,
    Accepted,
    Rejected,
}

/// Candidate record owning its own copy of the draft's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: CandidateId,
    pub account_id: AccountId,
    pub admission_wave_id: Option<WaveId>,
    pub registration_draft_id: Option<DraftId>,
    pub nisn: String,
    pub nik: String,
    pub full_name: String,
    pub gender: Gender,
    pub place_of_birth: String,
    pub date_of_birth: NaiveDate,
    pub address_full: Option<String>,
    pub address_detail: Option<AddressDetail>,
    pub school_origin: Option<String>,
    pub status: CandidateStatus,
}

/// Everything needed to create an account and its candidate record in one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnrollment {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub admission_wave_id: Option<WaveId>,
    pub registration_draft_id: DraftId,
    pub nisn: String,
    pub nik: String,
    pub gender: Gender,
    pub place_of_birth: String,
    pub date_of_birth: NaiveDate,
    pub address_full: Option<String>,
    pub address_detail: Option<AddressDetail>,
    pub school_origin: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewEnrollment {
    /// Copy the draft's fields; `None` when the draft never reached contact details.
    pub fn from_draft(draft: &Draft, password_hash: String, at: DateTime<Utc>) -> Option<Self> {
        let contact = draft.contact.as_ref()?;
        Some(Self {
            name: draft.identity.full_name.clone(),
            email: contact.email.clone(),
            password_hash,
            admission_wave_id: draft.admission_wave_id,
            registration_draft_id: draft.id,
            nisn: draft.identity.nisn.clone(),
            nik: draft.identity.nik.clone(),
            gender: draft.identity.gender,
            place_of_birth: draft.identity.place_of_birth.clone(),
            date_of_birth: draft.identity.date_of_birth,
            address_full: Some(contact.address_full.clone()),
            address_detail: Some(contact.address.clone()),
            school_origin: draft.school_origin.clone(),
            created_at: at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub account: Account,
    pub candidate: CandidateRecord,
}

/// Identity of an already registered person, before masking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredIdentity {
    pub display_name: String,
}

/// Directory of completed accounts and candidate records.
pub trait AccountDirectory: Send + Sync {
    /// Candidate claiming either identity field, preferring the account's display name.
    fn find_by_identity(
        &self,
        nisn: &str,
        nik: &str,
    ) -> Result<Option<RegisteredIdentity>, RepositoryError>;
    fn email_taken(&self, email: &str) -> Result<bool, RepositoryError>;
    /// Create the account and candidate together; `Conflict` on email or identity reuse.
    fn enroll(&self, enrollment: NewEnrollment) -> Result<Enrollment, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
#[error("failed to hash password: {0}")]
pub struct PasswordError(String);

/// Hash a password with Argon2id into a PHC string.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| PasswordError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{PasswordHash, PasswordVerifier};

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("rahasia123").expect("hash");
        assert!(hash.starts_with("$argon2id$"));
        let parsed = PasswordHash::new(&hash).expect("phc string");
        assert!(Argon2::default()
            .verify_password(b"rahasia123", &parsed)
            .is_ok());
        assert!(Argon2::default()
            .verify_password(b"rahasia124", &parsed)
            .is_err());
    }
}
