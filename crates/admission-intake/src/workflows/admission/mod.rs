//! Registration draft lifecycle: step transitions, duplicate screening,
//! dual-key resume security, expiry cleanup and the client wizard mirror.
//!
//! A draft is created at step one, gains contact details at step two and is
//! finalized at step three, where it receives a public registration code and a
//! private credential. Only the credential, carried in an HttpOnly cookie,
//! unlocks the account-creation step.

pub mod accounts;
pub mod clock;
pub mod domain;
pub mod duplicates;
pub mod gate;
pub mod issuer;
pub mod reaper;
pub mod repository;
pub mod router;
pub mod service;
pub mod validation;
pub mod waves;
pub mod wizard;

#[cfg(test)]
mod tests;

pub use accounts::{
    hash_password, Account, AccountDirectory, AccountId, AccountRole, CandidateId,
    CandidateRecord, CandidateStatus, Enrollment, NewEnrollment, PasswordError,
    RegisteredIdentity,
};
pub use clock::{Clock, SystemClock};
pub use domain::{
    AddressDetail, ContactDetails, ContactForm, Draft, DraftId, DraftStep, Gender,
    IdentityDetails, IdentityForm, NewDraft, RegistrationCode, RegistrationSummary,
    ResumePayload, ReviewForm, ReviewSnapshot, SecretCredential,
};
pub use duplicates::{
    mask_name, mask_nik, mask_nisn, DuplicateCheck, DuplicateMatch, DuplicateResolver,
    DuplicateStatus, MaskedIdentity,
};
pub use gate::{credential_from_headers, GateError, GateRejection, GatedDraft, ResumeGate};
pub use issuer::{
    credential_cookie, credential_removal_cookie, CodeSource, CredentialIssuer, RandomCodeSource,
};
pub use reaper::ExpiryReaper;
pub use repository::{DraftRepository, RepositoryError};
pub use router::{admission_router, FLASH_COOKIE};
pub use service::{DraftService, DraftServiceError, Finalization};
pub use validation::{AccountForm, DraftGuard, FieldErrors, ValidationError};
pub use waves::{ActiveWaveView, AdmissionWave, NewAdmissionWave, WaveId, WaveRepository};
