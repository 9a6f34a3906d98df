use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{AdmissionConfig, CookiePolicy};

use super::accounts::{hash_password, AccountDirectory, Enrollment, NewEnrollment, PasswordError};
use super::clock::{Clock, SystemClock};
use super::domain::{
    ContactForm, Draft, DraftId, DraftStep, IdentityDetails, IdentityForm, NewDraft,
    ResumePayload, ReviewForm, SecretCredential,
};
use super::duplicates::{
    latest_active, DuplicateCheck, DuplicateMatch, DuplicateResolver, DuplicateStatus,
};
use super::gate::{GateError, ResumeGate};
use super::issuer::{CodeSource, CredentialIssuer};
use super::reaper::ExpiryReaper;
use super::repository::{DraftRepository, RepositoryError};
use super::validation::{AccountForm, DraftGuard, FieldErrors, ValidationError};
use super::waves::{ActiveWaveView, WaveRepository};

/// Result of a finalize call.
///
/// `credential` is only present when this call minted the code/credential pair;
/// a repeated finalize returns the stored draft with `None`.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub draft: Draft,
    pub credential: Option<SecretCredential>,
}

/// Service composing validation, duplicate screening, issuance and storage
/// for the registration draft lifecycle.
pub struct DraftService<R, A> {
    guard: DraftGuard,
    repository: Arc<R>,
    accounts: Arc<A>,
    waves: Arc<dyn WaveRepository>,
    issuer: CredentialIssuer,
    clock: Arc<dyn Clock>,
    config: AdmissionConfig,
}

impl<R, A> DraftService<R, A>
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    pub fn new(
        repository: Arc<R>,
        accounts: Arc<A>,
        waves: Arc<dyn WaveRepository>,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            guard: DraftGuard,
            repository,
            accounts,
            waves,
            issuer: CredentialIssuer::new(config.code.clone()),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_code_source(mut self, source: Arc<dyn CodeSource>) -> Self {
        self.issuer = CredentialIssuer::with_source(self.config.code.clone(), source);
        self
    }

    pub fn cookie_policy(&self) -> &CookiePolicy {
        &self.config.cookie
    }

    pub fn flow_start(&self) -> &str {
        &self.config.flow_start
    }

    pub fn retention_window(&self) -> Duration {
        self.config.retention_window
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Screen an identity pair before a draft is created for it.
    pub fn check_duplicate(
        &self,
        nisn: &str,
        nik: &str,
        caller_draft_id: Option<DraftId>,
    ) -> Result<DuplicateCheck, DraftServiceError> {
        self.guard.identity_pair(nisn, nik)?;
        let check = self.resolver().resolve(
            nisn.trim(),
            nik.trim(),
            caller_draft_id,
            self.clock.now(),
        )?;
        Ok(check)
    }

    /// Step one. Account matches always block; draft matches block unless
    /// `force_new`, in which case the prior drafts are removed first.
    pub fn create_initial(
        &self,
        form: &IdentityForm,
        force_new: bool,
    ) -> Result<Draft, DraftServiceError> {
        let now = self.clock.now();
        let identity = self.guard.identity_from_form(form, now.date_naive())?;

        match self
            .resolver()
            .resolve(&identity.nisn, &identity.nik, None, now)?
        {
            DuplicateCheck::NotFound => {}
            DuplicateCheck::Found(found)
                if force_new && found.status == DuplicateStatus::Draft =>
            {
                self.discard_active_drafts(&identity.nisn, &identity.nik, now)?;
            }
            DuplicateCheck::Found(found) => {
                info!(status = ?found.status, "draft creation blocked by identity conflict");
                return Err(DraftServiceError::IdentityConflict(found));
            }
        }

        let draft = self.insert_draft(identity, now)?;
        info!(draft_id = %draft.id, force_new, "registration draft created");
        Ok(draft)
    }

    /// Step one again, after the registrant went back and changed their
    /// identity. The caller's previous draft never counts as a duplicate and is
    /// replaced by a fresh draft for the edited identity.
    pub fn replace_initial(
        &self,
        previous: DraftId,
        form: &IdentityForm,
    ) -> Result<Draft, DraftServiceError> {
        let now = self.clock.now();
        let identity = self.guard.identity_from_form(form, now.date_naive())?;

        let screened =
            self.resolver()
                .resolve(&identity.nisn, &identity.nik, Some(previous), now)?;
        if let DuplicateCheck::Found(found) = screened {
            info!(status = ?found.status, "draft replacement blocked by identity conflict");
            return Err(DraftServiceError::IdentityConflict(found));
        }

        if let Some(old) = self
            .repository
            .fetch(previous)?
            .filter(|draft| draft.is_valid(now))
        {
            if old.is_finalized() {
                return Err(DraftServiceError::AlreadyFinalized(previous));
            }
            self.repository.purge(old.id)?;
        }

        let draft = self.insert_draft(identity, now)?;
        info!(draft_id = %draft.id, %previous, "registration draft replaced");
        Ok(draft)
    }

    /// Step two. Replaces any earlier contact data and moves progress to 2.
    pub fn advance_to_contact(
        &self,
        draft_id: DraftId,
        form: &ContactForm,
    ) -> Result<Draft, DraftServiceError> {
        let now = self.clock.now();
        let mut draft = self.active_draft(draft_id, now)?;
        if draft.is_finalized() {
            return Err(DraftServiceError::AlreadyFinalized(draft_id));
        }

        let contact = self.guard.contact_from_form(form)?;
        if self.accounts.email_taken(&contact.email)? {
            return Err(ValidationError::from(FieldErrors::single(
                "email",
                "Email is already registered.",
            ))
            .into());
        }

        draft.contact = Some(contact);
        draft.current_step = draft.current_step.max(DraftStep::Contact);
        draft.updated_at = now;
        match self.repository.update(draft.clone()) {
            Ok(()) => {}
            Err(RepositoryError::Finalized) => {
                return Err(DraftServiceError::AlreadyFinalized(draft_id))
            }
            Err(err) => return Err(err.into()),
        }

        debug!(draft_id = %draft.id, "draft advanced to contact step");
        Ok(draft)
    }

    /// Step three. Mints the registration code and resume credential exactly once.
    ///
    /// Repeating the call on a finalized draft only succeeds for the holder of
    /// its credential, and never mints a second pair.
    pub fn finalize(
        &self,
        draft_id: DraftId,
        form: &ReviewForm,
        credential: Option<&SecretCredential>,
    ) -> Result<Finalization, DraftServiceError> {
        let now = self.clock.now();
        let draft = self.active_draft(draft_id, now)?;

        if draft.is_finalized() {
            return self.refinalize(draft, credential);
        }

        if draft.current_step < DraftStep::Contact || draft.contact.is_none() {
            return Err(DraftServiceError::StepOutOfOrder {
                required: DraftStep::Contact.number(),
                found: draft.current_step.number(),
            });
        }

        let school_origin = self.guard.review_from_form(form)?;
        let attempts = self.issuer.max_attempts();
        let expires_at = now + self.config.retention_window;

        for attempt in 1..=attempts {
            let minted = self.issuer.secret_credential();
            let mut candidate = draft.clone();
            candidate.school_origin = Some(school_origin.clone());
            candidate.registration_code = Some(self.issuer.registration_code(now));
            candidate.secret_credential = Some(minted.clone());
            candidate.expires_at = Some(expires_at);
            candidate.current_step = DraftStep::Review;
            candidate.updated_at = now;

            match self.repository.update(candidate.clone()) {
                Ok(()) => {
                    info!(
                        draft_id = %candidate.id,
                        attempt,
                        %expires_at,
                        "draft finalized"
                    );
                    return Ok(Finalization {
                        draft: candidate,
                        credential: Some(minted),
                    });
                }
                Err(RepositoryError::Conflict) => {
                    warn!(draft_id = %draft.id, attempt, "registration code collision; retrying");
                }
                Err(RepositoryError::Finalized) => {
                    debug!(draft_id = %draft.id, "concurrent finalize won; keeping its code");
                    let stored = self.active_draft(draft.id, now)?;
                    return self.refinalize(stored, credential);
                }
                Err(err) => return Err(err.into()),
            }
        }

        error!(
            draft_id = %draft.id,
            attempts,
            "unable to issue a unique registration code"
        );
        Err(DraftServiceError::RetryExhausted { attempts })
    }

    /// Most recently updated draft that is still valid for the pair.
    pub fn find_active_by_identity(
        &self,
        nisn: &str,
        nik: &str,
    ) -> Result<Option<Draft>, DraftServiceError> {
        let now = self.clock.now();
        let drafts = self.repository.find_by_identity(nisn.trim(), nik.trim())?;
        Ok(latest_active(drafts, now))
    }

    pub fn is_valid(&self, draft: &Draft) -> bool {
        draft.is_valid(self.clock.now())
    }

    /// Payload for a returning registrant.
    ///
    /// Finalized drafts are only handed out to the holder of their credential.
    pub fn resume(
        &self,
        nisn: &str,
        nik: &str,
        credential: Option<&SecretCredential>,
    ) -> Result<ResumePayload, DraftServiceError> {
        self.guard.identity_pair(nisn, nik)?;
        let draft = self
            .find_active_by_identity(nisn, nik)?
            .ok_or(DraftServiceError::NotFound)?;

        if draft.is_finalized() {
            match self.authorize(credential) {
                Ok(holder) if holder.id == draft.id => {}
                Ok(_) | Err(GateError::Rejected(_)) => {
                    debug!(draft_id = %draft.id, "resume of finalized draft without its credential");
                    return Err(DraftServiceError::NotFound);
                }
                Err(GateError::Repository(err)) => return Err(err.into()),
            }
        }

        Ok(ResumePayload::from_draft(&draft))
    }

    /// Resume gate check against the service clock.
    pub fn authorize(&self, credential: Option<&SecretCredential>) -> Result<Draft, GateError> {
        ResumeGate::new(self.repository.as_ref()).authorize(credential, self.clock.now())
    }

    /// Turn a gated draft into an account and candidate record, then retire it.
    pub fn convert(
        &self,
        draft: &Draft,
        form: &AccountForm,
    ) -> Result<Enrollment, DraftServiceError> {
        let now = self.clock.now();
        let password = self.guard.account_password(form)?;
        let current = self.active_draft(draft.id, now)?;

        if let DuplicateCheck::Found(found) = self.resolver().resolve(
            &current.identity.nisn,
            &current.identity.nik,
            Some(current.id),
            now,
        )? {
            if found.status == DuplicateStatus::Registered {
                return Err(DraftServiceError::IdentityConflict(found));
            }
        }

        let email_taken = match current.contact.as_ref() {
            Some(contact) => self.accounts.email_taken(&contact.email)?,
            None => false,
        };
        if email_taken {
            return Err(ValidationError::from(FieldErrors::single(
                "email",
                "Email is already registered.",
            ))
            .into());
        }

        let password_hash = hash_password(password)?;
        let enrollment = NewEnrollment::from_draft(&current, password_hash, now).ok_or(
            DraftServiceError::StepOutOfOrder {
                required: DraftStep::Contact.number(),
                found: current.current_step.number(),
            },
        )?;

        let enrolled = match self.accounts.enroll(enrollment) {
            Ok(enrolled) => enrolled,
            Err(RepositoryError::Conflict) => {
                return Err(ValidationError::from(FieldErrors::single(
                    "email",
                    "Email is already registered.",
                ))
                .into())
            }
            Err(err) => return Err(err.into()),
        };

        self.repository.soft_delete(current.id, now)?;
        info!(
            draft_id = %current.id,
            account_id = enrolled.account.id.0,
            "draft converted to candidate account"
        );
        Ok(enrolled)
    }

    /// Run the expiry reaper against the service clock.
    pub fn prune_expired(&self) -> Result<usize, DraftServiceError> {
        let removed = ExpiryReaper::new(self.repository.as_ref()).prune(self.clock.now())?;
        Ok(removed)
    }

    pub fn active_wave(&self) -> Result<Option<ActiveWaveView>, DraftServiceError> {
        let wave = self.waves.active()?;
        Ok(wave.as_ref().map(ActiveWaveView::from))
    }

    /// A finalized draft is echoed back only to the holder of its credential.
    fn refinalize(
        &self,
        draft: Draft,
        credential: Option<&SecretCredential>,
    ) -> Result<Finalization, DraftServiceError> {
        match self.authorize(credential) {
            Ok(holder) if holder.id == draft.id => {
                debug!(draft_id = %draft.id, "finalize repeated; returning existing code");
                Ok(Finalization {
                    draft: holder,
                    credential: None,
                })
            }
            Ok(_) | Err(GateError::Rejected(_)) => {
                debug!(draft_id = %draft.id, "finalize repeated without the draft credential");
                Err(DraftServiceError::AlreadyFinalized(draft.id))
            }
            Err(GateError::Repository(err)) => Err(err.into()),
        }
    }

    fn resolver(&self) -> DuplicateResolver<'_, R, A> {
        DuplicateResolver::new(self.repository.as_ref(), self.accounts.as_ref())
    }

    /// Deleted, expired and missing drafts all read as not found.
    fn active_draft(&self, id: DraftId, now: DateTime<Utc>) -> Result<Draft, DraftServiceError> {
        self.repository
            .fetch(id)?
            .filter(|draft| draft.is_valid(now))
            .ok_or(DraftServiceError::NotFound)
    }

    fn insert_draft(
        &self,
        identity: IdentityDetails,
        now: DateTime<Utc>,
    ) -> Result<Draft, DraftServiceError> {
        let admission_wave_id = self.waves.active()?.map(|wave| wave.id);
        let (nisn, nik) = (identity.nisn.clone(), identity.nik.clone());
        let created = self.repository.insert(NewDraft {
            admission_wave_id,
            identity,
            created_at: now,
        });

        match created {
            Ok(draft) => Ok(draft),
            Err(RepositoryError::Conflict) => {
                // A concurrent writer claimed the identity between the check and the insert.
                match self.resolver().resolve(&nisn, &nik, None, now)? {
                    DuplicateCheck::Found(found) => Err(DraftServiceError::IdentityConflict(found)),
                    DuplicateCheck::NotFound => Err(RepositoryError::Conflict.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn discard_active_drafts(
        &self,
        nisn: &str,
        nik: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DraftServiceError> {
        let prior = self.repository.find_by_identity(nisn, nik)?;
        for draft in prior.into_iter().filter(|draft| draft.is_valid(now)) {
            let removed = self.repository.purge(draft.id)?;
            info!(draft_id = %draft.id, removed, "prior draft discarded for fresh start");
        }
        Ok(())
    }
}

/// Error raised by the draft service.
#[derive(Debug, thiserror::Error)]
pub enum DraftServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("identity is already claimed by another registration")]
    IdentityConflict(DuplicateMatch),
    #[error("draft not found")]
    NotFound,
    #[error("draft must reach step {required} first (currently at step {found})")]
    StepOutOfOrder { required: u8, found: u8 },
    #[error("draft {0} is already finalized")]
    AlreadyFinalized(DraftId),
    #[error("could not issue a unique registration code after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
    #[error(transparent)]
    Repository(RepositoryError),
    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl From<RepositoryError> for DraftServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => DraftServiceError::NotFound,
            other => DraftServiceError::Repository(other),
        }
    }
}
