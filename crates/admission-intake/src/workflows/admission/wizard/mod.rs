//! Client-side wizard that mirrors the server draft across page loads.

pub mod coordinator;
pub mod storage;

use std::sync::Arc;

use super::accounts::AccountDirectory;
use super::domain::{
    ContactForm, DraftId, DraftStep, IdentityForm, RegistrationCode, ResumePayload, ReviewForm,
};
use super::duplicates::DuplicateCheck;
use super::repository::DraftRepository;
use super::service::{DraftService, DraftServiceError};

pub use coordinator::{ApiFailure, WizardApi, WizardCoordinator, WizardError, WizardPhase};
pub use storage::{DebouncedWriter, MemoryWizardStorage, WizardSnapshot, WizardStorage};

impl From<DraftServiceError> for ApiFailure {
    fn from(err: DraftServiceError) -> Self {
        match err {
            DraftServiceError::Validation(err) => ApiFailure::Validation(err.errors),
            DraftServiceError::IdentityConflict(found) => ApiFailure::Conflict(found),
            DraftServiceError::NotFound => ApiFailure::NotFound,
            other => ApiFailure::Server(other.to_string()),
        }
    }
}

/// In-process transport. Carries no cookie jar, so finalized drafts cannot be resumed through it.
impl<R, A> WizardApi for DraftService<R, A>
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    fn check_duplicate(
        &self,
        nisn: &str,
        nik: &str,
        current_draft_id: Option<DraftId>,
    ) -> Result<DuplicateCheck, ApiFailure> {
        Ok(DraftService::check_duplicate(self, nisn, nik, current_draft_id)?)
    }

    fn create_draft(&self, form: &IdentityForm, force_new: bool) -> Result<DraftId, ApiFailure> {
        Ok(self.create_initial(form, force_new)?.id)
    }

    fn replace_draft(&self, previous: DraftId, form: &IdentityForm) -> Result<DraftId, ApiFailure> {
        Ok(self.replace_initial(previous, form)?.id)
    }

    fn resume(&self, nisn: &str, nik: &str) -> Result<ResumePayload, ApiFailure> {
        Ok(DraftService::resume(self, nisn, nik, None)?)
    }

    fn submit_contact(
        &self,
        draft_id: DraftId,
        form: &ContactForm,
    ) -> Result<DraftStep, ApiFailure> {
        Ok(self.advance_to_contact(draft_id, form)?.current_step)
    }

    fn finalize(
        &self,
        draft_id: DraftId,
        form: &ReviewForm,
    ) -> Result<RegistrationCode, ApiFailure> {
        let finalization = DraftService::finalize(self, draft_id, form, None)?;
        finalization
            .draft
            .registration_code
            .ok_or_else(|| ApiFailure::Server("finalized draft has no registration code".to_string()))
    }
}

impl<T> WizardApi for Arc<T>
where
    T: WizardApi + ?Sized,
{
    fn check_duplicate(
        &self,
        nisn: &str,
        nik: &str,
        current_draft_id: Option<DraftId>,
    ) -> Result<DuplicateCheck, ApiFailure> {
        (**self).check_duplicate(nisn, nik, current_draft_id)
    }

    fn create_draft(&self, form: &IdentityForm, force_new: bool) -> Result<DraftId, ApiFailure> {
        (**self).create_draft(form, force_new)
    }

    fn replace_draft(&self, previous: DraftId, form: &IdentityForm) -> Result<DraftId, ApiFailure> {
        (**self).replace_draft(previous, form)
    }

    fn resume(&self, nisn: &str, nik: &str) -> Result<ResumePayload, ApiFailure> {
        (**self).resume(nisn, nik)
    }

    fn submit_contact(
        &self,
        draft_id: DraftId,
        form: &ContactForm,
    ) -> Result<DraftStep, ApiFailure> {
        (**self).submit_contact(draft_id, form)
    }

    fn finalize(
        &self,
        draft_id: DraftId,
        form: &ReviewForm,
    ) -> Result<RegistrationCode, ApiFailure> {
        (**self).finalize(draft_id, form)
    }
}
