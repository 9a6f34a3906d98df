use std::time::{Duration, Instant};

use tracing::debug;

use crate::workflows::admission::domain::{
    ContactForm, DraftId, DraftStep, IdentityForm, RegistrationCode, ResumePayload, ReviewForm,
};
use crate::workflows::admission::duplicates::{DuplicateCheck, DuplicateMatch, DuplicateStatus};
use crate::workflows::admission::validation::FieldErrors;

use super::storage::{
    self, DebouncedWriter, IdentityPair, WizardSnapshot, WizardStorage, DRAFT_ID_KEY,
    DRAFT_IDENTITY_KEY, LAST_STEP_KEY, STEP1_KEY, STEP2_KEY, STEP3_KEY,
};

/// Server calls the wizard depends on.
///
/// Implementations never surface the resume credential; it stays in the
/// HttpOnly cookie managed by the transport.
pub trait WizardApi {
    fn check_duplicate(
        &self,
        nisn: &str,
        nik: &str,
        current_draft_id: Option<DraftId>,
    ) -> Result<DuplicateCheck, ApiFailure>;
    fn create_draft(&self, form: &IdentityForm, force_new: bool) -> Result<DraftId, ApiFailure>;
    /// Swap the caller's draft for one holding the edited identity.
    fn replace_draft(&self, previous: DraftId, form: &IdentityForm)
        -> Result<DraftId, ApiFailure>;
    fn resume(&self, nisn: &str, nik: &str) -> Result<ResumePayload, ApiFailure>;
    fn submit_contact(&self, draft_id: DraftId, form: &ContactForm)
        -> Result<DraftStep, ApiFailure>;
    fn finalize(&self, draft_id: DraftId, form: &ReviewForm)
        -> Result<RegistrationCode, ApiFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiFailure {
    #[error("submission rejected: {}", .0.field_list())]
    Validation(FieldErrors),
    #[error("identity is already claimed")]
    Conflict(DuplicateMatch),
    #[error("draft not found")]
    NotFound,
    #[error("server error: {0}")]
    Server(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WizardError {
    #[error(transparent)]
    Api(#[from] ApiFailure),
    #[error("no draft has been created yet")]
    MissingDraft,
    #[error("no resumable duplicate is pending")]
    NothingToResume,
    #[error("the wizard is already complete")]
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardPhase {
    Editing,
    /// Step one matched an existing record; waiting for resume or start-fresh.
    DuplicatePrompt(DuplicateMatch),
    Completed(RegistrationCode),
}

/// Client-side mirror of the draft state machine.
///
/// Steps only advance on successful server responses. Field edits are
/// persisted through a debounced writer; server-confirmed state is written
/// immediately.
pub struct WizardCoordinator<Api, S> {
    api: Api,
    storage: S,
    writer: DebouncedWriter,
    step: DraftStep,
    phase: WizardPhase,
    identity: IdentityForm,
    contact: ContactForm,
    review: ReviewForm,
    draft_id: Option<DraftId>,
    draft_identity: Option<IdentityPair>,
    errors: FieldErrors,
}

impl<Api, S> WizardCoordinator<Api, S>
where
    Api: WizardApi,
    S: WizardStorage,
{
    /// Rebuild from local storage; jumps to the stored step only when a draft exists.
    pub fn restore(api: Api, storage: S, debounce: Duration) -> Self {
        let snapshot = WizardSnapshot::read(&storage);
        let step = match (snapshot.draft_id, snapshot.last_step) {
            (Some(_), Some(step)) => step,
            _ => DraftStep::Identity,
        };

        Self {
            api,
            storage,
            writer: DebouncedWriter::new(debounce),
            step,
            phase: WizardPhase::Editing,
            identity: snapshot.step1.unwrap_or_default(),
            contact: snapshot.step2.unwrap_or_default(),
            review: snapshot.step3.unwrap_or_default(),
            draft_id: snapshot.draft_id,
            draft_identity: snapshot.draft_identity,
            errors: FieldErrors::default(),
        }
    }

    pub fn step(&self) -> DraftStep {
        self.step
    }

    pub fn phase(&self) -> &WizardPhase {
        &self.phase
    }

    pub fn draft_id(&self) -> Option<DraftId> {
        self.draft_id
    }

    pub fn identity(&self) -> &IdentityForm {
        &self.identity
    }

    pub fn contact(&self) -> &ContactForm {
        &self.contact
    }

    pub fn review(&self) -> &ReviewForm {
        &self.review
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn update_identity(&mut self, form: IdentityForm, now: Instant) {
        self.schedule(STEP1_KEY, &form, now);
        self.identity = form;
    }

    pub fn update_contact(&mut self, form: ContactForm, now: Instant) {
        self.schedule(STEP2_KEY, &form, now);
        self.contact = form;
    }

    pub fn update_review(&mut self, form: ReviewForm, now: Instant) {
        self.schedule(STEP3_KEY, &form, now);
        self.review = form;
    }

    pub fn flush_due(&mut self, now: Instant) -> usize {
        self.writer.flush_due(&mut self.storage, now)
    }

    /// Step one. Reuses the current draft while the identity pair is unchanged,
    /// otherwise screens for duplicates and creates a new draft.
    pub fn submit_identity(&mut self) -> Result<(), WizardError> {
        self.ensure_active()?;
        self.errors = FieldErrors::default();
        let pair = IdentityPair::of(&self.identity);

        if self.draft_id.is_some() && self.draft_identity.as_ref() == Some(&pair) {
            self.enter(DraftStep::Contact);
            return Ok(());
        }

        match self.api.check_duplicate(&pair.nisn, &pair.nik, self.draft_id) {
            Ok(DuplicateCheck::Found(found)) => {
                debug!(status = ?found.status, "duplicate identity found at step one");
                self.phase = WizardPhase::DuplicatePrompt(found);
                return Ok(());
            }
            Ok(DuplicateCheck::NotFound) => {}
            Err(failure) => return Err(self.absorb(failure)),
        }

        match self.draft_id {
            Some(previous) => self.replace(previous),
            None => self.create(false),
        }
    }

    /// Accept the resume offer from a duplicate prompt.
    pub fn resume(&mut self) -> Result<(), WizardError> {
        match &self.phase {
            WizardPhase::DuplicatePrompt(found) if found.status == DuplicateStatus::Draft => {}
            _ => return Err(WizardError::NothingToResume),
        }

        let pair = IdentityPair::of(&self.identity);
        let payload = self
            .api
            .resume(&pair.nisn, &pair.nik)
            .map_err(|failure| self.absorb(failure))?;

        self.writer.cancel();
        self.identity = payload.step1;
        if let Some(contact) = payload.step2 {
            self.contact = contact;
        }
        if let Some(review) = payload.step3 {
            self.review.school_origin = review.school_origin;
        }
        self.draft_id = Some(payload.draft_id);
        self.draft_identity = Some(IdentityPair::of(&self.identity));
        self.phase = WizardPhase::Editing;

        self.write_now(STEP1_KEY, &self.identity.clone());
        if payload.current_step >= DraftStep::Contact {
            self.write_now(STEP2_KEY, &self.contact.clone());
        }
        self.persist_draft();
        self.enter(payload.current_step.next());
        Ok(())
    }

    /// Discard local state and any prior draft for this identity, then create anew.
    pub fn start_fresh(&mut self) -> Result<(), WizardError> {
        self.ensure_active()?;
        self.writer.cancel();
        storage::clear(&mut self.storage);
        self.draft_id = None;
        self.draft_identity = None;
        self.contact = ContactForm::default();
        self.review = ReviewForm::default();
        self.phase = WizardPhase::Editing;
        self.write_now(STEP1_KEY, &self.identity.clone());
        self.create(true)
    }

    pub fn dismiss_prompt(&mut self) {
        if matches!(self.phase, WizardPhase::DuplicatePrompt(_)) {
            self.phase = WizardPhase::Editing;
        }
    }

    pub fn submit_contact(&mut self) -> Result<(), WizardError> {
        self.ensure_active()?;
        let draft_id = self.draft_id.ok_or(WizardError::MissingDraft)?;
        self.errors = FieldErrors::default();

        self.api
            .submit_contact(draft_id, &self.contact)
            .map_err(|failure| self.absorb(failure))?;

        self.write_now(STEP2_KEY, &self.contact.clone());
        self.enter(DraftStep::Review);
        Ok(())
    }

    /// Final step. On success local persistence is wiped; the credential cookie
    /// set by the server is the only remaining handle on the draft.
    pub fn submit_review(&mut self) -> Result<RegistrationCode, WizardError> {
        self.ensure_active()?;
        let draft_id = self.draft_id.ok_or(WizardError::MissingDraft)?;
        self.errors = FieldErrors::default();

        let code = self
            .api
            .finalize(draft_id, &self.review)
            .map_err(|failure| self.absorb(failure))?;

        self.writer.cancel();
        storage::clear(&mut self.storage);
        self.phase = WizardPhase::Completed(code.clone());
        Ok(code)
    }

    /// Move one step back without touching the server.
    pub fn back(&mut self) {
        if self.phase != WizardPhase::Editing {
            return;
        }
        let previous = match self.step {
            DraftStep::Identity | DraftStep::Contact => DraftStep::Identity,
            DraftStep::Review => DraftStep::Contact,
        };
        self.enter(previous);
    }

    fn create(&mut self, force_new: bool) -> Result<(), WizardError> {
        let draft_id = self
            .api
            .create_draft(&self.identity, force_new)
            .map_err(|failure| self.absorb(failure))?;

        self.draft_id = Some(draft_id);
        self.draft_identity = Some(IdentityPair::of(&self.identity));
        self.write_now(STEP1_KEY, &self.identity.clone());
        self.persist_draft();
        self.enter(DraftStep::Contact);
        Ok(())
    }

    fn replace(&mut self, previous: DraftId) -> Result<(), WizardError> {
        let draft_id = self
            .api
            .replace_draft(previous, &self.identity)
            .map_err(|failure| self.absorb(failure))?;

        debug!(%previous, %draft_id, "identity edited; draft replaced");
        self.draft_id = Some(draft_id);
        self.draft_identity = Some(IdentityPair::of(&self.identity));
        self.write_now(STEP1_KEY, &self.identity.clone());
        self.persist_draft();
        self.enter(DraftStep::Contact);
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), WizardError> {
        if matches!(self.phase, WizardPhase::Completed(_)) {
            Err(WizardError::Completed)
        } else {
            Ok(())
        }
    }

    /// Record field errors and route identity conflicts to the prompt.
    fn absorb(&mut self, failure: ApiFailure) -> WizardError {
        match &failure {
            ApiFailure::Validation(errors) => self.errors = errors.clone(),
            ApiFailure::Conflict(found) => {
                self.phase = WizardPhase::DuplicatePrompt(found.clone());
            }
            ApiFailure::NotFound | ApiFailure::Server(_) => {}
        }
        WizardError::Api(failure)
    }

    fn enter(&mut self, step: DraftStep) {
        self.step = step;
        self.phase = WizardPhase::Editing;
        self.storage
            .set(LAST_STEP_KEY, step.number().to_string());
    }

    fn persist_draft(&mut self) {
        if let Some(draft_id) = self.draft_id {
            self.storage.set(DRAFT_ID_KEY, draft_id.to_string());
        }
        if let Some(pair) = self.draft_identity.clone() {
            self.write_now(DRAFT_IDENTITY_KEY, &pair);
        }
    }

    fn schedule<T: serde::Serialize>(&mut self, key: &'static str, value: &T, now: Instant) {
        if let Ok(raw) = serde_json::to_string(value) {
            self.writer.schedule(key, raw, now);
        }
    }

    fn write_now<T: serde::Serialize>(&mut self, key: &'static str, value: &T) {
        if let Ok(raw) = serde_json::to_string(value) {
            self.storage.set(key, raw);
        }
    }
}
