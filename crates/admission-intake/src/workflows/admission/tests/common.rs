use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::config::{AdmissionConfig, CodeFormat};
use crate::workflows::admission::accounts::{
    Account, AccountDirectory, AccountId, AccountRole, CandidateId, CandidateRecord,
    CandidateStatus, Enrollment, NewEnrollment, RegisteredIdentity,
};
use crate::workflows::admission::clock::Clock;
use crate::workflows::admission::domain::{
    ContactForm, Draft, DraftId, IdentityForm, NewDraft, ReviewForm, SecretCredential,
};
use crate::workflows::admission::issuer::CodeSource;
use crate::workflows::admission::repository::{DraftRepository, RepositoryError};
use crate::workflows::admission::service::DraftService;
use crate::workflows::admission::waves::{
    AdmissionWave, NewAdmissionWave, WaveId, WaveRepository,
};

pub(super) const NISN: &str = "0012345678";
pub(super) const NIK: &str = "3301123456789001";

pub(super) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 21, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn identity_form() -> IdentityForm {
    IdentityForm {
        full_name: "Ahmad Zakiyah".to_string(),
        nisn: NISN.to_string(),
        nik: NIK.to_string(),
        gender: "L".to_string(),
        place_of_birth: "Cilacap".to_string(),
        date_of_birth: "2010-05-17".to_string(),
    }
}

pub(super) fn other_identity_form() -> IdentityForm {
    IdentityForm {
        full_name: "Siti Rahma".to_string(),
        nisn: "0098765432".to_string(),
        nik: "3301129876543210".to_string(),
        gender: "P".to_string(),
        place_of_birth: "Purwokerto".to_string(),
        date_of_birth: "2010-11-02".to_string(),
    }
}

pub(super) fn contact_form() -> ContactForm {
    ContactForm {
        mother_name: "Siti Aminah".to_string(),
        whatsapp_number: "081234567890".to_string(),
        email: "Ahmad.Zaki@Example.com".to_string(),
        phone_number: None,
        addr_jalan: "Jl. Merdeka No. 1".to_string(),
        addr_rt: "001".to_string(),
        addr_rw: "002".to_string(),
        addr_desa: "Sidanegara".to_string(),
        addr_kec: "Cilacap Tengah".to_string(),
        addr_kab: "Cilacap".to_string(),
        addr_prov: "Jawa Tengah".to_string(),
    }
}

pub(super) fn review_form() -> ReviewForm {
    ReviewForm {
        school_origin: "SMP Negeri 1 Cilacap".to_string(),
        agreement: true,
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub(super) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(super) fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub(super) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }

    pub(super) fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

/// Hands out scripted suffixes, repeating the last one once the script runs out.
#[derive(Debug)]
pub(super) struct ScriptedCodes {
    script: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl ScriptedCodes {
    pub(super) fn new(suffixes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(suffixes.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(suffixes.last().copied().unwrap_or("AAAAA").to_string()),
        })
    }
}

impl CodeSource for ScriptedCodes {
    fn suffix(&self, _format: &CodeFormat) -> String {
        let next = self.script.lock().expect("script mutex poisoned").pop_front();
        match next {
            Some(suffix) => suffix,
            None => self.last.lock().expect("last mutex poisoned").clone(),
        }
    }
}

/// Issues every suffix twice in a row, so concurrent finalizers collide.
#[derive(Debug, Default)]
pub(super) struct PairedCodes {
    issued: AtomicU64,
}

impl CodeSource for PairedCodes {
    fn suffix(&self, format: &CodeFormat) -> String {
        let charset = format.charset();
        let base = charset.len() as u64;
        let mut n = self.issued.fetch_add(1, Ordering::SeqCst) / 2;
        let mut digits = Vec::with_capacity(format.suffix_length());
        for _ in 0..format.suffix_length() {
            digits.push(charset[(n % base) as usize]);
            n /= base;
        }
        digits.into_iter().rev().collect()
    }
}

/// Step-one form with distinct NISN, NIK and name per `n`.
pub(super) fn numbered_identity_form(n: usize) -> IdentityForm {
    IdentityForm {
        full_name: format!("Peserta Nomor {n}"),
        nisn: format!("00200{n:05}"),
        nik: format!("33020000000{n:05}"),
        gender: if n % 2 == 0 { "L" } else { "P" }.to_string(),
        place_of_birth: "Banyumas".to_string(),
        date_of_birth: "2010-07-01".to_string(),
    }
}

#[derive(Default)]
pub(super) struct MemoryDrafts {
    inner: Mutex<DraftTable>,
}

#[derive(Default)]
struct DraftTable {
    next_id: u64,
    drafts: BTreeMap<DraftId, Draft>,
}

impl MemoryDrafts {
    pub(super) fn all(&self) -> Vec<Draft> {
        self.inner
            .lock()
            .expect("draft mutex poisoned")
            .drafts
            .values()
            .cloned()
            .collect()
    }

    pub(super) fn get(&self, id: DraftId) -> Option<Draft> {
        self.inner
            .lock()
            .expect("draft mutex poisoned")
            .drafts
            .get(&id)
            .cloned()
    }

    /// Overwrite a stored draft without any uniqueness checks.
    pub(super) fn force(&self, draft: Draft) {
        self.inner
            .lock()
            .expect("draft mutex poisoned")
            .drafts
            .insert(draft.id, draft);
    }
}

impl DraftRepository for MemoryDrafts {
    fn insert(&self, new: NewDraft) -> Result<Draft, RepositoryError> {
        let mut table = self.inner.lock().expect("draft mutex poisoned");
        let claimed = table.drafts.values().any(|draft| {
            draft.is_valid(new.created_at)
                && draft.identity.claims(&new.identity.nisn, &new.identity.nik)
        });
        if claimed {
            return Err(RepositoryError::Conflict);
        }

        table.next_id += 1;
        let draft = Draft::from_new(DraftId(table.next_id), new);
        table.drafts.insert(draft.id, draft.clone());
        Ok(draft)
    }

    fn update(&self, draft: Draft) -> Result<(), RepositoryError> {
        let mut table = self.inner.lock().expect("draft mutex poisoned");
        match table.drafts.get(&draft.id) {
            None => return Err(RepositoryError::NotFound),
            Some(stored) if stored.reissues(&draft) => return Err(RepositoryError::Finalized),
            Some(_) => {}
        }
        let clash = table.drafts.values().any(|other| {
            other.id != draft.id
                && ((draft.registration_code.is_some()
                    && other.registration_code == draft.registration_code)
                    || (draft.secret_credential.is_some()
                        && other.secret_credential == draft.secret_credential))
        });
        if clash {
            return Err(RepositoryError::Conflict);
        }
        table.drafts.insert(draft.id, draft);
        Ok(())
    }

    fn fetch(&self, id: DraftId) -> Result<Option<Draft>, RepositoryError> {
        Ok(self.get(id))
    }

    fn find_by_identity(&self, nisn: &str, nik: &str) -> Result<Vec<Draft>, RepositoryError> {
        Ok(self
            .all()
            .into_iter()
            .filter(|draft| draft.deleted_at.is_none() && draft.identity.claims(nisn, nik))
            .collect())
    }

    fn find_by_credential(
        &self,
        credential: &SecretCredential,
    ) -> Result<Option<Draft>, RepositoryError> {
        Ok(self.all().into_iter().find(|draft| {
            draft.deleted_at.is_none() && draft.secret_credential.as_ref() == Some(credential)
        }))
    }

    fn soft_delete(&self, id: DraftId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut table = self.inner.lock().expect("draft mutex poisoned");
        let draft = table.drafts.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        draft.deleted_at = Some(at);
        Ok(())
    }

    fn purge(&self, id: DraftId) -> Result<bool, RepositoryError> {
        let mut table = self.inner.lock().expect("draft mutex poisoned");
        Ok(table.drafts.remove(&id).is_some())
    }

    fn expired_before(&self, now: DateTime<Utc>) -> Result<Vec<DraftId>, RepositoryError> {
        Ok(self
            .all()
            .into_iter()
            .filter(|draft| draft.expires_at.is_some_and(|expires_at| expires_at < now))
            .map(|draft| draft.id)
            .collect())
    }
}

#[derive(Default)]
pub(super) struct MemoryAccounts {
    enrollments: Mutex<Vec<Enrollment>>,
}

impl MemoryAccounts {
    /// Seed a completed registration for the given identity pair.
    pub(super) fn seed(&self, name: &str, email: &str, nisn: &str, nik: &str) {
        let mut enrollments = self.enrollments.lock().expect("accounts mutex poisoned");
        let id = enrollments.len() as u64 + 1;
        enrollments.push(Enrollment {
            account: Account {
                id: AccountId(id),
                name: name.to_string(),
                email: email.to_string(),
                password_hash: "$argon2id$seeded".to_string(),
                role: AccountRole::Candidate,
                created_at: t0(),
            },
            candidate: CandidateRecord {
                id: CandidateId(id),
                account_id: AccountId(id),
                admission_wave_id: None,
                registration_draft_id: None,
                nisn: nisn.to_string(),
                nik: nik.to_string(),
                full_name: name.to_string(),
                gender: crate::workflows::admission::domain::Gender::Female,
                place_of_birth: "Cilacap".to_string(),
                date_of_birth: NaiveDate::from_ymd_opt(2010, 1, 1).expect("valid date"),
                address_full: None,
                address_detail: None,
                school_origin: None,
                status: CandidateStatus::Submitted,
            },
        });
    }

    pub(super) fn enrollments(&self) -> Vec<Enrollment> {
        self.enrollments
            .lock()
            .expect("accounts mutex poisoned")
            .clone()
    }
}

impl AccountDirectory for MemoryAccounts {
    fn find_by_identity(
        &self,
        nisn: &str,
        nik: &str,
    ) -> Result<Option<RegisteredIdentity>, RepositoryError> {
        let enrollments = self.enrollments.lock().expect("accounts mutex poisoned");
        Ok(enrollments
            .iter()
            .find(|enrollment| enrollment.candidate.nisn == nisn || enrollment.candidate.nik == nik)
            .map(|enrollment| RegisteredIdentity {
                display_name: enrollment.account.name.clone(),
            }))
    }

    fn email_taken(&self, email: &str) -> Result<bool, RepositoryError> {
        let enrollments = self.enrollments.lock().expect("accounts mutex poisoned");
        Ok(enrollments
            .iter()
            .any(|enrollment| enrollment.account.email.eq_ignore_ascii_case(email)))
    }

    fn enroll(&self, new: NewEnrollment) -> Result<Enrollment, RepositoryError> {
        if self.email_taken(&new.email)? || self.find_by_identity(&new.nisn, &new.nik)?.is_some() {
            return Err(RepositoryError::Conflict);
        }
        let mut enrollments = self.enrollments.lock().expect("accounts mutex poisoned");
        let id = enrollments.len() as u64 + 1;
        let enrollment = Enrollment {
            account: Account {
                id: AccountId(id),
                name: new.name.clone(),
                email: new.email.clone(),
                password_hash: new.password_hash.clone(),
                role: AccountRole::Candidate,
                created_at: new.created_at,
            },
            candidate: CandidateRecord {
                id: CandidateId(id),
                account_id: AccountId(id),
                admission_wave_id: new.admission_wave_id,
                registration_draft_id: Some(new.registration_draft_id),
                nisn: new.nisn,
                nik: new.nik,
                full_name: new.name,
                gender: new.gender,
                place_of_birth: new.place_of_birth,
                date_of_birth: new.date_of_birth,
                address_full: new.address_full,
                address_detail: new.address_detail,
                school_origin: new.school_origin,
                status: CandidateStatus::Draft,
            },
        };
        enrollments.push(enrollment.clone());
        Ok(enrollment)
    }
}

#[derive(Default)]
pub(super) struct MemoryWaves {
    waves: Mutex<Vec<AdmissionWave>>,
}

impl WaveRepository for MemoryWaves {
    fn insert(&self, wave: NewAdmissionWave) -> Result<AdmissionWave, RepositoryError> {
        let mut waves = self.waves.lock().expect("wave mutex poisoned");
        let stored = AdmissionWave {
            id: WaveId(waves.len() as u64 + 1),
            title: wave.title,
            academic_year: wave.academic_year,
            start_date: wave.start_date,
            end_date: wave.end_date,
            quota_target: wave.quota_target,
            is_active: false,
        };
        waves.push(stored.clone());
        Ok(stored)
    }

    fn list(&self) -> Result<Vec<AdmissionWave>, RepositoryError> {
        Ok(self.waves.lock().expect("wave mutex poisoned").clone())
    }

    fn active(&self) -> Result<Option<AdmissionWave>, RepositoryError> {
        Ok(self
            .waves
            .lock()
            .expect("wave mutex poisoned")
            .iter()
            .find(|wave| wave.is_active)
            .cloned())
    }

    fn activate(&self, id: WaveId) -> Result<AdmissionWave, RepositoryError> {
        let mut waves = self.waves.lock().expect("wave mutex poisoned");
        if !waves.iter().any(|wave| wave.id == id) {
            return Err(RepositoryError::NotFound);
        }
        for wave in waves.iter_mut() {
            wave.is_active = wave.id == id;
        }
        waves
            .iter()
            .find(|wave| wave.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }
}

/// Repository whose every call fails, for 500-path tests.
pub(super) struct UnavailableDrafts;

impl DraftRepository for UnavailableDrafts {
    fn insert(&self, _draft: NewDraft) -> Result<Draft, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn update(&self, _draft: Draft) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn fetch(&self, _id: DraftId) -> Result<Option<Draft>, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn find_by_identity(&self, _nisn: &str, _nik: &str) -> Result<Vec<Draft>, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn find_by_credential(
        &self,
        _credential: &SecretCredential,
    ) -> Result<Option<Draft>, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn soft_delete(&self, _id: DraftId, _at: DateTime<Utc>) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn purge(&self, _id: DraftId) -> Result<bool, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn expired_before(&self, _now: DateTime<Utc>) -> Result<Vec<DraftId>, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }
}

pub(super) struct Harness {
    pub drafts: Arc<MemoryDrafts>,
    pub accounts: Arc<MemoryAccounts>,
    pub waves: Arc<MemoryWaves>,
    pub clock: Arc<ManualClock>,
    pub service: Arc<DraftService<MemoryDrafts, MemoryAccounts>>,
}

pub(super) fn harness() -> Harness {
    harness_with(|service| service)
}

pub(super) fn harness_with(
    customize: impl FnOnce(
        DraftService<MemoryDrafts, MemoryAccounts>,
    ) -> DraftService<MemoryDrafts, MemoryAccounts>,
) -> Harness {
    harness_configured(AdmissionConfig::default(), customize)
}

pub(super) fn harness_configured(
    config: AdmissionConfig,
    customize: impl FnOnce(
        DraftService<MemoryDrafts, MemoryAccounts>,
    ) -> DraftService<MemoryDrafts, MemoryAccounts>,
) -> Harness {
    let drafts = Arc::new(MemoryDrafts::default());
    let accounts = Arc::new(MemoryAccounts::default());
    let waves = Arc::new(MemoryWaves::default());
    let clock = ManualClock::at(t0());

    let service = DraftService::new(
        drafts.clone(),
        accounts.clone(),
        waves.clone(),
        config,
    )
    .with_clock(clock.clone());

    Harness {
        drafts,
        accounts,
        waves,
        clock,
        service: Arc::new(customize(service)),
    }
}

impl Harness {
    /// Create, advance and finalize a draft, returning it with its credential.
    pub(super) fn finalized_draft(&self) -> (Draft, SecretCredential) {
        let draft = self
            .service
            .create_initial(&identity_form(), false)
            .expect("draft created");
        self.service
            .advance_to_contact(draft.id, &contact_form())
            .expect("contact saved");
        let finalization = self
            .service
            .finalize(draft.id, &review_form(), None)
            .expect("draft finalized");
        let credential = finalization.credential.expect("credential minted");
        (finalization.draft, credential)
    }
}

pub(super) fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("serializable body")))
        .expect("valid request")
}

pub(super) async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}

pub(super) fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(axum::http::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok().map(str::to_string))
        .collect()
}
