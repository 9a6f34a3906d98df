use admission_intake::config::AdmissionConfig;
use admission_intake::workflows::admission::{
    Account, AccountDirectory, AccountId, AccountRole, AdmissionWave, CandidateId,
    CandidateRecord, CandidateStatus, Draft, DraftId, DraftRepository, Enrollment,
    NewAdmissionWave, NewDraft, NewEnrollment, RegisteredIdentity, RepositoryError,
    SecretCredential, WaveId, WaveRepository,
};
use chrono::{DateTime, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Everything the intake flow persists, serialized as one JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    next_draft_id: u64,
    drafts: Vec<Draft>,
    enrollments: Vec<Enrollment>,
    waves: Vec<AdmissionWave>,
}

/// Draft, account, and wave storage.
///
/// A file-backed store holds no state between calls: every read and write
/// reloads the snapshot under an advisory lock on a `.lock` sidecar, so the
/// server and a `prune` or `wave` invocation against the same file never
/// overwrite each other. Writes apply to a copy that is persisted before it
/// becomes visible; a failed write leaves the stored state untouched.
///
/// The calls are blocking; async callers run them on the blocking pool.
pub(crate) struct AdmissionStore {
    backing: Backing,
}

enum Backing {
    Memory(Mutex<Snapshot>),
    File { path: PathBuf, local: Mutex<()> },
}

impl AdmissionStore {
    pub(crate) fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(Mutex::new(Snapshot::default())),
        }
    }

    pub(crate) fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let store = Self {
            backing: Backing::File {
                path: path.into(),
                local: Mutex::new(()),
            },
        };
        let drafts = store.read(|state| state.drafts.len())?;
        if let Backing::File { path, .. } = &store.backing {
            info!(path = %path.display(), drafts, "admission store opened");
        }
        Ok(store)
    }

    pub(crate) fn from_config(config: &AdmissionConfig) -> Result<Self, RepositoryError> {
        match &config.data_path {
            Some(path) => Self::open(path.clone()),
            None => Ok(Self::in_memory()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> Result<T, RepositoryError> {
        match &self.backing {
            Backing::Memory(state) => Ok(f(&*lock(state)?)),
            Backing::File { path, local } => {
                let _local = lock(local)?;
                let _shared = FileLock::shared(path)?;
                Ok(f(&load(path)?))
            }
        }
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        match &self.backing {
            Backing::Memory(state) => {
                let mut guard = lock(state)?;
                let mut next = guard.clone();
                let value = f(&mut next)?;
                *guard = next;
                Ok(value)
            }
            Backing::File { path, local } => {
                let _local = lock(local)?;
                let _exclusive = FileLock::exclusive(path)?;
                let mut next = load(path)?;
                let value = f(&mut next)?;
                persist(path, &next)?;
                Ok(value)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable("admission store lock poisoned".to_string()))
}

/// Advisory lock on `<snapshot>.lock`, released when dropped.
struct FileLock(File);

impl FileLock {
    fn shared(snapshot: &Path) -> Result<Self, RepositoryError> {
        let (file, path) = Self::sidecar(snapshot)?;
        file.lock_shared().map_err(|err| unavailable(&path, err))?;
        Ok(Self(file))
    }

    fn exclusive(snapshot: &Path) -> Result<Self, RepositoryError> {
        let (file, path) = Self::sidecar(snapshot)?;
        file.lock().map_err(|err| unavailable(&path, err))?;
        Ok(Self(file))
    }

    fn sidecar(snapshot: &Path) -> Result<(File, PathBuf), RepositoryError> {
        let path = snapshot.with_extension("json.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| unavailable(&path, err))?;
        Ok((file, path))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = self.0.unlock() {
            warn!(error = %err, "failed to release admission store lock");
        }
    }
}

fn load(path: &Path) -> Result<Snapshot, RepositoryError> {
    match fs::read(path) {
        Ok(raw) => serde_json::from_slice(&raw).map_err(|err| unavailable(path, err)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Snapshot::default()),
        Err(err) => Err(unavailable(path, err)),
    }
}

fn persist(path: &Path, snapshot: &Snapshot) -> Result<(), RepositoryError> {
    let bytes = serde_json::to_vec_pretty(snapshot).map_err(|err| unavailable(path, err))?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, bytes).map_err(|err| unavailable(&staging, err))?;
    fs::rename(&staging, path).map_err(|err| unavailable(path, err))?;
    debug!(path = %path.display(), "admission snapshot written");
    Ok(())
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Unavailable(format!("{}: {err}", path.display()))
}

impl DraftRepository for AdmissionStore {
    fn insert(&self, new: NewDraft) -> Result<Draft, RepositoryError> {
        self.write(|state| {
            let claimed = state.drafts.iter().any(|draft| {
                draft.is_valid(new.created_at)
                    && draft.identity.claims(&new.identity.nisn, &new.identity.nik)
            });
            if claimed {
                return Err(RepositoryError::Conflict);
            }
            state.next_draft_id += 1;
            let draft = Draft::from_new(DraftId(state.next_draft_id), new);
            state.drafts.push(draft.clone());
            Ok(draft)
        })
    }

    fn update(&self, draft: Draft) -> Result<(), RepositoryError> {
        self.write(|state| {
            let stored = state
                .drafts
                .iter()
                .find(|stored| stored.id == draft.id)
                .ok_or(RepositoryError::NotFound)?;
            if stored.reissues(&draft) {
                return Err(RepositoryError::Finalized);
            }
            let clash = state.drafts.iter().any(|other| {
                other.id != draft.id
                    && ((draft.registration_code.is_some()
                        && other.registration_code == draft.registration_code)
                        || (draft.secret_credential.is_some()
                            && other.secret_credential == draft.secret_credential))
            });
            if clash {
                return Err(RepositoryError::Conflict);
            }
            let slot = state
                .drafts
                .iter_mut()
                .find(|stored| stored.id == draft.id)
                .ok_or(RepositoryError::NotFound)?;
            *slot = draft;
            Ok(())
        })
    }

    fn fetch(&self, id: DraftId) -> Result<Option<Draft>, RepositoryError> {
        self.read(|state| state.drafts.iter().find(|draft| draft.id == id).cloned())
    }

    fn find_by_identity(&self, nisn: &str, nik: &str) -> Result<Vec<Draft>, RepositoryError> {
        self.read(|state| {
            state
                .drafts
                .iter()
                .filter(|draft| draft.deleted_at.is_none() && draft.identity.claims(nisn, nik))
                .cloned()
                .collect()
        })
    }

    fn find_by_credential(
        &self,
        credential: &SecretCredential,
    ) -> Result<Option<Draft>, RepositoryError> {
        self.read(|state| {
            state
                .drafts
                .iter()
                .find(|draft| {
                    draft.deleted_at.is_none()
                        && draft.secret_credential.as_ref() == Some(credential)
                })
                .cloned()
        })
    }

    fn soft_delete(&self, id: DraftId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.write(|state| {
            let draft = state
                .drafts
                .iter_mut()
                .find(|draft| draft.id == id)
                .ok_or(RepositoryError::NotFound)?;
            draft.deleted_at = Some(at);
            Ok(())
        })
    }

    fn purge(&self, id: DraftId) -> Result<bool, RepositoryError> {
        self.write(|state| {
            let before = state.drafts.len();
            state.drafts.retain(|draft| draft.id != id);
            Ok(state.drafts.len() < before)
        })
    }

    fn expired_before(&self, now: DateTime<Utc>) -> Result<Vec<DraftId>, RepositoryError> {
        self.read(|state| {
            state
                .drafts
                .iter()
                .filter(|draft| draft.expires_at.is_some_and(|expires| expires < now))
                .map(|draft| draft.id)
                .collect()
        })
    }
}

fn registered(state: &Snapshot, nisn: &str, nik: &str) -> Option<RegisteredIdentity> {
    state
        .enrollments
        .iter()
        .find(|enrollment| enrollment.candidate.nisn == nisn || enrollment.candidate.nik == nik)
        .map(|enrollment| RegisteredIdentity {
            display_name: enrollment.account.name.clone(),
        })
}

fn email_in_use(state: &Snapshot, email: &str) -> bool {
    state
        .enrollments
        .iter()
        .any(|enrollment| enrollment.account.email.eq_ignore_ascii_case(email))
}

impl AccountDirectory for AdmissionStore {
    fn find_by_identity(
        &self,
        nisn: &str,
        nik: &str,
    ) -> Result<Option<RegisteredIdentity>, RepositoryError> {
        self.read(|state| registered(state, nisn, nik))
    }

    fn email_taken(&self, email: &str) -> Result<bool, RepositoryError> {
        self.read(|state| email_in_use(state, email))
    }

    fn enroll(&self, new: NewEnrollment) -> Result<Enrollment, RepositoryError> {
        self.write(|state| {
            if email_in_use(state, &new.email) || registered(state, &new.nisn, &new.nik).is_some()
            {
                return Err(RepositoryError::Conflict);
            }
            let id = state.enrollments.len() as u64 + 1;
            let enrollment = Enrollment {
                account: Account {
                    id: AccountId(id),
                    name: new.name.clone(),
                    email: new.email.clone(),
                    password_hash: new.password_hash,
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
            state.enrollments.push(enrollment.clone());
            Ok(enrollment)
        })
    }
}

impl WaveRepository for AdmissionStore {
    fn insert(&self, wave: NewAdmissionWave) -> Result<AdmissionWave, RepositoryError> {
        self.write(|state| {
            let next = state.waves.iter().map(|wave| wave.id.0).max().unwrap_or(0) + 1;
            let stored = AdmissionWave {
                id: WaveId(next),
                title: wave.title,
                academic_year: wave.academic_year,
                start_date: wave.start_date,
                end_date: wave.end_date,
                quota_target: wave.quota_target,
                is_active: false,
            };
            state.waves.push(stored.clone());
            Ok(stored)
        })
    }

    fn list(&self) -> Result<Vec<AdmissionWave>, RepositoryError> {
        self.read(|state| state.waves.clone())
    }

    fn active(&self) -> Result<Option<AdmissionWave>, RepositoryError> {
        self.read(|state| state.waves.iter().find(|wave| wave.is_active).cloned())
    }

    fn activate(&self, id: WaveId) -> Result<AdmissionWave, RepositoryError> {
        self.write(|state| {
            if !state.waves.iter().any(|wave| wave.id == id) {
                return Err(RepositoryError::NotFound);
            }
            for wave in state.waves.iter_mut() {
                wave.is_active = wave.id == id;
            }
            state
                .waves
                .iter()
                .find(|wave| wave.id == id)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        })
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
