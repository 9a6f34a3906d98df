use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::workflows::admission::domain::{
    ContactForm, DraftId, DraftStep, IdentityForm, ReviewForm,
};

pub const STEP1_KEY: &str = "wizard_step1";
pub const STEP2_KEY: &str = "wizard_step2";
pub const STEP3_KEY: &str = "wizard_step3";
pub const DRAFT_ID_KEY: &str = "wizard_draft_id";
pub const LAST_STEP_KEY: &str = "wizard_last_step";
/// Identity pair the stored draft was created with.
pub const DRAFT_IDENTITY_KEY: &str = "wizard_draft_identity";

pub const ALL_KEYS: [&str; 6] = [
    STEP1_KEY,
    STEP2_KEY,
    STEP3_KEY,
    DRAFT_ID_KEY,
    LAST_STEP_KEY,
    DRAFT_IDENTITY_KEY,
];

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Browser-style string key/value storage that survives page loads.
pub trait WizardStorage {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn remove(&mut self, key: &str);
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWizardStorage {
    entries: BTreeMap<String, String>,
}

impl MemoryWizardStorage {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl WizardStorage for MemoryWizardStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPair {
    pub nisn: String,
    pub nik: String,
}

impl IdentityPair {
    pub fn of(form: &IdentityForm) -> Self {
        Self {
            nisn: form.nisn.trim().to_string(),
            nik: form.nik.trim().to_string(),
        }
    }
}

/// Everything the wizard mirrors locally. Unreadable entries are treated as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WizardSnapshot {
    pub step1: Option<IdentityForm>,
    pub step2: Option<ContactForm>,
    pub step3: Option<ReviewForm>,
    pub draft_id: Option<DraftId>,
    pub last_step: Option<DraftStep>,
    pub draft_identity: Option<IdentityPair>,
}

impl WizardSnapshot {
    pub fn read(storage: &impl WizardStorage) -> Self {
        Self {
            step1: read_json(storage, STEP1_KEY),
            step2: read_json(storage, STEP2_KEY),
            step3: read_json(storage, STEP3_KEY),
            draft_id: storage
                .get(DRAFT_ID_KEY)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(DraftId),
            last_step: storage
                .get(LAST_STEP_KEY)
                .and_then(|raw| raw.trim().parse::<u8>().ok())
                .and_then(|step| DraftStep::try_from(step).ok()),
            draft_identity: read_json(storage, DRAFT_IDENTITY_KEY),
        }
    }
}

fn read_json<T>(storage: &impl WizardStorage, key: &str) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    storage
        .get(key)
        .and_then(|raw| serde_json::from_str(&raw).ok())
}

pub fn clear(storage: &mut impl WizardStorage) {
    for key in ALL_KEYS {
        storage.remove(key);
    }
}

/// Coalesces rapid field edits into one write per key once input settles.
#[derive(Debug, Clone)]
pub struct DebouncedWriter {
    delay: Duration,
    pending: BTreeMap<&'static str, (String, Instant)>,
}

impl DebouncedWriter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: BTreeMap::new(),
        }
    }

    /// Queue `value` for `key`; a newer value for the same key restarts its timer.
    pub fn schedule(&mut self, key: &'static str, value: String, now: Instant) {
        self.pending.insert(key, (value, now + self.delay));
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Write every entry whose quiet period has elapsed. Returns the number written.
    pub fn flush_due(&mut self, storage: &mut impl WizardStorage, now: Instant) -> usize {
        let due: Vec<&'static str> = self
            .pending
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(key, _)| *key)
            .collect();

        for key in &due {
            if let Some((value, _)) = self.pending.remove(key) {
                storage.set(key, value);
            }
        }
        due.len()
    }

    pub fn flush_all(&mut self, storage: &mut impl WizardStorage) {
        for (key, (value, _)) in std::mem::take(&mut self.pending) {
            storage.set(key, value);
        }
    }

    pub fn cancel(&mut self) {
        self.pending.clear();
    }
}

impl Default for DebouncedWriter {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
