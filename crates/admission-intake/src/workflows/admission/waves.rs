use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::repository::RepositoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaveId(pub u64);

/// An admission intake period. At most one wave is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionWave {
    pub id: WaveId,
    pub title: String,
    pub academic_year: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub quota_target: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAdmissionWave {
    pub title: String,
    pub academic_year: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub quota_target: u32,
}

/// Public projection shown at the top of the intake flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveWaveView {
    pub id: WaveId,
    pub title: String,
    pub academic_year: String,
    pub quota_target: u32,
}

impl From<&AdmissionWave> for ActiveWaveView {
    fn from(wave: &AdmissionWave) -> Self {
        Self {
            id: wave.id,
            title: wave.title.clone(),
            academic_year: wave.academic_year.clone(),
            quota_target: wave.quota_target,
        }
    }
}

/// Storage for admission waves.
///
/// `activate` must deactivate every other wave and activate the target in one
/// atomic step, so `active` never observes two active rows.
pub trait WaveRepository: Send + Sync {
    fn insert(&self, wave: NewAdmissionWave) -> Result<AdmissionWave, RepositoryError>;
    fn list(&self) -> Result<Vec<AdmissionWave>, RepositoryError>;
    fn active(&self) -> Result<Option<AdmissionWave>, RepositoryError>;
    fn activate(&self, id: WaveId) -> Result<AdmissionWave, RepositoryError>;
}
