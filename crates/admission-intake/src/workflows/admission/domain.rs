use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::waves::WaveId;

/// Identifier wrapper for registration drafts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftId(pub u64);

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-recorded wizard progress. Never moves backwards on the normal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DraftStep {
    Identity,
    Contact,
    Review,
}

impl DraftStep {
    pub fn number(self) -> u8 {
        match self {
            DraftStep::Identity => 1,
            DraftStep::Contact => 2,
            DraftStep::Review => 3,
        }
    }

    /// The step a returning registrant should land on, capped at review.
    pub fn next(self) -> DraftStep {
        match self {
            DraftStep::Identity => DraftStep::Contact,
            DraftStep::Contact | DraftStep::Review => DraftStep::Review,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DraftStep::Identity => "identity",
            DraftStep::Contact => "contact",
            DraftStep::Review => "review",
        }
    }
}

impl From<DraftStep> for u8 {
    fn from(step: DraftStep) -> Self {
        step.number()
    }
}

impl TryFrom<u8> for DraftStep {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DraftStep::Identity),
            2 => Ok(DraftStep::Contact),
            3 => Ok(DraftStep::Review),
            other => Err(format!("draft step must be 1, 2 or 3 (found {other})")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "L")]
    Male,
    #[serde(rename = "P")]
    Female,
}

impl Gender {
    pub fn code(self) -> &'static str {
        match self {
            Gender::Male => "L",
            Gender::Female => "P",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "L" => Some(Gender::Male),
            "P" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// Step one input exactly as the registrant typed it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityForm {
    pub full_name: String,
    pub nisn: String,
    pub nik: String,
    pub gender: String,
    pub place_of_birth: String,
    pub date_of_birth: String,
}

/// Step two input. Address keys keep the wire names used by the intake form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactForm {
    pub mother_name: String,
    pub whatsapp_number: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub addr_jalan: String,
    pub addr_rt: String,
    pub addr_rw: String,
    pub addr_desa: String,
    pub addr_kec: String,
    pub addr_kab: String,
    pub addr_prov: String,
}

/// Step three input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewForm {
    pub school_origin: String,
    #[serde(deserialize_with = "deserialize_acceptance")]
    pub agreement: bool,
}

/// Accepts the checkbox encodings browsers and form libraries send.
fn deserialize_acceptance<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(flag) => flag,
        serde_json::Value::Number(number) => number.as_u64() == Some(1),
        serde_json::Value::String(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        _ => false,
    })
}

/// Validated identity captured at step one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDetails {
    pub full_name: String,
    pub nisn: String,
    pub nik: String,
    pub gender: Gender,
    pub place_of_birth: String,
    pub date_of_birth: NaiveDate,
}

impl IdentityDetails {
    pub fn claims(&self, nisn: &str, nik: &str) -> bool {
        self.nisn == nisn || self.nik == nik
    }

    pub fn to_form(&self) -> IdentityForm {
        IdentityForm {
            full_name: self.full_name.clone(),
            nisn: self.nisn.clone(),
            nik: self.nik.clone(),
            gender: self.gender.code().to_string(),
            place_of_birth: self.place_of_birth.clone(),
            date_of_birth: self.date_of_birth.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Structured address with named, individually optional parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressDetail {
    pub street: Option<String>,
    pub rt: Option<String>,
    pub rw: Option<String>,
    pub village: Option<String>,
    pub district: Option<String>,
    pub regency: Option<String>,
    pub province: Option<String>,
}

impl AddressDetail {
    /// Single-line address built from the non-empty parts only.
    pub fn formatted(&self) -> String {
        let neighbourhood = match (present(&self.rt), present(&self.rw)) {
            (Some(rt), Some(rw)) => Some(format!("RT {rt}/RW {rw}")),
            (Some(rt), None) => Some(format!("RT {rt}")),
            (None, Some(rw)) => Some(format!("RW {rw}")),
            (None, None) => None,
        };

        let parts = [
            present(&self.street).map(str::to_string),
            neighbourhood,
            present(&self.village).map(str::to_string),
            present(&self.district).map(|district| format!("Kec. {district}")),
            present(&self.regency).map(str::to_string),
            present(&self.province).map(str::to_string),
        ];

        parts.into_iter().flatten().collect::<Vec<_>>().join(", ")
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Validated contact and address data captured at step two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub mother_name: String,
    pub whatsapp_number: String,
    pub phone_number: Option<String>,
    pub email: String,
    pub address: AddressDetail,
    pub address_full: String,
}

impl ContactDetails {
    pub fn to_form(&self) -> ContactForm {
        let part = |value: &Option<String>| value.clone().unwrap_or_default();
        ContactForm {
            mother_name: self.mother_name.clone(),
            whatsapp_number: self.whatsapp_number.clone(),
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            addr_jalan: part(&self.address.street),
            addr_rt: part(&self.address.rt),
            addr_rw: part(&self.address.rw),
            addr_desa: part(&self.address.village),
            addr_kec: part(&self.address.district),
            addr_kab: part(&self.address.regency),
            addr_prov: part(&self.address.province),
        }
    }
}

/// Public, human-displayed reference. Carries no authority on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationCode(pub String);

impl fmt::Display for RegistrationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque bearer credential for resuming a finalized draft.
///
/// Only ever travels inside the HttpOnly cookie; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretCredential(String);

impl SecretCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretCredential(**redacted**)")
    }
}

impl Serialize for SecretCredential {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretCredential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretCredential)
    }
}

/// Insert payload for a fresh step-one draft; storage assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDraft {
    pub admission_wave_id: Option<WaveId>,
    pub identity: IdentityDetails,
    pub created_at: DateTime<Utc>,
}

/// Persisted, in-progress, unauthenticated registration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub id: DraftId,
    pub admission_wave_id: Option<WaveId>,
    pub current_step: DraftStep,
    pub identity: IdentityDetails,
    pub contact: Option<ContactDetails>,
    pub school_origin: Option<String>,
    pub registration_code: Option<RegistrationCode>,
    pub secret_credential: Option<SecretCredential>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Draft {
    pub fn from_new(id: DraftId, new: NewDraft) -> Self {
        Self {
            id,
            admission_wave_id: new.admission_wave_id,
            current_step: DraftStep::Identity,
            identity: new.identity,
            contact: None,
            school_origin: None,
            registration_code: None,
            secret_credential: None,
            expires_at: None,
            created_at: new.created_at,
            updated_at: new.created_at,
            deleted_at: None,
        }
    }

    /// Not deleted, and either never finalized or finalized with time to spare.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && !self.is_expired(now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_finalized(&self) -> bool {
        self.registration_code.is_some()
    }

    /// Whether writing `incoming` over this stored draft would replace an issued
    /// code or credential. Stores reject such writes with
    /// [`RepositoryError::Finalized`](super::repository::RepositoryError::Finalized).
    pub fn reissues(&self, incoming: &Draft) -> bool {
        let code_changed = self.registration_code.is_some()
            && self.registration_code != incoming.registration_code;
        let credential_changed = self.secret_credential.is_some()
            && self.secret_credential != incoming.secret_credential;
        code_changed || credential_changed
    }
}

/// Full draft payload handed back to a returning registrant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub draft_id: DraftId,
    pub current_step: DraftStep,
    pub step1: IdentityForm,
    pub step2: Option<ContactForm>,
    pub step3: Option<ReviewSnapshot>,
}

impl ResumePayload {
    pub fn from_draft(draft: &Draft) -> Self {
        let step2 = if draft.current_step >= DraftStep::Contact {
            draft.contact.as_ref().map(ContactDetails::to_form)
        } else {
            None
        };
        let step3 = if draft.current_step >= DraftStep::Review {
            Some(ReviewSnapshot {
                school_origin: draft.school_origin.clone().unwrap_or_default(),
                registration_code: draft.registration_code.clone(),
            })
        } else {
            None
        };

        Self {
            draft_id: draft.id,
            current_step: draft.current_step,
            step1: draft.identity.to_form(),
            step2,
            step3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSnapshot {
    pub school_origin: String,
    pub registration_code: Option<RegistrationCode>,
}

/// Sanitized view of a gated draft for the account-creation screen.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationSummary {
    pub full_name: String,
    pub nisn: String,
    pub whatsapp_number: Option<String>,
    pub email: Option<String>,
    pub registration_code: Option<RegistrationCode>,
    pub school_origin: Option<String>,
}

impl From<&Draft> for RegistrationSummary {
    fn from(draft: &Draft) -> Self {
        Self {
            full_name: draft.identity.full_name.clone(),
            nisn: draft.identity.nisn.clone(),
            whatsapp_number: draft
                .contact
                .as_ref()
                .map(|contact| contact.whatsapp_number.clone()),
            email: draft.contact.as_ref().map(|contact| contact.email.clone()),
            registration_code: draft.registration_code.clone(),
            school_origin: draft.school_origin.clone(),
        }
    }
}
