use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::accounts::AccountDirectory;
use super::domain::{Draft, DraftId};
use super::repository::{DraftRepository, RepositoryError};

const NAME_VISIBLE_CHARS: usize = 5;
const MASK: char = '*';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStatus {
    /// Identity already belongs to a completed account.
    Registered,
    /// Identity is claimed by another in-progress draft.
    Draft,
}

/// Redacted identity shown when a duplicate is found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedIdentity {
    pub name: String,
    pub nisn: String,
    pub nik: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub draft_id: Option<DraftId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub status: DuplicateStatus,
    pub data: MaskedIdentity,
}

/// Outcome of a pre-create duplicate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DuplicateCheckBody", into = "DuplicateCheckBody")]
pub enum DuplicateCheck {
    NotFound,
    Found(DuplicateMatch),
}

impl DuplicateCheck {
    pub fn is_found(&self) -> bool {
        matches!(self, DuplicateCheck::Found(_))
    }
}

/// Wire shape: `{found:false}` or `{found:true, status, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DuplicateCheckBody {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    status: Option<DuplicateStatus>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    data: Option<MaskedIdentity>,
}

impl From<DuplicateCheck> for DuplicateCheckBody {
    fn from(check: DuplicateCheck) -> Self {
        match check {
            DuplicateCheck::NotFound => Self {
                found: false,
                status: None,
                data: None,
            },
            DuplicateCheck::Found(found) => Self {
                found: true,
                status: Some(found.status),
                data: Some(found.data),
            },
        }
    }
}

impl From<DuplicateCheckBody> for DuplicateCheck {
    fn from(body: DuplicateCheckBody) -> Self {
        match (body.found, body.status, body.data) {
            (true, Some(status), Some(data)) => DuplicateCheck::Found(DuplicateMatch { status, data }),
            _ => DuplicateCheck::NotFound,
        }
    }
}

/// Cross-checks an identity pair against accounts first, then active drafts.
pub struct DuplicateResolver<'a, R, A> {
    drafts: &'a R,
    accounts: &'a A,
}

impl<'a, R, A> DuplicateResolver<'a, R, A>
where
    R: DraftRepository,
    A: AccountDirectory,
{
    pub fn new(drafts: &'a R, accounts: &'a A) -> Self {
        Self { drafts, accounts }
    }

    /// Accounts are authoritative and never suppressed. The caller's own draft
    /// is excluded before the latest match is picked, so a different draft
    /// sharing either field is still reported.
    pub fn resolve(
        &self,
        nisn: &str,
        nik: &str,
        caller_draft_id: Option<DraftId>,
        now: DateTime<Utc>,
    ) -> Result<DuplicateCheck, RepositoryError> {
        if let Some(registered) = self.accounts.find_by_identity(nisn, nik)? {
            return Ok(DuplicateCheck::Found(DuplicateMatch {
                status: DuplicateStatus::Registered,
                data: MaskedIdentity {
                    name: mask_name(&registered.display_name),
                    nisn: mask_nisn(nisn),
                    nik: mask_nik(nik),
                    draft_id: None,
                    updated_at: None,
                },
            }));
        }

        let others = self
            .drafts
            .find_by_identity(nisn, nik)?
            .into_iter()
            .filter(|draft| caller_draft_id != Some(draft.id))
            .collect();
        let Some(draft) = latest_active(others, now) else {
            return Ok(DuplicateCheck::NotFound);
        };

        Ok(DuplicateCheck::Found(DuplicateMatch {
            status: DuplicateStatus::Draft,
            data: MaskedIdentity {
                name: mask_name(&draft.identity.full_name),
                nisn: mask_nisn(nisn),
                nik: mask_nik(nik),
                draft_id: Some(draft.id),
                updated_at: Some(relative_to(now, draft.updated_at)),
            },
        }))
    }
}

/// Most recently updated draft that is still valid at `now`.
pub(crate) fn latest_active(drafts: Vec<Draft>, now: DateTime<Utc>) -> Option<Draft> {
    drafts
        .into_iter()
        .filter(|draft| draft.is_valid(now))
        .max_by_key(|draft| (draft.updated_at, draft.id))
}

/// First word shown up to five characters then padded with `*` to its length;
/// later words reduced to their initial plus `***`.
pub fn mask_name(name: &str) -> String {
    name.split_whitespace()
        .enumerate()
        .map(|(index, word)| {
            if index == 0 {
                let length = word.chars().count();
                let visible: String = word.chars().take(NAME_VISIBLE_CHARS).collect();
                let hidden = length.saturating_sub(NAME_VISIBLE_CHARS);
                format!("{visible}{}", MASK.to_string().repeat(hidden))
            } else {
                let initial: String = word.chars().take(1).collect();
                format!("{initial}***")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `0012345678` -> `001234***8`
pub fn mask_nisn(nisn: &str) -> String {
    mask_digits(nisn, 6, 3, 1)
}

/// `3301123456789001` -> `330112******9001`
pub fn mask_nik(nik: &str) -> String {
    mask_digits(nik, 6, 6, 4)
}

fn mask_digits(value: &str, head: usize, masked: usize, tail: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    let head_part: String = chars.iter().take(head).collect();
    let tail_start = chars.len().saturating_sub(tail).max(head.min(chars.len()));
    let tail_part: String = chars.iter().skip(tail_start).collect();
    format!("{head_part}{}{tail_part}", MASK.to_string().repeat(masked))
}

/// Coarse "how long ago" label, e.g. `3 hours ago`.
pub fn relative_to(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(then);
    let seconds = elapsed.num_seconds();
    if seconds < 0 {
        return "just now".to_string();
    }

    let (amount, unit) = if seconds < 60 {
        return if seconds <= 1 {
            "just now".to_string()
        } else {
            format!("{seconds} seconds ago")
        };
    } else if seconds < 3_600 {
        (elapsed.num_minutes(), "minute")
    } else if seconds < 86_400 {
        (elapsed.num_hours(), "hour")
    } else if seconds < 7 * 86_400 {
        (elapsed.num_days(), "day")
    } else if seconds < 30 * 86_400 {
        (elapsed.num_weeks(), "week")
    } else if seconds < 365 * 86_400 {
        (elapsed.num_days() / 30, "month")
    } else {
        (elapsed.num_days() / 365, "year")
    };

    if amount == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{amount} {unit}s ago")
    }
}
