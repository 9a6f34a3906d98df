use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{
    AddressDetail, ContactDetails, ContactForm, Gender, IdentityDetails, IdentityForm, ReviewForm,
};

pub const NISN_LENGTH: usize = 10;
pub const NIK_LENGTH: usize = 16;
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Field-keyed messages, serialized the way form clients expect (`field -> [messages]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn first(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .and_then(|messages| messages.first())
            .map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn field_list(&self) -> String {
        self.fields().collect::<Vec<_>>().join(", ")
    }

    /// First message overall, used as the headline of a 422 body.
    pub fn headline(&self) -> Option<&str> {
        self.0
            .values()
            .next()
            .and_then(|messages| messages.first())
            .map(String::as_str)
    }

    fn into_result<T>(self, value: impl FnOnce() -> T) -> Result<T, ValidationError> {
        if self.is_empty() {
            Ok(value())
        } else {
            Err(ValidationError { errors: self })
        }
    }
}

/// Recoverable, field-level rejection of a step submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fields: {}", .errors.field_list())]
pub struct ValidationError {
    pub errors: FieldErrors,
}

impl From<FieldErrors> for ValidationError {
    fn from(errors: FieldErrors) -> Self {
        Self { errors }
    }
}

/// Validated account credentials for converting a finalized draft.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AccountForm {
    pub password: String,
    pub password_confirmation: String,
}

/// Turns raw step forms into validated draft values.
#[derive(Debug, Clone, Default)]
pub struct DraftGuard;

impl DraftGuard {
    pub fn identity_from_form(
        &self,
        form: &IdentityForm,
        today: NaiveDate,
    ) -> Result<IdentityDetails, ValidationError> {
        let mut errors = FieldErrors::default();

        let full_name = required(&mut errors, "full_name", &form.full_name, 255, "Full name");
        check_national_ids(&mut errors, &form.nisn, &form.nik);

        let gender = Gender::from_code(&form.gender);
        if gender.is_none() {
            errors.add("gender", "Gender must be selected.");
        }

        let place_of_birth = required(
            &mut errors,
            "place_of_birth",
            &form.place_of_birth,
            100,
            "Place of birth",
        );

        let date_of_birth = if form.date_of_birth.trim().is_empty() {
            errors.add("date_of_birth", "Date of birth is required.");
            None
        } else {
            match NaiveDate::parse_from_str(form.date_of_birth.trim(), "%Y-%m-%d") {
                Ok(date) if date < today => Some(date),
                Ok(_) | Err(_) => {
                    errors.add("date_of_birth", "Date of birth is not valid.");
                    None
                }
            }
        };

        match (gender, date_of_birth) {
            (Some(gender), Some(date_of_birth)) => errors.into_result(|| IdentityDetails {
                full_name,
                nisn: form.nisn.trim().to_string(),
                nik: form.nik.trim().to_string(),
                gender,
                place_of_birth,
                date_of_birth,
            }),
            _ => Err(ValidationError { errors }),
        }
    }

    /// Format check for a bare identity pair, as used by duplicate checks and resume.
    pub fn identity_pair(&self, nisn: &str, nik: &str) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::default();
        check_national_ids(&mut errors, nisn, nik);
        errors.into_result(|| ())
    }

    pub fn contact_from_form(&self, form: &ContactForm) -> Result<ContactDetails, ValidationError> {
        let mut errors = FieldErrors::default();

        let mother_name = required(&mut errors, "mother_name", &form.mother_name, 255, "Mother's name");

        let whatsapp_number = form.whatsapp_number.trim().to_string();
        let whatsapp_len = whatsapp_number.chars().count();
        if whatsapp_number.is_empty() {
            errors.add("whatsapp_number", "WhatsApp number is required.");
        } else if !(10..=14).contains(&whatsapp_len) {
            errors.add(
                "whatsapp_number",
                "WhatsApp number must be between 10 and 14 characters.",
            );
        }

        let email = form.email.trim().to_ascii_lowercase();
        if email.is_empty() {
            errors.add("email", "Email is required.");
        } else if !looks_like_email(&email) {
            errors.add("email", "Email format is not valid.");
        }

        let phone_number = form
            .phone_number
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        if phone_number
            .as_deref()
            .is_some_and(|phone| phone.chars().count() > 20)
        {
            errors.add("phone_number", "Phone number may not exceed 20 characters.");
        }

        let address = AddressDetail {
            street: Some(required(&mut errors, "addr_jalan", &form.addr_jalan, 255, "Street address")),
            rt: Some(required(&mut errors, "addr_rt", &form.addr_rt, 3, "RT")),
            rw: Some(required(&mut errors, "addr_rw", &form.addr_rw, 3, "RW")),
            village: Some(required(&mut errors, "addr_desa", &form.addr_desa, 100, "Village")),
            district: Some(required(&mut errors, "addr_kec", &form.addr_kec, 100, "District")),
            regency: Some(required(&mut errors, "addr_kab", &form.addr_kab, 100, "Regency/City")),
            province: Some(required(&mut errors, "addr_prov", &form.addr_prov, 100, "Province")),
        };

        errors.into_result(|| {
            let address_full = address.formatted();
            ContactDetails {
                mother_name,
                whatsapp_number,
                phone_number,
                email,
                address,
                address_full,
            }
        })
    }

    pub fn review_from_form(&self, form: &ReviewForm) -> Result<String, ValidationError> {
        let mut errors = FieldErrors::default();
        let school_origin = required(
            &mut errors,
            "school_origin",
            &form.school_origin,
            255,
            "School of origin",
        );
        if !form.agreement {
            errors.add("agreement", "You must confirm that the data is correct.");
        }
        errors.into_result(|| school_origin)
    }

    pub fn account_password<'a>(&self, form: &'a AccountForm) -> Result<&'a str, ValidationError> {
        let mut errors = FieldErrors::default();
        if form.password.is_empty() {
            errors.add("password", "Password is required.");
        } else if form.password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.add("password", "Password must be at least 8 characters.");
        } else if form.password != form.password_confirmation {
            errors.add("password", "Password confirmation does not match.");
        }
        errors.into_result(|| form.password.as_str())
    }
}

fn required(
    errors: &mut FieldErrors,
    field: &str,
    raw: &str,
    max_chars: usize,
    label: &str,
) -> String {
    let value = raw.trim();
    if value.is_empty() {
        errors.add(field, format!("{label} is required."));
    } else if value.chars().count() > max_chars {
        errors.add(field, format!("{label} may not exceed {max_chars} characters."));
    }
    value.to_string()
}

fn check_national_ids(errors: &mut FieldErrors, nisn: &str, nik: &str) {
    let nisn = nisn.trim();
    if nisn.is_empty() {
        errors.add("nisn", "NISN is required.");
    } else if !is_digits(nisn, NISN_LENGTH) {
        errors.add("nisn", "NISN must be exactly 10 digits.");
    }

    let nik = nik.trim();
    if nik.is_empty() {
        errors.add("nik", "NIK is required.");
    } else if !is_digits(nik, NIK_LENGTH) {
        errors.add("nik", "NIK must be exactly 16 digits.");
    }
}

pub fn is_digits(value: &str, length: usize) -> bool {
    value.len() == length && value.bytes().all(|byte| byte.is_ascii_digit())
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split('.')
            .filter(|label| !label.is_empty())
            .count()
            >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
