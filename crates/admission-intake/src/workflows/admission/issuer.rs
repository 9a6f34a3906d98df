use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Datelike, Duration, Utc};
use cookie::{Cookie, SameSite};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::config::{CodeFormat, CookiePolicy};

use super::domain::{RegistrationCode, SecretCredential};

/// Number of random bytes behind each resume credential.
pub const CREDENTIAL_BYTES: usize = 32;

/// Source of registration code suffixes.
pub trait CodeSource: Send + Sync {
    fn suffix(&self, format: &CodeFormat) -> String;
}

/// Draws suffix characters uniformly from the configured charset.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeSource;

impl CodeSource for RandomCodeSource {
    fn suffix(&self, format: &CodeFormat) -> String {
        let charset = format.charset();
        let mut rng = OsRng;
        (0..format.suffix_length())
            .filter_map(|_| charset.get(rng.gen_range(0..charset.len())))
            .collect()
    }
}

/// Mints the public registration code and the private resume credential.
#[derive(Clone)]
pub struct CredentialIssuer {
    format: CodeFormat,
    source: Arc<dyn CodeSource>,
}

impl std::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl CredentialIssuer {
    pub fn new(format: CodeFormat) -> Self {
        Self::with_source(format, Arc::new(RandomCodeSource))
    }

    pub fn with_source(format: CodeFormat, source: Arc<dyn CodeSource>) -> Self {
        Self { format, source }
    }

    pub fn format(&self) -> &CodeFormat {
        &self.format
    }

    pub fn max_attempts(&self) -> u32 {
        self.format.max_attempts()
    }

    /// `<prefix>-<year>-<suffix>`, e.g. `REG-2026-K7Q2M`.
    pub fn registration_code(&self, now: DateTime<Utc>) -> RegistrationCode {
        RegistrationCode(format!(
            "{}-{}-{}",
            self.format.prefix(),
            now.year(),
            self.source.suffix(&self.format)
        ))
    }

    /// 256 bits from the OS RNG; independent of every draft field.
    pub fn secret_credential(&self) -> SecretCredential {
        let mut bytes = [0_u8; CREDENTIAL_BYTES];
        OsRng.fill_bytes(&mut bytes);
        SecretCredential::new(URL_SAFE_NO_PAD.encode(bytes))
    }
}

/// HttpOnly, SameSite=Lax cookie carrying the credential for the retention window.
pub fn credential_cookie(
    policy: &CookiePolicy,
    credential: &SecretCredential,
    retention: Duration,
) -> Cookie<'static> {
    Cookie::build((policy.name.clone(), credential.expose().to_string()))
        .path("/")
        .http_only(true)
        .secure(policy.secure)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(retention.num_seconds()))
        .build()
}

/// Expired cookie that tells the browser to drop the credential.
pub fn credential_removal_cookie(policy: &CookiePolicy) -> Cookie<'static> {
    let mut removal = Cookie::build((policy.name.clone(), String::new()))
        .path("/")
        .http_only(true)
        .secure(policy.secure)
        .same_site(SameSite::Lax)
        .build();
    removal.make_removal();
    removal
}
