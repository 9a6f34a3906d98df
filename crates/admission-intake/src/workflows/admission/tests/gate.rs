use super::common::*;
use chrono::Duration;

use crate::workflows::admission::domain::SecretCredential;
use crate::workflows::admission::gate::{GateError, GateRejection, ResumeGate};

#[test]
fn missing_credential_is_session_not_found() {
    let h = harness();
    let err = ResumeGate::new(h.drafts.as_ref())
        .authorize(None, t0())
        .expect_err("no cookie");
    assert!(matches!(
        err,
        GateError::Rejected(GateRejection::MissingCredential)
    ));
}

#[test]
fn unknown_credential_is_invalid_token() {
    let h = harness();
    h.finalized_draft();

    let err = ResumeGate::new(h.drafts.as_ref())
        .authorize(Some(&SecretCredential::new("forged")), t0())
        .expect_err("forged cookie");
    assert!(matches!(
        err,
        GateError::Rejected(GateRejection::UnknownCredential)
    ));
}

#[test]
fn registration_code_is_not_a_credential() {
    let h = harness();
    let (draft, _) = h.finalized_draft();
    let code = draft.registration_code.expect("code issued");

    let err = ResumeGate::new(h.drafts.as_ref())
        .authorize(Some(&SecretCredential::new(code.0)), t0())
        .expect_err("code alone rejected");
    assert!(matches!(
        err,
        GateError::Rejected(GateRejection::UnknownCredential)
    ));
}

#[test]
fn valid_credential_resolves_its_draft() {
    let h = harness();
    let (draft, credential) = h.finalized_draft();

    let resolved = ResumeGate::new(h.drafts.as_ref())
        .authorize(Some(&credential), t0() + Duration::hours(71))
        .expect("inside retention window");
    assert_eq!(resolved.id, draft.id);
}

#[test]
fn expired_by_one_second_is_rejected_and_destroyed() {
    let h = harness();
    let (draft, credential) = h.finalized_draft();
    let expires_at = draft.expires_at.expect("expiry set");

    let err = ResumeGate::new(h.drafts.as_ref())
        .authorize(Some(&credential), expires_at + Duration::seconds(1))
        .expect_err("expired");
    assert!(matches!(err, GateError::Rejected(GateRejection::Expired)));
    assert!(h.drafts.get(draft.id).is_none());

    let err = ResumeGate::new(h.drafts.as_ref())
        .authorize(Some(&credential), expires_at + Duration::seconds(2))
        .expect_err("already destroyed");
    assert!(matches!(
        err,
        GateError::Rejected(GateRejection::UnknownCredential)
    ));
}

#[test]
fn repository_failures_are_not_rejections() {
    let err = ResumeGate::new(&UnavailableDrafts)
        .authorize(Some(&SecretCredential::new("anything")), t0())
        .expect_err("storage offline");
    assert!(matches!(err, GateError::Repository(_)));
}
