use super::common::*;
use chrono::Duration;

use crate::workflows::admission::duplicates::{
    DuplicateCheck, DuplicateResolver, DuplicateStatus,
};
use crate::workflows::admission::DraftServiceError;

#[test]
fn draft_match_reports_masked_identity_and_age() {
    let h = harness();
    let draft = h
        .service
        .create_initial(&identity_form(), false)
        .expect("draft created");
    h.clock.advance(Duration::hours(3));

    let check = h
        .service
        .check_duplicate(NISN, NIK, None)
        .expect("check runs");

    let DuplicateCheck::Found(found) = check else {
        panic!("expected a draft match");
    };
    assert_eq!(found.status, DuplicateStatus::Draft);
    assert_eq!(found.data.name, "Ahmad Z***");
    assert_eq!(found.data.nisn, "001234***8");
    assert_eq!(found.data.nik, "330112******9001");
    assert_eq!(found.data.draft_id, Some(draft.id));
    assert_eq!(found.data.updated_at.as_deref(), Some("3 hours ago"));
}

#[test]
fn callers_own_draft_is_not_a_duplicate() {
    let h = harness();
    let draft = h
        .service
        .create_initial(&identity_form(), false)
        .expect("draft created");

    let check = h
        .service
        .check_duplicate(NISN, NIK, Some(draft.id))
        .expect("check runs");
    assert_eq!(check, DuplicateCheck::NotFound);
}

#[test]
fn own_draft_does_not_hide_another_draft_sharing_one_field() {
    let h = harness();
    let mut theirs = other_identity_form();
    theirs.nik = NIK.to_string();
    let other = h
        .service
        .create_initial(&theirs, false)
        .expect("other draft created");
    h.clock.advance(Duration::minutes(15));

    let mut mine = identity_form();
    mine.nik = "3301000000000077".to_string();
    let own = h
        .service
        .create_initial(&mine, false)
        .expect("own draft created");

    // The caller's draft is the newest match on NISN; the other draft holds the NIK.
    let check = h
        .service
        .check_duplicate(NISN, NIK, Some(own.id))
        .expect("check runs");

    let DuplicateCheck::Found(found) = check else {
        panic!("expected the other draft to be reported");
    };
    assert_eq!(found.status, DuplicateStatus::Draft);
    assert_eq!(found.data.draft_id, Some(other.id));
    assert_eq!(found.data.name, "Siti R***");
}

#[test]
fn registered_accounts_win_and_ignore_caller_id() {
    let h = harness();
    let draft = h
        .service
        .create_initial(&identity_form(), false)
        .expect("draft created");
    h.accounts
        .seed("Muhammad Rizky Pratama", "rizky@example.com", "0000000000", NIK);

    let resolver = DuplicateResolver::new(h.drafts.as_ref(), h.accounts.as_ref());
    let check = resolver
        .resolve(NISN, NIK, Some(draft.id), t0())
        .expect("resolve runs");

    let DuplicateCheck::Found(found) = check else {
        panic!("expected an account match");
    };
    assert_eq!(found.status, DuplicateStatus::Registered);
    assert_eq!(found.data.name, "Muham*** R*** P***");
    assert!(found.data.draft_id.is_none());
    assert!(found.data.updated_at.is_none());
}

#[test]
fn expired_and_deleted_drafts_are_ignored() {
    let h = harness();
    let (draft, _) = h.finalized_draft();
    h.clock
        .set(draft.expires_at.expect("expiry set") + Duration::minutes(5));

    let check = h
        .service
        .check_duplicate(NISN, NIK, None)
        .expect("check runs");
    assert!(!check.is_found());
}

#[test]
fn latest_updated_draft_is_reported() {
    let h = harness();
    let older = h
        .service
        .create_initial(&identity_form(), false)
        .expect("older draft");

    // A second draft sharing only the NISN, stored directly to bypass the insert guard.
    let mut newer = older.clone();
    newer.id = crate::workflows::admission::DraftId(older.id.0 + 100);
    newer.identity.nik = "3301000000000001".to_string();
    newer.identity.full_name = "Budi Santoso".to_string();
    newer.updated_at = t0() + Duration::minutes(10);
    h.drafts.force(newer.clone());
    h.clock.advance(Duration::minutes(30));

    let DuplicateCheck::Found(found) = h
        .service
        .check_duplicate(NISN, NIK, None)
        .expect("check runs")
    else {
        panic!("expected a draft match");
    };
    assert_eq!(found.data.draft_id, Some(newer.id));
    assert_eq!(found.data.name, "Budi S***");
    assert_eq!(found.data.updated_at.as_deref(), Some("20 minutes ago"));
}

#[test]
fn malformed_ids_are_rejected_before_lookup() {
    let h = harness();
    let err = h
        .service
        .check_duplicate("123", "abc", None)
        .expect_err("invalid pair");
    match err {
        DraftServiceError::Validation(validation) => {
            assert!(validation.errors.contains("nisn"));
            assert!(validation.errors.contains("nik"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn found_check_serializes_with_status_and_data() {
    let h = harness();
    h.service
        .create_initial(&identity_form(), false)
        .expect("draft created");
    let check = h
        .service
        .check_duplicate(NISN, NIK, None)
        .expect("check runs");

    let body = serde_json::to_value(&check).expect("serializes");
    assert_eq!(body["found"], true);
    assert_eq!(body["status"], "draft");
    assert_eq!(body["data"]["nisn"], "001234***8");
    assert_eq!(body["data"]["updated_at"], "just now");
}
