use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    middleware::{self, Next},
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, patch, post},
    Extension, Json, Router,
};
use cookie::{Cookie, SameSite};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use super::accounts::{AccountDirectory, CandidateStatus};
use super::domain::{ContactForm, DraftId, IdentityForm, RegistrationSummary, ReviewForm};
use super::gate::{credential_from_headers, GateError, GateRejection, GatedDraft};
use super::issuer::{credential_cookie, credential_removal_cookie};
use super::repository::{DraftRepository, RepositoryError};
use super::service::{DraftService, DraftServiceError};
use super::validation::AccountForm;

/// Cookie carrying the reason a gated request was bounced back to the flow start.
pub const FLASH_COOKIE: &str = "admission_flash";
const FLASH_MAX_AGE_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
pub(crate) struct DuplicateCheckRequest {
    #[serde(default)]
    nisn: String,
    #[serde(default)]
    nik: String,
    #[serde(default)]
    current_draft_id: Option<DraftId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateDraftRequest {
    #[serde(flatten)]
    identity: IdentityForm,
    #[serde(default)]
    force_new: bool,
    /// The caller's own draft when step one is resubmitted with an edited identity.
    #[serde(default)]
    replaces_draft_id: Option<DraftId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResumeRequest {
    #[serde(default)]
    nisn: String,
    #[serde(default)]
    nik: String,
}

/// Router builder exposing the draft lifecycle and the gated account step.
pub fn admission_router<R, A>(service: Arc<DraftService<R, A>>) -> Router
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    let gated = Router::new()
        .route(
            "/api/v1/admission/register",
            get(register_form_handler::<R, A>).post(register_submit_handler::<R, A>),
        )
        .route_layer(middleware::from_fn_with_state(
            service.clone(),
            resume_gate::<R, A>,
        ));

    Router::new()
        .route(
            "/api/v1/admission/drafts/check-duplicate",
            post(check_duplicate_handler::<R, A>),
        )
        .route("/api/v1/admission/drafts", post(create_handler::<R, A>))
        .route("/api/v1/admission/drafts/resume", post(resume_handler::<R, A>))
        .route(
            "/api/v1/admission/drafts/:draft_id/contact",
            patch(contact_handler::<R, A>),
        )
        .route(
            "/api/v1/admission/drafts/:draft_id/finalize",
            patch(finalize_handler::<R, A>),
        )
        .route("/api/v1/admission/wave", get(wave_handler::<R, A>))
        .merge(gated)
        .with_state(service)
}

pub(crate) async fn check_duplicate_handler<R, A>(
    State(service): State<Arc<DraftService<R, A>>>,
    Json(request): Json<DuplicateCheckRequest>,
) -> Response
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    let checked = off_runtime(&service, move |service| {
        service.check_duplicate(&request.nisn, &request.nik, request.current_draft_id)
    })
    .await;
    match checked {
        Ok(check) => (StatusCode::OK, Json(check)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn create_handler<R, A>(
    State(service): State<Arc<DraftService<R, A>>>,
    Json(request): Json<CreateDraftRequest>,
) -> Response
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    let created = off_runtime(&service, move |service| match request.replaces_draft_id {
        Some(previous) => service.replace_initial(previous, &request.identity),
        None => service.create_initial(&request.identity, request.force_new),
    })
    .await;
    match created {
        Ok(draft) => {
            let payload = json!({
                "draft_id": draft.id,
                "current_step": draft.current_step,
            });
            (StatusCode::CREATED, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn resume_handler<R, A>(
    State(service): State<Arc<DraftService<R, A>>>,
    headers: HeaderMap,
    Json(request): Json<ResumeRequest>,
) -> Response
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    let credential = credential_from_headers(&headers, &service.cookie_policy().name);
    let resumed = off_runtime(&service, move |service| {
        service.resume(&request.nisn, &request.nik, credential.as_ref())
    })
    .await;
    match resumed {
        Ok(payload) => (StatusCode::OK, Json(payload)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn contact_handler<R, A>(
    State(service): State<Arc<DraftService<R, A>>>,
    Path(draft_id): Path<u64>,
    Json(form): Json<ContactForm>,
) -> Response
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    let advanced = off_runtime(&service, move |service| {
        service.advance_to_contact(DraftId(draft_id), &form)
    })
    .await;
    match advanced {
        Ok(draft) => {
            let payload = json!({
                "draft_id": draft.id,
                "current_step": draft.current_step,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// A repeat call only answers the holder of the draft's credential cookie.
pub(crate) async fn finalize_handler<R, A>(
    State(service): State<Arc<DraftService<R, A>>>,
    Path(draft_id): Path<u64>,
    headers: HeaderMap,
    Json(form): Json<ReviewForm>,
) -> Response
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    let credential = credential_from_headers(&headers, &service.cookie_policy().name);
    let finalized = off_runtime(&service, move |service| {
        service.finalize(DraftId(draft_id), &form, credential.as_ref())
    })
    .await;
    let finalization = match finalized {
        Ok(finalization) => finalization,
        Err(err) => return error_response(err),
    };

    let draft = &finalization.draft;
    let payload = Json(json!({
        "draft_id": draft.id,
        "current_step": draft.current_step,
        "registration_code": draft.registration_code,
        "expires_at": draft.expires_at,
    }));

    let cookies: Vec<(HeaderName, String)> = finalization
        .credential
        .iter()
        .map(|credential| {
            let cookie = credential_cookie(
                service.cookie_policy(),
                credential,
                service.retention_window(),
            );
            (header::SET_COOKIE, cookie.to_string())
        })
        .collect();

    (StatusCode::OK, AppendHeaders(cookies), payload).into_response()
}

pub(crate) async fn wave_handler<R, A>(State(service): State<Arc<DraftService<R, A>>>) -> Response
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    match off_runtime(&service, |service| service.active_wave()).await {
        Ok(wave) => (StatusCode::OK, Json(json!({ "wave": wave }))).into_response(),
        Err(err) => error_response(err),
    }
}

/// Rejects requests whose credential cookie does not unlock a live draft.
pub(crate) async fn resume_gate<R, A>(
    State(service): State<Arc<DraftService<R, A>>>,
    mut request: Request,
    next: Next,
) -> Response
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    let credential = credential_from_headers(request.headers(), &service.cookie_policy().name);
    let authorized =
        off_runtime(&service, move |service| service.authorize(credential.as_ref())).await;
    match authorized {
        Ok(draft) => {
            request.extensions_mut().insert(GatedDraft(draft));
            next.run(request).await
        }
        Err(GateError::Rejected(rejection)) => redirect_to_start(&service, rejection),
        Err(GateError::Repository(err)) => error_response(err.into()),
    }
}

pub(crate) async fn register_form_handler<R, A>(
    State(service): State<Arc<DraftService<R, A>>>,
    Extension(GatedDraft(draft)): Extension<GatedDraft>,
) -> Response
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    let summary = RegistrationSummary::from(&draft);
    let payload = json!({
        "draft": summary,
        "expires_at": draft.expires_at,
        "flow_start": service.flow_start(),
    });
    (StatusCode::OK, Json(payload)).into_response()
}

pub(crate) async fn register_submit_handler<R, A>(
    State(service): State<Arc<DraftService<R, A>>>,
    Extension(GatedDraft(draft)): Extension<GatedDraft>,
    Json(form): Json<AccountForm>,
) -> Response
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    let converted = off_runtime(&service, move |service| service.convert(&draft, &form)).await;
    match converted {
        Ok(enrollment) => {
            let removal = credential_removal_cookie(service.cookie_policy());
            let payload = json!({
                "account_id": enrollment.account.id,
                "candidate_id": enrollment.candidate.id,
                "email": enrollment.account.email,
                "status": CandidateStatus::Draft,
            });
            (
                StatusCode::CREATED,
                AppendHeaders([(header::SET_COOKIE, removal.to_string())]),
                Json(payload),
            )
                .into_response()
        }
        Err(DraftServiceError::NotFound) => {
            redirect_to_start(&service, GateRejection::UnknownCredential)
        }
        Err(err) => error_response(err),
    }
}

/// Storage calls may block on file I/O, so they run on the blocking pool.
async fn off_runtime<R, A, T, E, F>(service: &Arc<DraftService<R, A>>, work: F) -> Result<T, E>
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
    T: Send + 'static,
    E: From<RepositoryError> + Send + 'static,
    F: FnOnce(&DraftService<R, A>) -> Result<T, E> + Send + 'static,
{
    let service = Arc::clone(service);
    match tokio::task::spawn_blocking(move || work(&service)).await {
        Ok(result) => result,
        Err(err) => Err(RepositoryError::Unavailable(format!("storage task failed: {err}")).into()),
    }
}

fn redirect_to_start<R, A>(service: &DraftService<R, A>, rejection: GateRejection) -> Response
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    warn!(reason = rejection.flash_key(), "gated request redirected to flow start");

    let flash = Cookie::build((FLASH_COOKIE, rejection.flash_key()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(FLASH_MAX_AGE_SECS))
        .build();
    let removal = credential_removal_cookie(service.cookie_policy());

    (
        StatusCode::SEE_OTHER,
        AppendHeaders([
            (header::LOCATION, service.flow_start().to_string()),
            (header::SET_COOKIE, flash.to_string()),
            (header::SET_COOKIE, removal.to_string()),
        ]),
    )
        .into_response()
}

fn error_response(error: DraftServiceError) -> Response {
    match error {
        DraftServiceError::Validation(err) => {
            let payload = json!({
                "message": err.errors.headline().unwrap_or("The given data was invalid."),
                "errors": err.errors,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response()
        }
        DraftServiceError::IdentityConflict(found) => {
            let payload = json!({
                "conflict": "identity",
                "status": found.status,
                "data": found.data,
            });
            (StatusCode::CONFLICT, Json(payload)).into_response()
        }
        DraftServiceError::NotFound => {
            let payload = json!({ "error": "draft not found" });
            (StatusCode::NOT_FOUND, Json(payload)).into_response()
        }
        DraftServiceError::StepOutOfOrder { .. } | DraftServiceError::AlreadyFinalized(_) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::CONFLICT, Json(payload)).into_response()
        }
        DraftServiceError::RetryExhausted { .. } => internal_error(),
        DraftServiceError::Repository(_) | DraftServiceError::Password(_) => {
            error!(error = %error, "admission request failed");
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    let payload = json!({ "error": "internal server error" });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
}
