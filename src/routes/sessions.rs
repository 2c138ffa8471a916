/// Session Management Routes
///
/// Users list and revoke their own sessions; admins can query and revoke
/// any session.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::ClaimsPayload;
use crate::error::AppError;
use crate::session::{Session, SessionFilter};
use crate::state::AppState;

#[derive(Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    /// Whether this is the session the request was made with
    pub current: bool,
}

#[derive(Debug, Deserialize)]
pub struct AdminSessionQuery {
    pub user_id: Option<Uuid>,
    pub valid: Option<bool>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// GET /api/v1/auth/sessions
///
/// The caller's usable sessions, oldest first.
pub async fn list_my_sessions(
    claims: web::ReqData<ClaimsPayload>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let now = Utc::now();
    let sessions = state
        .auth
        .list_sessions(SessionFilter {
            user_id: Some(claims.user_id),
            valid: Some(true),
        })
        .await?;

    let views: Vec<SessionView> = sessions
        .into_iter()
        .filter(|s| s.is_usable_at(now))
        .map(|session| SessionView {
            current: session.id == claims.session_id,
            session,
        })
        .collect();

    Ok(HttpResponse::Ok().json(views))
}

/// DELETE /api/v1/auth/sessions/{id}
///
/// Invalidate one of the caller's sessions.
///
/// # Errors
/// - 404: No such session, or it belongs to another user
pub async fn revoke_my_session(
    path: web::Path<Uuid>,
    claims: web::ReqData<ClaimsPayload>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    state
        .auth
        .invalidate_own_session(claims.user_id, session_id)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Session invalidated",
    }))
}

/// GET /api/v1/admin/sessions?user_id=&valid=
pub async fn admin_list_sessions(
    query: web::Query<AdminSessionQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let sessions = state
        .auth
        .list_sessions(SessionFilter {
            user_id: query.user_id,
            valid: query.valid,
        })
        .await?;

    Ok(HttpResponse::Ok().json(sessions))
}

/// DELETE /api/v1/admin/sessions/{id}
pub async fn admin_revoke_session(
    path: web::Path<Uuid>,
    claims: web::ReqData<ClaimsPayload>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    state.auth.invalidate_session(session_id).await?;

    tracing::info!(
        admin_id = %claims.user_id,
        session_id = %session_id,
        "Session invalidated by admin"
    );

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Session invalidated",
    }))
}
