/// Authentication Routes
///
/// Registration, login, refresh rotation, logout and current user lookup.
/// Login and refresh return the token pair in the body and also set it as
/// two credential cookies.

use std::net::SocketAddr;

use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::http::header::USER_AGENT;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{ClaimsPayload, LoginRequest, RegisterRequest, TokenPair};
use crate::configuration::CookieSettings;
use crate::error::{AppError, AuthError, ErrorContext};
use crate::state::AppState;
use crate::users::User;

/// Optional body for `POST /refresh` when cookies are unavailable
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Token pair plus the authenticated user
#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub session_id: Uuid,
    pub user: User,
}

impl AuthResponse {
    fn new(pair: TokenPair, user: User) -> Self {
        let expires_in = (pair.access_expires_at - Utc::now()).num_seconds().max(0);
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
            access_expires_at: pair.access_expires_at,
            refresh_expires_at: pair.refresh_expires_at,
            session_id: pair.session_id,
            user,
        }
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// POST /api/v1/auth/register
///
/// Register a new user. Public registration always creates role `user`.
///
/// # Errors
/// - 400: Validation errors (email, username, fullname, password strength)
/// - 409: Email already registered
/// - 500: Internal server error
pub async fn register(
    form: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth.register(form.into_inner()).await?;
    Ok(HttpResponse::Created().json(user))
}

/// POST /api/v1/auth/login
///
/// Authenticate with email and password and open a new session.
///
/// # Errors
/// - 401: Invalid credentials (unknown email and wrong password look the same)
/// - 500: Internal server error
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let user = state.auth.login(&form).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    let ip_address = non_empty(form.ip_address.as_deref()).unwrap_or_else(|| client_ip(&req));
    let user_agent = non_empty(form.user_agent.as_deref()).unwrap_or_else(|| client_agent(&req));
    let pair = state.auth.start_session(&user, ip_address, user_agent).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user.id,
        session_id = %pair.session_id,
        "User logged in"
    );

    respond_with_pair(&state, pair, user)
}

/// POST /api/v1/auth/refresh
///
/// Exchange the refresh token (cookie, or JSON body as a fallback) for a
/// new pair on the same session.
///
/// # Token Rotation Security
/// - The presented token must match the session's current refresh digest
/// - Presenting an older generation deletes the whole session
/// - Concurrent refreshes of one token cannot both succeed
///
/// # Errors
/// - 401: Missing, invalid or revoked refresh token, or reuse detected
/// - 500: Internal server error
pub async fn refresh(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let token = req
        .cookie(&state.cookies.refresh_name)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| body.map(|b| b.into_inner().refresh_token))
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Auth(AuthError::MissingToken))?;

    let context = ErrorContext::new("token_refresh");

    match state
        .rotation
        .rotate(&token, client_ip(&req), client_agent(&req))
        .await
    {
        Ok((pair, user)) => respond_with_pair(&state, pair, user),
        Err(e @ AppError::Auth(AuthError::ReuseDetected)) => {
            context.log_error(&e);
            // The client may still hold the newer generation in cookies.
            let mut response = e.error_response();
            for cookie in removal_cookies(&state.cookies) {
                response
                    .add_cookie(&cookie)
                    .map_err(|e| AppError::Internal(e.to_string()))?;
            }
            Ok(response)
        }
        Err(e) => {
            context.log_error(&e);
            Err(e)
        }
    }
}

/// POST /api/v1/auth/logout
///
/// Delete the caller's session and clear both cookies. The session id comes
/// from the verified access token, then the access cookie, then the refresh
/// cookie. Always succeeds, even without a session.
pub async fn logout(
    req: HttpRequest,
    claims: Option<web::ReqData<ClaimsPayload>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let mut context = ErrorContext::new("user_logout");
    let session_id = match claims {
        Some(claims) => {
            context = context.with_user_id(claims.user_id.to_string());
            Some(claims.session_id)
        }
        None => session_from_cookies(&req, &state),
    };

    if let Some(session_id) = session_id {
        state.auth.logout(session_id).await.map_err(|e| {
            context.log_error(&e);
            e
        })?;
    }

    let mut response = HttpResponse::Ok();
    for cookie in removal_cookies(&state.cookies) {
        response.cookie(cookie);
    }
    Ok(response.json(MessageResponse {
        message: "Logged out",
    }))
}

/// GET /api/v1/auth/me
///
/// Current user, resolved through the token's session.
///
/// # Errors
/// - 401: Missing or invalid token (middleware), or the session is gone
/// - 404: User no longer exists
pub async fn me(
    claims: web::ReqData<ClaimsPayload>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth.get_me(claims.session_id).await?;
    Ok(HttpResponse::Ok().json(user))
}

fn respond_with_pair(
    state: &AppState,
    pair: TokenPair,
    user: User,
) -> Result<HttpResponse, AppError> {
    let settings = &state.cookies;
    let access = credential_cookie(
        settings,
        &settings.access_name,
        &pair.access_token,
        pair.access_expires_at,
        state.codec.access_ttl(),
    );
    let refresh = credential_cookie(
        settings,
        &settings.refresh_name,
        &pair.refresh_token,
        pair.refresh_expires_at,
        state.codec.refresh_ttl(),
    );

    Ok(HttpResponse::Ok()
        .cookie(access)
        .cookie(refresh)
        .json(AuthResponse::new(pair, user)))
}

fn session_from_cookies(req: &HttpRequest, state: &AppState) -> Option<Uuid> {
    let from_access = req
        .cookie(&state.cookies.access_name)
        .and_then(|c| state.codec.verify_access(c.value()).ok());
    let from_refresh = || {
        req.cookie(&state.cookies.refresh_name)
            .and_then(|c| state.codec.verify_refresh(c.value()).ok())
    };
    from_access.or_else(from_refresh).map(|claims| claims.session_id)
}

/// Max-age is the token's remaining lifetime, or the full TTL if that is not positive.
fn cookie_max_age(expires_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> Duration {
    let remaining = expires_at - now;
    if remaining > Duration::zero() {
        remaining
    } else {
        ttl
    }
}

fn credential_cookie(
    settings: &CookieSettings,
    name: &str,
    value: &str,
    expires_at: DateTime<Utc>,
    ttl: Duration,
) -> Cookie<'static> {
    let max_age = cookie_max_age(expires_at, ttl, Utc::now());
    base_cookie(settings, name, value)
        .max_age(time::Duration::seconds(max_age.num_seconds()))
        .finish()
}

fn removal_cookies(settings: &CookieSettings) -> [Cookie<'static>; 2] {
    [&settings.access_name, &settings.refresh_name].map(|name| {
        let mut cookie = base_cookie(settings, name, "").finish();
        cookie.make_removal();
        cookie
    })
}

fn base_cookie(
    settings: &CookieSettings,
    name: &str,
    value: &str,
) -> actix_web::cookie::CookieBuilder<'static> {
    Cookie::build(name.to_string(), value.to_string())
        .domain(settings.domain.clone())
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Client IP, honouring `Forwarded`/`X-Forwarded-For`, without the port.
fn client_ip(req: &HttpRequest) -> String {
    let info = req.connection_info();
    let addr = info.realip_remote_addr().unwrap_or_default();
    addr.parse::<SocketAddr>()
        .map(|socket| socket.ip().to_string())
        .unwrap_or_else(|_| addr.to_string())
}

fn client_agent(req: &HttpRequest) -> String {
    req.headers()
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn settings() -> CookieSettings {
        CookieSettings {
            domain: "example.com".to_string(),
            access_name: "access_token".to_string(),
            refresh_name: "refresh_token".to_string(),
        }
    }

    #[test]
    fn test_max_age_uses_remaining_lifetime() {
        let now = Utc::now();
        let max_age = cookie_max_age(now + Duration::seconds(120), Duration::seconds(900), now);
        assert_eq!(max_age, Duration::seconds(120));
    }

    #[test]
    fn test_max_age_falls_back_to_ttl() {
        let now = Utc::now();
        let max_age = cookie_max_age(now - Duration::seconds(5), Duration::seconds(900), now);
        assert_eq!(max_age, Duration::seconds(900));
    }

    #[test]
    fn test_credential_cookie_attributes() {
        let cookie = credential_cookie(
            &settings(),
            "access_token",
            "abc",
            Utc::now() + Duration::seconds(600),
            Duration::seconds(900),
        );

        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::None));
        let max_age = cookie.max_age().unwrap().whole_seconds();
        assert!(max_age > 590 && max_age <= 600);
    }

    #[test]
    fn test_removal_cookies_are_expired() {
        for cookie in removal_cookies(&settings()) {
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        }
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "203.0.113.7"))
            .to_http_request();
        assert_eq!(client_ip(&req), "203.0.113.7");
    }

    #[test]
    fn test_client_agent() {
        let req = TestRequest::default()
            .insert_header((USER_AGENT, "agent/1.0"))
            .to_http_request();
        assert_eq!(client_agent(&req), "agent/1.0");
        assert_eq!(client_agent(&TestRequest::default().to_http_request()), "");
    }
}
