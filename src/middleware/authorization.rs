/// Authorization Gate
///
/// Extracts an access token from the request, verifies it and enforces a
/// role policy. Verified claims are inserted into request extensions for
/// handlers (`web::ReqData<ClaimsPayload>`).
///
/// Extraction order, first match wins:
/// 1. `Authorization: Bearer <token>`
/// 2. access token cookie
/// 3. query parameter, only when enabled

use std::collections::HashMap;
use std::rc::Rc;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    web, Error, HttpMessage, HttpRequest,
};
use futures::future::LocalBoxFuture;

use crate::auth::{ClaimsPayload, TokenCodec};
use crate::configuration::{AuthSettings, CookieSettings};
use crate::error::{AppError, AuthError};

const BEARER_PREFIX: &str = "bearer ";

/// Access policy for a scope
#[derive(Debug, Clone, Default)]
pub struct Policy {
    roles: Vec<String>,
    allow_anonymous: bool,
}

impl Policy {
    /// Any verified token
    pub fn authenticated() -> Self {
        Self::default()
    }

    /// Verified token carrying at least one of `roles`
    pub fn require_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            allow_anonymous: false,
        }
    }

    /// Missing or invalid tokens pass through without claims.
    pub fn allow_anonymous(mut self) -> Self {
        self.allow_anonymous = true;
        self
    }

    /// Role intersection, case-insensitive. An empty requirement admits everyone.
    pub fn permits(&self, claims: &ClaimsPayload) -> bool {
        self.roles.is_empty() || self.roles.iter().any(|role| claims.has_role(role))
    }

    /// Decide the outcome for an extracted token.
    ///
    /// `Ok(None)` means proceed unauthenticated.
    pub fn evaluate(
        &self,
        token: Option<&str>,
        codec: &TokenCodec,
    ) -> Result<Option<ClaimsPayload>, AuthError> {
        let token = match token {
            Some(token) => token,
            None if self.allow_anonymous => return Ok(None),
            None => return Err(AuthError::MissingToken),
        };

        let claims = match codec.verify_access(token) {
            Ok(claims) => claims,
            Err(_) if self.allow_anonymous => return Ok(None),
            Err(e) => {
                tracing::warn!(error = %e, "Access token rejected");
                return Err(AuthError::TokenInvalid);
            }
        };

        if !self.permits(&claims) {
            tracing::warn!(
                user_id = %claims.user_id,
                required = ?self.roles,
                "Role requirement not met"
            );
            return Err(AuthError::Forbidden);
        }

        Ok(Some(claims))
    }
}

/// Where the gate looks for tokens
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub access_cookie: String,
    pub allow_query_token: bool,
    pub query_param: String,
}

impl GateConfig {
    pub fn from_settings(cookie: &CookieSettings, auth: &AuthSettings) -> Self {
        Self {
            access_cookie: cookie.access_name.clone(),
            allow_query_token: auth.allow_query_token,
            query_param: auth.query_param.clone(),
        }
    }

    /// Pull the raw access token out of `req`, if any.
    pub fn extract_token(&self, req: &HttpRequest) -> Option<String> {
        if let Some(token) = bearer_token(req) {
            return Some(token);
        }

        if let Some(cookie) = req.cookie(&self.access_cookie) {
            if !cookie.value().is_empty() {
                return Some(cookie.value().to_string());
            }
        }

        if self.allow_query_token {
            let query = web::Query::<HashMap<String, String>>::from_query(req.query_string()).ok()?;
            return query
                .get(&self.query_param)
                .filter(|token| !token.is_empty())
                .cloned();
        }

        None
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let prefix = value.get(..BEARER_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(BEARER_PREFIX) {
        return None;
    }
    let token = value[BEARER_PREFIX.len()..].trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Middleware enforcing a `Policy` on every request of the wrapped scope
pub struct RequireAuth {
    codec: TokenCodec,
    config: GateConfig,
    policy: Policy,
}

impl RequireAuth {
    pub fn new(codec: TokenCodec, config: GateConfig, policy: Policy) -> Self {
        Self {
            codec,
            config,
            policy,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireAuthService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequireAuthService {
            service: Rc::new(service),
            codec: self.codec.clone(),
            config: self.config.clone(),
            policy: self.policy.clone(),
        }))
    }
}

pub struct RequireAuthService<S> {
    service: Rc<S>,
    codec: TokenCodec,
    config: GateConfig,
    policy: Policy,
}

impl<S, B> Service<ServiceRequest> for RequireAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = self.config.extract_token(req.request());

        match self.policy.evaluate(token.as_deref(), &self.codec) {
            Ok(claims) => {
                if let Some(claims) = claims {
                    tracing::debug!(
                        user_id = %claims.user_id,
                        session_id = %claims.session_id,
                        "Access token verified"
                    );
                    req.extensions_mut().insert(claims);
                }

                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Err(e) => Box::pin(async move { Err(AppError::from(e).into()) }),
        }
    }
}
