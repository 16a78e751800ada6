/**
 * IDENTITÉ APPELANT - Résolution du propriétaire des échantillons
 *
 * RÔLE :
 * Le kernel ne gère aucun credential. Le fournisseur d'auth (ou le reverse
 * proxy de confiance) transmet un user id durable et/ou un session id
 * transitoire dans les headers de chaque requête.
 *
 * RÈGLE : user id d'abord, session id ensuite, sinon Unauthenticated.
 */

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::service::ServiceError;

pub const USER_HEADER: &str = "x-user-id";
pub const SESSION_HEADER: &str = "x-session-id";

/// Identifiant opaque et stable du propriétaire
pub type OwnerId = String;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl CallerContext {
    #[cfg(test)]
    pub fn user(id: &str) -> Self {
        Self { user_id: Some(id.to_string()), session_id: None }
    }

    #[cfg(test)]
    pub fn session(id: &str) -> Self {
        Self { user_id: None, session_id: Some(id.to_string()) }
    }

    #[cfg(test)]
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            user_id: header_value(headers, USER_HEADER),
            session_id: header_value(headers, SESSION_HEADER),
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn resolve_owner(ctx: &CallerContext) -> Result<OwnerId, ServiceError> {
    ctx.user_id
        .clone()
        .or_else(|| ctx.session_id.clone())
        .ok_or(ServiceError::Unauthenticated)
}

impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
