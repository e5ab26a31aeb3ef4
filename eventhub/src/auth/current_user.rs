//! Caller identity as asserted by the authenticating proxy.
//!
//! Login, sessions and tokens live in front of this service. The proxy forwards the
//! authenticated user's id and role as headers, whose names come from `auth.proxy_header`.

use crate::{
    config::ProxyHeaderAuthConfig,
    db::models::catalog::User,
    errors::Error,
    types::{Role, UserId},
    AppState,
};
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use serde::Serialize;
use tracing::trace;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub role: Role,
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, Error> {
    let value = headers.get(name).ok_or_else(|| Error::Unauthenticated {
        message: format!("missing {name} header"),
    })?;
    value.to_str().map(str::trim).map_err(|_| Error::Unauthenticated {
        message: format!("{name} header is not valid text"),
    })
}

impl CurrentUser {
    pub fn from_headers(headers: &HeaderMap, config: &ProxyHeaderAuthConfig) -> Result<Self, Error> {
        let id = header(headers, &config.user_header)?
            .parse::<UserId>()
            .map_err(|_| Error::Unauthenticated {
                message: format!("{} header is not a user id", config.user_header),
            })?;
        let role = header(headers, &config.role_header)?
            .parse::<Role>()
            .map_err(|message| Error::Unauthenticated { message })?;
        Ok(Self { id, role })
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = Self::from_headers(&parts.headers, &state.config.auth.proxy_header)?;
        trace!(user_id = %user.id, role = %user.role, "Authenticated via proxy headers");
        Ok(user)
    }
}
