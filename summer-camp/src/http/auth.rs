use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use tracing::{debug, warn};

use super::error::ApiError;
use super::state::AppState;
use crate::auth::{Claims, Role};
use crate::records::{Collection, EMAIL_FIELD};
use crate::store::Filter;

/// Verifies the bearer token and returns its claims.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let Some(token) = extract_bearer(headers) else {
        warn!("missing bearer token");
        return Err(ApiError::Unauthorized);
    };

    match state.tokens.verify(token) {
        Ok(claims) => {
            debug!(email = %claims.email, "authorized request using bearer token");
            Ok(claims)
        }
        Err(err) => {
            warn!(error = %err, "rejected bearer token");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Loads the caller's stored role and rejects unless it is one of `allowed`.
pub async fn require_role(
    state: &AppState,
    claims: &Claims,
    allowed: &[Role],
) -> Result<Role, ApiError> {
    let user = state
        .store
        .find_one(Collection::Users, Filter::eq(EMAIL_FIELD, claims.email.as_str()))
        .await?;
    let role = user.as_ref().map(Role::from_document).unwrap_or(Role::User);

    if allowed.contains(&role) {
        Ok(role)
    } else {
        warn!(email = %claims.email, role = role.as_str(), "role check failed");
        Err(ApiError::Forbidden)
    }
}

/// Routes scoped to one user's data only serve that user.
pub fn ensure_owner(claims: &Claims, email: &str) -> Result<(), ApiError> {
    if claims.email == email {
        Ok(())
    } else {
        warn!(caller = %claims.email, requested = %email, "email does not match token");
        Err(ApiError::Forbidden)
    }
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let raw = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;
    let mut parts = raw.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") || parts.next().is_some() {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use axum::http::header::AUTHORIZATION;
    use axum::http::{HeaderMap, HeaderValue};

    use super::extract_bearer;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(extract_bearer(&headers("Bearer abc.def")), Some("abc.def"));
        assert_eq!(extract_bearer(&headers("bearer abc")), Some("abc"));
    }

    #[test]
    fn other_schemes_and_shapes_are_ignored() {
        assert_eq!(extract_bearer(&headers("Basic YWRtaW46c2VjcmV0")), None);
        assert_eq!(extract_bearer(&headers("Bearer")), None);
        assert_eq!(extract_bearer(&headers("Bearer a b")), None);
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }
}
