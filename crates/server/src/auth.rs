use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use serde::Deserialize;
use service::credentials::CredentialRegistry;
use service::registry::SharedRegistry;
use service::repository::ServiceRepository;

use crate::errors::ApiError;

/// Shared state of the hub API.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SharedRegistry>,
    pub credentials: Arc<CredentialRegistry>,
    pub repo: Arc<dyn ServiceRepository>,
}

/// Name of the service the request authenticated as.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthedService(pub String);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// `Authorization: token <t>` / `Bearer <t>`, falling back to `?token=`.
pub fn token_from_request(req: &Request) -> Option<String> {
    let from_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, rest) = v.split_once(' ')?;
            match scheme.to_ascii_lowercase().as_str() {
                "token" | "bearer" => Some(rest.trim().to_string()),
                _ => None,
            }
        });
    from_header
        .or_else(|| Query::<TokenQuery>::try_from_uri(req.uri()).ok().and_then(|Query(q)| q.token))
        .filter(|t| !t.trim().is_empty())
}

/// Resolve a token to its service: in-memory credentials first, then the database.
pub async fn resolve_token(state: &ApiState, token: &str) -> Result<Option<String>, ApiError> {
    if let Some(name) = state.credentials.lookup(token).await {
        return Ok(Some(name));
    }
    Ok(state.repo.find_service_by_token(token).await?)
}

/// Middleware: reject requests without a token known to the hub.
pub async fn require_token(State(state): State<ApiState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let token = token_from_request(&req).ok_or(ApiError::Unauthorized)?;
    let service = resolve_token(&state, &token).await?.ok_or(ApiError::Unauthorized)?;
    req.extensions_mut().insert(AuthedService(service));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, authorization: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(axum::http::header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[test]
    fn header_schemes_are_case_insensitive() {
        assert_eq!(token_from_request(&request("/", Some("Token abc"))).as_deref(), Some("abc"));
        assert_eq!(token_from_request(&request("/", Some("bearer abc"))).as_deref(), Some("abc"));
        assert_eq!(token_from_request(&request("/", Some("Basic abc"))), None);
    }

    #[test]
    fn query_token_is_percent_decoded() {
        let req = request("/hub/api/services?limit=5&token=a%2Bb%25c%26d", None);
        assert_eq!(token_from_request(&req).as_deref(), Some("a+b%c&d"));
        let req = request("/hub/api/services?token=a+b", None);
        assert_eq!(token_from_request(&req).as_deref(), Some("a b"));
    }

    #[test]
    fn header_wins_over_query_and_empty_is_absent() {
        let req = request("/?token=from-query", Some("token from-header"));
        assert_eq!(token_from_request(&req).as_deref(), Some("from-header"));
        assert_eq!(token_from_request(&request("/?token=", None)), None);
        assert_eq!(token_from_request(&request("/", None)), None);
    }
}
