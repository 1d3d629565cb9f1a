use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthState {
    operators: Arc<HashMap<String, String>>,
}

/// Who triggered a run; attached to the request by [`require_api_auth`].
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub operator: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("CATALOG_API_KEYS").unwrap_or_default();
        Self::from_pairs(&raw)
    }

    /// Parses `operator:key` pairs separated by commas.
    pub fn from_pairs(raw: &str) -> Self {
        let mut operators = HashMap::new();
        for token in raw.split(',') {
            let trimmed = token.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut parts = trimmed.splitn(2, ':');
            let operator = parts.next().map(str::trim).filter(|s| !s.is_empty());
            let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
            match (operator, key) {
                (Some(operator), Some(secret)) => {
                    operators.insert(secret.to_string(), operator.to_string());
                }
                _ => warn!(
                    target = "catalog.api",
                    "ignored malformed CATALOG_API_KEYS entry: {trimmed}"
                ),
            }
        }

        if operators.is_empty() {
            warn!(
                target = "catalog.api",
                "CATALOG_API_KEYS produced no keys; run endpoints will reject every request"
            );
        } else {
            info!(
                target = "catalog.api",
                key_count = operators.len(),
                "loaded API keys"
            );
        }
        Self {
            operators: Arc::new(operators),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.operators.get(presented).map(|operator| AuthContext {
            operator: operator.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Catalog-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Catalog-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn pairs_map_keys_to_operators() {
        let state = AuthState::from_pairs("scheduler:s3cret, ops:k2 ,broken");
        assert_eq!(state.authenticate("s3cret").unwrap().operator, "scheduler");
        assert_eq!(state.authenticate("k2").unwrap().operator, "ops");
        assert!(state.authenticate("broken").is_none());
    }

    #[test]
    fn bearer_and_header_keys_are_extracted() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc"),
        );
        assert_eq!(extract_api_key(&headers).as_deref(), Some("abc"));

        let mut headers = http::HeaderMap::new();
        headers.insert("X-Catalog-Key", HeaderValue::from_static(" xyz "));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("xyz"));
    }
}
