use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

/// Bearer-token settings for `/api/v1`.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// None = auth disabled.
    pub bearer_token: Option<String>,
}

/// Axum middleware that validates Bearer token authentication.
/// If no token is configured all requests are allowed through.
pub async fn bearer_auth_middleware(
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_config = request
        .extensions()
        .get::<AuthConfig>()
        .cloned()
        .unwrap_or_default();

    if let Some(ref expected) = auth_config.bearer_token
        && !token_matches(&headers, expected)
    {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

fn token_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_must_match_exactly() {
        let mut headers = HeaderMap::new();
        assert!(!token_matches(&headers, "secret"));

        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert!(token_matches(&headers, "secret"));
        assert!(!token_matches(&headers, "other"));

        headers.insert("authorization", HeaderValue::from_static("Basic secret"));
        assert!(!token_matches(&headers, "secret"));
    }
}
