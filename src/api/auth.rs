//! Session tokens
//!
//! The raw token is handed to the widget once and never stored; lookups go
//! through its SHA-256 hex digest scoped by tenant.

use super::error::AppError;
use super::types::SessionQuery;
use crate::db::{ConversationContext, Database};
use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const SESSION_TOKEN_HEADER: &str = "x-session-token";
pub const TENANT_HEADER: &str = "x-tenant-id";

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Resolve the conversation a request belongs to.
///
/// Headers win over query parameters; the query form exists for
/// `EventSource`, which cannot set headers.
pub fn authenticate(
    db: &Database,
    headers: &HeaderMap,
    query: &SessionQuery,
) -> Result<ConversationContext, AppError> {
    let token = header(headers, SESSION_TOKEN_HEADER)
        .or_else(|| query.session_token.clone())
        .ok_or_else(|| AppError::Unauthorized("Missing session token".to_string()))?;
    let tenant = header(headers, TENANT_HEADER)
        .or_else(|| query.tenant.clone())
        .ok_or_else(|| AppError::Unauthorized("Missing tenant".to_string()))?;

    match db.find_conversation_by_token(&tenant, &hash_token(&token))? {
        Some(conversation) => Ok(conversation.context()),
        None => {
            tracing::debug!(tenant = %tenant, "Session token rejected");
            Err(AppError::Unauthorized("Invalid session".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn seeded() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        db.create_tenant("acme", "Acme").unwrap();
        db.create_tenant("other", "Other").unwrap();
        let token = generate_token();
        db.create_conversation("conv-1", "acme", &hash_token(&token))
            .unwrap();
        (db, token)
    }

    fn query(token: Option<&str>, tenant: Option<&str>) -> SessionQuery {
        SessionQuery {
            session_token: token.map(ToString::to_string),
            tenant: tenant.map(ToString::to_string),
            ..SessionQuery::default()
        }
    }

    #[test]
    fn test_tokens_are_random_and_hashed() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert_eq!(hash_token(&a).len(), 64);
        assert_eq!(hash_token(&a), hash_token(&a));
    }

    #[test]
    fn test_header_auth() {
        let (db, token) = seeded();
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_str(&token).unwrap());
        headers.insert(TENANT_HEADER, HeaderValue::from_static("acme"));

        let ctx = authenticate(&db, &headers, &SessionQuery::default()).unwrap();
        assert_eq!(ctx, ConversationContext::new("acme", "conv-1"));
    }

    #[test]
    fn test_query_auth_and_header_precedence() {
        let (db, token) = seeded();
        let ctx = authenticate(&db, &HeaderMap::new(), &query(Some(&token), Some("acme"))).unwrap();
        assert_eq!(ctx.conversation_id, "conv-1");

        let mut headers = HeaderMap::new();
        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("bogus"));
        let result = authenticate(&db, &headers, &query(Some(&token), Some("acme")));
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_token_is_tenant_scoped() {
        let (db, token) = seeded();
        let result = authenticate(&db, &HeaderMap::new(), &query(Some(&token), Some("other")));
        assert!(matches!(result, Err(AppError::Unauthorized(_))));

        let result = authenticate(&db, &HeaderMap::new(), &query(None, Some("acme")));
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }
}
