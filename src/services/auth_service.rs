use std::sync::Arc;
use std::time::Duration;

use axum::http::{self, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation, TokenData};
use moka::sync::Cache;
use tracing::{error, info};

use crate::auth::auth::roles_from_claims;
use crate::collab::error::CollabError;
use crate::storage::{IdentityProvider, StorageError, UserRecord};

/// Identity attached to a connection or request after the bearer token has
/// been validated and resolved.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: UserRecord,
    pub roles: Vec<String>,
}

/// Validates bearer tokens and resolves them to user records, with a
/// short-lived cache in front of the identity service.
pub struct AuthService {
    identity: Arc<dyn IdentityProvider>,
    jwt_secret: Option<String>,
    user_cache: Cache<String, UserRecord>,
}

impl AuthService {
    pub fn new(identity: Arc<dyn IdentityProvider>, jwt_secret: Option<String>) -> Self {
        let user_cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build();

        Self {
            identity,
            jwt_secret,
            user_cache,
        }
    }

    /// Validate a bearer token and resolve the user behind it. Inactive and
    /// unknown users are rejected the same way as a bad signature.
    pub async fn authenticate(&self, token: &str) -> Result<AuthContext, CollabError> {
        let secret = match &self.jwt_secret {
            Some(secret) => secret,
            None => {
                error!("Cloud auth JWT secret not configured");
                return Err(CollabError::Internal("JWT secret not configured".to_string()));
            }
        };

        let token_data = validate_jwt(token, secret)
            .map_err(|e| CollabError::AuthenticationFailure(format!("JWT validation failed: {}", e)))?;

        let uid = token_data
            .claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                CollabError::AuthenticationFailure("JWT token does not contain a 'sub' claim".to_string())
            })?;

        let roles = roles_from_claims(&token_data.claims);

        let user = self.resolve_user(uid).await?;
        if !user.is_active {
            return Err(CollabError::AuthenticationFailure(format!(
                "user {} is not active",
                uid
            )));
        }

        Ok(AuthContext { user, roles })
    }

    async fn resolve_user(&self, uid: &str) -> Result<UserRecord, CollabError> {
        if let Some(user) = self.user_cache.get(uid) {
            return Ok(user);
        }

        info!("User cache miss for uid {}. Resolving from identity service.", uid);
        let user = self.identity.get_user(uid).await.map_err(|e| match e {
            StorageError::NotFound => {
                CollabError::AuthenticationFailure(format!("user {} not found", uid))
            }
            StorageError::Unavailable(msg) => CollabError::Internal(msg),
        })?;

        self.user_cache.insert(uid.to_string(), user.clone());
        Ok(user)
    }

    /// Number of user records currently cached.
    pub fn cached_users(&self) -> u64 {
        self.user_cache.entry_count()
    }
}

/// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

// Get the auth token from a request
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| "Invalid Authorization header".to_string())?;
        Ok(auth_str
            .strip_prefix("Bearer ")
            .unwrap_or(auth_str)
            .to_string())
    }
    // 2. Try to get token from cookies
    else {
        let cookie_header = req.headers().get(http::header::COOKIE)
            .ok_or_else(|| "Missing Authorization header or Cookie".to_string())?
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;

        for cookie in cookie::Cookie::split_parse(cookie_header) {
            if let Ok(c) = cookie {
                if c.name() == "auth_token" {
                    return Ok(c.value().to_string());
                }
            }
        }
        Err("auth_token cookie not found".to_string())
    }
}

/// Token lookup for the WebSocket handshake. Browser clients cannot set
/// headers on the upgrade request, so a `token` query parameter is accepted
/// alongside the Authorization header and the auth_token cookie.
pub fn get_handshake_token(headers: &HeaderMap, query_token: Option<String>) -> Option<String> {
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            return Some(
                auth_str
                    .strip_prefix("Bearer ")
                    .unwrap_or(auth_str)
                    .to_string(),
            );
        }
    }

    if let Some(cookie_header) = headers.get(http::header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie::Cookie::split_parse(cookie_str) {
                if let Ok(c) = cookie {
                    if c.name() == "auth_token" {
                        return Some(c.value().to_string());
                    }
                }
            }
        }
    }

    query_token
}
