use axum::{http::StatusCode, Json};
use crate::models::ErrorResponse;

const ADMIN_ROLE: &str = "admin";

/// Extract the roles array from validated JWT claims.
pub fn roles_from_claims(claims: &serde_json::Value) -> Vec<String> {
    match claims.get("roles").and_then(|v| v.as_array()) {
        Some(roles_array) => roles_array
            .iter()
            .filter_map(|r| r.as_str().map(|s| s.to_string()))
            .collect(),
        None => Vec::new(),
    }
}

pub fn is_admin(roles: &Vec<String>) -> bool {
    roles.iter().any(|r| r == ADMIN_ROLE)
}

pub fn ensure_admin(roles: &Vec<String>) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if is_admin(roles) {
        return Ok(());
    }

    let status = StatusCode::FORBIDDEN;
    Err((status, Json(ErrorResponse {
        code: status.as_u16(),
        status: status.to_string(),
        error: "Admin access required".to_string(),
    })))
}
