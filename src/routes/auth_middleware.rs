use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::error;

use crate::collab::error::CollabError;
use crate::services::auth_service::get_auth_token;
use crate::AppState;

pub async fn auth_middleware(
    State(app_state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Get the auth token from the request
    let token = match get_auth_token(&req) {
        Ok(token) => token,
        Err(_) => return Err(StatusCode::UNAUTHORIZED),
    };

    // 2. Validate the token and resolve the user behind it
    let ctx = match app_state.auth.authenticate(&token).await {
        Ok(ctx) => ctx,
        Err(CollabError::AuthenticationFailure(e)) => {
            error!("JWT validation failed: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
        Err(e) => {
            error!("Failed to resolve user context: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // 3. Set user and roles into request extensions for downstream handlers
    {
        let extensions = req.extensions_mut();
        extensions.insert(ctx.roles.clone());
        extensions.insert(ctx.user.clone());
    }

    // Token is valid and we have user context, proceed to next middleware/handler
    Ok(next.run(req).await)
}
