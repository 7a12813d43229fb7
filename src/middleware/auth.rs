use axum::{
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    extract::Request,
    body::Body,
};
use tower_sessions::Session;
use crate::handlers::USER_SESSION_KEY;

fn is_public(path: &str) -> bool {
    path == "/" || path == "/login" || path == "/register" || path.starts_with("/static/")
}

pub async fn require_auth(
    session: Session,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_public(req.uri().path()) {
        return next.run(req).await;
    }

    match session.get::<String>(USER_SESSION_KEY).await {
        Ok(Some(_)) => next.run(req).await,
        Ok(None) => Redirect::to("/").into_response(),
        Err(e) => {
            tracing::warn!("Unreadable session: {}", e);
            Redirect::to("/").into_response()
        }
    }
}
