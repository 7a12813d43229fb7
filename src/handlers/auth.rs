use axum::{
    extract::{Form, Query, State},
    response::{Html, IntoResponse, Response, Redirect},
};
use serde::Deserialize;
use tower_sessions::Session;
use crate::errors::{AppError, AppResult};
use crate::models::{LoginForm, RegisterForm};
use crate::services::{login_user, register_user};
use crate::state::AppState;
use super::render::{escape_html, fill_template, load_template};

pub const USER_SESSION_KEY: &str = "user_session";

#[derive(Debug, Deserialize)]
pub struct LoginPageQuery {
    error: Option<String>,
    form: Option<String>,
}

pub async fn serve_login_page(Query(query): Query<LoginPageQuery>) -> AppResult<Response> {
    let template = load_template("login.html")?;

    let notice = query
        .error
        .map(|msg| format!(r#"<div class="notice">{}</div>"#, escape_html(&msg)))
        .unwrap_or_default();
    let active_form = match query.form.as_deref() {
        Some("register") => "register",
        _ => "login",
    };

    Ok(Html(fill_template(
        &template,
        &[("notice", notice.as_str()), ("active_form", active_form)],
    ))
    .into_response())
}

pub(crate) fn redirect_with_notice(message: &str, form: Option<&str>) -> Response {
    let mut url = format!("/?error={}", urlencoding::encode(message));
    if let Some(form) = form {
        url.push_str("&form=");
        url.push_str(form);
    }
    Redirect::to(&url).into_response()
}

// Username of the logged-in user, from the signed session cookie
pub(crate) async fn current_user(session: &Session) -> AppResult<String> {
    session
        .get::<String>(USER_SESSION_KEY)
        .await
        .map_err(|e| AppError::Auth(format!("Session error: {}", e)))?
        .ok_or_else(|| AppError::Auth("Not authenticated".into()))
}

// Clears the login marker and drops the live chat session.
pub(crate) async fn end_login(session: &Session, state: &AppState, username: &str) {
    if let Err(e) = session.remove::<String>(USER_SESSION_KEY).await {
        tracing::warn!("Session removal error: {}", e);
    }
    state.sessions.close(username).await;
}

pub async fn handle_login(
    State(state): State<AppState>,
    session: Session,
    Form(login_form): Form<LoginForm>,
) -> Response {
    let username = login_form.username.trim().to_string();
    if username.is_empty() || login_form.password.is_empty() {
        return redirect_with_notice("You need a username and password!", None);
    }

    tracing::debug!("Login attempt for user: {}", username);

    match login_user(state.users.as_ref(), &username, &login_form.password).await {
        Ok(true) => {
            if let Err(e) = session.insert(USER_SESSION_KEY, &username).await {
                tracing::error!("Session error: {}", e);
                return redirect_with_notice("Server error", None);
            }
            // The chat page reopens the session lazily if this fails
            if let Err(e) = state.sessions.open(&username).await {
                tracing::warn!("Chat session for {} not ready: {}", username, e);
            }
            tracing::info!("{} logged in", username);
            Redirect::to("/chat").into_response()
        }
        Ok(false) => redirect_with_notice("Incorrect credentials.", None),
        Err(e) => {
            tracing::error!("Login failed for {}: {}", username, e);
            redirect_with_notice("Server error", None)
        }
    }
}

pub async fn handle_register(
    State(state): State<AppState>,
    Form(register_form): Form<RegisterForm>,
) -> Response {
    if register_form.username.trim().is_empty() || register_form.password.is_empty() {
        return redirect_with_notice("You need a username and password!", Some("register"));
    }
    if register_form.password != register_form.confirm_password {
        return redirect_with_notice("Passwords don't match", Some("register"));
    }

    let registered = register_user(
        state.users.as_ref(),
        state.assistants.as_ref(),
        &register_form.username,
        &register_form.password,
        state.config.quota.default_limit,
        state.config.security.bcrypt_cost,
    )
    .await;

    match registered {
        Ok(true) => redirect_with_notice("You're registered! Please login", None),
        Ok(false) => redirect_with_notice("User already exists! Try Again!", Some("register")),
        Err(e) => {
            tracing::error!("Failed to register {}: {}", register_form.username, e);
            redirect_with_notice("Registration failed", Some("register"))
        }
    }
}

pub async fn handle_logout(
    State(state): State<AppState>,
    session: Session,
) -> Response {
    if let Ok(username) = current_user(&session).await {
        end_login(&session, &state, &username).await;
        tracing::info!("{} logged out", username);
    }
    Redirect::to("/").into_response()
}
