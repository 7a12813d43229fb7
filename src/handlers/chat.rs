use axum::{
    extract::{Form, Query, State},
    response::{Html, IntoResponse, Json, Response, Redirect},
};
use serde::Deserialize;
use tower_sessions::Session;
use crate::errors::{AppError, AppResult, RepositoryError};
use crate::models::{word_count, ChatForm, ChatMessage};
use crate::services::{SharedSession, TurnOutcome};
use crate::state::AppState;
use super::auth::{current_user, end_login, redirect_with_notice};
use super::render::{escape_html, fill_template, load_template, render_history};

const TERMINATION_NOTICE: &str = "Terminating account; you've exceeded the word limit...";

#[derive(Debug, Deserialize)]
pub struct ChatPageQuery {
    notice: Option<String>,
}

// A stored login whose account no longer exists is logged out.
async fn chat_session(state: &AppState, session: &Session, username: &str) -> AppResult<SharedSession> {
    match state.sessions.open(username).await {
        Err(AppError::Repository(RepositoryError::NotFound(_))) => {
            end_login(session, state, username).await;
            Err(AppError::Auth("Account not found".into()))
        }
        other => other,
    }
}

pub async fn serve_chat_page(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ChatPageQuery>,
) -> AppResult<Response> {
    let username = current_user(&session).await?;
    let shared = chat_session(&state, &session, &username).await?;

    let user = state
        .users
        .find_by_username(&username)
        .await?
        .ok_or_else(|| AppError::Auth("Account not found".into()))?;

    let messages = {
        let chat = shared.lock().await;
        render_history(chat.username(), chat.history())
    };
    let notice = query
        .notice
        .map(|msg| format!(r#"<div class="notice">{}</div>"#, escape_html(&msg)))
        .unwrap_or_default();

    let template = load_template("chat.html")?;
    let display_name = escape_html(&username);
    let usage = user.usage.to_string();
    let limit = user.limit.to_string();
    let remaining = user.remaining_words().to_string();
    let html = fill_template(
        &template,
        &[
            ("username", display_name.as_str()),
            ("messages", messages.as_str()),
            ("usage", usage.as_str()),
            ("limit", limit.as_str()),
            ("remaining", remaining.as_str()),
            ("notice", notice.as_str()),
        ],
    );

    Ok(Html(html).into_response())
}

pub async fn handle_message(
    State(state): State<AppState>,
    session: Session,
    Form(chat_form): Form<ChatForm>,
) -> AppResult<Response> {
    let username = current_user(&session).await?;
    let shared = chat_session(&state, &session, &username).await?;

    let (result, terminated) = {
        let mut chat = shared.lock().await;
        let result = chat.submit(&chat_form.message).await;
        tracing::debug!("Session for {} is now {:?}", username, chat.state());
        (result, chat.is_terminated())
    };

    match result {
        Ok(TurnOutcome::Delivered { response, usage, remaining }) => {
            tracing::debug!(
                "{}-word reply for {}, {} used, {} left",
                word_count(&response),
                username,
                usage,
                remaining
            );
            Ok(Redirect::to("/chat").into_response())
        }
        Ok(TurnOutcome::QuotaExceeded { response, usage }) => {
            tracing::info!(
                "Terminated {} at {} words (last prompt answered: {})",
                username,
                usage,
                response.is_some()
            );
            end_login(&session, &state, &username).await;
            Ok(redirect_with_notice(TERMINATION_NOTICE, None))
        }
        Err(AppError::Validation(msg)) => {
            Ok(Redirect::to(&format!("/chat?notice={}", urlencoding::encode(&msg))).into_response())
        }
        Err(e) if terminated => {
            tracing::error!("Account {} terminated with errors: {}", username, e);
            end_login(&session, &state, &username).await;
            Ok(redirect_with_notice(TERMINATION_NOTICE, None))
        }
        Err(e) => Err(e),
    }
}

pub async fn handle_wipe(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Response> {
    let username = current_user(&session).await?;
    let shared = chat_session(&state, &session, &username).await?;

    let result = shared.lock().await.wipe().await;
    end_login(&session, &state, &username).await;

    let report = result?;
    tracing::info!("Wiped {} on request after {} attempt(s)", username, report.attempts);
    Ok(redirect_with_notice("Your account and chat history have been wiped.", None))
}

pub async fn thread_messages(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let username = current_user(&session).await?;
    let shared = chat_session(&state, &session, &username).await?;
    let chat = shared.lock().await;
    Ok(Json(chat.thread_messages().await?))
}
