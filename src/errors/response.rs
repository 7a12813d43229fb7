use axum::{
    response::{IntoResponse, Response, Redirect},
    http::StatusCode,
};
use crate::errors::{
    AppError,
    gateway::GatewayError,
    repository::RepositoryError,
};

// Converts AppError into an HTTP response. Authentication problems go back to the login page.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Auth(msg) => {
                Redirect::to(&format!("/?error={}", urlencoding::encode(&msg)))
                    .into_response()
            }

            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid input: {}", msg)
            ).into_response(),

            AppError::Repository(err) => convert_repository_error(err),

            AppError::Gateway(err) => convert_gateway_error(err),

            // Details of internal failures stay in the logs
            other => {
                tracing::error!("Request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string()
                ).into_response()
            }
        }
    }
}

fn convert_repository_error(err: RepositoryError) -> Response {
    match err {
        RepositoryError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            "Account not found".to_string()
        ).into_response(),

        RepositoryError::DuplicateUser(name) => (
            StatusCode::CONFLICT,
            format!("Username {} already taken", name)
        ).into_response(),

        other => {
            tracing::error!("Repository failure: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string()
            ).into_response()
        }
    }
}

fn convert_gateway_error(err: GatewayError) -> Response {
    match err {
        GatewayError::Generation(msg) => (
            StatusCode::BAD_GATEWAY,
            format!("The assistant could not answer: {}", msg)
        ).into_response(),

        GatewayError::Timeout(seconds) => (
            StatusCode::GATEWAY_TIMEOUT,
            format!("The assistant did not answer within {} seconds", seconds)
        ).into_response(),

        other => {
            tracing::error!("Assistant gateway failure: {}", other);
            (
                StatusCode::BAD_GATEWAY,
                "Assistant service unavailable".to_string()
            ).into_response()
        }
    }
}
