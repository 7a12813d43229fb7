use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Assistant API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Run did not finish within {0} seconds")]
    Timeout(u64),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Api { status: 404, .. })
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
