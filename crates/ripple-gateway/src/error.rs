use thiserror::Error;

/// Failures reported by a gateway implementation.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The backend could not be reached or the call was interrupted.
    #[error("network error: {0}")]
    Network(String),

    /// The backend rejected or failed the request.
    #[error("server error: {0}")]
    Server(String),

    /// The query referenced something the backend does not expose.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A row or payload could not be (de)serialized.
    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),

    /// Auth session lookup failed (distinct from "nobody signed in").
    #[error("auth session error: {0}")]
    Auth(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
