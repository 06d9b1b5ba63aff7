use thiserror::Error;

use ripple_gateway::GatewayError;

/// Everything that can go wrong inside a sync operation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("malformed {what} row: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    #[error("no signed-in user")]
    AuthRequired,
}

/// Coarse classification used when turning errors into user-facing notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NetworkOrServer,
    NotFound,
    AuthRequired,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Gateway(_) | Self::Decode { .. } => ErrorKind::NetworkOrServer,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AuthRequired => ErrorKind::AuthRequired,
        }
    }

    pub(crate) fn decode(what: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Decode { what, source }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
