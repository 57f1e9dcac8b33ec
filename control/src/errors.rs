//! The failure taxonomy from spec §7. Errors are contained at the
//! connection/stream boundary; the only global fatal condition is
//! `BindError` during startup (§4.1).

use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("bind error: {0}")]
    BindError(String),

    #[error("protocol error: {0}")]
    ProtocolError(&'static str),

    #[error("capacity error: {0}")]
    CapacityError(&'static str),

    #[error("permission error: {0}")]
    PermissionError(&'static str),

    #[error("incomplete transfer")]
    IncompleteTransfer,

    #[error("peer gone")]
    PeerGone,
}

impl ServerError {
    /// Renders the `ERROR:<reason>\n` line a wire-format handler sends back
    /// to the peer before closing, per spec §6/§7. `BindError` and
    /// `PeerGone` have no client-facing line; they're not sent, only acted
    /// on.
    pub fn wire_reason(&self) -> Option<String> {
        match self {
            ServerError::ProtocolError(r) => Some(r.to_string()),
            ServerError::CapacityError(r) => Some(r.to_string()),
            ServerError::PermissionError(r) => Some(r.to_string()),
            ServerError::IncompleteTransfer => Some("Incomplete transfer".to_string()),
            ServerError::BindError(_) | ServerError::PeerGone => None,
        }
    }
}
