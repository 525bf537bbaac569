//! Failure taxonomy for the remote boundary and the helpers view-states use
//! to decide how loudly to surface a failed fetch.
use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Transport-level failures. The message is what the user sees.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TransportFailure {
    #[error("The request timed out. Please try again.")]
    TimedOut,
    #[error("Cannot connect to the server. Please try again later.")]
    CannotConnect,
    #[error("The network connection was lost. Please try again.")]
    ConnectionLost,
    #[error("A network error occurred. Please try again.")]
    Other,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("The requested URL is invalid.")]
    InvalidRequest,
    #[error("You appear to be offline. Please check your internet connection.")]
    Offline,
    #[error("{0}")]
    Transport(TransportFailure),
    #[error("The server returned an unexpected response.")]
    NonHttpResponse,
    #[error("The server responded with an error (code {0}).")]
    HttpStatus(u16),
    /// Parser detail is kept for logs and never rendered.
    #[error("We couldn't read the data from the server.")]
    Decoding(String),
}

impl NetworkError {
    pub fn is_offline(&self) -> bool {
        matches!(self, NetworkError::Offline)
    }

    /// Classify a reqwest failure into the taxonomy.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_builder() {
            return NetworkError::InvalidRequest;
        }
        if err.is_timeout() {
            return NetworkError::Transport(TransportFailure::TimedOut);
        }
        let io_kind = io_error_kind(err);
        if err.is_connect() {
            return match io_kind {
                Some(
                    io::ErrorKind::NetworkUnreachable
                    | io::ErrorKind::NetworkDown
                    | io::ErrorKind::HostUnreachable,
                ) => NetworkError::Offline,
                _ => NetworkError::Transport(TransportFailure::CannotConnect),
            };
        }
        if err.is_decode() {
            return NetworkError::Decoding(err.to_string());
        }
        match io_kind {
            Some(io::ErrorKind::TimedOut) => NetworkError::Transport(TransportFailure::TimedOut),
            Some(
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof,
            ) => NetworkError::Transport(TransportFailure::ConnectionLost),
            Some(_) => NetworkError::Transport(TransportFailure::Other),
            None if err.is_request() || err.is_body() => NetworkError::NonHttpResponse,
            None => NetworkError::Transport(TransportFailure::Other),
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        NetworkError::from_reqwest(&err)
    }
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut source = Some(err);
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = e.source();
    }
    None
}

/// The network failure carried by `err`, if any.
pub fn network_error(err: &anyhow::Error) -> Option<&NetworkError> {
    err.chain().find_map(|e| e.downcast_ref::<NetworkError>())
}

pub fn is_offline(err: &anyhow::Error) -> bool {
    network_error(err).is_some_and(NetworkError::is_offline)
}

/// Short message suitable for an error state. Non-network failures get a
/// generic summary so storage internals never reach the user.
pub fn user_message(err: &anyhow::Error) -> String {
    match network_error(err) {
        Some(net) => net.to_string(),
        None => "Something went wrong. Please try again.".to_string(),
    }
}
