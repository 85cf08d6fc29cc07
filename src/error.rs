use thiserror::Error;

/// Failure of a fetch flight, normalized so every caller sees one shape.
///
/// Variants carry strings rather than source errors so a settled flight can
/// be broadcast to any number of waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Upstream answered with a non-success HTTP status.
    #[error("upstream returned HTTP {status}")]
    UpstreamStatus { status: u16 },

    /// The request never produced a usable response (connect, TLS, timeout).
    #[error("request failed: {0}")]
    Transport(String),

    /// Response arrived but the body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The producer task panicked or was aborted before settling.
    #[error("producer failed: {0}")]
    Producer(String),

    /// The flight disappeared without ever settling.
    #[error("fetch interrupted before completion")]
    Interrupted,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::UpstreamStatus {
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}
