use thiserror::Error;

/// Error kinds surfaced by the library.
///
/// Validation failures (`InvalidArgument`) are raised before any I/O.
/// Transport-level failures are folded into `Network`; body accessor
/// failures (`Decode`, `Parse`) are raised by the accessor, never by
/// `fetch` itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("body decode failed: {0}")]
    Decode(String),
    #[error("JSON parse failed: {0}")]
    Parse(String),
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),
}

impl FetchError {
    /// Fold any displayable transport error into the `Network` kind.
    pub fn network(err: impl std::fmt::Display) -> Self {
        FetchError::Network(err.to_string())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        FetchError::InvalidArgument(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout)
    }
}

impl From<hyper::Error> for FetchError {
    fn from(err: hyper::Error) -> Self {
        FetchError::network(err)
    }
}

impl From<h2::Error> for FetchError {
    fn from(err: h2::Error) -> Self {
        FetchError::network(err)
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::network(err)
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        FetchError::InvalidArgument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_discriminable() {
        let err = FetchError::Timeout;
        assert!(err.is_timeout());
        assert!(!FetchError::network("reset").is_timeout());
    }

    #[test]
    fn test_io_error_maps_to_network() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        match FetchError::from(io) {
            FetchError::Network(msg) => assert!(msg.contains("refused")),
            other => panic!("expected Network, got {other:?}"),
        }
    }

    #[test]
    fn test_url_error_maps_to_invalid_argument() {
        let err = url::Url::parse("not a url").unwrap_err();
        assert!(matches!(FetchError::from(err), FetchError::InvalidArgument(_)));
    }
}
