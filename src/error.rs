use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Missing or invalid configuration supplied at construction time.
    Configuration,
    /// Dial, read, or write failure on a WebSocket connection.
    Connection,
    /// Event encode/decode failure.
    Serialization,
    /// An event failed its own `Validate` check.
    Validation,
    /// Oversized event or a full queue with no room to admit more work.
    Capacity,
    /// A send failed but the caller may retry (e.g. no healthy connection right now).
    Temporary,
    /// A subscription or handler id did not resolve to a live registration.
    NotFound,
    /// The operation's cancellation token fired before completion.
    Cancelled,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    #[must_use]
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            source: None,
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    #[must_use]
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::with_source(Kind::Configuration, Message(message.into()))
    }

    #[must_use]
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::with_source(Kind::Validation, Message(message.into()))
    }

    #[must_use]
    pub fn capacity<S: Into<String>>(message: S) -> Self {
        Self::with_source(Kind::Capacity, Message(message.into()))
    }

    #[must_use]
    pub fn temporary<S: Into<String>>(message: S) -> Self {
        Self::with_source(Kind::Temporary, Message(message.into()))
    }

    #[must_use]
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::with_source(Kind::NotFound, Message(message.into()))
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::with_source(Kind::Cancelled, Message("operation cancelled".to_owned()))
    }

    #[must_use]
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::with_source(Kind::Connection, Message(message.into()))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {src}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// A bare string wrapped as a [`StdError`] so it can be boxed as `Error::source`.
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::with_source(Kind::Serialization, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::with_source(Kind::Connection, e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::with_source(Kind::Cancelled, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::with_source(Kind::Configuration, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_carries_message() {
        let err = Error::validation("asset_ids cannot be empty");
        assert_eq!(err.kind(), Kind::Validation);
        assert!(err.to_string().contains("asset_ids cannot be empty"));
    }

    #[test]
    fn with_source_preserves_downcast() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.kind(), Kind::Serialization);
        assert!(err.downcast_ref::<serde_json::Error>().is_some());
    }
}
