use thiserror::Error;

/// Errors surfaced by the session layer.
///
/// Protocol problems inside a live session never show up here: they are
/// answered on the wire and close that session only.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BoshError {
    #[error("xml error: {0}")]
    Xml(String),

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("unknown session: {sid}")]
    UnknownSession { sid: String },

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure writing a response to a held connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection already closed")]
    Closed,

    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}
