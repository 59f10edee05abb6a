use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    RelayError(#[from] RelayError),
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RelayError {
    pub kind: RelayErrorKind,
    pub message: String,
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RelayErrorKind {
    #[error("duplicate stream error")]
    DuplicateStream,
    #[error("not owner error")]
    NotOwner,
    #[error("no such stream error")]
    NoSuchStream,
    #[error("malformed event error")]
    MalformedEvent,
    #[error("unknown target error")]
    UnknownTarget,
    #[error("unknown connection error")]
    UnknownConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigErrorKind {
    #[error("invalid value error")]
    InvalidValue,
}

impl Error {
    pub fn new_relay(message: String, kind: RelayErrorKind) -> Error {
        Error::RelayError(RelayError { kind, message })
    }

    pub fn new_config(message: String, kind: ConfigErrorKind) -> Error {
        Error::ConfigError(ConfigError { kind, message })
    }

    /// Returns the relay error kind, if this is a relay error.
    pub fn relay_kind(&self) -> Option<RelayErrorKind> {
        match self {
            Error::RelayError(err) => Some(err.kind),
            _ => None,
        }
    }
}

impl fmt::Debug for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("livecast_relay::RelayError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("livecast_relay::ConfigError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}
