//! Error taxonomy shared by the registry, the streams and the drivers / 错误类型

use std::io;

/// Library result alias / 结果类型
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Open mode contains none of `r`, `w`, `a`
    #[error("invalid mode \"{0}\"")]
    InvalidMode(String),

    /// Provider cannot be inferred, or the configuration is unusable
    #[error("configuration error: {0}")]
    Config(String),

    /// No factory registered for the provider name
    #[error("storage provider not found: {0}")]
    ProviderNotFound(String),

    /// Missing object, locator or prefix
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Seek/tell on a non-seekable stream, write on a read-only provider, ...
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O operation on closed stream")]
    Closed,

    /// Any network or provider failure during a transfer
    #[error("transfer failed: {0:#}")]
    Transfer(#[from] anyhow::Error),
}

impl Error {
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Error::Unsupported(operation.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound(path.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::NotFound(_) => io::ErrorKind::NotFound,
            Error::PermissionDenied(_) => io::ErrorKind::PermissionDenied,
            Error::Unsupported(_) => io::ErrorKind::Unsupported,
            Error::InvalidMode(_) | Error::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, error)
    }
}
