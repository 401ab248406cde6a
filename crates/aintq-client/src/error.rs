pub struct AintqError(pub(crate) ErrorImpl);

#[non_exhaustive]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AintqErrorKind {
    /// An error occurred when interacting with the database.
    ///
    /// The internal error here is [`sqlx::Error`].
    Database,

    /// Task parameters could not be encoded or decoded.
    ///
    /// This covers malformed payload bytes, payloads that do not match the
    /// parameter schema, and requests for arguments that are missing or have
    /// the wrong type.
    Params,
}

mod detail {
    // We name it like this so we can reuse the debug formatting impl.
    #[derive(Debug)]
    pub(crate) enum AintqError {
        Database(sqlx::Error),
        Params(serde_json::Error),
        MissingArgument(usize),
        MissingKeyword(String),
    }
}

use std::fmt;

pub(crate) use self::detail::AintqError as ErrorImpl;

impl AintqError {
    /// The broad category this error falls into.
    pub fn kind(&self) -> AintqErrorKind {
        match &self.0 {
            ErrorImpl::Database(_) => AintqErrorKind::Database,
            ErrorImpl::Params(_)
            | ErrorImpl::MissingArgument(_)
            | ErrorImpl::MissingKeyword(_) => AintqErrorKind::Params,
        }
    }
}

impl fmt::Debug for AintqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for AintqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ErrorImpl::Database(e) => e.fmt(f),
            ErrorImpl::Params(e) => write!(f, "invalid task parameters: {e}"),
            ErrorImpl::MissingArgument(index) => {
                write!(f, "no positional argument at index {index}")
            }
            ErrorImpl::MissingKeyword(name) => write!(f, "no keyword argument named `{name}`"),
        }
    }
}

impl std::error::Error for AintqError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.0 {
            ErrorImpl::Database(e) => Some(e),
            ErrorImpl::Params(e) => Some(e),
            ErrorImpl::MissingArgument(_) => None,
            ErrorImpl::MissingKeyword(_) => None,
        }
    }
}

impl From<sqlx::Error> for ErrorImpl {
    fn from(error: sqlx::Error) -> Self {
        Self::Database(error)
    }
}

impl From<serde_json::Error> for ErrorImpl {
    fn from(error: serde_json::Error) -> Self {
        Self::Params(error)
    }
}

impl From<sqlx::Error> for AintqError {
    fn from(error: sqlx::Error) -> Self {
        Self(error.into())
    }
}

impl From<serde_json::Error> for AintqError {
    fn from(error: serde_json::Error) -> Self {
        Self(error.into())
    }
}

impl From<ErrorImpl> for AintqError {
    fn from(error: ErrorImpl) -> Self {
        Self(error)
    }
}
