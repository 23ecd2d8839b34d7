use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An operation was invoked in the wrong lifecycle state. Caller bug.
    #[error("invalid state: {op} requires {required}, but the current state is {actual}")]
    InvalidState {
        op: &'static str,
        required: &'static str,
        actual: &'static str,
    },

    #[error("invalid arguments: {0}")]
    InvalidArgs(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec decode failure. Propagates like an I/O failure.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The replayer engine task has shut down.
    #[error("replayer is closed")]
    Closed,
}

impl Error {
    pub(crate) fn invalid_state(
        op: &'static str,
        required: &'static str,
        actual: &'static str,
    ) -> Self {
        Error::InvalidState {
            op,
            required,
            actual,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
