use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The referenced learner, verse, study, or session does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The operation would duplicate something that must be unique
    /// (an already-tracked verse, a second open session).
    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }
}
