use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// True for failures a client can fix by changing its statement,
    /// as opposed to programmer bugs.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, DbError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
