use thiserror::Error;

/// Failures surfaced by a [`Store`](crate::store::Store) or while loading configuration.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON: {0}")]
    Bson(#[from] bson::error::Error),

    #[error("Document not found: {0}")]
    NoSuchDocument(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Cast error: {0}")]
    Cast(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Error handed to the [`ErrorHandler`](crate::operations::ErrorHandler), tagged with
/// the status code the response writer should use.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("Not Found")]
    NotFound,

    #[error("{0}")]
    Store(#[from] DbError),
}

impl OpError {
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Store(_) => 400,
        }
    }
}
