#[derive(Debug, thiserror::Error)]
pub enum TaskServerError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for TaskServerError {
    fn from(err: sqlx::Error) -> Self {
        TaskServerError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for TaskServerError {
    fn from(err: serde_json::Error) -> Self {
        TaskServerError::Serialization(err.to_string())
    }
}
