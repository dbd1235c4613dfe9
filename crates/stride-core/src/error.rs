use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,
    #[error("session is not authenticated")]
    Unauthenticated,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("database error: {0}")]
    Database(#[from] stride_db::DbError),
    #[error("internal error: {0}")]
    Internal(String),
}
