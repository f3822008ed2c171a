use ploinky_common::Noted;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("lock for '{container}' is held by another operation")]
    LockBusy { container: String },
    #[error("{message}")]
    Message { message: String },
}

impl Noted for Error {
    fn noted(note: String) -> Self {
        Self::Message { message: note }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
