use ploinky_common::Noted;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid manifest: {0}")]
    Manifest(String),
    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest(reason.into())
    }
}

impl Noted for Error {
    fn noted(note: String) -> Self {
        Self::Message { message: note }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
