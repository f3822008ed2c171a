use ploinky_common::Noted;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("image pull failed for '{image}': {reason}")]
    ImagePullFailed { image: String, reason: String },
    #[error("install hook failed: {0}")]
    InstallFailed(String),
    #[error("container '{container}' failed to start: {reason}")]
    ContainerStartFailed { container: String, reason: String },
    #[error("probe script '{script}' not found in /code of '{container}'")]
    ProbeScriptMissing { container: String, script: String },
    #[error("probe failed for '{container}': {reason}")]
    ProbeFailed { container: String, reason: String },
    #[error("container '{container}' did not come back after restart")]
    RestartFailed { container: String },
    #[error("could not allocate a host port: {0}")]
    PortAllocationFailed(String),
    #[error(transparent)]
    Registry(#[from] ploinky_registry::Error),
    #[error(transparent)]
    Runtime(#[from] ploinky_runtime::RuntimeError),
    #[error("{message}")]
    Message { message: String },
}

impl From<ploinky_config::Error> for Error {
    fn from(e: ploinky_config::Error) -> Self {
        match e {
            ploinky_config::Error::Manifest(reason) => Self::ManifestInvalid(reason),
            other => Self::Message {
                message: other.to_string(),
            },
        }
    }
}

impl Noted for Error {
    fn noted(note: String) -> Self {
        Self::Message { message: note }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
