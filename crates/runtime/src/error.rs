use thiserror::Error;

/// Failure class, distinguishable by the runtime CLI's stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// Neither podman nor docker is on PATH.
    NoRuntime,
    /// The named container does not exist.
    NotFound,
    /// Start was asked of a container that is already running.
    AlreadyRunning,
    /// Podman rejected an unqualified image name.
    ShortName,
    /// The image could not be pulled.
    PullFailed,
    /// An exec exceeded its deadline.
    Timeout,
    /// Any other non-zero exit from the runtime CLI.
    CommandFailed,
    /// The CLI process itself could not be spawned.
    Io,
}

#[derive(Debug, Error)]
#[error("container runtime error ({kind:?}, exit {exit_code:?}): {stderr}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl RuntimeError {
    #[must_use]
    pub fn new(kind: RuntimeErrorKind, exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            kind,
            exit_code,
            stderr: stderr.into(),
        }
    }

    #[must_use]
    pub fn no_runtime() -> Self {
        Self::new(
            RuntimeErrorKind::NoRuntime,
            None,
            "neither podman nor docker found on PATH",
        )
    }

    #[must_use]
    pub fn io(source: &std::io::Error) -> Self {
        Self::new(RuntimeErrorKind::Io, None, source.to_string())
    }

    /// Classify a non-zero CLI exit from its stderr.
    #[must_use]
    pub fn from_cli(exit_code: Option<i32>, stderr: &str) -> Self {
        let lowered = stderr.to_lowercase();
        let kind = if lowered.contains("no such container")
            || lowered.contains("no container with name")
        {
            RuntimeErrorKind::NotFound
        } else if lowered.contains("already running")
            || lowered.contains("container state improper")
        {
            RuntimeErrorKind::AlreadyRunning
        } else if lowered.contains("short-name") {
            RuntimeErrorKind::ShortName
        } else if lowered.contains("pull access denied")
            || lowered.contains("manifest unknown")
            || lowered.contains("unable to pull")
            || lowered.contains("not found: manifest")
        {
            RuntimeErrorKind::PullFailed
        } else {
            RuntimeErrorKind::CommandFailed
        };
        Self::new(kind, exit_code, stderr.trim())
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_classification() {
        let cases = [
            ("Error: no such container: x", RuntimeErrorKind::NotFound),
            ("Error: no container with name or ID \"x\"", RuntimeErrorKind::NotFound),
            ("container x is already running", RuntimeErrorKind::AlreadyRunning),
            (
                "Error: short-name \"alpine\" did not resolve",
                RuntimeErrorKind::ShortName,
            ),
            ("pull access denied for private/img", RuntimeErrorKind::PullFailed),
            ("something unexpected", RuntimeErrorKind::CommandFailed),
        ];
        for (stderr, expected) in cases {
            assert_eq!(RuntimeError::from_cli(Some(1), stderr).kind, expected, "{stderr}");
        }
    }

    #[test]
    fn test_error_carries_exit_code_and_stderr() {
        let err = RuntimeError::from_cli(Some(125), "  boom  ");
        assert_eq!(err.exit_code, Some(125));
        assert_eq!(err.stderr, "boom");
    }
}
