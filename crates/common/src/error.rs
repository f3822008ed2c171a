//! Error plumbing shared across the workspace.
//!
//! Each crate keeps its own `thiserror` enum; what they share is the note
//! mechanism below. An error type opts in by implementing [`Noted`] on its
//! message-shaped variant, and call sites use [`NoteExt`] to turn a failed
//! `Result` or an empty `Option` into that error with a short prefix
//! describing what was being attempted.

use thiserror::Error;

/// Fallback error for glue code with no richer taxonomy to report into.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Noted for Error {
    fn noted(note: String) -> Self {
        Self::Message(note)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Context notes ───────────────────────────────────────────────────────────

/// Error types that can absorb a plain contextual note.
pub trait Noted: Sized {
    fn noted(note: String) -> Self;
}

/// Attach a note to a failure, producing whichever [`Noted`] error the
/// caller's signature asks for. On a `Result` the note is prefixed onto the
/// original cause; on an `Option` the note stands alone.
pub trait NoteExt<T> {
    fn note<E: Noted>(self, note: impl Into<String>) -> std::result::Result<T, E>;

    /// Lazy variant for notes that are costly to format.
    fn note_with<E, F, N>(self, f: F) -> std::result::Result<T, E>
    where
        E: Noted,
        F: FnOnce() -> N,
        N: Into<String>;
}

impl<T, C: std::fmt::Display> NoteExt<T> for std::result::Result<T, C> {
    fn note<E: Noted>(self, note: impl Into<String>) -> std::result::Result<T, E> {
        self.map_err(|cause| E::noted(format!("{}: {cause}", note.into())))
    }

    fn note_with<E, F, N>(self, f: F) -> std::result::Result<T, E>
    where
        E: Noted,
        F: FnOnce() -> N,
        N: Into<String>,
    {
        self.map_err(|cause| E::noted(format!("{}: {cause}", f().into())))
    }
}

impl<T> NoteExt<T> for Option<T> {
    fn note<E: Noted>(self, note: impl Into<String>) -> std::result::Result<T, E> {
        self.ok_or_else(|| E::noted(note.into()))
    }

    fn note_with<E, F, N>(self, f: F) -> std::result::Result<T, E>
    where
        E: Noted,
        F: FnOnce() -> N,
        N: Into<String>,
    {
        self.ok_or_else(|| E::noted(f().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_prefixes_the_cause() {
        let failed: std::result::Result<(), &str> = Err("permission denied");
        let noted: Result<()> = failed.note("reading secrets");
        assert_eq!(
            noted.unwrap_err().to_string(),
            "reading secrets: permission denied"
        );
    }

    #[test]
    fn test_note_on_option() {
        let missing: Option<u16> = None;
        let noted: Result<u16> = missing.note("no port recorded");
        assert_eq!(noted.unwrap_err().to_string(), "no port recorded");

        let present: Result<u16> = Some(7000).note("unused");
        assert_eq!(present.unwrap(), 7000);
    }

    #[test]
    fn test_note_with_is_lazy() {
        let mut formatted = false;
        let ok: std::result::Result<u8, &str> = Ok(1);
        let noted: Result<u8> = ok.note_with(|| {
            formatted = true;
            "unreachable".to_string()
        });
        assert_eq!(noted.unwrap(), 1);
        assert!(!formatted);

        let err: std::result::Result<u8, &str> = Err("boom");
        let noted: Result<u8> = err.note_with(|| format!("step {}", 2));
        assert_eq!(noted.unwrap_err().to_string(), "step 2: boom");
    }
}
