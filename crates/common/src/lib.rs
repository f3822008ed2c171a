pub mod error;
pub mod logfile;

pub use error::{Error, NoteExt, Noted, Result};
