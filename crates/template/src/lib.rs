//! # Tatami Template
//!
//! Template engine integration for tatami using minijinja.
//!
//! Source files marked with the `.tmpl` suffix are rendered through this
//! crate. Undefined variables are errors by default, matching the strict
//! behavior the reconciliation engine expects, and the function table is
//! `Result`-returning so failures surface as template errors rather than
//! aborting the process.

pub mod engine;
pub mod functions;

pub use engine::{TemplateEngine, TemplateOptions};

use thiserror::Error;

/// Result type for template operations
pub type Result<T> = std::result::Result<T, Error>;

/// Template engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Template parse or render error
    #[error("Template error in {name}: {message}")]
    Render {
        /// Name of the template that failed
        name: String,
        /// Human-readable failure description
        message: String,
    },

    /// A partial template failed to parse
    #[error("Template parse error in {name}: {message}")]
    Parse {
        /// Name of the partial that failed
        name: String,
        /// Human-readable failure description
        message: String,
    },
}

impl Error {
    pub(crate) fn render(name: &str, err: &minijinja::Error) -> Self {
        // minijinja chains the interesting detail on err.source(); fold the
        // chain into one line so the loader can attach the source path.
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = std::error::Error::source(cause);
        }
        Error::Render {
            name: name.to_string(),
            message,
        }
    }
}
