use std::{fmt, path::PathBuf, time::Duration};

/// The error taxonomy from the recipe engine's point of view.
///
/// `ValidationFailure` and `Panic` are deliberately absent: the former is
/// "not an error" (it's `Validated::is_valid`), the latter is a cooperative
/// flag (`ExecutionContext::is_panicking`), not something that propagates.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("visitor for recipe {recipe:?} failed on {path}")]
    Visitor {
        recipe: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("recipe {recipe:?} timed out after {elapsed:?} visiting {n_files} file(s)")]
    Timeout {
        recipe: String,
        elapsed: Duration,
        n_files: usize,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// Turns an arbitrary caught panic payload into a displayable message, the
/// way `per_file_apply` needs to when it wraps a recipe's `Visitor::visit`
/// in `catch_unwind`.
pub(crate) fn panic_payload_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "visitor panicked with a non-string payload".to_string()
    }
}

struct DisplayMessage(String);

impl fmt::Display for DisplayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DisplayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DisplayMessage {}

pub(crate) fn panic_to_anyhow(payload: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    anyhow::Error::new(DisplayMessage(panic_payload_message(payload)))
}
