//! Typed error taxonomy for the pipeline core.
//!
//! Application code carries these through `anyhow` so callers can downcast
//! when they need to distinguish failure classes.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A collaborator service was unreachable or rejected the request.
    #[error("remote service error{}: {message}", fmt_status(.status))]
    RemoteService {
        status: Option<u16>,
        message: String,
    },

    /// A requested action is missing configuration keys. All missing keys
    /// are reported at once.
    #[error("action `{action}` is missing configuration: {}", .keys.join(", "))]
    MissingConfiguration { action: String, keys: Vec<String> },

    /// A selection referenced a group name absent from the ledger.
    #[error("unknown group in selection: {name}")]
    UnknownGroup { name: String },

    /// The action registry declared a dependency cycle.
    #[error("cyclic action dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

impl Error {
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::RemoteService {
            status,
            message: message.into(),
        }
    }
}
