use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for directory-backed operations.
///
/// Validation problems (`ExcludedName`, `Invalid`) are rejected before any
/// directory or tool call. `Tool` is only raised when a post-condition
/// re-read shows the intended state was not reached; stderr noise from an
/// otherwise verified operation is logged and tolerated.
#[derive(Debug, Error)]
pub enum Error {
    #[error("name '{name}' is excluded by policy")]
    ExcludedName { name: String },

    #[error("invalid {what}: '{value}'")]
    Invalid { what: &'static str, value: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("directory operation failed: {0}")]
    Directory(#[from] ldap3::LdapError),

    #[error("{command} did not reach the intended state: {detail}")]
    Tool { command: String, detail: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn excluded(name: impl Into<String>) -> Self {
        Error::ExcludedName { name: name.into() }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn tool(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Tool {
            command: command.into(),
            detail: detail.into(),
        }
    }
}
