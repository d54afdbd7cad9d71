//! Error types for the scheduler, configuration and thread-conversion policy.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type WispResult<T> = Result<T, WispError>;

/// Errors surfaced by engine pools and task primitives.
#[derive(Debug, Error)]
pub enum WispError {
    /// The pool no longer accepts work
    #[error("Engine '{0}' is shut down")]
    Shutdown(String),

    /// The calling task (or thread) was interrupted while waiting
    #[error("Interrupted")]
    Interrupted,

    /// A timed wait elapsed
    #[error("Timed out")]
    TimedOut,

    /// Stack mapping for an execution context failed
    #[error("Failed to allocate execution context: {0}")]
    ContextAlloc(#[source] std::io::Error),

    /// The thread factory could not start an OS thread
    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        /// Thread name that was requested
        name: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The I/O readiness poller could not be created
    #[error("Poller error: {0}")]
    Poller(#[source] std::io::Error),

    /// Invalid thread-conversion rules
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while compiling black/white-list rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Rule does not have the `kind:pattern` shape
    #[error("Malformed rule '{0}': expected 'name:', 'class:' or 'package:' prefix")]
    MissingKind(String),

    /// Prefix before ':' is not a known rule kind
    #[error("Unknown rule kind '{kind}' in '{rule}'")]
    UnknownKind {
        /// The offending kind
        kind: String,
        /// The full rule text
        rule: String,
    },

    /// Pattern after ':' is empty
    #[error("Empty pattern in rule '{0}'")]
    EmptyPattern(String),

    /// Pattern contains characters that can never match a thread descriptor
    #[error("Invalid character {ch:?} in pattern '{pattern}'")]
    InvalidCharacter {
        /// The offending character
        ch: char,
        /// The pattern text
        pattern: String,
    },

    /// The compiled expression was rejected by the regex engine
    #[error("Failed to compile pattern '{pattern}': {message}")]
    Regex {
        /// The pattern text
        pattern: String,
        /// Regex engine diagnostic
        message: String,
    },
}

/// Errors raised while loading or validating [`crate::WispConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds an unusable value
    #[error("Invalid value for '{field}': {message}")]
    Invalid {
        /// Field path, e.g. `handoff.policy`
        field: String,
        /// What is wrong with it
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Prints a diagnostic and aborts the process.
///
/// Used when a scheduler invariant is found broken; continuing would risk
/// running one execution context on two carriers.
#[cold]
pub(crate) fn fatal(message: &str) -> ! {
    eprintln!("wisp: fatal: {}", message);
    std::process::abort()
}
