//! Error types for the otf-core crate.
//!
//! This module provides [`ConfigError`] for a single failed option,
//! [`ConfigErrors`] for the full list produced by one validation pass, and
//! [`EnvelopeError`] for wire-format failures.

use std::fmt;

use camino::Utf8PathBuf;

/// Errors that can occur while loading or validating reader configuration.
///
/// # Examples
///
/// ```
/// use otf_core::ConfigError;
///
/// let error = ConfigError::Required { option: "topic" };
/// assert!(error.to_string().contains("topic"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A mandatory option was empty.
    #[error("option '{option}' cannot be empty")]
    Required {
        /// The name of the missing option.
        option: &'static str,
    },

    /// An enumerated option had a value outside its allowed set.
    #[error("{option} '{value}' not supported (must be one of {expected})")]
    Unsupported {
        /// The name of the option.
        option: &'static str,
        /// The value that was supplied.
        value: String,
        /// The accepted values, `|` separated.
        expected: &'static str,
    },

    /// The topic name is not alphanumeric with interior dots.
    #[error(
        "invalid topic '{0}': topic names must be alphanumeric and may contain, \
         but not start or end with, a period (.) as token delimiter"
    )]
    InvalidTopic(String),

    /// The poll interval could not be parsed as a duration.
    #[error("invalid watch interval '{value}': {reason}")]
    InvalidInterval {
        /// The interval string that was supplied.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The provided path is invalid or malformed.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The invalid path.
        path: Utf8PathBuf,
        /// Explanation of why the path is invalid.
        reason: String,
    },

    /// The watch folder does not exist.
    #[error("missing required directory: {0}")]
    MissingDirectory(Utf8PathBuf),

    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: &'static str,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// An I/O error occurred while reading configuration.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Every failure found by a single call to
/// [`ReaderSettings::build`](crate::ReaderSettings::build).
///
/// Validation never stops at the first bad option, so operators see all
/// problems with a configuration at once.
#[derive(Debug)]
pub struct ConfigErrors(Vec<ConfigError>);

impl ConfigErrors {
    pub(crate) fn new(errors: Vec<ConfigError>) -> Self {
        Self(errors)
    }

    /// Returns the individual errors.
    #[must_use]
    pub fn errors(&self) -> &[ConfigError] {
        &self.0
    }

    /// Returns the number of errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid reader configuration")?;
        for error in &self.0 {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

impl IntoIterator for ConfigErrors {
    type Item = ConfigError;
    type IntoIter = std::vec::IntoIter<ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Errors raised while encoding or decoding an [`Envelope`](crate::Envelope).
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The envelope could not be serialized.
    #[error("cannot create envelope message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The bytes are not a valid envelope.
    #[error("cannot decode envelope message: {0}")]
    Decode(#[source] serde_json::Error),
}
