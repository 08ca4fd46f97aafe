//! # Errors
//!
//! Error types shared by every core operation.

use crate::storage::StoreError;
use crate::token::TokenError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result alias for core operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by domain operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record failed validation.
    #[error("validation failed: {0}")]
    Invalid(ValidationErrors),

    /// The viewer is not allowed to perform the action.
    #[error("not allowed")]
    Forbidden,

    /// The action requires a signed-in user or a friend token.
    #[error("not authenticated")]
    NotAuthenticated,

    /// A notification was addressed to a recipient its noticeable cannot
    /// describe itself to.
    #[error("invalid recipient for {0} notification")]
    InvalidRecipient(&'static str),

    /// A signed token could not be verified.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl Error {
    /// Build a `NotFound` error for a record kind and id.
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Self::Invalid(errors)
    }
}

// =============================================================================
// VALIDATION ERRORS
// =============================================================================

/// Field-keyed validation messages.
///
/// Serializes as `{"field": ["message", ...]}`. The `base` field holds
/// errors that are not tied to a single attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message against a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Append every message from another set.
    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.fields {
            self.fields.entry(field).or_default().extend(messages);
        }
    }

    /// Whether no errors were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Messages recorded for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the field has at least one message.
    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// `Ok(())` when empty, `Err(Error::Invalid)` otherwise.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Invalid(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    f.write_str(", ")?;
                }
                first = false;
                write!(f, "{field} {message}")?;
            }
        }
        Ok(())
    }
}
