//! Instance connection names.
//!
//! An instance connection name identifies a managed database instance without
//! exposing any network coordinates. It is the operator-facing triple
//! `PROJECT:REGION:INSTANCE`, and every connector entry point takes one.

use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

/// Identifier of a managed database instance, in the form
/// `PROJECT:REGION:INSTANCE`.
///
/// Parsing is strict: exactly three colon-delimited, non-empty fields. Case is
/// preserved.
///
/// # Examples
///
/// ```
/// use cloudsql::InstanceName;
///
/// let name = InstanceName::new("my-project:us-central1:my-db").unwrap();
/// assert_eq!("my-project", name.project());
/// assert_eq!("us-central1", name.region());
/// assert_eq!("my-db", name.instance());
/// assert_eq!("my-project:us-central1:my-db", name.to_string());
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct InstanceName {
    project: String,
    region: String,
    instance: String,
}

/// An error that can arise parsing an instance connection name.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum InstanceNameError {
    /// An empty string cannot be parsed as a connection name.
    #[error("cannot be empty")]
    Empty,

    /// The name must contain exactly three colon-delimited fields.
    #[error("expected \"PROJECT:REGION:INSTANCE\" with exactly three fields, found {found}")]
    WrongFieldCount {
        /// Number of colon-delimited fields found in the input.
        found: usize,
    },

    /// None of the three fields may be empty.
    #[error("connection name fields cannot be empty")]
    EmptyField,
}

impl InstanceName {
    /// Parses an instance connection name from its string form.
    ///
    /// # Errors
    ///
    /// Returns an [`InstanceNameError`] if the input is empty, does not have
    /// exactly three colon-delimited fields, or has an empty field.
    pub fn new(name: &str) -> Result<Self, InstanceNameError> {
        if name.is_empty() {
            return Err(InstanceNameError::Empty);
        }

        let fields: Vec<&str> = name.split(':').collect();
        if fields.len() != 3 {
            return Err(InstanceNameError::WrongFieldCount {
                found: fields.len(),
            });
        }
        if fields.iter().any(|field| field.is_empty()) {
            return Err(InstanceNameError::EmptyField);
        }

        Ok(Self {
            project: fields[0].to_string(),
            region: fields[1].to_string(),
            instance: fields[2].to_string(),
        })
    }

    /// The project identifier (first field).
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The region identifier (second field).
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The instance identifier (third field).
    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl Display for InstanceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.region, self.instance)
    }
}

impl FromStr for InstanceName {
    type Err = InstanceNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for InstanceName {
    type Error = InstanceNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
