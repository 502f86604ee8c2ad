//! The option surface shared by all driver adapters.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Option key naming the target instance (`project:region:instance`).
pub const KEY_INSTANCE: &str = "cloudSqlInstance";
/// Option key carrying the comma-separated address-type preference list.
pub const KEY_IP_TYPES: &str = "ipTypes";
/// Option key enabling the Unix-socket bypass.
pub const KEY_UNIX_SOCKET: &str = "unixSocketPath";

/// An error that can arise interpreting driver options.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum OptionsError {
    /// The required `cloudSqlInstance` option is missing or empty.
    #[error("missing required option \"cloudSqlInstance\"")]
    MissingInstance,

    /// `ipTypes` was present but contained no usable entries.
    #[error("option \"ipTypes\" must be a non-empty comma-separated list")]
    EmptyIpTypes,
}

/// Connection options recognized across every driver adapter.
///
/// Unrecognized driver options are ignored by the extractors; drivers carry
/// plenty of keys that are none of the connector's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    instance: String,
    ip_types: Vec<String>,
    unix_socket_path: Option<PathBuf>,
}

impl ConnectOptions {
    /// Creates options for an instance with the default address preferences.
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            ip_types: default_ip_types(),
            unix_socket_path: None,
        }
    }

    /// Replaces the address-type preference list.
    #[must_use]
    pub fn with_ip_types<I, S>(mut self, ip_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ip_types = ip_types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the Unix-socket bypass path.
    #[must_use]
    pub fn with_unix_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.unix_socket_path = Some(path.into());
        self
    }

    /// Extracts options from key/value pairs, ignoring unrecognized keys.
    ///
    /// # Errors
    ///
    /// Fails when `cloudSqlInstance` is missing or empty, or when `ipTypes`
    /// is present but empty.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut instance = None;
        let mut ip_types = None;
        let mut unix_socket_path = None;
        for (key, value) in pairs {
            match key {
                KEY_INSTANCE => instance = Some(value),
                KEY_IP_TYPES => ip_types = Some(parse_ip_types(value)?),
                KEY_UNIX_SOCKET => unix_socket_path = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        let instance = instance
            .filter(|value| !value.is_empty())
            .ok_or(OptionsError::MissingInstance)?;
        Ok(Self {
            instance: instance.to_string(),
            ip_types: ip_types.unwrap_or_else(default_ip_types),
            unix_socket_path,
        })
    }

    /// The instance connection name.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// The address-type preference list, in order.
    pub fn ip_types(&self) -> &[String] {
        &self.ip_types
    }

    /// The Unix-socket bypass path, if configured.
    pub fn unix_socket_path(&self) -> Option<&Path> {
        self.unix_socket_path.as_deref()
    }
}

fn default_ip_types() -> Vec<String> {
    cloudsql::DEFAULT_IP_TYPES
        .iter()
        .map(|tag| (*tag).to_string())
        .collect()
}

fn parse_ip_types(raw: &str) -> Result<Vec<String>, OptionsError> {
    let types: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect();
    if types.is_empty() {
        return Err(OptionsError::EmptyIpTypes);
    }
    Ok(types)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_public_then_private() {
        let options = ConnectOptions::from_pairs([(KEY_INSTANCE, "p:r:i")]).unwrap();
        assert_eq!(options.instance(), "p:r:i");
        assert_eq!(options.ip_types(), ["PUBLIC", "PRIVATE"]);
        assert_eq!(options.unix_socket_path(), None);
    }

    #[test]
    fn parses_ip_types_preserving_order() {
        let options =
            ConnectOptions::from_pairs([(KEY_INSTANCE, "p:r:i"), (KEY_IP_TYPES, "PRIVATE,PUBLIC")])
                .unwrap();
        assert_eq!(options.ip_types(), ["PRIVATE", "PUBLIC"]);
    }

    #[test]
    fn trims_ip_type_entries() {
        let options = ConnectOptions::from_pairs([
            (KEY_INSTANCE, "p:r:i"),
            (KEY_IP_TYPES, " PRIVATE , PUBLIC "),
        ])
        .unwrap();
        assert_eq!(options.ip_types(), ["PRIVATE", "PUBLIC"]);
    }

    #[test]
    fn rejects_empty_ip_types() {
        let err = ConnectOptions::from_pairs([(KEY_INSTANCE, "p:r:i"), (KEY_IP_TYPES, " , ")])
            .unwrap_err();
        assert_eq!(err, OptionsError::EmptyIpTypes);
    }

    #[test]
    fn requires_an_instance() {
        assert_eq!(
            ConnectOptions::from_pairs([("user", "app")]).unwrap_err(),
            OptionsError::MissingInstance
        );
        assert_eq!(
            ConnectOptions::from_pairs([(KEY_INSTANCE, "")]).unwrap_err(),
            OptionsError::MissingInstance
        );
    }

    #[test]
    fn ignores_foreign_driver_options() {
        let options = ConnectOptions::from_pairs([
            ("user", "app"),
            ("password", "hunter2"),
            (KEY_INSTANCE, "p:r:i"),
            ("connectTimeout", "10"),
        ])
        .unwrap();
        assert_eq!(options.instance(), "p:r:i");
    }

    #[test]
    fn captures_the_unix_socket_path() {
        let options = ConnectOptions::from_pairs([
            (KEY_INSTANCE, "p:r:i"),
            (KEY_UNIX_SOCKET, "/cloudsql/p:r:i"),
        ])
        .unwrap();
        assert_eq!(
            options.unix_socket_path(),
            Some(Path::new("/cloudsql/p:r:i"))
        );
    }
}
