//! Why settings could not be resolved.

use std::path::PathBuf;

use thiserror::Error;

/// A settings file that could not be used, or a resolved value the server
/// cannot run with.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A settings layer is not JSON or does not fit the settings schema.
    #[error("malformed settings in {origin}: {source}")]
    Malformed {
        /// The file path, or `defaults` for the merged result.
        origin: String,
        /// Parser error with line and column.
        #[source]
        source: serde_json::Error,
    },
    /// A field holds a value the server refuses to run with.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted camelCase path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/tether.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.to_string(),
            "cannot read settings file /etc/tether.json: denied"
        );
    }

    #[test]
    fn malformed_error_names_the_origin() {
        let source = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = SettingsError::Malformed {
            origin: "tether.json".into(),
            source,
        };
        assert!(err.to_string().starts_with("malformed settings in tether.json: "));
    }

    #[test]
    fn invalid_error_names_the_field() {
        let err = SettingsError::invalid("cluster.workers", "must be at least 1");
        assert_eq!(err.to_string(), "cluster.workers: must be at least 1");
    }
}
