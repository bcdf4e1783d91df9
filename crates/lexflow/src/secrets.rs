//! Resolution of the AI API key.
//!
//! Sources are tried in priority order:
//!
//! 1. **Direct value** in the settings file, for local testing
//! 2. **File reference**, for mounted secrets (`api_key_file: /run/secrets/ai_key`)
//! 3. **Environment variable**, the default (`ANTHROPIC_API_KEY`)

use secrecy::SecretString;
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret file '{path}' is empty")]
    EmptyFile { path: String },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a secret may come from, in the order sources are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource<'a> {
    Direct(&'a str),
    File(&'a str),
    Env(&'a str),
}

impl SecretSource<'_> {
    fn read(self) -> Result<SecretString> {
        match self {
            SecretSource::Direct(value) => Ok(SecretString::from(value.to_string())),
            SecretSource::File(path) => {
                let path = expand_home(path);
                let content = fs::read_to_string(&path)
                    .map_err(|source| SecretError::FileReadError { path: path.clone(), source })?;
                match content.trim() {
                    "" => Err(SecretError::EmptyFile { path }),
                    key => Ok(SecretString::from(key.to_string())),
                }
            }
            SecretSource::Env(name) => match std::env::var(name) {
                // Env vars may carry a trailing newline.
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            },
        }
    }
}

/// Resolves a secret from the first non-empty source. A source that is
/// configured but unreadable is an error; later sources are not consulted.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    fn non_empty(v: Option<&str>) -> Option<&str> {
        v.filter(|s| !s.is_empty())
    }
    let source = non_empty(direct)
        .map(SecretSource::Direct)
        .or_else(|| non_empty(file_path).map(SecretSource::File))
        .or_else(|| non_empty(env_var).map(SecretSource::Env))
        .ok_or(SecretError::NoSourceProvided)?;
    source.read()
}

/// Expands a leading `~` to the user's home directory.
///
/// `~user/path` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Each test uses its own variable name so tests can run in parallel.

    #[test]
    fn test_direct_value_takes_priority() {
        std::env::set_var("LEXFLOW_TEST_SECRET_1", "env_value");
        let result = resolve_secret(Some("direct_value"), None, Some("LEXFLOW_TEST_SECRET_1")).unwrap();
        assert_eq!(result.expose_secret(), "direct_value");
        std::env::remove_var("LEXFLOW_TEST_SECRET_1");
    }

    #[test]
    fn test_file_takes_priority_over_env() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "  file_value  ").unwrap();

        std::env::set_var("LEXFLOW_TEST_SECRET_2", "env_value");
        let result = resolve_secret(
            None,
            Some(temp_file.path().to_str().unwrap()),
            Some("LEXFLOW_TEST_SECRET_2"),
        )
        .unwrap();
        assert_eq!(result.expose_secret(), "file_value");
        std::env::remove_var("LEXFLOW_TEST_SECRET_2");
    }

    #[test]
    fn test_env_var_fallback_and_empty_strings_ignored() {
        std::env::set_var("LEXFLOW_TEST_SECRET_3", "env_value\n");
        let result = resolve_secret(Some(""), Some(""), Some("LEXFLOW_TEST_SECRET_3")).unwrap();
        assert_eq!(result.expose_secret(), "env_value");
        std::env::remove_var("LEXFLOW_TEST_SECRET_3");
    }

    #[test]
    fn test_only_empty_sources_is_no_source() {
        assert!(matches!(
            resolve_secret(Some(""), Some(""), Some("")),
            Err(SecretError::NoSourceProvided)
        ));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(matches!(
            resolve_secret(None, Some("/nonexistent/path/to/secret"), None),
            Err(SecretError::FileReadError { .. })
        ));
        assert!(matches!(
            resolve_secret(None, None, Some("LEXFLOW_DEFINITELY_NOT_SET_12345")),
            Err(SecretError::EnvVarNotSet { .. })
        ));
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let temp_file = NamedTempFile::new().unwrap();
        assert!(matches!(
            resolve_secret(None, Some(temp_file.path().to_str().unwrap()), None),
            Err(SecretError::EmptyFile { .. })
        ));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/absolute/path"), "/absolute/path");
        assert_eq!(expand_home("relative/path"), "relative/path");
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy().into_owned();
            assert_eq!(expand_home("~/key"), format!("{}/key", home));
            assert_eq!(expand_home("~"), home);
        }
    }
}
