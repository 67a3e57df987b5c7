// System
use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsString,
};

// Third Party
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("required environment variable `{name}` is not set")]
    Missing { name: String },
    #[error("environment variable `{name}` is not valid unicode")]
    NotUnicode { name: String },
}

/// A snapshot of environment variables taken at generation time.
///
/// Generation only ever reads from this snapshot, never from the live process environment, so the
/// same snapshot always produces the same descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSource {
    vars: BTreeMap<String, String>,
    /// Variables that were set but whose value is not valid unicode.
    not_unicode: BTreeSet<String>,
}

impl EnvSource {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        let mut source = Self::default();
        for (key, value) in vars {
            let key = match key.into_string() {
                Ok(key) => key,
                Err(key) => {
                    warn!(
                        "Skipping environment variable with a non-unicode name: {}",
                        key.to_string_lossy()
                    );
                    continue;
                }
            };
            match value.into_string() {
                Ok(value) => {
                    source.vars.insert(key, value);
                }
                Err(_) => {
                    warn!("Environment variable {} is not valid unicode", key);
                    source.not_unicode.insert(key);
                }
            }
        }
        source
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            not_unicode: BTreeSet::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    fn check_unicode(&self, name: &str) -> Result<(), EnvError> {
        if self.not_unicode.contains(name) {
            return Err(EnvError::NotUnicode {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn required(&self, name: &str) -> Result<String, EnvError> {
        self.check_unicode(name)?;
        self.get(name)
            .map(str::to_string)
            .ok_or_else(|| EnvError::Missing {
                name: name.to_string(),
            })
    }

    /// The value of `name`, or `default` when it is unset. A set but unreadable value is an error
    /// rather than a silent fallback.
    pub fn optional(&self, name: &str, default: &str) -> Result<String, EnvError> {
        self.check_unicode(name)?;
        Ok(self.get(name).unwrap_or(default).to_string())
    }
}

#[cfg(test)]
mod tests {
    // System
    use std::ffi::OsString;

    // Third Party
    use serial_test::serial;

    // Local
    use super::{EnvError, EnvSource};

    #[test]
    fn test_required_and_optional() {
        let env = EnvSource::from_pairs([("RPC_URL", "http://example:8545")]);
        assert_eq!(env.required("RPC_URL").unwrap(), "http://example:8545");
        assert_eq!(
            env.required("POSTGRES_USER"),
            Err(EnvError::Missing {
                name: "POSTGRES_USER".to_string()
            })
        );
        assert_eq!(env.optional("LISTENER_HEALTHCHECK_URL", "").unwrap(), "");
        assert_eq!(
            env.optional("RPC_URL", "unused").unwrap(),
            "http://example:8545"
        );
    }

    #[test]
    fn test_empty_value_is_still_set() {
        let env = EnvSource::from_pairs([("POSTGRES_PASSWORD", "")]);
        assert_eq!(env.required("POSTGRES_PASSWORD").unwrap(), "");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_unicode_value_is_reported() {
        use std::os::unix::ffi::OsStringExt;

        let env = EnvSource::from_os_vars([
            (
                OsString::from("POSTGRES_PASSWORD"),
                OsString::from_vec(vec![b'p', 0xff, b'w']),
            ),
            (
                OsString::from("LISTENER_HEALTHCHECK_URL"),
                OsString::from_vec(vec![0xfe]),
            ),
            (OsString::from("POSTGRES_USER"), OsString::from("postgres")),
        ]);
        assert_eq!(
            env.required("POSTGRES_PASSWORD"),
            Err(EnvError::NotUnicode {
                name: "POSTGRES_PASSWORD".to_string()
            })
        );
        assert_eq!(
            env.optional("LISTENER_HEALTHCHECK_URL", ""),
            Err(EnvError::NotUnicode {
                name: "LISTENER_HEALTHCHECK_URL".to_string()
            })
        );
        assert_eq!(env.required("POSTGRES_USER").unwrap(), "postgres");
        assert_eq!(
            env.required("POSTGRES_HOST"),
            Err(EnvError::Missing {
                name: "POSTGRES_HOST".to_string()
            })
        );
    }

    #[test]
    #[serial]
    fn test_from_process_captures_snapshot() {
        std::env::set_var("MEV_DEVENV_TEST_VAR", "captured");
        let env = EnvSource::from_process();
        std::env::remove_var("MEV_DEVENV_TEST_VAR");

        assert_eq!(env.get("MEV_DEVENV_TEST_VAR"), Some("captured"));
        assert_eq!(EnvSource::from_process().get("MEV_DEVENV_TEST_VAR"), None);
    }
}
