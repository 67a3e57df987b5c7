//! This module defines the configuration file.
//!
//! Every field has a default, and an empty file yields the stock development environment: the
//! `default` namespace, the bitnami Redis password override, AWS variables pointing at a local
//! emulator, one worker replica and no optional extensions.

// System
use std::{collections::BTreeSet, fs, path::Path};

// Third Party
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("namespace must not be empty")]
    EmptyNamespace,
    #[error("the `{dependent}` extension requires the `{required}` extension")]
    MissingExtension {
        dependent: Extension,
        required: Extension,
    },
}

/// Opt-in parts of the environment that are off unless asked for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Extension {
    /// Secret with credentials for an existing trace database.
    TraceDb,
    /// The `mev-inspect-prices` release.
    PriceMonitor,
    /// Localstack release plus the export secret and config map.
    LocalS3,
    /// Port forward to the localstack service.
    PortForward,
}

impl std::fmt::Display for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Extension::TraceDb => "trace-db",
            Extension::PriceMonitor => "price-monitor",
            Extension::LocalS3 => "local-s3",
            Extension::PortForward => "port-forward",
        };
        f.write_str(name)
    }
}

/// Credentials handed to the inspect workloads for talking to the S3 emulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AwsEmulator {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint_url: String,
}

impl Default for AwsEmulator {
    fn default() -> Self {
        Self {
            access_key_id: "foobar".to_string(),
            secret_access_key: "foobar".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: "http://localstack:4566".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevEnvConfig {
    pub namespace: String,
    pub redis_password: String,
    pub workers_replica_count: u32,
    pub aws: AwsEmulator,
    pub extensions: BTreeSet<Extension>,
}

impl Default for DevEnvConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            redis_password: "password".to_string(),
            workers_replica_count: 1,
            aws: AwsEmulator::default(),
            extensions: BTreeSet::new(),
        }
    }
}

impl DevEnvConfig {
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty mapping.
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_file(file_path: &Path) -> Result<Self, ConfigError> {
        let config_content = fs::read_to_string(file_path).map_err(|source| ConfigError::Read {
            path: file_path.display().to_string(),
            source,
        })?;
        Self::from_str(&config_content)
    }

    pub fn enable(&mut self, extension: Extension) -> &mut Self {
        self.extensions.insert(extension);
        self
    }

    pub fn is_enabled(&self, extension: Extension) -> bool {
        self.extensions.contains(&extension)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if self.is_enabled(Extension::PortForward) && !self.is_enabled(Extension::LocalS3) {
            return Err(ConfigError::MissingExtension {
                dependent: Extension::PortForward,
                required: Extension::LocalS3,
            });
        }
        Ok(())
    }
}
