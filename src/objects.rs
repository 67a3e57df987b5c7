//! Secrets and ConfigMaps whose data is projected from environment variables.

// System
use std::collections::BTreeMap;

// Third Party
use k8s_openapi::{
    api::core::v1::{ConfigMap, Secret},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
    ByteString,
};
use serde::Serialize;

// Local
use crate::env::{EnvError, EnvSource};
use crate::utils::MANAGED_BY_LABELS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Secret,
    ConfigMap,
}

/// Where the value for one data key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Env {
        var: String,
        default: Option<String>,
    },
    Literal(String),
}

impl ValueSource {
    fn resolve(&self, env: &EnvSource) -> Result<String, EnvError> {
        match self {
            ValueSource::Env { var, default: None } => env.required(var),
            ValueSource::Env {
                var,
                default: Some(default),
            } => env.optional(var, default),
            ValueSource::Literal(value) => Ok(value.clone()),
        }
    }
}

/// The declaration of a Secret or ConfigMap before any environment has been read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSpec {
    pub name: String,
    pub kind: DataKind,
    pub bindings: BTreeMap<String, ValueSource>,
}

impl DataSpec {
    pub fn secret(name: &str) -> Self {
        Self::new(name, DataKind::Secret)
    }

    pub fn config_map(name: &str) -> Self {
        Self::new(name, DataKind::ConfigMap)
    }

    fn new(name: &str, kind: DataKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            bindings: BTreeMap::new(),
        }
    }

    /// Bind `key` to a required environment variable.
    pub fn env(mut self, key: &str, var: &str) -> Self {
        self.bindings.insert(
            key.to_string(),
            ValueSource::Env {
                var: var.to_string(),
                default: None,
            },
        );
        self
    }

    /// Bind `key` to an optional environment variable, falling back to `default` when unset.
    pub fn env_or(mut self, key: &str, var: &str, default: &str) -> Self {
        self.bindings.insert(
            key.to_string(),
            ValueSource::Env {
                var: var.to_string(),
                default: Some(default.to_string()),
            },
        );
        self
    }

    pub fn literal(mut self, key: &str, value: &str) -> Self {
        self.bindings
            .insert(key.to_string(), ValueSource::Literal(value.to_string()));
        self
    }

    /// Read every bound variable. The first missing required variable aborts resolution.
    pub fn resolve(&self, env: &EnvSource) -> Result<DataObject, EnvError> {
        let data = self
            .bindings
            .iter()
            .map(|(key, source)| Ok((key.clone(), source.resolve(env)?)))
            .collect::<Result<BTreeMap<_, _>, EnvError>>()?;
        Ok(DataObject {
            spec: self.clone(),
            data,
        })
    }
}

/// A resolved Secret or ConfigMap: the declaration together with the plaintext values read from the
/// environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataObject {
    pub spec: DataSpec,
    pub data: BTreeMap<String, String>,
}

impl DataObject {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn to_manifest(&self, namespace: &str) -> Manifest {
        let metadata = ObjectMeta {
            name: Some(self.spec.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                MANAGED_BY_LABELS
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            ),
            ..Default::default()
        };
        match self.spec.kind {
            DataKind::Secret => Manifest::Secret(Secret {
                metadata,
                type_: Some("Opaque".to_string()),
                data: Some(
                    self.data
                        .iter()
                        .map(|(key, value)| (key.clone(), ByteString(value.as_bytes().to_vec())))
                        .collect(),
                ),
                ..Default::default()
            }),
            DataKind::ConfigMap => Manifest::ConfigMap(ConfigMap {
                metadata,
                data: Some(self.data.clone()),
                ..Default::default()
            }),
        }
    }
}

/// A Kubernetes object ready to be serialized or applied. Serializes to the object itself, with
/// `apiVersion` and `kind` filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Manifest {
    Secret(Secret),
    ConfigMap(ConfigMap),
}

impl Manifest {
    pub fn name(&self) -> &str {
        let metadata = match self {
            Manifest::Secret(secret) => &secret.metadata,
            Manifest::ConfigMap(config_map) => &config_map.metadata,
        };
        metadata.name.as_deref().unwrap_or_default()
    }
}
