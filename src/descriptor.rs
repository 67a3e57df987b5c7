//! The development environment for the MEV inspection stack, built from configuration and a
//! snapshot of the environment.

// Third Party
use serde::Serialize;
use tracing::debug;

// Local
use crate::{
    config::{DevEnvConfig, Extension},
    env::EnvSource,
    graph::{ResourceGraph, ResourceKind},
    helm::{HelmRelease, Workload},
    image::ImageBuild,
    objects::{DataObject, DataSpec, Manifest},
    utils::{
        LISTENER_HEALTHCHECK_URL, POSTGRES_HOST, POSTGRES_PASSWORD, POSTGRES_USER, RPC_URL,
        TRACE_DB_HOST, TRACE_DB_PASSWORD, TRACE_DB_USER,
    },
};

const BITNAMI_REPO: (&str, &str) = ("bitnami", "https://charts.bitnami.com/bitnami");
const LOCALSTACK_REPO: (&str, &str) = (
    "localstack-charts",
    "https://localstack.github.io/helm-charts",
);

/// A command run on the host for as long as the environment is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalResource {
    pub name: String,
    pub serve_cmd: String,
}

/// One declaration, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Object(DataObject),
    Release(HelmRelease),
    Image(ImageBuild),
    Local(LocalResource),
    /// `resource` waits for each of `depends_on`.
    Dependency {
        resource: String,
        depends_on: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevEnvironment {
    pub namespace: String,
    pub declarations: Vec<Declaration>,
    pub graph: ResourceGraph,
}

impl DevEnvironment {
    /// Build the environment. This reads nothing but its arguments, so calling it twice with the
    /// same inputs gives equal results.
    pub fn generate(config: &DevEnvConfig, env: &EnvSource) -> Result<Self, anyhow::Error> {
        config.validate()?;
        let mut declarations = Vec::new();

        declarations.push(Declaration::Release(
            HelmRelease::remote("redis", BITNAMI_REPO.0, BITNAMI_REPO.1, "redis")
                .set_string("global.redis.password", &config.redis_password)
                .provides(Workload::stateful_set("redis-master"))
                .provides(Workload::stateful_set("redis-replicas")),
        ));

        for spec in [
            DataSpec::config_map("mev-inspect-rpc").env("url", RPC_URL),
            DataSpec::config_map("mev-inspect-listener-healthcheck").env_or(
                "url",
                LISTENER_HEALTHCHECK_URL,
                "",
            ),
            DataSpec::secret("mev-inspect-db-credentials")
                .env("username", POSTGRES_USER)
                .env("password", POSTGRES_PASSWORD)
                .env("host", POSTGRES_HOST),
        ] {
            declarations.push(Declaration::Object(spec.resolve(env)?));
        }

        if config.is_enabled(Extension::TraceDb) {
            let spec = DataSpec::secret("trace-db-credentials")
                .env("username", TRACE_DB_USER)
                .env("password", TRACE_DB_PASSWORD)
                .env("host", TRACE_DB_HOST);
            declarations.push(Declaration::Object(spec.resolve(env)?));
        }

        declarations.push(Declaration::Image(
            ImageBuild::new("mev-inspect-py", ".")
                .sync(".", "/app")
                .run("cd /app && poetry install", &["./pyproject.toml"]),
        ));

        declarations.push(Declaration::Release(
            with_aws_env(
                HelmRelease::local("mev-inspect", "./k8s/mev-inspect"),
                config,
            )
            .provides(Workload::stateful_set("mev-inspect")),
        ));
        declarations.push(Declaration::Release(
            with_aws_env(
                HelmRelease::local("mev-inspect-workers", "./k8s/mev-inspect-workers"),
                config,
            )
            .set("replicaCount", config.workers_replica_count)
            .provides(Workload::deployment("mev-inspect-workers")),
        ));

        for workload in ["mev-inspect", "mev-inspect-workers"] {
            declarations.push(Declaration::Dependency {
                resource: workload.to_string(),
                depends_on: vec!["redis-master".to_string()],
            });
        }

        if config.is_enabled(Extension::PriceMonitor) {
            declarations.push(Declaration::Release(
                HelmRelease::local("mev-inspect-prices", "./k8s/mev-inspect-prices")
                    .provides(Workload::deployment("mev-inspect-prices")),
            ));
            declarations.push(Declaration::Dependency {
                resource: "mev-inspect-prices".to_string(),
                depends_on: vec!["mev-inspect".to_string()],
            });
        }

        if config.is_enabled(Extension::LocalS3) {
            let export = DataSpec::secret("mev-inspect-export")
                .literal("export-bucket-name", "local-export")
                .literal("export-bucket-region", &config.aws.region)
                .literal("export-aws-access-key-id", &config.aws.access_key_id)
                .literal("export-aws-secret-access-key", &config.aws.secret_access_key);
            declarations.push(Declaration::Object(export.resolve(env)?));
            declarations.push(Declaration::Release(
                HelmRelease::remote(
                    "localstack",
                    LOCALSTACK_REPO.0,
                    LOCALSTACK_REPO.1,
                    "localstack",
                )
                .provides(Workload::deployment("localstack")),
            ));
            let services = DataSpec::config_map("mev-inspect-export").literal("services", "s3");
            declarations.push(Declaration::Object(services.resolve(env)?));
        }

        if config.is_enabled(Extension::PortForward) {
            declarations.push(Declaration::Local(LocalResource {
                name: "localstack-port-forward".to_string(),
                serve_cmd: format!(
                    "kubectl port-forward --namespace {} svc/localstack 4566:4566",
                    config.namespace
                ),
            }));
            declarations.push(Declaration::Dependency {
                resource: "localstack-port-forward".to_string(),
                depends_on: vec!["localstack".to_string()],
            });
        }

        let graph = build_graph(&declarations)?;
        debug!(
            "Generated {} declarations with {} resources",
            declarations.len(),
            graph.nodes().len()
        );
        Ok(Self {
            namespace: config.namespace.clone(),
            declarations,
            graph,
        })
    }

    pub fn objects(&self) -> impl Iterator<Item = &DataObject> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Object(object) => Some(object),
            _ => None,
        })
    }

    pub fn releases(&self) -> impl Iterator<Item = &HelmRelease> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Release(release) => Some(release),
            _ => None,
        })
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageBuild> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Image(image) => Some(image),
            _ => None,
        })
    }

    pub fn local_resources(&self) -> impl Iterator<Item = &LocalResource> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Local(local) => Some(local),
            _ => None,
        })
    }

    pub fn object(&self, name: &str) -> Option<&DataObject> {
        self.objects().find(|object| object.name() == name)
    }

    pub fn release(&self, name: &str) -> Option<&HelmRelease> {
        self.releases().find(|release| release.name == name)
    }

    /// The Secret and ConfigMap objects in declaration order.
    pub fn manifests(&self) -> Vec<Manifest> {
        self.objects()
            .map(|object| object.to_manifest(&self.namespace))
            .collect()
    }
}

fn with_aws_env(release: HelmRelease, config: &DevEnvConfig) -> HelmRelease {
    release
        .extra_env("AWS_ACCESS_KEY_ID", &config.aws.access_key_id)
        .extra_env("AWS_SECRET_ACCESS_KEY", &config.aws.secret_access_key)
        .extra_env("AWS_REGION", &config.aws.region)
        .extra_env("AWS_ENDPOINT_URL", &config.aws.endpoint_url)
}

fn build_graph(declarations: &[Declaration]) -> Result<ResourceGraph, anyhow::Error> {
    let mut graph = ResourceGraph::new();
    for declaration in declarations {
        match declaration {
            Declaration::Release(release) => {
                for workload in &release.workloads {
                    graph.add_resource(
                        &workload.name,
                        &release.name,
                        ResourceKind::Workload(workload.kind),
                    )?;
                }
            }
            Declaration::Local(local) => {
                graph.add_resource(&local.name, &local.name, ResourceKind::Local)?
            }
            Declaration::Dependency {
                resource,
                depends_on,
            } => {
                for dependency in depends_on {
                    graph.add_dependency(resource, dependency)?;
                }
            }
            Declaration::Object(_) | Declaration::Image(_) => {}
        }
    }
    graph.validate()?;
    Ok(graph)
}
