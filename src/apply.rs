//! Bring a generated environment up on the cluster from the current kubeconfig.
//!
//! Objects are server-side applied through the Kubernetes API. Images are built with `docker`,
//! optionally copied into a kind or minikube cluster, and releases installed with `helm`, in
//! rollout order. Before a release is installed, every resource its workloads depend on must
//! report ready within the configured timeout.

// System
use std::collections::BTreeSet;

// Third Party
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, Secret},
};
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::wait::await_condition,
    Client,
};
use tokio::{process::Command, time::Duration};
use tracing::{debug, info, warn};

// Local
use crate::{
    descriptor::DevEnvironment,
    graph::{ResourceGraph, ResourceKind},
    helm::{HelmRelease, WorkloadKind},
    image::ImageLoader,
    objects::Manifest,
    utils::{create_namespace, FIELD_MANAGER},
};

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub skip_image: bool,
    /// Copy built images into the cluster. `None` when the cluster pulls from the host's daemon.
    pub load_into: Option<ImageLoader>,
    pub wait_timeout: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            skip_image: false,
            load_into: None,
            wait_timeout: Duration::from_secs(300),
        }
    }
}

/// One step of bringing releases up, in the order they run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStep<'a> {
    /// Block until the resource reports ready.
    Wait(&'a str),
    Install(&'a HelmRelease),
    /// Local resources are left to the orchestrator.
    SkipLocal(&'a str),
}

/// The wait and install steps for every release. A release is installed once, after a wait on each
/// resource its workloads depend on; each resource is waited on at most once.
pub fn rollout_steps(environment: &DevEnvironment) -> Result<Vec<ApplyStep<'_>>, anyhow::Error> {
    let mut steps = Vec::new();
    let mut installed: BTreeSet<&str> = BTreeSet::new();
    let mut waited: BTreeSet<&str> = BTreeSet::new();
    for node in environment.graph.rollout_order()? {
        if node.kind == ResourceKind::Local {
            steps.push(ApplyStep::SkipLocal(node.name.as_str()));
            continue;
        }
        if !installed.insert(node.owner.as_str()) {
            continue;
        }
        let Some(release) = environment.release(&node.owner) else {
            warn!("Resource {} has no release named {}", node.name, node.owner);
            continue;
        };
        for dependency in release_dependencies(&environment.graph, &node.owner) {
            if waited.insert(dependency) {
                steps.push(ApplyStep::Wait(dependency));
            }
        }
        steps.push(ApplyStep::Install(release));
    }
    Ok(steps)
}

pub struct Applier {
    client: Client,
}

impl Applier {
    pub fn new(client: &Client) -> Self {
        Self {
            client: client.clone(),
        }
    }

    pub async fn apply(
        &self,
        environment: &DevEnvironment,
        options: &ApplyOptions,
    ) -> Result<(), anyhow::Error> {
        let namespace = &environment.namespace;
        create_namespace(&self.client, namespace).await?;

        for manifest in environment.manifests() {
            self.apply_manifest(&manifest, namespace).await?;
        }

        if options.skip_image {
            info!("Skipping image builds");
        } else {
            for image in environment.images() {
                info!("Building image {}...", image.image_ref);
                run("docker", &image.build_args()).await?;
                if let Some(loader) = &options.load_into {
                    let (program, args) = loader.command(&image.image_ref);
                    info!("Loading image {} with {}...", image.image_ref, program);
                    run(program, &args).await?;
                }
            }
        }

        for step in rollout_steps(environment)? {
            match step {
                ApplyStep::Wait(resource) => {
                    self.wait_ready(&environment.graph, resource, namespace, options.wait_timeout)
                        .await?
                }
                ApplyStep::Install(release) => {
                    info!("Installing release {}...", release.name);
                    run("helm", &release.install_args(namespace)).await?;
                }
                ApplyStep::SkipLocal(name) => {
                    info!(
                        "Not starting local resource {}, run it from your orchestrator",
                        name
                    );
                }
            }
        }
        Ok(())
    }

    async fn apply_manifest(
        &self,
        manifest: &Manifest,
        namespace: &str,
    ) -> Result<(), anyhow::Error> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        debug!("Applying {}...", manifest.name());
        match manifest {
            Manifest::Secret(secret) => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                api.patch(manifest.name(), &params, &Patch::Apply(secret))
                    .await?;
            }
            Manifest::ConfigMap(config_map) => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                api.patch(manifest.name(), &params, &Patch::Apply(config_map))
                    .await?;
            }
        }
        debug!("Applied {}", manifest.name());
        Ok(())
    }

    /// Wait once, up to `timeout`, for `resource` to report ready.
    async fn wait_ready(
        &self,
        graph: &ResourceGraph,
        resource: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<(), anyhow::Error> {
        let kind = match graph.get(resource).map(|node| node.kind) {
            Some(ResourceKind::Workload(kind)) => kind,
            Some(ResourceKind::Local) | None => {
                warn!("Cannot check readiness of {}, not waiting for it", resource);
                return Ok(());
            }
        };
        info!("Waiting for {} to become ready...", resource);
        let wait = async {
            match kind {
                WorkloadKind::StatefulSet => {
                    let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                    await_condition(api, resource, is_stateful_set_ready)
                        .await
                        .map(|_| ())
                }
                WorkloadKind::Deployment => {
                    let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                    await_condition(api, resource, is_deployment_ready)
                        .await
                        .map(|_| ())
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| {
                anyhow::Error::msg(format!(
                    "Timed out after {}s waiting for {} to become ready",
                    timeout.as_secs(),
                    resource
                ))
            })??;
        info!("{} is ready", resource);
        Ok(())
    }
}

/// Everything any workload of `owner` depends on, excluding the release's own workloads.
fn release_dependencies<'a>(graph: &'a ResourceGraph, owner: &str) -> BTreeSet<&'a str> {
    let own: BTreeSet<&str> = graph
        .nodes()
        .iter()
        .filter(|node| node.owner == owner)
        .map(|node| node.name.as_str())
        .collect();
    graph
        .nodes()
        .iter()
        .filter(|node| node.owner == owner)
        .flat_map(|node| node.depends_on.iter().map(String::as_str))
        .filter(|dependency| !own.contains(dependency))
        .collect()
}

pub fn is_stateful_set_ready(stateful_set: Option<&StatefulSet>) -> bool {
    let Some(stateful_set) = stateful_set else {
        return false;
    };
    let desired = stateful_set
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let ready = stateful_set
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0);
    ready >= desired
}

pub fn is_deployment_ready(deployment: Option<&Deployment>) -> bool {
    let Some(deployment) = deployment else {
        return false;
    };
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|status| status.available_replicas)
        .unwrap_or(0);
    available >= desired
}

async fn run(program: &str, args: &[String]) -> Result<(), anyhow::Error> {
    debug!("Running {} {}", program, args.join(" "));
    let status = Command::new(program).args(args).status().await?;
    if !status.success() {
        return Err(anyhow::Error::msg(format!(
            "`{} {}` exited with {}",
            program,
            args.first().map(String::as_str).unwrap_or_default(),
            status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    // Third Party
    use k8s_openapi::api::apps::v1::{
        DeploymentSpec, DeploymentStatus, StatefulSetSpec, StatefulSetStatus,
    };

    // Local
    use super::*;
    use crate::{
        config::{DevEnvConfig, Extension},
        descriptor::tests::stock_env,
    };

    #[test]
    fn test_stateful_set_readiness() {
        assert!(!is_stateful_set_ready(None));

        let mut stateful_set = StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!is_stateful_set_ready(Some(&stateful_set)));

        stateful_set.status = Some(StatefulSetStatus {
            ready_replicas: Some(1),
            ..Default::default()
        });
        assert!(is_stateful_set_ready(Some(&stateful_set)));
    }

    #[test]
    fn test_deployment_readiness() {
        assert!(!is_deployment_ready(None));

        let mut deployment = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                available_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!is_deployment_ready(Some(&deployment)));

        deployment.status = Some(DeploymentStatus {
            available_replicas: Some(2),
            ..Default::default()
        });
        assert!(is_deployment_ready(Some(&deployment)));
    }

    #[test]
    fn test_release_dependencies() {
        let environment =
            DevEnvironment::generate(&DevEnvConfig::default(), &stock_env()).unwrap();
        let graph = &environment.graph;
        assert!(release_dependencies(graph, "redis").is_empty());
        assert_eq!(
            release_dependencies(graph, "mev-inspect")
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["redis-master"]
        );
        assert_eq!(
            release_dependencies(graph, "mev-inspect-workers")
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["redis-master"]
        );
    }

    fn describe<'a>(steps: &[ApplyStep<'a>]) -> Vec<String> {
        steps
            .iter()
            .map(|step| match step {
                ApplyStep::Wait(resource) => format!("wait {}", resource),
                ApplyStep::Install(release) => format!("install {}", release.name),
                ApplyStep::SkipLocal(name) => format!("skip {}", name),
            })
            .collect()
    }

    #[test]
    fn test_releases_install_after_dependencies_are_ready() {
        let environment =
            DevEnvironment::generate(&DevEnvConfig::default(), &stock_env()).unwrap();
        let steps = rollout_steps(&environment).unwrap();
        assert_eq!(
            describe(&steps),
            vec![
                "install redis",
                "wait redis-master",
                "install mev-inspect",
                "install mev-inspect-workers",
            ]
        );
    }

    #[test]
    fn test_extension_steps() {
        let mut config = DevEnvConfig::default();
        config
            .enable(Extension::PriceMonitor)
            .enable(Extension::LocalS3)
            .enable(Extension::PortForward);
        let environment = DevEnvironment::generate(&config, &stock_env()).unwrap();
        let steps = describe(&rollout_steps(&environment).unwrap());
        let position = |step: &str| steps.iter().position(|s| s == step).unwrap();

        assert!(position("install mev-inspect") < position("wait mev-inspect"));
        assert!(position("wait mev-inspect") < position("install mev-inspect-prices"));
        assert!(position("install localstack") < position("skip localstack-port-forward"));
        assert_eq!(steps.iter().filter(|s| *s == "wait redis-master").count(), 1);
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        assert!(run("true", &[]).await.is_ok());
        let error = run("false", &["build".to_string()]).await.unwrap_err();
        assert!(error.to_string().starts_with("`false build` exited with"));
    }
}
