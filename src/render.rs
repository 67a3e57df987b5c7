//! Output formats for a generated [`DevEnvironment`].

// System
use std::fmt::Write;

// Third Party
use serde::Serialize;
use sha2::{Digest, Sha256};

// Local
use crate::{
    descriptor::{Declaration, DevEnvironment, LocalResource},
    graph::ResourceKind,
    helm::{ChartSource, HelmRelease, Workload},
    image::{ImageBuild, LiveUpdateStep},
    objects::{DataKind, DataObject, ValueSource},
};

/// Everything that is not a plain Kubernetes object, plus the rollout order. Object values and
/// release override values are left out so secrets never end up in a plan.
#[derive(Debug, Serialize)]
pub struct Plan<'a> {
    pub namespace: &'a str,
    pub objects: Vec<ObjectSummary<'a>>,
    pub releases: Vec<ReleaseSummary<'a>>,
    pub images: Vec<&'a ImageBuild>,
    pub local_resources: Vec<&'a LocalResource>,
    pub rollout: Vec<RolloutStep<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ObjectSummary<'a> {
    pub name: &'a str,
    pub kind: DataKind,
    pub keys: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseSummary<'a> {
    pub name: &'a str,
    pub chart: &'a ChartSource,
    pub overrides: Vec<&'a str>,
    pub workloads: &'a [Workload],
}

#[derive(Debug, Serialize)]
pub struct RolloutStep<'a> {
    pub resource: &'a str,
    pub owner: &'a str,
    pub kind: ResourceKind,
    pub depends_on: Vec<&'a str>,
}

pub fn plan(environment: &DevEnvironment) -> Result<Plan<'_>, anyhow::Error> {
    let rollout = environment
        .graph
        .rollout_order()?
        .into_iter()
        .map(|node| RolloutStep {
            resource: &node.name,
            owner: &node.owner,
            kind: node.kind,
            depends_on: node.depends_on.iter().map(String::as_str).collect(),
        })
        .collect();
    Ok(Plan {
        namespace: &environment.namespace,
        objects: environment
            .objects()
            .map(|object| ObjectSummary {
                name: object.name(),
                kind: object.spec.kind,
                keys: object.data.keys().map(String::as_str).collect(),
            })
            .collect(),
        releases: environment
            .releases()
            .map(|release| ReleaseSummary {
                name: &release.name,
                chart: &release.chart,
                overrides: release.override_keys(),
                workloads: &release.workloads,
            })
            .collect(),
        images: environment.images().collect(),
        local_resources: environment.local_resources().collect(),
        rollout,
    })
}

/// The Secrets and ConfigMaps as a multi-document YAML stream.
pub fn manifests_yaml(environment: &DevEnvironment) -> Result<String, anyhow::Error> {
    let documents = environment
        .manifests()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(documents.join("---\n"))
}

pub fn plan_yaml(environment: &DevEnvironment) -> Result<String, anyhow::Error> {
    Ok(serde_yaml::to_string(&plan(environment)?)?)
}

pub fn plan_json(environment: &DevEnvironment) -> Result<String, anyhow::Error> {
    Ok(serde_json::to_string_pretty(&plan(environment)?)?)
}

/// A hex encoded SHA-256 over the rendered manifests, the plan and every release's helm
/// arguments. Equal inputs give equal fingerprints.
pub fn fingerprint(environment: &DevEnvironment) -> Result<String, anyhow::Error> {
    let mut hasher = Sha256::new();
    hasher.update(manifests_yaml(environment)?.as_bytes());
    hasher.update(b"\n...\n");
    hasher.update(plan_yaml(environment)?.as_bytes());
    for release in environment.releases() {
        hasher.update(b"\n...\n");
        hasher.update(release.install_args(&environment.namespace).join("\0").as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Render the environment as a Tiltfile. Values bound to environment variables are rendered as
/// lookups, not as the values read at generation time.
pub fn tiltfile(environment: &DevEnvironment) -> Result<String, anyhow::Error> {
    let namespace = quote(&environment.namespace);
    let mut out = String::new();
    writeln!(out, "load(\"ext://helm_remote\", \"helm_remote\")")?;
    writeln!(out, "load(\"ext://secret\", \"secret_from_dict\")")?;
    writeln!(out, "load(\"ext://configmap\", \"configmap_from_dict\")")?;

    for declaration in &environment.declarations {
        writeln!(out)?;
        match declaration {
            Declaration::Object(object) => write_object(&mut out, object, &namespace)?,
            Declaration::Release(release) => write_release(&mut out, release, &namespace)?,
            Declaration::Image(image) => write_image(&mut out, image)?,
            Declaration::Local(local) => {
                let deps = environment.graph.dependencies_of(&local.name);
                writeln!(
                    out,
                    "local_resource({}, serve_cmd={}, resource_deps={})",
                    quote(&local.name),
                    quote(&local.serve_cmd),
                    list(deps)
                )?;
            }
            Declaration::Dependency {
                resource,
                depends_on,
            } => {
                // Local resources carry their dependencies inline.
                if matches!(
                    environment.graph.get(resource).map(|node| node.kind),
                    Some(ResourceKind::Local)
                ) {
                    continue;
                }
                writeln!(
                    out,
                    "k8s_resource(workload={}, resource_deps={})",
                    quote(resource),
                    list(depends_on)
                )?;
            }
        }
    }
    Ok(out)
}

fn write_object(out: &mut String, object: &DataObject, namespace: &str) -> std::fmt::Result {
    let function = match object.spec.kind {
        DataKind::Secret => "secret_from_dict",
        DataKind::ConfigMap => "configmap_from_dict",
    };
    let inputs: Vec<String> = object
        .spec
        .bindings
        .iter()
        .map(|(key, source)| {
            let value = match source {
                ValueSource::Env { var, default: None } => format!("os.environ[{}]", quote(var)),
                ValueSource::Env {
                    var,
                    default: Some(default),
                } => format!("os.getenv({}, default={})", quote(var), quote(default)),
                ValueSource::Literal(value) => quote(value),
            };
            format!("{}: {}", quote(key), value)
        })
        .collect();
    writeln!(
        out,
        "k8s_yaml({}({}, namespace={}, inputs={{{}}}))",
        function,
        quote(object.name()),
        namespace,
        inputs.join(", ")
    )
}

fn write_release(out: &mut String, release: &HelmRelease, namespace: &str) -> std::fmt::Result {
    let set: Vec<String> = release.set.iter().map(|o| o.to_arg()).collect();
    match &release.chart {
        ChartSource::Remote {
            repo_name,
            repo_url,
            chart,
        } => {
            write!(
                out,
                "helm_remote({}, release_name={}, repo_name={}, repo_url={}, namespace={}",
                quote(chart),
                quote(&release.name),
                quote(repo_name),
                quote(repo_url),
                namespace
            )?;
            if !set.is_empty() {
                write!(out, ", set={}", list(&set))?;
            }
            writeln!(out, ")")
        }
        ChartSource::Local { path } => {
            write!(
                out,
                "k8s_yaml(helm({}, name={}, namespace={}",
                quote(path),
                quote(&release.name),
                namespace
            )?;
            if !set.is_empty() {
                write!(out, ", set={}", list(&set))?;
            }
            writeln!(out, "))")
        }
    }
}

fn write_image(out: &mut String, image: &ImageBuild) -> std::fmt::Result {
    let steps: Vec<String> = image
        .live_update
        .iter()
        .map(|step| match step {
            LiveUpdateStep::Sync {
                local,
                container_path,
            } => format!("sync({}, {})", quote(local), quote(container_path)),
            LiveUpdateStep::Run { command, triggers } => {
                format!("run({}, trigger={})", quote(command), list(triggers))
            }
        })
        .collect();
    writeln!(
        out,
        "docker_build({}, {}, live_update=[{}])",
        quote(&image.image_ref),
        quote(&image.context),
        steps.join(", ")
    )
}

/// JSON string literals are valid Starlark string literals.
fn quote(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

fn list<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> String {
    let items: Vec<String> = items.into_iter().map(|item| quote(item.as_ref())).collect();
    format!("[{}]", items.join(", "))
}
