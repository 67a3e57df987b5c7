//! Helm release declarations.
//!
//! The chart templates themselves live outside this crate; a release only records where its chart
//! comes from, which values it overrides and which workloads it is expected to create.

// Third Party
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartSource {
    /// A chart directory in this checkout, e.g. `./k8s/mev-inspect`.
    Local { path: String },
    /// A chart fetched from a named repository, e.g. `bitnami/redis`.
    Remote {
        repo_name: String,
        repo_url: String,
        chart: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkloadKind {
    StatefulSet,
    Deployment,
}

/// A workload created by a release that other resources may depend on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workload {
    pub name: String,
    pub kind: WorkloadKind,
}

impl Workload {
    pub fn stateful_set(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: WorkloadKind::StatefulSet,
        }
    }

    pub fn deployment(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: WorkloadKind::Deployment,
        }
    }
}

/// How helm reads an override value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// `--set`: helm infers numbers and booleans.
    Inferred,
    /// `--set-string`: the value is always a string.
    String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub key: String,
    pub value: String,
    pub value_type: ValueType,
}

impl Override {
    pub fn flag(&self) -> &'static str {
        match self.value_type {
            ValueType::Inferred => "--set",
            ValueType::String => "--set-string",
        }
    }

    /// `key=value` with the value escaped for helm's `--set` parser, which splits on commas and
    /// treats a backslash as an escape.
    pub fn to_arg(&self) -> String {
        let mut escaped = String::with_capacity(self.value.len());
        for c in self.value.chars() {
            if c == '\\' || c == ',' {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        format!("{}={}", self.key, escaped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmRelease {
    pub name: String,
    pub chart: ChartSource,
    /// Overrides in the order they are passed to helm.
    pub set: Vec<Override>,
    pub workloads: Vec<Workload>,
    extra_env_count: usize,
}

impl HelmRelease {
    pub fn local(name: &str, path: &str) -> Self {
        Self::new(
            name,
            ChartSource::Local {
                path: path.to_string(),
            },
        )
    }

    pub fn remote(name: &str, repo_name: &str, repo_url: &str, chart: &str) -> Self {
        Self::new(
            name,
            ChartSource::Remote {
                repo_name: repo_name.to_string(),
                repo_url: repo_url.to_string(),
                chart: chart.to_string(),
            },
        )
    }

    fn new(name: &str, chart: ChartSource) -> Self {
        Self {
            name: name.to_string(),
            chart,
            set: Vec::new(),
            workloads: Vec::new(),
            extra_env_count: 0,
        }
    }

    fn push(mut self, key: &str, value: String, value_type: ValueType) -> Self {
        self.set.push(Override {
            key: key.to_string(),
            value,
            value_type,
        });
        self
    }

    /// An override whose type helm infers, for numbers and flags.
    pub fn set(self, key: &str, value: impl ToString) -> Self {
        self.push(key, value.to_string(), ValueType::Inferred)
    }

    /// An override that always reaches the chart as a string.
    pub fn set_string(self, key: &str, value: &str) -> Self {
        self.push(key, value.to_string(), ValueType::String)
    }

    /// Append an entry to the chart's `extraEnv` list. Container env values must be strings.
    pub fn extra_env(self, name: &str, value: &str) -> Self {
        let index = self.extra_env_count;
        let mut release = self
            .set_string(&format!("extraEnv[{}].name", index), name)
            .set_string(&format!("extraEnv[{}].value", index), value);
        release.extra_env_count += 1;
        release
    }

    pub fn provides(mut self, workload: Workload) -> Self {
        self.workloads.push(workload);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.set
            .iter()
            .rev()
            .find(|o| o.key == key)
            .map(|o| o.value.as_str())
    }

    /// Override keys in order, without their values.
    pub fn override_keys(&self) -> Vec<&str> {
        self.set.iter().map(|o| o.key.as_str()).collect()
    }

    /// The chart reference as helm expects it on the command line.
    pub fn chart_ref(&self) -> String {
        match &self.chart {
            ChartSource::Local { path } => path.clone(),
            ChartSource::Remote {
                repo_name, chart, ..
            } => format!("{}/{}", repo_name, chart),
        }
    }

    /// Arguments for `helm upgrade --install`. Remote charts are resolved with `--repo` so no local
    /// `helm repo add` is needed.
    pub fn install_args(&self, namespace: &str) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            self.name.clone(),
        ];
        match &self.chart {
            ChartSource::Local { path } => args.push(path.clone()),
            ChartSource::Remote {
                repo_url, chart, ..
            } => {
                args.push(chart.clone());
                args.push("--repo".to_string());
                args.push(repo_url.clone());
            }
        }
        args.push("--namespace".to_string());
        args.push(namespace.to_string());
        for o in &self.set {
            args.push(o.flag().to_string());
            args.push(o.to_arg());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_env_indices() {
        let release = HelmRelease::local("mev-inspect", "./k8s/mev-inspect")
            .extra_env("AWS_ACCESS_KEY_ID", "foobar")
            .extra_env("AWS_REGION", "us-east-1");
        assert_eq!(
            release.override_keys(),
            vec![
                "extraEnv[0].name",
                "extraEnv[0].value",
                "extraEnv[1].name",
                "extraEnv[1].value",
            ]
        );
        assert!(release
            .set
            .iter()
            .all(|o| o.value_type == ValueType::String));
        assert_eq!(release.get("extraEnv[1].value"), Some("us-east-1"));
        assert_eq!(release.get("replicaCount"), None);
    }

    #[test]
    fn test_env_values_stay_strings_and_commas_are_escaped() {
        let args = HelmRelease::local("mev-inspect", "./k8s/mev-inspect")
            .extra_env("AWS_SECRET_ACCESS_KEY", "abc,def")
            .extra_env("AWS_ACCESS_KEY_ID", "12345")
            .install_args("default");
        assert_eq!(
            args[6..].to_vec(),
            vec![
                "--set-string",
                "extraEnv[0].name=AWS_SECRET_ACCESS_KEY",
                "--set-string",
                "extraEnv[0].value=abc\\,def",
                "--set-string",
                "extraEnv[1].name=AWS_ACCESS_KEY_ID",
                "--set-string",
                "extraEnv[1].value=12345",
            ]
        );
    }

    #[test]
    fn test_backslash_is_escaped() {
        let release = HelmRelease::local("redis", "./redis").set_string("password", "a\\b");
        assert_eq!(release.set[0].to_arg(), "password=a\\\\b");
    }

    #[test]
    fn test_remote_install_args() {
        let release = HelmRelease::remote(
            "redis",
            "bitnami",
            "https://charts.bitnami.com/bitnami",
            "redis",
        )
        .set_string("global.redis.password", "password");
        assert_eq!(release.chart_ref(), "bitnami/redis");
        assert_eq!(
            release.install_args("default"),
            vec![
                "upgrade",
                "--install",
                "redis",
                "redis",
                "--repo",
                "https://charts.bitnami.com/bitnami",
                "--namespace",
                "default",
                "--set-string",
                "global.redis.password=password",
            ]
        );
    }

    #[test]
    fn test_local_install_args() {
        let release = HelmRelease::local("mev-inspect-workers", "./k8s/mev-inspect-workers")
            .set("replicaCount", 1);
        assert_eq!(release.chart_ref(), "./k8s/mev-inspect-workers");
        assert_eq!(
            release.install_args("mev"),
            vec![
                "upgrade",
                "--install",
                "mev-inspect-workers",
                "./k8s/mev-inspect-workers",
                "--namespace",
                "mev",
                "--set",
                "replicaCount=1",
            ]
        );
    }

    #[test]
    fn test_later_override_wins() {
        let release = HelmRelease::local("mev-inspect", "./k8s/mev-inspect")
            .set("replicaCount", 1)
            .set("replicaCount", 2);
        assert_eq!(release.get("replicaCount"), Some("2"));
    }
}
