// Third Party
use serde::Serialize;

/// One live-update step, applied to a running container instead of a full rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveUpdateStep {
    /// Copy changed files under `local` into `container_path`.
    Sync {
        local: String,
        container_path: String,
    },
    /// Run `command` in the container, but only when one of `triggers` changed.
    Run {
        command: String,
        triggers: Vec<String>,
    },
}

/// A locally built image that workloads reference by `image_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageBuild {
    pub image_ref: String,
    pub context: String,
    pub live_update: Vec<LiveUpdateStep>,
}

impl ImageBuild {
    pub fn new(image_ref: &str, context: &str) -> Self {
        Self {
            image_ref: image_ref.to_string(),
            context: context.to_string(),
            live_update: Vec::new(),
        }
    }

    pub fn sync(mut self, local: &str, container_path: &str) -> Self {
        self.live_update.push(LiveUpdateStep::Sync {
            local: local.to_string(),
            container_path: container_path.to_string(),
        });
        self
    }

    pub fn run(mut self, command: &str, triggers: &[&str]) -> Self {
        self.live_update.push(LiveUpdateStep::Run {
            command: command.to_string(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    /// Files whose change re-runs a live-update command.
    pub fn trigger_files(&self) -> Vec<&str> {
        self.live_update
            .iter()
            .filter_map(|step| match step {
                LiveUpdateStep::Run { triggers, .. } => Some(triggers),
                LiveUpdateStep::Sync { .. } => None,
            })
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// Arguments for `docker build`.
    pub fn build_args(&self) -> Vec<String> {
        vec![
            "build".to_string(),
            "--tag".to_string(),
            self.image_ref.clone(),
            self.context.clone(),
        ]
    }
}

/// Where a locally built image has to be copied so the cluster's nodes can run it. Clusters that
/// share the host's Docker daemon need none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLoader {
    Kind { cluster: String },
    Minikube,
}

impl ImageLoader {
    /// The program and arguments that copy `image_ref` into the cluster.
    pub fn command(&self, image_ref: &str) -> (&'static str, Vec<String>) {
        match self {
            ImageLoader::Kind { cluster } => (
                "kind",
                vec![
                    "load".to_string(),
                    "docker-image".to_string(),
                    image_ref.to_string(),
                    "--name".to_string(),
                    cluster.clone(),
                ],
            ),
            ImageLoader::Minikube => (
                "minikube",
                vec![
                    "image".to_string(),
                    "load".to_string(),
                    image_ref.to_string(),
                ],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_update_steps_keep_order() {
        let image = ImageBuild::new("mev-inspect-py", ".")
            .sync(".", "/app")
            .run("cd /app && poetry install", &["./pyproject.toml"]);
        assert_eq!(
            image.live_update[0],
            LiveUpdateStep::Sync {
                local: ".".to_string(),
                container_path: "/app".to_string()
            }
        );
        assert!(matches!(image.live_update[1], LiveUpdateStep::Run { .. }));
        assert_eq!(image.trigger_files(), vec!["./pyproject.toml"]);
        assert_eq!(
            image.build_args(),
            vec!["build", "--tag", "mev-inspect-py", "."]
        );
    }

    #[test]
    fn test_loader_commands() {
        let kind = ImageLoader::Kind {
            cluster: "mev".to_string(),
        };
        assert_eq!(
            kind.command("mev-inspect-py"),
            (
                "kind",
                vec![
                    "load".to_string(),
                    "docker-image".to_string(),
                    "mev-inspect-py".to_string(),
                    "--name".to_string(),
                    "mev".to_string(),
                ]
            )
        );
        let (program, args) = ImageLoader::Minikube.command("mev-inspect-py");
        assert_eq!(program, "minikube");
        assert_eq!(args, vec!["image", "load", "mev-inspect-py"]);
    }
}
