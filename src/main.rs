// System
use std::path::PathBuf;

// Third Party
use clap::{Parser, Subcommand, ValueEnum};
use kube::Client;
use tokio::time::Duration;
use tracing::{debug, info};

// Local
use mev_devenv::{
    apply::{Applier, ApplyOptions},
    image::ImageLoader,
    render,
    utils::init_tracing,
    DevEnvConfig, DevEnvironment, EnvSource, Extension,
};

/// Generate and apply the mev-inspect development environment.
#[derive(Debug, Parser)]
#[command(name = "mev-devenv", version)]
struct Cli {
    /// YAML config file. Defaults reproduce the stock environment.
    #[arg(long, env = "MEV_DEVENV_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace for every generated object and release.
    #[arg(long)]
    namespace: Option<String>,

    /// Enable an optional extension, may be repeated.
    #[arg(long = "with", value_enum)]
    extensions: Vec<Extension>,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the environment to stdout.
    Render {
        #[arg(long, value_enum, default_value_t = Format::Manifests)]
        format: Format,
    },
    /// Print the resource rollout order with dependencies.
    Graph,
    /// Apply objects, build images and install releases on the current cluster.
    Apply {
        #[arg(long)]
        skip_image: bool,
        /// Copy the built image into a local cluster that does not share the host's Docker daemon.
        #[arg(long, value_enum)]
        load_into: Option<LoadTarget>,
        /// kind cluster name used with `--load-into kind`.
        #[arg(long, default_value = "kind")]
        kind_cluster: String,
        /// Seconds to wait for each dependency to report ready.
        #[arg(long, default_value_t = 300)]
        wait_timeout: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LoadTarget {
    Kind,
    Minikube,
}

fn image_loader(target: Option<LoadTarget>, kind_cluster: &str) -> Option<ImageLoader> {
    target.map(|target| match target {
        LoadTarget::Kind => ImageLoader::Kind {
            cluster: kind_cluster.to_string(),
        },
        LoadTarget::Minikube => ImageLoader::Minikube,
    })
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Manifests,
    Plan,
    PlanJson,
    Tiltfile,
    Fingerprint,
}

fn load_config(cli: &Cli) -> Result<DevEnvConfig, anyhow::Error> {
    let mut config = match &cli.config {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            DevEnvConfig::from_file(path)?
        }
        None => DevEnvConfig::default(),
    };
    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }
    for extension in &cli.extensions {
        config.enable(*extension);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_tracing("mev_devenv", cli.log_level);

    let config = load_config(&cli)?;
    let environment = DevEnvironment::generate(&config, &EnvSource::from_process())?;

    match cli.command {
        Command::Render { format } => {
            let output = match format {
                Format::Manifests => render::manifests_yaml(&environment)?,
                Format::Plan => render::plan_yaml(&environment)?,
                Format::PlanJson => render::plan_json(&environment)?,
                Format::Tiltfile => render::tiltfile(&environment)?,
                Format::Fingerprint => render::fingerprint(&environment)?,
            };
            println!("{}", output.trim_end());
        }
        Command::Graph => {
            for node in environment.graph.rollout_order()? {
                let deps: Vec<&str> = node.depends_on.iter().map(String::as_str).collect();
                if deps.is_empty() {
                    println!("{} ({})", node.name, node.owner);
                } else {
                    println!("{} ({}) <- {}", node.name, node.owner, deps.join(", "));
                }
            }
        }
        Command::Apply {
            skip_image,
            load_into,
            kind_cluster,
            wait_timeout,
        } => {
            let client = Client::try_default().await?;
            let options = ApplyOptions {
                skip_image,
                load_into: image_loader(load_into, &kind_cluster),
                wait_timeout: Duration::from_secs(wait_timeout),
            };
            Applier::new(&client).apply(&environment, &options).await?;
            info!(
                "Environment applied to namespace {}, fingerprint {}",
                environment.namespace,
                render::fingerprint(&environment)?
            );
        }
    }
    Ok(())
}
