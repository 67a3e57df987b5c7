// Third Party
use k8s_openapi::{api::core::v1::Namespace, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{api::Api, Client};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "mev-devenv";

/// Labels attached to every object this crate generates.
pub const MANAGED_BY_LABELS: [(&str, &str); 2] = [
    ("app.kubernetes.io/managed-by", FIELD_MANAGER),
    ("app.kubernetes.io/part-of", "mev-inspect"),
];

pub const POSTGRES_USER: &str = "POSTGRES_USER";
pub const POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
pub const POSTGRES_HOST: &str = "POSTGRES_HOST";
pub const RPC_URL: &str = "RPC_URL";
pub const LISTENER_HEALTHCHECK_URL: &str = "LISTENER_HEALTHCHECK_URL";
pub const TRACE_DB_USER: &str = "TRACE_DB_USER";
pub const TRACE_DB_PASSWORD: &str = "TRACE_DB_PASSWORD";
pub const TRACE_DB_HOST: &str = "TRACE_DB_HOST";

/// Install the global tracing subscriber. `RUST_LOG` wins over `level` when set.
/// Output goes to stderr so rendered manifests on stdout can be piped.
pub fn init_tracing(crate_name: &str, level: tracing::Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", crate_name, level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Create `namespace` if it does not already exist.
pub async fn create_namespace(client: &Client, namespace: &str) -> Result<(), anyhow::Error> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match namespaces.create(&Default::default(), &ns).await {
        Ok(_) => {
            debug!("Created namespace {}", namespace);
            Ok(())
        }
        // 409 Conflict
        Err(kube::Error::Api(kube::error::ErrorResponse { code, .. })) if code == 409 => {
            debug!("Namespace {} already exists", namespace);
            Ok(())
        }
        Err(error) => Err(anyhow::Error::new(error)),
    }
}
