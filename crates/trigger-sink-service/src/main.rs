use resource_store::InMemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trigger_sink_core::config::feature_flags;
use trigger_sink_service::{
    start_server, AppState, EventSink, ServiceError, SinkArgs, StaticTriggerStore,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trigger_sink_service=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("event listener pod started");

    let args = match SinkArgs::from_env() {
        Ok(args) => args,
        Err(err) => {
            error!("failed to read environment: {}", err);
            std::process::exit(3);
        }
    };

    info!(
        eventlistener = %args.listener_name,
        namespace = %args.listener_namespace,
        logging_config = %feature_flags::logging_config_name(),
        feature_flags_config = %feature_flags::feature_flags_config_name(),
        "configuring sink"
    );

    let trigger_store = match &args.definitions_path {
        Some(path) => match StaticTriggerStore::load(path) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                error!("failed to load trigger definitions: {}", err);
                std::process::exit(3);
            }
        },
        None => {
            error!("LISTENER_DEFINITIONS must point at a definitions file");
            std::process::exit(3);
        }
    };

    // The in-memory store stands in for the cluster resource store; real
    // deployments inject a cluster-backed client behind the same traits.
    let store = InMemoryStore::new();

    let sink = Arc::new(EventSink {
        trigger_store,
        resource_client: Arc::new(store.clone()),
        discovery: Arc::new(store.clone()),
        secrets: Arc::new(store.clone()),
        auth: Arc::new(store),
        http_client: reqwest::Client::new(),
        listener_name: args.listener_name.clone(),
        listener_namespace: args.listener_namespace.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    if let Err(err) = start_server(addr, AppState::new(sink)).await {
        error!("failed to start server: {}", err);

        let exit_code = match err {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) | ServiceError::Args(_) => 3,
        };
        std::process::exit(exit_code);
    }
}
