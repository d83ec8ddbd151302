use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use boomcard_events::config::ServiceConfig;
use boomcard_events::messaging::{EventPublisher, KafkaTransport};
use boomcard_events::metrics::{self, Metrics};
use boomcard_events::services::{EntityName, EntityService, PgEntityStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,boomcard_events=debug")),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    tracing::info!(
        service = %config.service_name,
        brokers = %config.kafka.bootstrap_servers(),
        client_id = %config.kafka.client_id,
        security_protocol = config.kafka.security_protocol(),
        "Starting event publisher"
    );

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);

    // Metrics HTTP server runs on its own thread and runtime
    let metrics_registry = Arc::new(metrics.registry().clone());
    let service_name = config.service_name.clone();
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "Could not start metrics runtime");
                return;
            }
        };
        rt.block_on(async {
            let server =
                metrics::start_metrics_server(metrics_registry, service_name, metrics_port);
            if let Err(e) = server.await {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    });

    // === 2. Publisher ===
    let transport = Arc::new(KafkaTransport::new(&config.kafka)?);
    let publisher = EventPublisher::new(transport).with_metrics(metrics.clone());
    publisher.start().await?;

    // === 3. Call site wiring (optional) ===
    if let Some(database_url) = &config.database_url {
        let store = PgEntityStore::connect(database_url).await?;
        let entity = EntityName::new("auth")?;
        store.ensure_table(&entity).await?;

        if config.startup_check {
            let service =
                EntityService::new(entity, Arc::new(store), publisher.clone(), metrics.clone());
            let data = serde_json::json!({
                "source": config.service_name,
                "kind": "startup-check",
            });
            match service.create(data).await {
                Ok(record) => tracing::info!(
                    id = %record.id,
                    "Startup check row committed to auth and announced (the row is kept)"
                ),
                Err(e) => tracing::error!(error = %e, "Startup check failed"),
            }
        } else {
            tracing::info!("auth table ready, STARTUP_CHECK not set so no row is written");
        }
    } else {
        tracing::info!("DATABASE_URL not set, skipping entity service wiring");
    }

    tracing::info!("Publisher running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    publisher.stop().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
