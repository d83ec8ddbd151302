use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

struct ServerState {
    registry: Arc<Registry>,
    service_name: String,
}

/// Start the metrics HTTP server
/// This should be called in a separate thread/runtime to avoid conflicts
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    service_name: String,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!(port = port, "Starting metrics server on http://0.0.0.0:{}/metrics", port);

    let state = web::Data::new(ServerState {
        registry,
        service_name,
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(state: web::Data<ServerState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(state: web::Data<ServerState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{body::to_bytes, test};

    fn state() -> web::Data<ServerState> {
        let metrics = crate::metrics::Metrics::new().unwrap();
        metrics.record_entity_operation("auth", "created");
        web::Data::new(ServerState {
            registry: Arc::new(metrics.registry().clone()),
            service_name: "boomcard-events".to_string(),
        })
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_exposes_counters() {
        let app = test::init_service(
            App::new()
                .app_data(state())
                .route("/metrics", web::get().to(metrics_handler)),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body = to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("entity_operations_total{entity=\"auth\",operation=\"created\"} 1"));
    }

    #[actix_web::test]
    async fn test_health_endpoint() {
        let app = test::init_service(
            App::new()
                .app_data(state())
                .route("/health", web::get().to(health_handler)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["status"], "healthy");
        assert_eq!(resp["service"], "boomcard-events");
    }
}
