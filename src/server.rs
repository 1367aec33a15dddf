//! HTTP scrape endpoint
//!
//! Serves the gathered registry in the Prometheus text format on the metrics
//! path and a small landing page on `/`. Gathering runs on the blocking pool
//! because collectors wait on child processes while holding a lock.

use crate::collectors::{build_info_gauge, UsageCollector};
use crate::error::ServeError;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{error, info};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Clone)]
struct AppState {
    registry: Registry,
    metrics_path: Arc<str>,
}

/// Registry holding the usage collector and the build info gauge
pub fn build_registry(
    collector: UsageCollector,
    namespace: &str,
) -> Result<Registry, ServeError> {
    let registry = Registry::new();
    registry.register(Box::new(collector))?;
    registry.register(Box::new(build_info_gauge(namespace)?))?;
    Ok(registry)
}

/// Routes for the landing page and the metrics endpoint
///
/// # Arguments
///
/// * `registry` - Registry gathered on every scrape
/// * `metrics_path` - Literal route such as `/metrics`, as accepted by
///   `Settings::validate`
pub fn router(registry: Registry, metrics_path: &str) -> Router {
    let state = AppState {
        registry,
        metrics_path: Arc::from(metrics_path),
    };

    Router::new()
        .route("/", get(handle_landing))
        .route(metrics_path, get(handle_metrics))
        .with_state(state)
}

/// Gather and encode every registered collector
pub fn encode_metrics(registry: &Registry) -> prometheus::Result<(String, Vec<u8>)> {
    let encoder = TextEncoder::new();
    let families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}

async fn handle_metrics(State(state): State<AppState>) -> Response {
    let registry = state.registry.clone();

    match tokio::task::spawn_blocking(move || encode_metrics(&registry)).await {
        Ok(Ok((content_type, body))) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Ok(Err(e)) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode metrics: {}", e),
            )
                .into_response()
        }
        Err(e) => {
            error!("Metrics gathering task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "metrics gathering failed".to_string(),
            )
                .into_response()
        }
    }
}

async fn handle_landing(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>
<head><title>Disk Usage Exporter</title></head>
<body>
<h1>Disk Usage Exporter</h1>
<p><a href='{}'>Metrics</a></p>
</body>
</html>
",
        state.metrics_path
    ))
}

/// Bind `addr` and serve `app` until shutdown is requested
///
/// # Errors
///
/// Returns `ServeError::Bind` if the address cannot be bound.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ServeError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })?;
    serve_listener(listener, app, shutdown).await
}

/// Serve `app` on an already bound listener
pub async fn serve_listener(
    listener: TcpListener,
    app: Router,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ServeError> {
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_requested(shutdown))
        .await?;
    Ok(())
}

/// Resolves once `true` is published or the sender goes away
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        if shutdown.changed().await.is_err() {
            break;
        }
    }
    info!("Shutdown requested, draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::probe::MockUsageProbe;
    use crate::collectors::{DuProbe, UsageProbe};
    use crate::config::PathSet;
    use crate::error::CollectorError;
    use tokio::task::JoinHandle;

    fn registry_with(paths: &[&str], probe: impl UsageProbe + 'static) -> Registry {
        let collector = UsageCollector::new(
            "file_size",
            PathSet::new(paths.iter().copied()).unwrap(),
            Arc::new(probe),
        )
        .unwrap();
        build_registry(collector, "file_size").unwrap()
    }

    async fn spawn_server(
        app: Router,
    ) -> (SocketAddr, watch::Sender<bool>, JoinHandle<Result<(), ServeError>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(serve_listener(listener, app, rx));
        (addr, tx, handle)
    }

    /// `(series, value)` pairs for one metric in a text exposition body
    fn sample_values(body: &str, metric: &str) -> Vec<(String, f64)> {
        body.lines()
            .filter(|line| line.starts_with(&format!("{}{{", metric)))
            .map(|line| {
                let mut fields = line.split_whitespace();
                let series = fields.next().unwrap().to_string();
                let value = fields.next().unwrap().parse().unwrap();
                (series, value)
            })
            .collect()
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[test]
    fn test_encode_includes_build_info() {
        let mut probe = MockUsageProbe::new();
        probe.expect_measure().returning(|_| Ok("3\t.\n".to_string()));
        let registry = registry_with(&["."], probe);

        let (content_type, body) = encode_metrics(&registry).unwrap();
        let body = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("# TYPE file_size_folder_size_bytes gauge"));
        assert_eq!(
            sample_values(&body, "file_size_folder_size_bytes"),
            vec![("file_size_folder_size_bytes{name=\".\"}".to_string(), 3.0)]
        );
        assert!(body.contains(&format!(
            "file_size_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )));
    }

    #[tokio::test]
    async fn test_landing_page_links_metrics_path() {
        let registry = registry_with(&["."], MockUsageProbe::new());
        let (addr, shutdown, handle) = spawn_server(router(registry, "/custom-metrics")).await;

        let response = client()
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body = response.text().await.unwrap();
        assert!(body.contains("<title>Disk Usage Exporter</title>"));
        assert!(body.contains("href='/custom-metrics'"));

        shutdown.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_failed_measurement_still_returns_ok() {
        let mut probe = MockUsageProbe::new();
        probe
            .expect_measure()
            .returning(|_| Err(CollectorError::SubprocessSpawn("du: not found".to_string())));
        let registry = registry_with(&["/unreadable"], probe);
        let (addr, shutdown, handle) = spawn_server(router(registry, "/metrics")).await;

        let response = client()
            .get(format!("http://{}/metrics", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body = response.text().await.unwrap();
        assert!(!body.contains("file_size_folder_size_bytes{"));
        assert!(body.contains("file_size_build_info"));

        shutdown.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let registry = registry_with(&["."], MockUsageProbe::new());
        let (addr, shutdown, handle) = spawn_server(router(registry, "/metrics")).await;

        let response = client()
            .get(format!("http://{}/nope", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        shutdown.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let (_tx, rx) = watch::channel(false);

        let registry = registry_with(&["."], MockUsageProbe::new());
        let result = serve(addr, router(registry, "/metrics"), rx).await;

        match result {
            Err(ServeError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            other => panic!("Expected bind error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_server() {
        let registry = registry_with(&["."], MockUsageProbe::new());
        let (_addr, shutdown, handle) = spawn_server(router(registry, "/metrics")).await;

        drop(shutdown);
        assert!(handle.await.unwrap().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scrape_with_fake_du() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::TempDir::new().unwrap();
        let tool = dir.path().join("fake-du");
        std::fs::write(&tool, "#!/bin/sh\nprintf '10\\t.\\n5\\t./sub\\n'\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let registry = registry_with(&["."], DuProbe::new(&tool, Duration::from_secs(10)));
        let (addr, shutdown, handle) = spawn_server(router(registry, "/metrics")).await;

        let response = client()
            .get(format!("http://{}/metrics", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body = response.text().await.unwrap();

        assert_eq!(
            sample_values(&body, "file_size_folder_size_bytes"),
            vec![
                ("file_size_folder_size_bytes{name=\".\"}".to_string(), 10.0),
                ("file_size_folder_size_bytes{name=\"./sub\"}".to_string(), 5.0),
            ],
            "unexpected body:\n{}",
            body
        );

        shutdown.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
