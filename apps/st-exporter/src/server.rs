use crate::config::TlsPaths;
use anyhow::Context;
use axum::{
    extract::State,
    http::header::{HeaderName, CONTENT_TYPE},
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use st_metrics::MetricsHub;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

async fn metrics_handler(
    State(hub): State<Arc<MetricsHub>>,
) -> ([(HeaderName, &'static str); 1], String) {
    ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], hub.encode_text())
}

async fn healthz_handler() -> &'static str {
    "OK"
}

pub fn router(hub: Arc<MetricsHub>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(hub)
}

/// Serve `/metrics` until the task is dropped. Bind and TLS setup errors are returned.
pub async fn serve(
    addr: SocketAddr,
    tls: Option<TlsPaths>,
    hub: Arc<MetricsHub>,
) -> anyhow::Result<()> {
    let app = router(hub);
    match tls {
        Some(tls) => {
            let config = RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
                .await
                .with_context(|| {
                    format!(
                        "loading TLS certificate {} and key {}",
                        tls.cert_file.display(),
                        tls.key_file.display()
                    )
                })?;
            info!(%addr, "serving metrics over TLS");
            axum_server::bind_rustls(addr, config)
                .serve(app.into_make_service())
                .await
                .with_context(|| format!("metrics server on {addr}"))?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding metrics listener on {addr}"))?;
            info!(addr = %listener.local_addr()?, "serving metrics");
            axum::serve(listener, app)
                .await
                .with_context(|| format!("metrics server on {addr}"))?;
        }
    }
    Ok(())
}
