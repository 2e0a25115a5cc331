//! Health and metrics endpoint

use hyper::{
    body::Bytes,
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Response, StatusCode,
};
use hyper_util::rt::tokio::TokioIo;
use http_body_util::Full;
use registration_core::{SyncMetrics, SyncState};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shared by every connection
#[derive(Clone)]
pub struct HealthState {
    pub metrics: Arc<SyncMetrics>,
    pub sync_state: watch::Receiver<SyncState>,
}

/// Serve `GET /healthz` and `GET /metrics` until the listener fails
pub async fn serve(port: u16, state: HealthState) -> anyhow::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(&addr).await?;
    info!("Health server listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let response = route(req.method(), req.uri().path(), &state);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving health connection from {}: {}", peer_addr, e);
            }
        });
    }
}

pub fn route(method: &Method, path: &str, state: &HealthState) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/healthz") => {
            let sync_state = *state.sync_state.borrow();
            text(StatusCode::OK, format!("OK\nsync: {:?}\n", sync_state))
        }
        (&Method::GET, "/metrics") => match state.metrics.gather() {
            Ok(body) => {
                let mut response = text(StatusCode::OK, body);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
            }
        },
        _ => text(StatusCode::NOT_FOUND, "Not Found\n"),
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
