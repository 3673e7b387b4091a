//! HTTP surface: `/metrics` and `/health`.

use crate::scheduler::{self, AppContext};
use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderName, Request, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use opentelemetry_http::HeaderExtractor;
use prometheus::{Registry, TextEncoder};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{Span, debug, error, info, info_span};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;
use ulid::Ulid;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone, Default)]
struct MakeRequestUlid;

impl MakeRequestId for MakeRequestUlid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Ulid::new().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let parent = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(request.headers()))
    });

    let request_id = request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let span = info_span!(
        "http.request",
        method = %request.method(),
        uri = %request.uri(),
        request_id,
        otel.kind = "server",
    );
    let _ = span.set_parent(parent);
    span
}

/// Router serving the metrics of `registry`.
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(REQUEST_ID, MakeRequestUlid))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(PropagateRequestIdLayer::new(REQUEST_ID)),
        )
        .with_state(registry)
}

async fn metrics(State(registry): State<Registry>) -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&registry.gather()) {
        Ok(body) => ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            error!("failed to encode metrics: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Bind `listen:port`, or `[::]:port` falling back to `0.0.0.0:port` when
/// no address is given.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn bind(port: u16, listen: Option<&str>) -> Result<TcpListener> {
    if let Some(address) = listen {
        let ip: IpAddr = address
            .parse()
            .with_context(|| format!("invalid listen address: {address}"))?;
        return TcpListener::bind(SocketAddr::new(ip, port))
            .await
            .with_context(|| format!("failed to bind {address}:{port}"));
    }

    match TcpListener::bind(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)).await {
        Ok(listener) => Ok(listener),
        Err(err) => {
            debug!("IPv6 bind failed ({err}), falling back to IPv4");
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
                .await
                .with_context(|| format!("failed to bind 0.0.0.0:{port}"))
        }
    }
}

/// Start the collectors of `app` and serve its registry until shutdown.
///
/// # Errors
///
/// Returns an error if binding fails, the initial discovery fails or a
/// background task exits.
pub async fn new(port: u16, listen: Option<String>, app: AppContext) -> Result<()> {
    let listener = bind(port, listen.as_deref()).await?;
    let handles = app.start().await?;

    info!("listening on {}", listener.local_addr()?);

    let server = axum::serve(listener, router(app.registry.clone()))
        .with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        served = server => served.context("http server failed"),
        supervised = scheduler::supervise(handles) => supervised,
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
