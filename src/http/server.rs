//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all gateway handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Translate requests into filter contexts and contexts into responses
//! - Bind server to listener with graceful shutdown

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::chain::{FilterChainExecutor, RequestContext};
use crate::config::GatewayConfig;
use crate::http::pipeline::{self, HyperUpstream, Upstream};
use crate::http::request::{self, UuidRequestId};

/// Largest inbound body buffered for filters.
const MAX_REQUEST_BODY: usize = 2 * 1024 * 1024;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub executor: FilterChainExecutor,
    pub upstream: Arc<dyn Upstream>,
}

/// HTTP front end running every request through the filter chains.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server forwarding through the hyper client.
    pub fn new(config: &GatewayConfig, executor: FilterChainExecutor) -> Self {
        let upstream = HyperUpstream::new(
            Duration::from_secs(config.timeouts.connect_secs),
            Duration::from_secs(config.timeouts.request_secs),
        );
        Self::with_upstream(config, executor, Arc::new(upstream))
    }

    pub fn with_upstream(config: &GatewayConfig, executor: FilterChainExecutor, upstream: Arc<dyn Upstream>) -> Self {
        let state = AppState { executor, upstream };
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = match request::buffer(request, MAX_REQUEST_BODY).await {
        Ok(split) => split,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let mut ctx = request::context_from_parts(&parts, body);
    tracing::debug!(
        request_id = %ctx.request_id,
        method = %ctx.method,
        path = %ctx.path,
        "Running filter chains"
    );

    let outcome = pipeline::process(&state.executor, state.upstream.as_ref(), &mut ctx).await;
    tracing::debug!(
        request_id = %ctx.request_id,
        status = ?ctx.response_status,
        forwarded = outcome.forwarded,
        shadows = outcome.shadow_count(),
        "Request complete"
    );

    into_response(ctx)
}

/// Render the response a chain left on the context.
pub fn into_response(ctx: RequestContext) -> Response {
    let status = ctx
        .response_status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = Response::new(Body::from(ctx.response_body.unwrap_or_default()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &ctx.response_headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
    response
}
