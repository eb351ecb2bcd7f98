//! Request lifecycle: Pre → Route → upstream → Post.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

use crate::chain::{ChainResult, FilterChainExecutor, RequestContext};
use crate::filters::FilterType;
use crate::http::request::X_REQUEST_ID;

/// Upper bound on a buffered upstream response body.
const MAX_UPSTREAM_BODY: usize = 16 * 1024 * 1024;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Sends a request to the URL chosen by the route group.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forward `ctx` to `ctx.route` and store the response on it.
    async fn forward(&self, ctx: &mut RequestContext) -> Result<(), String>;
}

/// Upstream over the hyper-util pooled HTTP client.
#[derive(Clone)]
pub struct HyperUpstream {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl HyperUpstream {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            timeout: request_timeout,
        }
    }
}

fn target_uri(base: &str, ctx: &RequestContext) -> Result<Uri, String> {
    let mut url = format!("{}{}", base.trim_end_matches('/'), ctx.path);
    if let Some(query) = &ctx.query {
        url.push('?');
        url.push_str(query);
    }
    Uri::try_from(url.as_str()).map_err(|e| format!("invalid upstream url '{url}': {e}"))
}

#[async_trait]
impl Upstream for HyperUpstream {
    async fn forward(&self, ctx: &mut RequestContext) -> Result<(), String> {
        let base = ctx.route.clone().ok_or_else(|| "no route selected".to_string())?;
        let uri = target_uri(&base, ctx)?;
        let method = Method::from_bytes(ctx.method.as_bytes()).map_err(|e| e.to_string())?;

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &ctx.request_headers {
                if name == "host" || HOP_BY_HOP.contains(&name.as_str()) {
                    continue;
                }
                if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                    headers.insert(name, value);
                }
            }
            if let Ok(id) = HeaderValue::from_str(&ctx.request_id) {
                headers.insert(X_REQUEST_ID, id);
            }
        }
        let request = builder
            .body(Body::from(ctx.request_body.clone()))
            .map_err(|e| e.to_string())?;

        let response: hyper::Response<hyper::body::Incoming> = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| "upstream timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(body), MAX_UPSTREAM_BODY)
            .await
            .map_err(|e| e.to_string())?;

        for (name, value) in &parts.headers {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                ctx.set_response_header(name.as_str(), value);
            }
        }
        ctx.respond(parts.status.as_u16(), body.to_vec());
        Ok(())
    }
}

/// Every chain run for one request.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub pre: ChainResult,
    pub route: Option<ChainResult>,
    pub upstream_error: Option<ChainResult>,
    pub post: ChainResult,
    pub forwarded: bool,
}

impl PipelineOutcome {
    /// Shadow runs across every chain, nested error chains included.
    pub fn shadow_count(&self) -> usize {
        [Some(&self.pre), self.route.as_ref(), self.upstream_error.as_ref(), Some(&self.post)]
            .into_iter()
            .flatten()
            .map(count_shadows)
            .sum()
    }
}

fn count_shadows(result: &ChainResult) -> usize {
    result.shadows.len() + result.error_chain.as_deref().map_or(0, count_shadows)
}

/// Run the full lifecycle against `ctx`, leaving a response on it.
///
/// Every phase runs against the snapshot taken when the request started.
pub async fn process(
    executor: &FilterChainExecutor,
    upstream: &dyn Upstream,
    ctx: &mut RequestContext,
) -> PipelineOutcome {
    let snapshot = executor.registry().current_snapshot();
    let pre = executor.execute_on(&snapshot, FilterType::Pre, ctx);
    let mut route = None;
    let mut upstream_error = None;
    let mut forwarded = false;

    if !pre.aborted && !ctx.has_response() {
        let result = executor.execute_on(&snapshot, FilterType::Route, ctx);
        let aborted = result.aborted;
        route = Some(result);

        if !aborted && !ctx.has_response() && ctx.route.is_some() {
            match upstream.forward(ctx).await {
                Ok(()) => forwarded = true,
                Err(e) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        route = ?ctx.route,
                        error = %e,
                        "Upstream request failed"
                    );
                    ctx.error = Some(e);
                    let errors = executor.execute_on(&snapshot, FilterType::Error, ctx);
                    if !ctx.has_response() {
                        ctx.respond(502, "Upstream request failed");
                    }
                    upstream_error = Some(errors);
                }
            }
        }
    }

    if !ctx.has_response() {
        if ctx.error.is_some() {
            ctx.respond(500, "Filter chain failed");
        } else {
            ctx.respond(404, "No route for request");
        }
    }

    let post = executor.execute_on(&snapshot, FilterType::Post, ctx);
    PipelineOutcome {
        pre,
        route,
        upstream_error,
        post,
        forwarded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{RuntimeToggles, ShadowSampler};
    use crate::filters::FilterId;
    use crate::loader::{
        checksum, CompileRequest, CompiledFilter, ExecutableFilter, FilterCompiler, FilterFailure, ScriptCompiler,
    };
    use crate::registry::{FilterRegistry, Slot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Echo {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Upstream for Echo {
        async fn forward(&self, ctx: &mut RequestContext) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("connection refused".into());
            }
            let body = format!("{}{}", ctx.route.clone().unwrap_or_default(), ctx.path);
            ctx.respond(200, body);
            Ok(())
        }
    }

    fn echo(fail: bool) -> Echo {
        Echo {
            calls: AtomicUsize::new(0),
            fail,
        }
    }

    fn compiled(
        name: &str,
        filter_type: FilterType,
        revision: u64,
        source: &str,
        unit: Arc<dyn ExecutableFilter>,
    ) -> Arc<CompiledFilter> {
        let request = CompileRequest {
            filter_id: FilterId::derive(name, filter_type),
            revision,
            filter_type,
            filter_name: name.to_string(),
            order: None,
            disable_property: None,
            source_code: source.to_string(),
        };
        Arc::new(CompiledFilter::new(&request, checksum(source), unit))
    }

    fn script(name: &str, filter_type: FilterType, revision: u64, source: &str) -> Arc<CompiledFilter> {
        let unit = ScriptCompiler::new().compile(source).unwrap();
        compiled(name, filter_type, revision, source, unit)
    }

    fn primary(filter: Arc<CompiledFilter>) -> (Slot, Arc<CompiledFilter>) {
        (Slot::primary(filter.filter_id.clone()), filter)
    }

    fn executor(scripts: &[(&str, FilterType, &str)]) -> FilterChainExecutor {
        let registry = Arc::new(FilterRegistry::new());
        let upserts = scripts
            .iter()
            .map(|(name, filter_type, source)| primary(script(name, *filter_type, 0, source)))
            .collect();
        registry.install(upserts, &[]);
        FilterChainExecutor::new(
            registry,
            Arc::new(RuntimeToggles::default()),
            Arc::new(ShadowSampler::default()),
        )
    }

    /// Publishes `replacement` into the registry while it runs.
    #[derive(Debug)]
    struct Publish {
        registry: Arc<FilterRegistry>,
        replacement: Arc<CompiledFilter>,
    }

    impl ExecutableFilter for Publish {
        fn run(&self, _ctx: &mut RequestContext) -> Result<(), FilterFailure> {
            self.registry.install(vec![primary(self.replacement.clone())], &[]);
            Ok(())
        }
    }

    fn route_to(url: &str) -> String {
        format!("[[actions]]\naction = \"route\"\nurl = \"{url}\"\n")
    }

    const ROUTE: &str = "[[actions]]\naction = \"route\"\nurl = \"http://backend:3000\"\n";
    const AUTH: &str = "[[actions]]\naction = \"require_header\"\nname = \"x-api-key\"\n";
    const STAMP: &str = "[[actions]]\naction = \"set_response_header\"\nname = \"x-gateway\"\nvalue = \"edge\"\n";

    #[tokio::test]
    async fn test_forwards_to_selected_route() {
        let exec = executor(&[("route", FilterType::Route, ROUTE), ("stamp", FilterType::Post, STAMP)]);
        let upstream = echo(false);
        let mut ctx = RequestContext::new("GET", "/users");

        let outcome = process(&exec, &upstream, &mut ctx).await;
        assert!(outcome.forwarded);
        assert_eq!(ctx.response_status, Some(200));
        assert_eq!(ctx.response_body.as_deref(), Some(&b"http://backend:3000/users"[..]));
        assert_eq!(ctx.response_headers.get("x-gateway").map(String::as_str), Some("edge"));
    }

    #[tokio::test]
    async fn test_pre_response_short_circuits_routing() {
        let exec = executor(&[("auth", FilterType::Pre, AUTH), ("route", FilterType::Route, ROUTE)]);
        let upstream = echo(false);
        let mut ctx = RequestContext::new("GET", "/users");

        let outcome = process(&exec, &upstream, &mut ctx).await;
        assert!(outcome.route.is_none());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.response_status, Some(401));
        assert_eq!(outcome.post.filter_type, FilterType::Post);
    }

    #[tokio::test]
    async fn test_upstream_failure_runs_error_group() {
        let exec = executor(&[("route", FilterType::Route, ROUTE)]);
        let upstream = echo(true);
        let mut ctx = RequestContext::new("GET", "/");

        let outcome = process(&exec, &upstream, &mut ctx).await;
        assert!(!outcome.forwarded);
        assert!(outcome.upstream_error.is_some());
        assert_eq!(ctx.response_status, Some(502));
        assert_eq!(ctx.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_no_route_is_404() {
        let exec = executor(&[]);
        let mut ctx = RequestContext::new("GET", "/");
        process(&exec, &echo(false), &mut ctx).await;
        assert_eq!(ctx.response_status, Some(404));
    }

    #[tokio::test]
    async fn test_request_keeps_its_starting_snapshot() {
        let registry = Arc::new(FilterRegistry::new());
        let old = route_to("http://old");
        let new = route_to("http://new");
        let publish = Publish {
            registry: registry.clone(),
            replacement: script("route", FilterType::Route, 1, &new),
        };
        registry.install(
            vec![
                primary(script("route", FilterType::Route, 0, &old)),
                primary(compiled("publish", FilterType::Pre, 0, "publish", Arc::new(publish))),
            ],
            &[],
        );
        let exec = FilterChainExecutor::new(
            registry.clone(),
            Arc::new(RuntimeToggles::default()),
            Arc::new(ShadowSampler::default()),
        );
        let upstream = echo(false);

        let mut ctx = RequestContext::new("GET", "/x");
        let outcome = process(&exec, &upstream, &mut ctx).await;
        assert_eq!(outcome.route.map(|r| r.invocations[0].revision), Some(0));
        assert_eq!(ctx.route.as_deref(), Some("http://old"));
        assert_eq!(ctx.response_body.as_deref(), Some(&b"http://old/x"[..]));
        assert_eq!(registry.current_snapshot().filters(FilterType::Route)[0].revision, 1);

        // The next request starts on the published revision.
        let mut next = RequestContext::new("GET", "/x");
        process(&exec, &upstream, &mut next).await;
        assert_eq!(next.route.as_deref(), Some("http://new"));
    }

    #[tokio::test]
    async fn test_shadow_count_includes_error_chains() {
        const FAIL: &str = "[[actions]]\naction = \"fail\"\nmessage = \"no backend\"\n";
        const HANDLE: &str = "[[actions]]\naction = \"respond\"\nstatus = 503\n";
        const HANDLE_NEXT: &str = "[[actions]]\naction = \"respond\"\nstatus = 502\n";

        let registry = Arc::new(FilterRegistry::new());
        let canary = script("handler", FilterType::Error, 1, HANDLE_NEXT);
        registry.install(
            vec![
                primary(script("router", FilterType::Route, 0, FAIL)),
                primary(script("handler", FilterType::Error, 0, HANDLE)),
                (Slot::shadow(canary.filter_id.clone()), canary),
            ],
            &[],
        );
        let exec = FilterChainExecutor::new(
            registry,
            Arc::new(RuntimeToggles::default()),
            Arc::new(ShadowSampler::new(1.0)),
        );
        let upstream = echo(false);
        let mut ctx = RequestContext::new("GET", "/");

        let outcome = process(&exec, &upstream, &mut ctx).await;
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.response_status, Some(503));
        let route = outcome.route.as_ref().unwrap();
        assert!(route.shadows.is_empty());
        assert_eq!(route.error_chain.as_ref().unwrap().shadows.len(), 1);
        assert_eq!(outcome.shadow_count(), 1);
    }

    #[tokio::test]
    async fn test_shadow_count_includes_upstream_error_group() {
        const HANDLE: &str = "[[actions]]\naction = \"respond\"\nstatus = 504\n";
        const HANDLE_NEXT: &str = "[[actions]]\naction = \"respond\"\nstatus = 502\n";

        let registry = Arc::new(FilterRegistry::new());
        let canary = script("handler", FilterType::Error, 1, HANDLE_NEXT);
        registry.install(
            vec![
                primary(script("route", FilterType::Route, 0, ROUTE)),
                primary(script("handler", FilterType::Error, 0, HANDLE)),
                (Slot::shadow(canary.filter_id.clone()), canary),
            ],
            &[],
        );
        let exec = FilterChainExecutor::new(
            registry,
            Arc::new(RuntimeToggles::default()),
            Arc::new(ShadowSampler::new(1.0)),
        );
        let mut ctx = RequestContext::new("GET", "/");

        let outcome = process(&exec, &echo(true), &mut ctx).await;
        assert_eq!(ctx.response_status, Some(504));
        assert_eq!(outcome.upstream_error.as_ref().map(|r| r.shadows.len()), Some(1));
        assert_eq!(outcome.shadow_count(), 1);
    }

    #[test]
    fn test_target_uri() {
        let mut ctx = RequestContext::new("GET", "/a/b");
        ctx.query = Some("x=1".into());
        let uri = target_uri("http://127.0.0.1:3000/", &ctx).unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:3000/a/b?x=1");
    }
}
