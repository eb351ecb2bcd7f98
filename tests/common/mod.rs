//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use edge_gateway::chain::{FilterChainExecutor, RequestContext, RuntimeToggles, ShadowSampler};
use edge_gateway::loader::{ExecutableFilter, FilterCompiler, FilterFailure, FilterLoader};
use edge_gateway::poller::{Poller, StorePoller};
use edge_gateway::registry::FilterRegistry;
use edge_gateway::store::InMemoryRevisionStore;

/// Test filter behaviours, selected by the source text:
///
/// - `tag:<v>` appends `<v>` to the `trace` attribute
/// - `respond:<status>` sets a response
/// - `fail` / `fatal` / `panic` fail in the named way
/// - anything else is a compile error
#[derive(Debug, Clone)]
pub enum Behaviour {
    Tag(String),
    Respond(u16),
    Fail,
    Fatal,
    Panic,
}

#[derive(Debug)]
pub struct TestFilter(pub Behaviour);

impl ExecutableFilter for TestFilter {
    fn run(&self, ctx: &mut RequestContext) -> Result<(), FilterFailure> {
        match &self.0 {
            Behaviour::Tag(v) => {
                let trace = match ctx.attribute("trace") {
                    Some(prev) => format!("{prev},{v}"),
                    None => v.clone(),
                };
                ctx.set_attribute("trace", trace);
                Ok(())
            }
            Behaviour::Respond(status) => {
                ctx.respond(*status, format!("status {status}"));
                Ok(())
            }
            Behaviour::Fail => Err(FilterFailure::new("failed")),
            Behaviour::Fatal => Err(FilterFailure::fatal("fatal failure")),
            Behaviour::Panic => panic!("filter panicked"),
        }
    }
}

pub struct TestCompiler;

impl FilterCompiler for TestCompiler {
    fn compile(&self, source: &str) -> Result<Arc<dyn ExecutableFilter>, String> {
        let behaviour = match source.split_once(':') {
            Some(("tag", v)) => Behaviour::Tag(v.to_string()),
            Some(("respond", s)) => Behaviour::Respond(s.parse().map_err(|_| format!("bad status '{s}'"))?),
            _ => match source {
                "fail" => Behaviour::Fail,
                "fatal" => Behaviour::Fatal,
                "panic" => Behaviour::Panic,
                other => return Err(format!("cannot compile '{other}'")),
            },
        };
        Ok(Arc::new(TestFilter(behaviour)))
    }
}

/// Store, loader, registry and executor wired the way the gateway wires them.
pub struct Harness {
    pub store: Arc<InMemoryRevisionStore>,
    pub loader: Arc<FilterLoader>,
    pub registry: Arc<FilterRegistry>,
    pub toggles: Arc<RuntimeToggles>,
    pub sampler: Arc<ShadowSampler>,
    pub executor: FilterChainExecutor,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryRevisionStore::new());
        let loader = Arc::new(FilterLoader::new(Arc::new(TestCompiler)));
        let registry = Arc::new(FilterRegistry::new());
        let toggles = Arc::new(RuntimeToggles::default());
        let sampler = Arc::new(ShadowSampler::new(0.0));
        let executor = FilterChainExecutor::new(registry.clone(), toggles.clone(), sampler.clone());
        Self {
            store,
            loader,
            registry,
            toggles,
            sampler,
            executor,
        }
    }

    pub fn store_poller(&self, interval: Duration) -> Poller<StorePoller> {
        let cycle = StorePoller::new(self.store.clone(), self.loader.clone(), self.registry.clone());
        Poller::new(cycle, interval).with_shutdown_timeout(Duration::from_secs(2))
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Start a mock backend that answers every request with `response`.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}
