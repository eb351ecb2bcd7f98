//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize the filter subsystems in dependency order
//! - Seed the revision store from disk
//! - Run a first poll cycle, then start the background pollers
//!
//! # Design Decisions
//! - Fail fast: a store or seed I/O error aborts startup
//! - A seed file that does not compile is still stored; the poller reports it

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{FilterChainExecutor, RuntimeToggles, ShadowSampler, ToggleSource};
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::filters::{FilterType, NewRevision};
use crate::loader::{FilterCompiler, FilterLoader};
use crate::poller::{
    ExtensionPredicate, FilenamePredicate, Poller, SourceDirectory, SourcePoller, StorePoller,
};
use crate::registry::FilterRegistry;
use crate::store::{InMemoryRevisionStore, RevisionStore};

/// Every long-lived component of a running gateway.
pub struct Gateway {
    config: GatewayConfig,
    store: Arc<dyn RevisionStore>,
    compiler: Arc<dyn FilterCompiler>,
    loader: Arc<FilterLoader>,
    registry: Arc<FilterRegistry>,
    toggles: Arc<RuntimeToggles>,
    sampler: Arc<ShadowSampler>,
    executor: FilterChainExecutor,
    store_poller: Option<Poller<StorePoller>>,
    source_poller: Option<Poller<SourcePoller>>,
}

impl Gateway {
    /// Build the gateway over an in-memory store.
    pub async fn bootstrap(config: GatewayConfig, compiler: Arc<dyn FilterCompiler>) -> Result<Self> {
        let store = Arc::new(InMemoryRevisionStore::with_author(config.store.author.as_str()));
        Self::bootstrap_with_store(config, compiler, store).await
    }

    /// Build the gateway over any store implementation.
    pub async fn bootstrap_with_store(
        config: GatewayConfig,
        compiler: Arc<dyn FilterCompiler>,
        store: Arc<dyn RevisionStore>,
    ) -> Result<Self> {
        let loader = Arc::new(FilterLoader::new(compiler.clone()));
        let registry = Arc::new(FilterRegistry::new());
        let toggles = Arc::new(RuntimeToggles::new(config.toggles.disabled.iter().cloned()));
        let sampler = Arc::new(ShadowSampler::new(config.canary.sample_rate));
        let executor = FilterChainExecutor::new(
            registry.clone(),
            toggles.clone() as Arc<dyn ToggleSource>,
            sampler.clone(),
        );

        let interval = Duration::from_secs(config.poller.interval_secs.max(1));
        let shutdown_timeout = Duration::from_secs(config.poller.shutdown_timeout_secs);

        let mut gateway = Self {
            store,
            compiler,
            loader,
            registry,
            toggles,
            sampler,
            executor,
            store_poller: None,
            source_poller: None,
            config,
        };

        if let Some(seed_dir) = gateway.config.store.seed_dir.clone() {
            let seeded = gateway.seed(&seed_dir).await?;
            tracing::info!(seed_dir = %seed_dir.display(), seeded, "Seeded revision store");
        }

        if gateway.config.store.enabled {
            let poller = StorePoller::new(
                gateway.store.clone(),
                gateway.loader.clone(),
                gateway.registry.clone(),
            );
            gateway.store_poller =
                Some(Poller::new(poller, interval).with_shutdown_timeout(shutdown_timeout));
        }

        if gateway.config.source.enabled {
            let directories = gateway
                .config
                .source
                .directories
                .iter()
                .map(|d| SourceDirectory::new(d.path.clone(), d.filter_type))
                .collect();
            let poller = SourcePoller::new(directories, gateway.loader.clone(), gateway.registry.clone())
                .with_predicate(ExtensionPredicate::new(&gateway.config.source.extension))
                .with_watch(gateway.config.source.watch);
            gateway.source_poller =
                Some(Poller::new(poller, interval).with_shutdown_timeout(shutdown_timeout));
        }

        gateway.start_pollers().await;
        tracing::info!(
            filters = gateway.registry.current_snapshot().len(),
            store_poller = gateway.store_poller.is_some(),
            source_poller = gateway.source_poller.is_some(),
            "Gateway filter subsystem ready"
        );
        Ok(gateway)
    }

    async fn start_pollers(&self) {
        if let Some(poller) = &self.store_poller {
            if let Err(e) = poller.run_once().await {
                tracing::error!(error = %e, "Initial store poll failed");
            }
            poller.start();
        }
        if let Some(poller) = &self.source_poller {
            if let Err(e) = poller.run_once().await {
                tracing::error!(error = %e, "Initial source poll failed");
            }
            poller.start();
        }
    }

    /// Add and activate every `<seed_dir>/<type>/<name>.<ext>` file.
    async fn seed(&self, seed_dir: &Path) -> Result<usize> {
        let predicate = ExtensionPredicate::new(&self.config.source.extension);
        let mut seeded = 0;

        for filter_type in FilterType::ALL {
            let dir = seed_dir.join(filter_type.as_str());
            if !tokio::fs::try_exists(&dir).await? {
                continue;
            }

            let mut paths = Vec::new();
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_file() && predicate.accept(&path) {
                    paths.push(path);
                }
            }
            paths.sort();

            for path in paths {
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let source = tokio::fs::read_to_string(&path).await?;
                let declared = self
                    .compiler
                    .compile(&source)
                    .map(|unit| unit.declared())
                    .unwrap_or_default();

                let mut new = NewRevision::new(source, filter_type, name, declared.order.unwrap_or(0));
                if let Some(property) = declared.disable_property {
                    new = new.with_disable_property(property);
                }
                let rev = self.store.add_revision(new).await?;
                self.store.activate(&rev.filter_id, rev.revision).await?;
                tracing::debug!(filter_id = %rev.filter_id, revision = rev.revision, path = %path.display(), "Seeded filter");
                seeded += 1;
            }
        }
        Ok(seeded)
    }

    /// Apply the settings that may change without a restart.
    pub fn apply_live_config(&self, config: &GatewayConfig) {
        self.toggles.replace(config.toggles.disabled.iter().cloned());
        self.sampler.set_rate(config.canary.sample_rate);
        tracing::info!(
            disabled = config.toggles.disabled.len(),
            sample_rate = self.sampler.rate(),
            "Applied reloaded configuration"
        );
    }

    /// Stop every poller, each within its shutdown bound.
    pub async fn shutdown(&self) {
        if let Some(poller) = &self.source_poller {
            poller.shutdown().await;
        }
        if let Some(poller) = &self.store_poller {
            poller.shutdown().await;
        }
        tracing::info!("Gateway pollers stopped");
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RevisionStore> {
        &self.store
    }

    pub fn loader(&self) -> &Arc<FilterLoader> {
        &self.loader
    }

    pub fn registry(&self) -> &Arc<FilterRegistry> {
        &self.registry
    }

    pub fn toggles(&self) -> &Arc<RuntimeToggles> {
        &self.toggles
    }

    pub fn sampler(&self) -> &Arc<ShadowSampler> {
        &self.sampler
    }

    pub fn executor(&self) -> &FilterChainExecutor {
        &self.executor
    }

    pub fn store_poller(&self) -> Option<&Poller<StorePoller>> {
        self.store_poller.as_ref()
    }

    pub fn source_poller(&self) -> Option<&Poller<SourcePoller>> {
        self.source_poller.as_ref()
    }
}
