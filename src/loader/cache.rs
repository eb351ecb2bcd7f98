//! Compiled filter cache.
//!
//! # Responsibilities
//! - Checksum filter source and memoize compiled units by
//!   `(filter_id, revision, checksum)`
//! - Collapse concurrent loads of one key into a single compilation
//! - Leave the cache untouched when compilation fails

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::{FilterError, Result};
use crate::filters::types::default_disable_property;
use crate::filters::{FilterId, FilterRevision, FilterType};
use crate::loader::compiler::{ExecutableFilter, FilterCompiler};
use crate::observability::metrics;

/// SHA-256 of the source, lowercase hex.
pub fn checksum(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub filter_id: FilterId,
    pub revision: u64,
    pub checksum: String,
}

/// Everything the loader needs to produce a [`CompiledFilter`].
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub filter_id: FilterId,
    pub revision: u64,
    pub filter_type: FilterType,
    pub filter_name: String,
    /// `None` takes the order declared in the source, else `0`.
    pub order: Option<i32>,
    /// `None` takes the declared toggle, else the conventional name.
    pub disable_property: Option<String>,
    pub source_code: String,
}

impl From<&FilterRevision> for CompileRequest {
    fn from(rev: &FilterRevision) -> Self {
        Self {
            filter_id: rev.filter_id.clone(),
            revision: rev.revision,
            filter_type: rev.filter_type,
            filter_name: rev.filter_name.clone(),
            order: Some(rev.order),
            disable_property: Some(rev.disable_property.clone()),
            source_code: rev.source_code.clone(),
        }
    }
}

/// An executable filter plus the metadata used to order and toggle it.
#[derive(Debug)]
pub struct CompiledFilter {
    pub filter_id: FilterId,
    pub revision: u64,
    pub checksum: String,
    pub filter_type: FilterType,
    pub filter_name: String,
    pub order: i32,
    pub disable_property: String,
    unit: Arc<dyn ExecutableFilter>,
}

impl CompiledFilter {
    pub fn new(request: &CompileRequest, checksum: String, unit: Arc<dyn ExecutableFilter>) -> Self {
        let declared = unit.declared();
        Self {
            filter_id: request.filter_id.clone(),
            revision: request.revision,
            checksum,
            filter_type: request.filter_type,
            filter_name: request.filter_name.clone(),
            order: request.order.or(declared.order).unwrap_or(0),
            disable_property: request
                .disable_property
                .clone()
                .or(declared.disable_property)
                .unwrap_or_else(|| default_disable_property(&request.filter_name, request.filter_type)),
            unit,
        }
    }

    pub fn unit(&self) -> &dyn ExecutableFilter {
        self.unit.as_ref()
    }

    pub fn key(&self) -> CacheKey {
        CacheKey {
            filter_id: self.filter_id.clone(),
            revision: self.revision,
            checksum: self.checksum.clone(),
        }
    }
}

/// Loads filter source through a [`FilterCompiler`], memoizing the result.
pub struct FilterLoader {
    compiler: Arc<dyn FilterCompiler>,
    cache: DashMap<CacheKey, Arc<OnceCell<Arc<CompiledFilter>>>>,
    compilations: AtomicU64,
}

impl FilterLoader {
    pub fn new(compiler: Arc<dyn FilterCompiler>) -> Self {
        Self {
            compiler,
            cache: DashMap::new(),
            compilations: AtomicU64::new(0),
        }
    }

    /// Return the compiled unit for this source, compiling at most once per key.
    pub async fn load(&self, request: CompileRequest) -> Result<Arc<CompiledFilter>> {
        let key = CacheKey {
            filter_id: request.filter_id.clone(),
            revision: request.revision,
            checksum: checksum(&request.source_code),
        };

        let cell = self
            .cache
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(hit) = cell.get() {
            tracing::trace!(filter_id = %key.filter_id, revision = key.revision, "Compiled filter cache hit");
            return Ok(hit.clone());
        }

        match cell.get_or_try_init(|| self.compile(&key, &request)).await {
            Ok(compiled) => Ok(compiled.clone()),
            Err(e) => {
                // Only drop the placeholder this call created; a concurrent
                // retry may already have filled it.
                self.cache
                    .remove_if(&key, |_, c| Arc::ptr_eq(c, &cell) && !c.initialized());
                metrics::record_compile_failure(request.filter_type.as_str());
                Err(e)
            }
        }
    }

    async fn compile(&self, key: &CacheKey, request: &CompileRequest) -> Result<Arc<CompiledFilter>> {
        self.compilations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            filter_id = %key.filter_id,
            revision = key.revision,
            checksum = %key.checksum,
            "Compiling filter"
        );

        let compiler = self.compiler.clone();
        let source = request.source_code.clone();
        let outcome = tokio::task::spawn_blocking(move || compiler.compile(&source)).await;

        let unit = match outcome {
            Ok(Ok(unit)) => unit,
            Ok(Err(diagnostic)) => {
                return Err(FilterError::Compile {
                    filter_id: key.filter_id.clone(),
                    revision: key.revision,
                    diagnostic,
                })
            }
            Err(join) => {
                return Err(FilterError::Compile {
                    filter_id: key.filter_id.clone(),
                    revision: key.revision,
                    diagnostic: format!("compiler aborted: {join}"),
                })
            }
        };

        Ok(Arc::new(CompiledFilter::new(request, key.checksum.clone(), unit)))
    }

    /// Drop cached units of one revision.
    pub fn evict(&self, filter_id: &FilterId, revision: u64) {
        self.cache
            .retain(|k, _| !(k.filter_id == *filter_id && k.revision == revision));
    }

    /// Drop one exact `(id, revision, checksum)` unit.
    pub fn evict_key(&self, key: &CacheKey) {
        self.cache.remove(key);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.get(key).is_some_and(|c| c.initialized())
    }

    pub fn len(&self) -> usize {
        self.cache.iter().filter(|c| c.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times the compiler capability has been invoked.
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }
}
