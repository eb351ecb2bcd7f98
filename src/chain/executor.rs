//! Ordered execution of one filter group against a request.
//!
//! # Responsibilities
//! - Fetch one registry snapshot per chain and walk its group in order
//! - Apply runtime toggles and per-filter applicability checks
//! - Isolate failures (errors and panics) per filter
//! - Hand aborted chains to the error group
//! - Run sampled canary revisions against a detached copy of the request

use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::chain::canary::{ShadowRecord, ShadowSampler};
use crate::chain::context::RequestContext;
use crate::chain::toggles::ToggleSource;
use crate::filters::{FilterId, FilterType};
use crate::loader::CompiledFilter;
use crate::observability::metrics;
use crate::registry::{FilterRegistry, RegistrySnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The filter's disable property is set.
    Disabled,
    /// `should_filter` returned false.
    NotApplicable,
}

/// What happened when the chain reached one filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Skipped { reason: SkipReason },
    Failed { message: String, fatal: bool },
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub filter_id: FilterId,
    pub revision: u64,
    pub outcome: Outcome,
}

/// Record of one chain execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainResult {
    pub filter_type: FilterType,
    /// Invocations in execution order.
    pub invocations: Vec<Invocation>,
    /// The chain stopped early because of a failure.
    pub aborted: bool,
    /// Error group run after an abort.
    pub error_chain: Option<Box<ChainResult>>,
    pub shadows: Vec<ShadowRecord>,
}

impl ChainResult {
    fn new(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            invocations: Vec::new(),
            aborted: false,
            error_chain: None,
            shadows: Vec::new(),
        }
    }

    /// Ids of the filters that actually ran (succeeded or failed).
    pub fn executed(&self) -> Vec<&FilterId> {
        self.invocations
            .iter()
            .filter(|i| !matches!(i.outcome, Outcome::Skipped { .. }))
            .map(|i| &i.filter_id)
            .collect()
    }

    pub fn failures(&self) -> Vec<&Invocation> {
        self.invocations.iter().filter(|i| i.outcome.is_failure()).collect()
    }
}

/// Whether a failure in a group of this type stops the rest of the group.
fn aborts_chain(filter_type: FilterType, fatal: bool) -> bool {
    match filter_type {
        FilterType::Route => true,
        FilterType::Pre => fatal,
        FilterType::Post | FilterType::Custom | FilterType::Error => false,
    }
}

/// Runs registry groups against request contexts.
///
/// Request threads only read the registry; no lock is held while filter code runs.
#[derive(Clone)]
pub struct FilterChainExecutor {
    registry: Arc<FilterRegistry>,
    toggles: Arc<dyn ToggleSource>,
    sampler: Arc<ShadowSampler>,
}

impl FilterChainExecutor {
    pub fn new(
        registry: Arc<FilterRegistry>,
        toggles: Arc<dyn ToggleSource>,
        sampler: Arc<ShadowSampler>,
    ) -> Self {
        Self {
            registry,
            toggles,
            sampler,
        }
    }

    pub fn registry(&self) -> &Arc<FilterRegistry> {
        &self.registry
    }

    /// Run every filter of `filter_type` from the current snapshot.
    pub fn execute(&self, filter_type: FilterType, ctx: &mut RequestContext) -> ChainResult {
        let snapshot = self.registry.current_snapshot();
        self.execute_on(&snapshot, filter_type, ctx)
    }

    /// Run a group from a snapshot the caller already holds.
    pub fn execute_on(
        &self,
        snapshot: &RegistrySnapshot,
        filter_type: FilterType,
        ctx: &mut RequestContext,
    ) -> ChainResult {
        let mut result = ChainResult::new(filter_type);

        for filter in snapshot.filters(filter_type) {
            let shadow = snapshot
                .shadow(&filter.filter_id)
                .filter(|s| s.revision != filter.revision);
            // Copy taken before the primary runs so both see the same input.
            let shadow_input = match shadow {
                Some(_) if self.sampled(ctx) => Some(ctx.clone()),
                _ => None,
            };

            let outcome = self.invoke(filter, ctx);

            if let (Some(canary), Some(mut copy)) = (shadow, shadow_input) {
                result.shadows.push(self.shadow(filter, canary, &outcome, ctx, &mut copy));
            }

            result.invocations.push(Invocation {
                filter_id: filter.filter_id.clone(),
                revision: filter.revision,
                outcome: outcome.clone(),
            });

            if let Outcome::Failed { message, fatal } = outcome {
                ctx.error = Some(format!("{}: {}", filter.filter_id, message));
                if aborts_chain(filter_type, fatal) {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        filter_id = %filter.filter_id,
                        filter_type = %filter_type,
                        "Filter chain aborted, running error filters"
                    );
                    result.aborted = true;
                    break;
                }
            }
        }

        if result.aborted {
            result.error_chain = Some(Box::new(self.execute_on(snapshot, FilterType::Error, ctx)));
        }
        result
    }

    fn sampled(&self, ctx: &mut RequestContext) -> bool {
        *ctx.shadow_sampled.get_or_insert_with(|| self.sampler.sample())
    }

    fn invoke(&self, filter: &CompiledFilter, ctx: &mut RequestContext) -> Outcome {
        if self.toggles.is_disabled(&filter.disable_property) {
            tracing::trace!(filter_id = %filter.filter_id, property = %filter.disable_property, "Filter disabled");
            return Outcome::Skipped {
                reason: SkipReason::Disabled,
            };
        }

        let start = Instant::now();
        let unit = filter.unit();
        let outcome = match catch_unwind(AssertUnwindSafe(|| {
            if !unit.should_filter(ctx) {
                return Ok(false);
            }
            unit.run(ctx).map(|()| true)
        })) {
            Ok(Ok(true)) => Outcome::Succeeded,
            Ok(Ok(false)) => Outcome::Skipped {
                reason: SkipReason::NotApplicable,
            },
            Ok(Err(failure)) => Outcome::Failed {
                message: failure.message,
                fatal: failure.fatal,
            },
            Err(panic) => Outcome::Failed {
                message: panic_message(panic.as_ref()),
                fatal: false,
            },
        };

        if let Outcome::Failed { message, fatal } = &outcome {
            tracing::warn!(
                request_id = %ctx.request_id,
                filter_id = %filter.filter_id,
                revision = filter.revision,
                fatal,
                error = %message,
                "Filter failed"
            );
        }
        if !matches!(outcome, Outcome::Skipped { .. }) {
            metrics::record_filter_execution(
                filter.filter_type.as_str(),
                &filter.filter_name,
                outcome.label(),
                start,
            );
        }
        outcome
    }

    fn shadow(
        &self,
        primary: &CompiledFilter,
        canary: &CompiledFilter,
        primary_outcome: &Outcome,
        primary_ctx: &RequestContext,
        copy: &mut RequestContext,
    ) -> ShadowRecord {
        let shadow_outcome = self.invoke(canary, copy);
        let diverged = shadow_outcome != *primary_outcome
            || copy.response_status != primary_ctx.response_status
            || copy.response_body != primary_ctx.response_body
            || copy.route != primary_ctx.route;

        tracing::debug!(
            request_id = %primary_ctx.request_id,
            filter_id = %primary.filter_id,
            primary_revision = primary.revision,
            canary_revision = canary.revision,
            diverged,
            "Shadow invocation recorded"
        );
        metrics::record_shadow_execution(&primary.filter_name, diverged);

        ShadowRecord {
            filter_id: primary.filter_id.clone(),
            primary_revision: primary.revision,
            canary_revision: canary.revision,
            primary: primary_outcome.clone(),
            shadow: shadow_outcome,
            diverged,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
