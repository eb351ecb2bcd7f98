//! Revision-store poller.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::Result;
use crate::filters::{FilterId, FilterRevision};
use crate::loader::{CompileRequest, FilterLoader};
use crate::poller::{CycleReport, PollCycle, WakeSource};
use crate::registry::{FilterRegistry, Slot};
use crate::store::RevisionStore;

/// Mirrors the store's active and canary revisions into the registry.
pub struct StorePoller {
    store: Arc<dyn RevisionStore>,
    loader: Arc<FilterLoader>,
    registry: Arc<FilterRegistry>,
    /// Revision currently installed per slot.
    applied: HashMap<Slot, u64>,
    /// Revision that last failed to load per slot; not retried until it changes.
    rejected: HashMap<Slot, u64>,
}

impl StorePoller {
    pub fn new(store: Arc<dyn RevisionStore>, loader: Arc<FilterLoader>, registry: Arc<FilterRegistry>) -> Self {
        Self {
            store,
            loader,
            registry,
            applied: HashMap::new(),
            rejected: HashMap::new(),
        }
    }

    /// Revision installed for `slot` by this poller, if any.
    pub fn applied_revision(&self, slot: &Slot) -> Option<u64> {
        self.applied.get(slot).copied()
    }

    async fn desired(&self) -> Result<BTreeMap<Slot, FilterRevision>> {
        let active = self.store.list_active_filters().await?;
        let canary = self.store.list_canary_filters().await?;

        let mut desired = BTreeMap::new();
        for rev in active {
            desired.insert(Slot::primary(rev.filter_id.clone()), rev);
        }
        for rev in canary {
            // A canary that is also the active revision has nothing to shadow.
            if rev.is_active() {
                continue;
            }
            desired.insert(Slot::shadow(rev.filter_id.clone()), rev);
        }
        Ok(desired)
    }
}

#[async_trait]
impl PollCycle for StorePoller {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn run_cycle(&mut self) -> Result<CycleReport> {
        // A store failure aborts the whole cycle before anything is touched.
        let desired = self.desired().await?;

        let mut report = CycleReport::default();
        let mut upserts = Vec::new();
        for (slot, rev) in &desired {
            if self.applied.get(slot) == Some(&rev.revision) {
                report.unchanged += 1;
                continue;
            }
            if self.rejected.get(slot) == Some(&rev.revision) {
                report.failed += 1;
                continue;
            }
            match self.loader.load(CompileRequest::from(rev)).await {
                Ok(compiled) => {
                    self.rejected.remove(slot);
                    upserts.push((slot.clone(), compiled));
                }
                Err(e) => {
                    report.failed += 1;
                    self.rejected.insert(slot.clone(), rev.revision);
                    tracing::error!(
                        filter_id = %slot.filter_id,
                        role = ?slot.role,
                        revision = rev.revision,
                        serving = ?self.applied.get(slot),
                        error = %e,
                        "Filter revision failed to load, keeping last-good entry"
                    );
                }
            }
        }

        let removed: Vec<Slot> = self
            .applied
            .keys()
            .filter(|slot| !desired.contains_key(*slot))
            .cloned()
            .collect();
        self.rejected.retain(|slot, _| desired.contains_key(slot));

        report.installed = upserts.len();
        report.removed = removed.len();
        if upserts.is_empty() && removed.is_empty() {
            return Ok(report);
        }

        let mut superseded: Vec<(FilterId, u64)> = Vec::new();
        for (slot, compiled) in &upserts {
            if let Some(old) = self.applied.insert(slot.clone(), compiled.revision) {
                superseded.push((slot.filter_id.clone(), old));
            }
        }
        for slot in &removed {
            if let Some(old) = self.applied.remove(slot) {
                superseded.push((slot.filter_id.clone(), old));
            }
        }

        self.registry.install(upserts, &removed);

        // A canary promoted to primary keeps its compiled unit.
        let still_used: HashSet<(&FilterId, u64)> =
            self.applied.iter().map(|(slot, rev)| (&slot.filter_id, *rev)).collect();
        for (filter_id, revision) in &superseded {
            if !still_used.contains(&(filter_id, *revision)) {
                self.loader.evict(filter_id, *revision);
            }
        }

        Ok(report)
    }

    fn wake_source(&mut self) -> WakeSource {
        WakeSource::Events(self.store.subscribe())
    }
}
