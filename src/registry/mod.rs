//! Active filter registry.
//!
//! # Data Flow
//! ```text
//! Poller cycle diff (upserts + removed slots)
//!     → FilterRegistry::install
//!     → RegistrySnapshot::successor (copy, apply, sort per type)
//!     → ArcSwap::rcu (single atomic pointer replace)
//!
//! Request thread:
//!     → FilterRegistry::current_snapshot (lock-free load)
//!     → iterate the immutable groups
//! ```
//!
//! # Design Decisions
//! - The snapshot pointer is the only state shared with request threads
//! - Readers holding an old snapshot keep using it safely
//! - `rcu` retries on contention so two pollers never drop each other's writes
//! - Store and source pollers own separate slots; the store wins a shared id

pub mod snapshot;

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::loader::CompiledFilter;
use crate::observability::metrics;

pub use snapshot::{EntrySummary, Origin, OverriddenSummary, RegistrySnapshot, Role, Slot, SnapshotSummary};

/// Holder of the current [`RegistrySnapshot`].
#[derive(Debug)]
pub struct FilterRegistry {
    current: ArcSwap<RegistrySnapshot>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::empty()),
        }
    }

    /// Lock-free read of the current snapshot.
    pub fn current_snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Apply a diff and publish the resulting snapshot atomically.
    pub fn install(&self, upserts: Vec<(Slot, Arc<CompiledFilter>)>, removed: &[Slot]) -> Arc<RegistrySnapshot> {
        if upserts.is_empty() && removed.is_empty() {
            return self.current_snapshot();
        }

        // The closure may rerun on contention; the last run is what got stored.
        let mut installed = None;
        self.current.rcu(|previous| {
            let next = Arc::new(RegistrySnapshot::successor(previous, &upserts, removed));
            installed = Some(next.clone());
            next
        });
        let installed = installed.unwrap_or_else(|| self.current_snapshot());

        tracing::info!(
            generation = installed.generation(),
            upserts = upserts.len(),
            removed = removed.len(),
            entries = installed.len(),
            overridden = installed.overridden().len(),
            "Installed filter registry snapshot"
        );
        metrics::record_registry_size(installed.len());
        installed
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RequestContext;
    use crate::filters::{FilterId, FilterType};
    use crate::loader::{CompileRequest, ExecutableFilter, FilterFailure};

    #[derive(Debug)]
    struct Noop;

    impl ExecutableFilter for Noop {
        fn run(&self, _ctx: &mut RequestContext) -> Result<(), FilterFailure> {
            Ok(())
        }
    }

    fn compiled(name: &str, filter_type: FilterType, revision: u64, order: i32) -> Arc<CompiledFilter> {
        let request = CompileRequest {
            filter_id: FilterId::derive(name, filter_type),
            revision,
            filter_type,
            filter_name: name.into(),
            order: Some(order),
            disable_property: None,
            source_code: String::new(),
        };
        Arc::new(CompiledFilter::new(&request, String::new(), Arc::new(Noop)))
    }

    fn primary(f: &Arc<CompiledFilter>) -> (Slot, Arc<CompiledFilter>) {
        (Slot::primary(f.filter_id.clone()), f.clone())
    }

    #[test]
    fn test_groups_sorted_by_order() {
        let registry = FilterRegistry::new();
        let a = compiled("a", FilterType::Pre, 0, 30);
        let b = compiled("b", FilterType::Pre, 0, 10);
        let c = compiled("c", FilterType::Pre, 0, 20);
        registry.install(vec![primary(&a), primary(&b), primary(&c)], &[]);

        let snapshot = registry.current_snapshot();
        let orders: Vec<i32> = snapshot.filters(FilterType::Pre).iter().map(|f| f.order).collect();
        assert_eq!(orders, vec![10, 20, 30]);
        assert!(snapshot.filters(FilterType::Route).is_empty());
    }

    #[test]
    fn test_ties_broken_by_filter_id() {
        let registry = FilterRegistry::new();
        let z = compiled("zeta", FilterType::Post, 0, 1);
        let a = compiled("alpha", FilterType::Post, 0, 1);
        registry.install(vec![primary(&z), primary(&a)], &[]);

        let snapshot = registry.current_snapshot();
        let names: Vec<&str> = snapshot
            .filters(FilterType::Post)
            .iter()
            .map(|f| f.filter_name.as_str())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_old_snapshot_survives_install() {
        let registry = FilterRegistry::new();
        let a0 = compiled("a", FilterType::Route, 0, 1);
        registry.install(vec![primary(&a0)], &[]);
        let before = registry.current_snapshot();

        let a1 = compiled("a", FilterType::Route, 1, 1);
        registry.install(vec![primary(&a1)], &[]);
        let after = registry.current_snapshot();

        assert_eq!(before.filters(FilterType::Route)[0].revision, 0);
        assert_eq!(after.filters(FilterType::Route)[0].revision, 1);
        assert_eq!(after.len(), 1);
        assert!(after.generation() > before.generation());
    }

    #[test]
    fn test_remove_and_shadow() {
        let registry = FilterRegistry::new();
        let a0 = compiled("a", FilterType::Pre, 0, 1);
        let a1 = compiled("a", FilterType::Pre, 1, 1);
        registry.install(
            vec![primary(&a0), (Slot::shadow(a1.filter_id.clone()), a1.clone())],
            &[],
        );

        let snapshot = registry.current_snapshot();
        assert_eq!(snapshot.filters(FilterType::Pre).len(), 1);
        assert_eq!(snapshot.shadow(&a0.filter_id).map(|f| f.revision), Some(1));

        registry.install(vec![], &[Slot::primary(a0.filter_id.clone())]);
        let snapshot = registry.current_snapshot();
        assert!(snapshot.filters(FilterType::Pre).is_empty());
        assert!(snapshot.shadow(&a0.filter_id).is_some());
    }

    #[test]
    fn test_empty_install_keeps_generation() {
        let registry = FilterRegistry::new();
        let before = registry.current_snapshot().generation();
        registry.install(vec![], &[]);
        assert_eq!(registry.current_snapshot().generation(), before);
    }

    #[test]
    fn test_install_returns_its_own_snapshot() {
        let registry = FilterRegistry::new();
        let a = compiled("a", FilterType::Pre, 0, 1);
        let first = registry.install(vec![primary(&a)], &[]);
        let b = compiled("b", FilterType::Pre, 0, 2);
        let second = registry.install(vec![primary(&b)], &[]);

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(second.generation(), first.generation() + 1);
        assert!(Arc::ptr_eq(&second, &registry.current_snapshot()));
    }

    #[test]
    fn test_store_entry_outranks_source_entry() {
        let registry = FilterRegistry::new();
        let from_store = compiled("checkAuth", FilterType::Pre, 3, 1);
        let from_file = compiled("checkAuth", FilterType::Pre, 0, 1);
        let file_slot = Slot::primary(from_file.filter_id.clone()).with_origin(Origin::Source);

        registry.install(vec![(file_slot.clone(), from_file.clone())], &[]);
        registry.install(vec![primary(&from_store)], &[]);
        let snapshot = registry.current_snapshot();
        let pre = snapshot.filters(FilterType::Pre);
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].revision, 3);
        assert_eq!(snapshot.overridden(), &[file_slot.clone()][..]);

        // Dropping the file leaves the store entry serving.
        registry.install(vec![], &[file_slot]);
        let snapshot = registry.current_snapshot();
        assert_eq!(snapshot.filters(FilterType::Pre)[0].revision, 3);
        assert!(snapshot.overridden().is_empty());

        // Dropping the store entry with a file present falls back to the file.
        let file_slot = Slot::primary(from_file.filter_id.clone()).with_origin(Origin::Source);
        registry.install(vec![(file_slot, from_file)], &[Slot::primary(from_store.filter_id.clone())]);
        assert_eq!(registry.current_snapshot().filters(FilterType::Pre)[0].revision, 0);
    }

    #[test]
    fn test_concurrent_installs_keep_every_entry() {
        let registry = Arc::new(FilterRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let f = compiled(&format!("f{i}"), FilterType::Custom, 0, i);
                    registry.install(vec![primary(&f)], &[]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.current_snapshot().filters(FilterType::Custom).len(), 8);
    }
}
