//! Immutable point-in-time view of the active filters.

use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::filters::{FilterId, FilterType};
use crate::loader::CompiledFilter;

/// Whether a registry entry serves traffic or only shadows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Primary,
    Shadow,
}

/// Poller that owns a registry entry.
///
/// Ordered by precedence: when both provide the same filter id and role, the
/// store's entry serves and the source entry waits behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Store,
    Source,
}

/// Registry key: at most one entry per filter id, role and origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub filter_id: FilterId,
    pub role: Role,
    pub origin: Origin,
}

impl Slot {
    /// Store-owned primary slot.
    pub fn primary(filter_id: FilterId) -> Self {
        Self {
            filter_id,
            role: Role::Primary,
            origin: Origin::Store,
        }
    }

    /// Store-owned shadow slot.
    pub fn shadow(filter_id: FilterId) -> Self {
        Self {
            filter_id,
            role: Role::Shadow,
            origin: Origin::Store,
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}

/// Filters grouped by type, each group sorted by `(order, filter_id, revision)`.
///
/// Never mutated after construction; the registry replaces it wholesale.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    entries: HashMap<Slot, Arc<CompiledFilter>>,
    groups: BTreeMap<FilterType, Vec<Arc<CompiledFilter>>>,
    shadows: HashMap<FilterId, Arc<CompiledFilter>>,
    /// Entries hidden by a higher-precedence origin for the same id and role.
    overridden: Vec<Slot>,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the successor of `previous` with `upserts` applied and `removed` dropped.
    pub fn successor(
        previous: &RegistrySnapshot,
        upserts: &[(Slot, Arc<CompiledFilter>)],
        removed: &[Slot],
    ) -> Self {
        let mut entries = previous.entries.clone();
        for slot in removed {
            entries.remove(slot);
        }
        for (slot, filter) in upserts {
            entries.insert(slot.clone(), filter.clone());
        }
        Self::from_entries(previous.generation + 1, entries)
    }

    fn from_entries(generation: u64, entries: HashMap<Slot, Arc<CompiledFilter>>) -> Self {
        let mut winners: HashMap<(&FilterId, Role), &Slot> = HashMap::new();
        let mut overridden = Vec::new();
        for slot in entries.keys() {
            match winners.entry((&slot.filter_id, slot.role)) {
                Entry::Vacant(vacant) => {
                    vacant.insert(slot);
                }
                Entry::Occupied(mut occupied) => {
                    if slot.origin < occupied.get().origin {
                        overridden.push((*occupied.get()).clone());
                        occupied.insert(slot);
                    } else {
                        overridden.push(slot.clone());
                    }
                }
            }
        }
        overridden.sort();

        let mut groups: BTreeMap<FilterType, Vec<Arc<CompiledFilter>>> = BTreeMap::new();
        let mut shadows = HashMap::new();
        for slot in winners.into_values() {
            let filter = &entries[slot];
            match slot.role {
                Role::Primary => groups.entry(filter.filter_type).or_default().push(filter.clone()),
                Role::Shadow => {
                    shadows.insert(slot.filter_id.clone(), filter.clone());
                }
            }
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| {
                (a.order, &a.filter_id, a.revision).cmp(&(b.order, &b.filter_id, b.revision))
            });
        }

        Self {
            generation,
            entries,
            groups,
            shadows,
            overridden,
        }
    }

    /// Incremented on every install.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Primary filters of one type, in execution order.
    pub fn filters(&self, filter_type: FilterType) -> &[Arc<CompiledFilter>] {
        self.groups.get(&filter_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Canary revision shadowing `filter_id`, if any.
    pub fn shadow(&self, filter_id: &FilterId) -> Option<&Arc<CompiledFilter>> {
        self.shadows.get(filter_id)
    }

    pub fn get(&self, slot: &Slot) -> Option<&Arc<CompiledFilter>> {
        self.entries.get(slot)
    }

    /// Slots present but not serving because another origin owns the id.
    pub fn overridden(&self) -> &[Slot] {
        &self.overridden
    }

    /// Number of entries across both roles and origins.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> SnapshotSummary {
        let describe = |f: &Arc<CompiledFilter>| EntrySummary {
            filter_id: f.filter_id.clone(),
            revision: f.revision,
            order: f.order,
            checksum: f.checksum.clone(),
        };
        let mut shadows: Vec<EntrySummary> = self.shadows.values().map(describe).collect();
        shadows.sort_by(|a, b| a.filter_id.cmp(&b.filter_id));

        SnapshotSummary {
            generation: self.generation,
            groups: self
                .groups
                .iter()
                .map(|(t, group)| (*t, group.iter().map(describe).collect()))
                .collect(),
            shadows,
            overridden: self
                .overridden
                .iter()
                .filter_map(|slot| self.entries.get(slot).map(|f| (slot, f)))
                .map(|(slot, f)| OverriddenSummary {
                    entry: describe(f),
                    role: slot.role,
                    origin: slot.origin,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub filter_id: FilterId,
    pub revision: u64,
    pub order: i32,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub generation: u64,
    pub groups: BTreeMap<FilterType, Vec<EntrySummary>>,
    pub shadows: Vec<EntrySummary>,
    pub overridden: Vec<OverriddenSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverriddenSummary {
    #[serde(flatten)]
    pub entry: EntrySummary,
    pub role: Role,
    pub origin: Origin,
}
