//! In-memory revision store.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

use crate::error::{FilterError, Result};
use crate::filters::types::now_secs;
use crate::filters::{
    ChangeEvent, ChangeKind, FilterId, FilterRevision, FilterState, FilterType, NewRevision,
};
use crate::store::{EventBus, RevisionStore};

const DEFAULT_AUTHOR: &str = "gateway";

/// Reference [`RevisionStore`] keeping every revision in a map behind one
/// `RwLock`. Writes are globally serialized; reads run concurrently.
///
/// Each instance owns its data. Two stores never share revisions.
pub struct InMemoryRevisionStore {
    /// Revisions per filter id, kept ascending by revision number.
    filters: RwLock<BTreeMap<FilterId, Vec<FilterRevision>>>,
    events: EventBus,
    default_author: String,
}

impl InMemoryRevisionStore {
    pub fn new() -> Self {
        Self::with_author(DEFAULT_AUTHOR)
    }

    /// Create a store that stamps `author` on revisions submitted without one.
    pub fn with_author(author: impl Into<String>) -> Self {
        Self {
            filters: RwLock::new(BTreeMap::new()),
            events: EventBus::new(),
            default_author: author.into(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<FilterId, Vec<FilterRevision>>>> {
        self.filters
            .read()
            .map_err(|_| FilterError::StoreUnavailable("revision store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<FilterId, Vec<FilterRevision>>>> {
        self.filters
            .write()
            .map_err(|_| FilterError::StoreUnavailable("revision store lock poisoned".into()))
    }

    fn collect<F>(&self, keep: F) -> Result<Vec<FilterRevision>>
    where
        F: Fn(&FilterRevision) -> bool,
    {
        let filters = self.read()?;
        Ok(filters
            .values()
            .flat_map(|revisions| revisions.iter())
            .filter(|r| keep(r))
            .cloned()
            .collect())
    }
}

impl Default for InMemoryRevisionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn find_mut<'a>(
    filters: &'a mut BTreeMap<FilterId, Vec<FilterRevision>>,
    filter_id: &FilterId,
    revision: u64,
) -> Result<&'a mut Vec<FilterRevision>> {
    let revisions = filters
        .get_mut(filter_id)
        .ok_or_else(|| FilterError::not_found(filter_id, None))?;
    if !revisions.iter().any(|r| r.revision == revision) {
        return Err(FilterError::not_found(filter_id, Some(revision)));
    }
    Ok(revisions)
}

#[async_trait]
impl RevisionStore for InMemoryRevisionStore {
    async fn list_filter_ids(&self) -> Result<BTreeSet<FilterId>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    async fn list_filter_ids_by_type(&self, filter_type: FilterType) -> Result<BTreeSet<FilterId>> {
        let filters = self.read()?;
        Ok(filters
            .iter()
            .filter(|(_, revisions)| revisions.iter().any(|r| r.filter_type == filter_type))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn list_revisions(&self, filter_id: &FilterId) -> Result<Vec<FilterRevision>> {
        let filters = self.read()?;
        filters
            .get(filter_id)
            .cloned()
            .ok_or_else(|| FilterError::not_found(filter_id, None))
    }

    async fn get_revision(&self, filter_id: &FilterId, revision: u64) -> Result<FilterRevision> {
        let filters = self.read()?;
        filters
            .get(filter_id)
            .and_then(|revisions| revisions.iter().find(|r| r.revision == revision))
            .cloned()
            .ok_or_else(|| FilterError::not_found(filter_id, Some(revision)))
    }

    async fn get_latest_revision(&self, filter_id: &FilterId) -> Result<FilterRevision> {
        let filters = self.read()?;
        filters
            .get(filter_id)
            .and_then(|revisions| revisions.iter().max_by_key(|r| r.revision))
            .cloned()
            .ok_or_else(|| FilterError::not_found(filter_id, None))
    }

    async fn get_active_revision(&self, filter_id: &FilterId) -> Result<FilterRevision> {
        let filters = self.read()?;
        filters
            .get(filter_id)
            .and_then(|revisions| revisions.iter().find(|r| r.is_active()))
            .cloned()
            .ok_or_else(|| FilterError::not_found(filter_id, None))
    }

    async fn list_canary_filters(&self) -> Result<Vec<FilterRevision>> {
        self.collect(FilterRevision::is_canary)
    }

    async fn list_active_filters(&self) -> Result<Vec<FilterRevision>> {
        self.collect(FilterRevision::is_active)
    }

    async fn add_revision(&self, new: NewRevision) -> Result<FilterRevision> {
        if new.filter_name.trim().is_empty() {
            return Err(FilterError::Validation("filter name must not be empty".into()));
        }
        if new.filter_name.contains(':') {
            return Err(FilterError::Validation(format!(
                "filter name '{}' must not contain ':'",
                new.filter_name
            )));
        }

        let filter_id = new.filter_id();
        let created = {
            let mut filters = self.write()?;
            let revisions = filters.entry(filter_id.clone()).or_default();
            let revision = revisions.iter().map(|r| r.revision + 1).max().unwrap_or(0);

            let created = FilterRevision {
                filter_id: filter_id.clone(),
                revision,
                disable_property: new.resolved_disable_property(),
                source_code: new.source_code,
                filter_type: new.filter_type,
                filter_name: new.filter_name.trim().to_string(),
                order: new.order,
                state: FilterState::Inactive,
                canary: false,
                created_at: now_secs(),
                author: new.author.unwrap_or_else(|| self.default_author.clone()),
            };
            revisions.push(created.clone());
            created
        };

        tracing::info!(filter_id = %filter_id, revision = created.revision, "Filter revision added");
        self.events
            .publish(ChangeEvent::new(ChangeKind::Added, &filter_id, created.revision));
        Ok(created)
    }

    async fn activate(&self, filter_id: &FilterId, revision: u64) -> Result<FilterRevision> {
        let (activated, previous) = {
            let mut filters = self.write()?;
            let revisions = find_mut(&mut filters, filter_id, revision)?;

            let mut previous = None;
            let mut activated = None;
            // One pass under the write lock: no reader can see two Active revisions.
            for r in revisions.iter_mut() {
                if r.revision == revision {
                    r.state = FilterState::Active;
                    activated = Some(r.clone());
                } else if r.is_active() {
                    r.state = FilterState::Inactive;
                    previous = Some(r.revision);
                }
            }
            match activated {
                Some(a) => (a, previous),
                None => return Err(FilterError::not_found(filter_id, Some(revision))),
            }
        };

        tracing::info!(
            filter_id = %filter_id,
            revision,
            previous = ?previous,
            "Filter revision activated"
        );
        self.events
            .publish(ChangeEvent::new(ChangeKind::Activated, filter_id, revision));
        Ok(activated)
    }

    async fn deactivate(&self, filter_id: &FilterId, revision: u64) -> Result<FilterRevision> {
        let (deactivated, was_active) = {
            let mut filters = self.write()?;
            let revisions = find_mut(&mut filters, filter_id, revision)?;
            let target = revisions
                .iter_mut()
                .find(|r| r.revision == revision)
                .ok_or_else(|| FilterError::not_found(filter_id, Some(revision)))?;

            let was_active = target.is_active();
            target.state = FilterState::Inactive;
            (target.clone(), was_active)
        };

        if was_active {
            tracing::info!(filter_id = %filter_id, revision, "Filter revision deactivated");
            self.events
                .publish(ChangeEvent::new(ChangeKind::Deactivated, filter_id, revision));
        }
        Ok(deactivated)
    }

    async fn mark_canary(&self, filter_id: &FilterId, revision: u64) -> Result<FilterRevision> {
        let marked = {
            let mut filters = self.write()?;
            let revisions = find_mut(&mut filters, filter_id, revision)?;
            let mut marked = None;
            for r in revisions.iter_mut() {
                r.canary = r.revision == revision;
                if r.canary {
                    marked = Some(r.clone());
                }
            }
            marked.ok_or_else(|| FilterError::not_found(filter_id, Some(revision)))?
        };

        tracing::info!(filter_id = %filter_id, revision, "Filter revision marked canary");
        self.events
            .publish(ChangeEvent::new(ChangeKind::CanaryMarked, filter_id, revision));
        Ok(marked)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}
