//! Filter revision store.
//!
//! # Data Flow
//! ```text
//! Admin call (add / activate / deactivate / canary)
//!     → RevisionStore (serialized writes, concurrent reads)
//!     → ChangeEvent on the store's EventBus
//!     → StorePoller wakes early (fast path) or on its next tick
//! ```
//!
//! # Design Decisions
//! - The trait is async so a database-backed store drops in unchanged
//! - Every call returns owned values; callers never alias backend storage
//! - The store owns no scheduling; pollers decide when to read it

pub mod events;
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::filters::{ChangeEvent, FilterId, FilterRevision, FilterType, NewRevision};

pub use events::EventBus;
pub use memory::InMemoryRevisionStore;

/// Catalog of filter revisions and their lifecycle state.
///
/// Implementations must be safe under concurrent callers and must keep at most
/// one `Active` revision per filter id at every observable instant.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Every filter id known to the store.
    async fn list_filter_ids(&self) -> Result<BTreeSet<FilterId>>;

    /// Ids of filters of one type.
    async fn list_filter_ids_by_type(&self, filter_type: FilterType) -> Result<BTreeSet<FilterId>>;

    /// All revisions of a filter, ascending by revision number.
    async fn list_revisions(&self, filter_id: &FilterId) -> Result<Vec<FilterRevision>>;

    async fn get_revision(&self, filter_id: &FilterId, revision: u64) -> Result<FilterRevision>;

    /// The revision with the highest number for this id.
    async fn get_latest_revision(&self, filter_id: &FilterId) -> Result<FilterRevision>;

    async fn get_active_revision(&self, filter_id: &FilterId) -> Result<FilterRevision>;

    async fn list_canary_filters(&self) -> Result<Vec<FilterRevision>>;

    async fn list_active_filters(&self) -> Result<Vec<FilterRevision>>;

    /// Store a new revision; the id is derived from name and type.
    async fn add_revision(&self, new: NewRevision) -> Result<FilterRevision>;

    /// Make `revision` the single Active revision of `filter_id`.
    async fn activate(&self, filter_id: &FilterId, revision: u64) -> Result<FilterRevision>;

    async fn deactivate(&self, filter_id: &FilterId, revision: u64) -> Result<FilterRevision>;

    /// Flag `revision` for shadow execution; Active/Inactive is untouched.
    async fn mark_canary(&self, filter_id: &FilterId, revision: u64) -> Result<FilterRevision>;

    /// Subscribe to lifecycle change events.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
