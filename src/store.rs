//! Flag/segment storage.
//!
//! The client reads flags through the [`DataStore`] trait on every
//! evaluation; the data source writes through [`WritableDataStore`].
//! Reads are lock-free point lookups from the caller's perspective: the
//! in-memory store takes a short read lock and clones the item out, so a
//! concurrent writer never blocks evaluation for long.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::model::{DataKind, FeatureFlag, ItemDescriptor, Segment, StoreItem};

/// Read side of a flag/segment store.
///
/// Implementations must be safe for concurrent reads while the data
/// source is writing.
pub trait DataStore: Send + Sync {
    fn get(&self, kind: DataKind, key: &str) -> Option<ItemDescriptor>;

    fn get_all(&self, kind: DataKind) -> HashMap<String, ItemDescriptor>;

    /// True once the store has ever received a full data set. A store
    /// backed by external persistence may be initialized with data from a
    /// prior process even if the data source never connected in this one.
    fn is_initialized(&self) -> bool;

    fn close(&self) -> Result<()>;
}

/// Write side of a store, used by data sources.
pub trait WritableDataStore: DataStore {
    /// Replace all contents with a full data set and mark the store
    /// initialized.
    fn init(&self, data: HashMap<DataKind, HashMap<String, ItemDescriptor>>);

    /// Insert or update one item. Returns true if applied; an item with a
    /// version not newer than the stored one (tombstones included) is
    /// ignored.
    fn upsert(&self, kind: DataKind, key: &str, item: ItemDescriptor) -> bool;
}

/// The default store: everything lives in process memory.
pub struct InMemoryDataStore {
    data: RwLock<HashMap<DataKind, HashMap<String, ItemDescriptor>>>,
    initialized: AtomicBool,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }
}

impl Default for InMemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for InMemoryDataStore {
    fn get(&self, kind: DataKind, key: &str) -> Option<ItemDescriptor> {
        self.data.read().get(&kind)?.get(key).cloned()
    }

    fn get_all(&self, kind: DataKind) -> HashMap<String, ItemDescriptor> {
        self.data.read().get(&kind).cloned().unwrap_or_default()
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl WritableDataStore for InMemoryDataStore {
    fn init(&self, data: HashMap<DataKind, HashMap<String, ItemDescriptor>>) {
        *self.data.write() = data;
        self.initialized.store(true, Ordering::Release);
    }

    fn upsert(&self, kind: DataKind, key: &str, item: ItemDescriptor) -> bool {
        let mut data = self.data.write();
        let items = data.entry(kind).or_default();
        match items.get(key) {
            Some(existing) if existing.version >= item.version => false,
            _ => {
                items.insert(key.to_string(), item);
                true
            }
        }
    }
}

/// Typed flag lookup, skipping tombstones.
pub(crate) fn get_flag<S: DataStore + ?Sized>(store: &S, key: &str) -> Option<FeatureFlag> {
    store
        .get(DataKind::Features, key)
        .and_then(|d| d.item)
        .and_then(StoreItem::into_flag)
}

/// Typed segment lookup, skipping tombstones.
pub(crate) fn get_segment<S: DataStore + ?Sized>(store: &S, key: &str) -> Option<Segment> {
    store
        .get(DataKind::Segments, key)
        .and_then(|d| d.item)
        .and_then(StoreItem::into_segment)
}
