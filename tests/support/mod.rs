//! Shared test collaborators.
#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use flagkit_server::{
    DataKind, DataSource, DataSourceConfig, DataSourceUpdateSink, DataStore, ErrorCode, Event,
    EventProcessor, FeatureFlag, FeatureRequestEvent, FlagKitError, FlagValue, FullDataSet,
    ItemDescriptor, InMemoryDataStore, Result, StoreItem, WritableDataStore,
};

/// Shared log of lifecycle steps, for asserting shutdown order.
pub type StepLog = Arc<Mutex<Vec<String>>>;

pub fn step_log() -> StepLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Event processor that records everything it is given.
pub struct RecordingEventProcessor {
    events: Mutex<Vec<Event>>,
    flushes: AtomicU32,
    log: Option<StepLog>,
    fail_close: bool,
}

impl RecordingEventProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            flushes: AtomicU32::new(0),
            log: None,
            fail_close: false,
        })
    }

    pub fn with_log(log: StepLog) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            flushes: AtomicU32::new(0),
            log: Some(log),
            fail_close: false,
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn feature_events(&self) -> Vec<FeatureRequestEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::FeatureRequest(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn flush_count(&self) -> u32 {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl EventProcessor for RecordingEventProcessor {
    fn send_event(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push("events.flush".to_string());
        }
    }

    fn close(&self) -> Result<()> {
        if let Some(log) = &self.log {
            log.lock().push("events.close".to_string());
        }
        if self.fail_close {
            return Err(FlagKitError::new(
                ErrorCode::EventShutdownFailed,
                "event pipeline close failed",
            ));
        }
        Ok(())
    }
}

/// In-memory store that records (and can fail) its close call.
pub struct LoggingStore {
    inner: InMemoryDataStore,
    log: StepLog,
    fail_close: bool,
}

impl LoggingStore {
    pub fn new(log: StepLog) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryDataStore::new(),
            log,
            fail_close: false,
        })
    }

    pub fn failing(log: StepLog) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryDataStore::new(),
            log,
            fail_close: true,
        })
    }
}

impl DataStore for LoggingStore {
    fn get(&self, kind: DataKind, key: &str) -> Option<ItemDescriptor> {
        self.inner.get(kind, key)
    }

    fn get_all(&self, kind: DataKind) -> HashMap<String, ItemDescriptor> {
        self.inner.get_all(kind)
    }

    fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    fn close(&self) -> Result<()> {
        self.log.lock().push("store.close".to_string());
        if self.fail_close {
            return Err(FlagKitError::new(
                ErrorCode::StoreCloseFailed,
                "store close failed",
            ));
        }
        Ok(())
    }
}

impl WritableDataStore for LoggingStore {
    fn init(&self, data: HashMap<DataKind, HashMap<String, ItemDescriptor>>) {
        self.inner.init(data)
    }

    fn upsert(&self, kind: DataKind, key: &str, item: ItemDescriptor) -> bool {
        self.inner.upsert(kind, key, item)
    }
}

/// Store whose reads panic, for exercising exception containment.
pub struct PanickyStore;

impl DataStore for PanickyStore {
    fn get(&self, _kind: DataKind, _key: &str) -> Option<ItemDescriptor> {
        panic!("store blew up");
    }

    fn get_all(&self, _kind: DataKind) -> HashMap<String, ItemDescriptor> {
        panic!("store blew up");
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl WritableDataStore for PanickyStore {
    fn init(&self, _data: HashMap<DataKind, HashMap<String, ItemDescriptor>>) {}

    fn upsert(&self, _kind: DataKind, _key: &str, _item: ItemDescriptor) -> bool {
        false
    }
}

struct TestDataSourceShared {
    initialized: AtomicBool,
    ready_tx: Mutex<Option<oneshot::Sender<bool>>>,
    sink: Mutex<Option<Arc<DataSourceUpdateSink>>>,
    closed: AtomicBool,
    log: Option<StepLog>,
}

/// Scripted data source: the test decides when it becomes ready and what
/// data it delivers through the update sink.
pub struct TestDataSource {
    shared: Arc<TestDataSourceShared>,
}

impl DataSource for TestDataSource {
    fn start(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        if self.shared.initialized.load(Ordering::SeqCst) {
            let _ = tx.send(true);
        } else {
            *self.shared.ready_tx.lock() = Some(tx);
        }
        rx
    }

    fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(log) = &self.shared.log {
            log.lock().push("source.close".to_string());
        }
        Ok(())
    }
}

/// Test-side controls for a [`TestDataSource`].
#[derive(Clone)]
pub struct TestDataSourceHandle {
    shared: Arc<TestDataSourceShared>,
}

impl TestDataSourceHandle {
    pub fn new() -> Self {
        Self::with_log(None)
    }

    pub fn logging(log: StepLog) -> Self {
        Self::with_log(Some(log))
    }

    fn with_log(log: Option<StepLog>) -> Self {
        Self {
            shared: Arc::new(TestDataSourceShared {
                initialized: AtomicBool::new(false),
                ready_tx: Mutex::new(None),
                sink: Mutex::new(None),
                closed: AtomicBool::new(false),
                log,
            }),
        }
    }

    /// The data source config to pass into the client options.
    pub fn config(&self) -> DataSourceConfig {
        let shared = Arc::clone(&self.shared);
        DataSourceConfig::Custom(Arc::new(move |sink| {
            *shared.sink.lock() = Some(sink);
            Arc::new(TestDataSource {
                shared: Arc::clone(&shared),
            }) as Arc<dyn DataSource>
        }))
    }

    /// Mark the source ready (or permanently failed) and resolve the
    /// start handle.
    pub fn complete_start(&self, success: bool) {
        self.shared.initialized.store(success, Ordering::SeqCst);
        if let Some(tx) = self.shared.ready_tx.lock().take() {
            let _ = tx.send(success);
        }
    }

    pub fn sink(&self) -> Arc<DataSourceUpdateSink> {
        self.shared
            .sink
            .lock()
            .clone()
            .expect("data source not created yet")
    }

    /// Deliver a full data set through the sink.
    pub fn init_data(&self, data: FullDataSet) {
        self.sink().init(data);
    }

    /// Deliver one flag update through the sink.
    pub fn push_flag(&self, flag: FeatureFlag) {
        let key = flag.key.clone();
        self.sink()
            .upsert(DataKind::Features, &key, ItemDescriptor::new(StoreItem::Flag(flag)));
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// A two-variation boolean flag serving `true` by default.
pub fn bool_flag(key: &str) -> FeatureFlag {
    let mut flag = FeatureFlag::new(key, vec![FlagValue::Bool(false), FlagValue::Bool(true)]);
    flag.off_variation = Some(0);
    flag.fallthrough.variation = Some(1);
    flag
}

pub fn data_set(flags: Vec<FeatureFlag>) -> FullDataSet {
    FullDataSet {
        flags: flags.into_iter().map(|f| (f.key.clone(), f)).collect(),
        segments: HashMap::new(),
    }
}
