//! Data sources: how flag data gets into the store.
//!
//! A data source owns its own transport and retry behavior; this module
//! defines the contract plus two implementations — a no-op source for
//! offline / external-updates-only mode, and a polling source driven by
//! a caller-supplied requestor callback. Sources write through the
//! [`DataSourceUpdateSink`], which applies the data to the store,
//! broadcasts flag changes, and reports status transitions.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::broadcast::EventBroadcaster;
use crate::error::Result;
use crate::flag_tracker::FlagChangeEvent;
use crate::model::{DataKind, FullDataSet, ItemDescriptor};
use crate::status::{DataSourceErrorInfo, DataSourceState, DataSourceStatusProvider};
use crate::store::WritableDataStore;

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default maximum jitter added to each poll delay.
pub const DEFAULT_POLL_JITTER_MS: u64 = 500;

/// Default backoff multiplier applied after failed polls.
pub const DEFAULT_POLL_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default cap on the backed-off poll delay.
pub const DEFAULT_POLL_MAX_INTERVAL: Duration = Duration::from_secs(300);

/// A background process that keeps the data store current.
///
/// `start` is invoked once by the client. The returned receiver resolves
/// with `true` on the first successful sync or `false` on permanent
/// failure; it stays pending while the source keeps trying.
pub trait DataSource: Send + Sync {
    fn start(&self) -> oneshot::Receiver<bool>;

    /// True once the source has completed at least one successful sync.
    fn is_initialized(&self) -> bool;

    fn close(&self) -> Result<()>;
}

/// Applies data source output to the rest of the SDK.
///
/// Writes go to the store; flag changes fan out to change listeners;
/// state transitions go to the data source status tracker.
pub struct DataSourceUpdateSink {
    store: Arc<dyn WritableDataStore>,
    flag_change_broadcaster: Arc<EventBroadcaster<FlagChangeEvent>>,
    status: Arc<DataSourceStatusProvider>,
}

impl DataSourceUpdateSink {
    pub fn new(
        store: Arc<dyn WritableDataStore>,
        flag_change_broadcaster: Arc<EventBroadcaster<FlagChangeEvent>>,
        status: Arc<DataSourceStatusProvider>,
    ) -> Self {
        Self {
            store,
            flag_change_broadcaster,
            status,
        }
    }

    /// Replace the store contents with a full data set, notifying change
    /// listeners of every flag that was added, removed, or reversioned.
    pub fn init(&self, data: FullDataSet) {
        let changed_keys = if self.flag_change_broadcaster.has_listeners() {
            let old: HashMap<String, u64> = self
                .store
                .get_all(DataKind::Features)
                .into_iter()
                .map(|(k, d)| (k, d.version))
                .collect();
            let mut changed: Vec<String> = Vec::new();
            for (key, flag) in &data.flags {
                if old.get(key) != Some(&flag.version) {
                    changed.push(key.clone());
                }
            }
            for key in old.keys() {
                if !data.flags.contains_key(key) {
                    changed.push(key.clone());
                }
            }
            changed
        } else {
            Vec::new()
        };

        self.store.init(data.into_store_data());

        for key in changed_keys {
            self.flag_change_broadcaster.broadcast(FlagChangeEvent { key });
        }
    }

    /// Apply a single item update. Stale versions are ignored and do not
    /// notify.
    pub fn upsert(&self, kind: DataKind, key: &str, item: ItemDescriptor) {
        if self.store.upsert(kind, key, item) && kind == DataKind::Features {
            self.flag_change_broadcaster.broadcast(FlagChangeEvent {
                key: key.to_string(),
            });
        }
    }

    pub fn update_status(&self, state: DataSourceState, error: Option<DataSourceErrorInfo>) {
        self.status.update_status(state, error);
    }
}

/// A data source that never fetches anything.
///
/// Used in offline mode and when flag data is maintained entirely by an
/// external process writing to the store. Reports itself initialized
/// immediately so evaluations go straight to the store.
pub struct NullDataSource;

impl DataSource for NullDataSource {
    fn start(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(true);
        rx
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// One full-sync fetch. The transport behind the future is entirely the
/// caller's; failures are reported as [`DataSourceErrorInfo`].
pub type FlagRequestor = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = std::result::Result<FullDataSet, DataSourceErrorInfo>> + Send>>
        + Send
        + Sync,
>;

/// Polling behavior knobs.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Delay between successful polls. Default: 30 seconds.
    pub interval: Duration,
    /// Maximum random jitter added to each delay. Default: 500ms.
    pub jitter_ms: u64,
    /// Backoff multiplier after a failed poll. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Cap on the backed-off delay. Default: 5 minutes.
    pub max_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            jitter_ms: DEFAULT_POLL_JITTER_MS,
            backoff_multiplier: DEFAULT_POLL_BACKOFF_MULTIPLIER,
            max_interval: DEFAULT_POLL_MAX_INTERVAL,
        }
    }
}

impl PollingConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }
}

/// Fetches the full data set on a fixed interval with jitter and
/// exponential backoff on errors.
pub struct PollingDataSource {
    requestor: FlagRequestor,
    config: PollingConfig,
    sink: Arc<DataSourceUpdateSink>,
    initialized: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl PollingDataSource {
    pub fn new(
        requestor: FlagRequestor,
        config: PollingConfig,
        sink: Arc<DataSourceUpdateSink>,
    ) -> Self {
        Self {
            requestor,
            config,
            sink,
            initialized: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(None),
        }
    }

    fn backoff_delay(config: &PollingConfig, consecutive_errors: u32) -> Duration {
        let base_ms = config.interval.as_millis() as f64;
        let backed_off = base_ms * config.backoff_multiplier.powi(consecutive_errors as i32);
        Duration::from_millis(backed_off.min(config.max_interval.as_millis() as f64) as u64)
    }

    fn jitter(config: &PollingConfig) -> Duration {
        Duration::from_millis((rand::random::<f64>() * config.jitter_ms as f64) as u64)
    }
}

impl DataSource for PollingDataSource {
    fn start(&self) -> oneshot::Receiver<bool> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let requestor = Arc::clone(&self.requestor);
        let config = self.config.clone();
        let sink = Arc::clone(&self.sink);
        let initialized = Arc::clone(&self.initialized);

        tokio::spawn(async move {
            let mut ready = Some(ready_tx);
            let mut consecutive_errors = 0u32;

            loop {
                let delay = match (requestor)().await {
                    Ok(data) => {
                        sink.init(data);
                        initialized.store(true, Ordering::Release);
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(true);
                        }
                        sink.update_status(DataSourceState::Valid, None);
                        consecutive_errors = 0;
                        config.interval + Self::jitter(&config)
                    }
                    Err(error) => {
                        consecutive_errors += 1;
                        tracing::warn!(
                            "polling for flag data failed ({} consecutive): {}",
                            consecutive_errors,
                            error.message
                        );
                        sink.update_status(DataSourceState::Interrupted, Some(error));
                        Self::backoff_delay(&config, consecutive_errors) + Self::jitter(&config)
                    }
                };

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("polling data source shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });

        ready_rx
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.try_send(());
        }
        Ok(())
    }
}
