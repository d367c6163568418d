//! Data source and data store status tracking.
//!
//! Each tracker holds the last-known status and publishes transitions
//! through an [`EventBroadcaster`] on the shared task runner, so every
//! listener observes the same transition order. A sustained data source
//! outage is escalated from warning to error logging after a configured
//! threshold; the escalation is a delayed reclassification, not a new
//! status event.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::{EventBroadcaster, Listener, ListenerHandle, TaskRunner};

/// Overall state of the data source connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSourceState {
    /// Starting up; no successful sync yet.
    Initializing,
    /// Connected and current.
    Valid,
    /// Had a valid connection, currently failing; last known data still
    /// serves.
    Interrupted,
    /// Permanently stopped (shutdown or unrecoverable failure).
    Off,
}

/// Classification of a data source failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSourceErrorKind {
    NetworkError,
    ErrorResponse,
    InvalidData,
    StoreError,
    Unknown,
}

/// Detail of the most recent data source failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceErrorInfo {
    pub kind: DataSourceErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
    pub time: DateTime<Utc>,
}

impl DataSourceErrorInfo {
    pub fn new(kind: DataSourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            time: Utc::now(),
        }
    }

    fn summary_key(&self) -> String {
        match self.status_code {
            Some(code) => format!("{:?}({})", self.kind, code),
            None => format!("{:?}", self.kind),
        }
    }
}

/// Snapshot of the data source condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceStatus {
    pub state: DataSourceState,
    pub state_since: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<DataSourceErrorInfo>,
}

struct OutageTracker {
    start: DateTime<Utc>,
    errors: HashMap<String, u32>,
}

/// Tracks data source status and notifies listeners of transitions.
pub struct DataSourceStatusProvider {
    current: RwLock<DataSourceStatus>,
    broadcaster: EventBroadcaster<DataSourceStatus>,
    runner: Arc<TaskRunner>,
    outage: Arc<Mutex<Option<OutageTracker>>>,
    log_outage_as_error_after: Duration,
}

impl DataSourceStatusProvider {
    pub fn new(runner: Arc<TaskRunner>, log_outage_as_error_after: Duration) -> Self {
        Self {
            current: RwLock::new(DataSourceStatus {
                state: DataSourceState::Initializing,
                state_since: Utc::now(),
                last_error: None,
            }),
            broadcaster: EventBroadcaster::new(Arc::clone(&runner)),
            runner,
            outage: Arc::new(Mutex::new(None)),
            log_outage_as_error_after,
        }
    }

    pub fn status(&self) -> DataSourceStatus {
        self.current.read().clone()
    }

    pub fn add_listener(&self, listener: Listener<DataSourceStatus>) -> ListenerHandle {
        self.broadcaster.add_listener(listener)
    }

    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.broadcaster.remove_listener(handle)
    }

    /// Record a state transition reported by the data source.
    ///
    /// An interruption before the first successful sync stays
    /// `Initializing`: the source never was valid, so it cannot be
    /// interrupted. Redundant updates (same state, no new error) are
    /// dropped without notifying listeners.
    pub fn update_status(&self, new_state: DataSourceState, error: Option<DataSourceErrorInfo>) {
        let updated = {
            let mut current = self.current.write();
            let effective = if new_state == DataSourceState::Interrupted
                && current.state == DataSourceState::Initializing
            {
                DataSourceState::Initializing
            } else {
                new_state
            };

            if effective == current.state && error.is_none() {
                return;
            }

            let status = DataSourceStatus {
                state: effective,
                state_since: if effective == current.state {
                    current.state_since
                } else {
                    Utc::now()
                },
                last_error: error.clone().or_else(|| current.last_error.clone()),
            };
            *current = status.clone();
            status
        };

        self.track_outage(&updated, error);
        self.broadcaster.broadcast(updated);
    }

    fn track_outage(&self, status: &DataSourceStatus, error: Option<DataSourceErrorInfo>) {
        let mut outage = self.outage.lock();
        match status.state {
            DataSourceState::Interrupted => {
                let tracker = outage.get_or_insert_with(|| {
                    self.arm_outage_check(status.state_since);
                    OutageTracker {
                        start: status.state_since,
                        errors: HashMap::new(),
                    }
                });
                if let Some(error) = error {
                    *tracker.errors.entry(error.summary_key()).or_insert(0) += 1;
                }
            }
            _ => {
                *outage = None;
            }
        }
    }

    fn arm_outage_check(&self, started: DateTime<Utc>) {
        let outage = Arc::clone(&self.outage);
        let threshold = self.log_outage_as_error_after;
        self.runner.submit_after(threshold, move || {
            let outage = outage.lock();
            if let Some(tracker) = outage.as_ref() {
                if tracker.start != started {
                    return;
                }
                let mut summary: Vec<String> = tracker
                    .errors
                    .iter()
                    .map(|(k, n)| format!("{} ({} {})", k, n, if *n == 1 { "time" } else { "times" }))
                    .collect();
                summary.sort();
                tracing::error!(
                    "data source outage has lasted at least {:?}, with the following errors: {}",
                    threshold,
                    if summary.is_empty() {
                        "none recorded".to_string()
                    } else {
                        summary.join(", ")
                    }
                );
            }
        });
    }
}

/// Snapshot of the data store condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStoreStatus {
    /// Whether the store can currently be used.
    pub available: bool,
    /// Whether data written during an outage may have been lost, so a
    /// refresh from the data source is needed.
    pub stale: bool,
}

/// Tracks data store availability and notifies listeners of transitions.
pub struct DataStoreStatusProvider {
    current: RwLock<DataStoreStatus>,
    broadcaster: EventBroadcaster<DataStoreStatus>,
}

impl DataStoreStatusProvider {
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        Self {
            current: RwLock::new(DataStoreStatus {
                available: true,
                stale: false,
            }),
            broadcaster: EventBroadcaster::new(runner),
        }
    }

    pub fn status(&self) -> DataStoreStatus {
        *self.current.read()
    }

    pub fn available(&self) -> bool {
        self.current.read().available
    }

    pub fn add_listener(&self, listener: Listener<DataStoreStatus>) -> ListenerHandle {
        self.broadcaster.add_listener(listener)
    }

    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.broadcaster.remove_listener(handle)
    }

    /// Record an availability transition reported by the store
    /// implementation. Redundant updates are dropped.
    pub fn update_status(&self, status: DataStoreStatus) {
        {
            let mut current = self.current.write();
            if *current == status {
                return;
            }
            *current = status;
        }
        self.broadcaster.broadcast(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(provider: &DataSourceStatusProvider) -> Arc<Mutex<Vec<DataSourceState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        provider.add_listener(Arc::new(move |s: &DataSourceStatus| sink.lock().push(s.state)));
        seen
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_redundant_update_is_dropped() {
        let runner = Arc::new(TaskRunner::new());
        let provider = DataSourceStatusProvider::new(runner, Duration::from_secs(60));
        let seen = collect(&provider);

        provider.update_status(DataSourceState::Valid, None);
        provider.update_status(DataSourceState::Valid, None);
        settle().await;

        assert_eq!(*seen.lock(), vec![DataSourceState::Valid]);
    }

    #[tokio::test]
    async fn test_same_state_with_error_still_notifies() {
        let runner = Arc::new(TaskRunner::new());
        let provider = DataSourceStatusProvider::new(runner, Duration::from_secs(60));
        provider.update_status(DataSourceState::Valid, None);
        let seen = collect(&provider);

        provider.update_status(
            DataSourceState::Interrupted,
            Some(DataSourceErrorInfo::new(
                DataSourceErrorKind::NetworkError,
                "connection reset",
            )),
        );
        provider.update_status(
            DataSourceState::Interrupted,
            Some(DataSourceErrorInfo::new(
                DataSourceErrorKind::NetworkError,
                "connection reset",
            )),
        );
        settle().await;

        assert_eq!(
            *seen.lock(),
            vec![DataSourceState::Interrupted, DataSourceState::Interrupted]
        );
        assert!(provider.status().last_error.is_some());
    }

    #[tokio::test]
    async fn test_interruption_before_first_sync_stays_initializing() {
        let runner = Arc::new(TaskRunner::new());
        let provider = DataSourceStatusProvider::new(runner, Duration::from_secs(60));

        provider.update_status(
            DataSourceState::Interrupted,
            Some(DataSourceErrorInfo::new(
                DataSourceErrorKind::ErrorResponse,
                "503 from poll endpoint",
            )),
        );

        assert_eq!(provider.status().state, DataSourceState::Initializing);
        assert!(provider.status().last_error.is_some());
    }

    #[tokio::test]
    async fn test_state_since_only_moves_on_transitions() {
        let runner = Arc::new(TaskRunner::new());
        let provider = DataSourceStatusProvider::new(runner, Duration::from_secs(60));
        provider.update_status(DataSourceState::Valid, None);
        let since = provider.status().state_since;

        provider.update_status(DataSourceState::Interrupted, None);
        let interrupted_since = provider.status().state_since;
        assert!(interrupted_since >= since);

        provider.update_status(
            DataSourceState::Interrupted,
            Some(DataSourceErrorInfo::new(DataSourceErrorKind::Unknown, "x")),
        );
        assert_eq!(provider.status().state_since, interrupted_since);
    }

    #[tokio::test]
    async fn test_outage_check_fires_after_threshold() {
        let runner = Arc::new(TaskRunner::new());
        let provider = DataSourceStatusProvider::new(runner, Duration::from_millis(50));
        provider.update_status(DataSourceState::Valid, None);

        provider.update_status(
            DataSourceState::Interrupted,
            Some(DataSourceErrorInfo::new(
                DataSourceErrorKind::NetworkError,
                "connection reset",
            )),
        );

        // Let the escalation check run; the status itself must not move.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(provider.status().state, DataSourceState::Interrupted);
    }

    #[tokio::test]
    async fn test_recovery_clears_outage_before_check() {
        let runner = Arc::new(TaskRunner::new());
        let provider = DataSourceStatusProvider::new(runner, Duration::from_millis(50));
        provider.update_status(DataSourceState::Valid, None);
        provider.update_status(
            DataSourceState::Interrupted,
            Some(DataSourceErrorInfo::new(DataSourceErrorKind::Unknown, "x")),
        );
        provider.update_status(DataSourceState::Valid, None);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(provider.status().state, DataSourceState::Valid);
    }

    #[tokio::test]
    async fn test_store_status_transitions() {
        let runner = Arc::new(TaskRunner::new());
        let provider = DataStoreStatusProvider::new(runner);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let sink = Arc::clone(&seen);
            provider.add_listener(Arc::new(move |s: &DataStoreStatus| sink.lock().push(*s)));
        }

        assert!(provider.available());
        provider.update_status(DataStoreStatus {
            available: false,
            stale: false,
        });
        provider.update_status(DataStoreStatus {
            available: false,
            stale: false,
        });
        provider.update_status(DataStoreStatus {
            available: true,
            stale: true,
        });
        settle().await;

        assert_eq!(seen.lock().len(), 2);
        assert!(!seen.lock()[0].available);
        assert!(seen.lock()[1].stale);
    }
}
