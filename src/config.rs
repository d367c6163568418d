//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::datasource::{DataSource, DataSourceUpdateSink, FlagRequestor, PollingConfig};
use crate::error::{ErrorCode, FlagKitError, Result};
use crate::events::EventProcessor;
use crate::model::FullDataSet;
use crate::store::WritableDataStore;

/// How long [`crate::FlagKitClient::start`] waits for the data source by
/// default.
pub const DEFAULT_START_WAIT: Duration = Duration::from_secs(5);

/// How long a data source outage may last before it is logged at error
/// level.
pub const DEFAULT_LOG_OUTAGE_AS_ERROR_AFTER: Duration = Duration::from_secs(60);

const SERVER_KEY_PREFIX: &str = "srv_";

/// Builds the client's data source.
pub type DataSourceFactory =
    Arc<dyn Fn(Arc<DataSourceUpdateSink>) -> Arc<dyn DataSource> + Send + Sync>;

/// Which data source implementation the client runs.
#[derive(Clone)]
pub enum DataSourceConfig {
    /// No background updates; flag data comes from bootstrap data or an
    /// external process writing to the store.
    Null,
    /// Poll for the full data set with the given transport callback.
    Polling {
        requestor: FlagRequestor,
        config: PollingConfig,
    },
    /// A custom data source implementation.
    Custom(DataSourceFactory),
}

impl fmt::Debug for DataSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceConfig::Null => f.write_str("Null"),
            DataSourceConfig::Polling { config, .. } => {
                f.debug_struct("Polling").field("config", config).finish()
            }
            DataSourceConfig::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Configuration for [`crate::FlagKitClient`].
#[derive(Clone)]
pub struct FlagKitOptions {
    /// Server-side SDK key; also the secret behind
    /// [`crate::FlagKitClient::secure_mode_hash`].
    pub sdk_key: String,
    /// Offline clients never connect anywhere and never send events.
    pub offline: bool,
    /// Master switch for analytics events.
    pub events_enabled: bool,
    /// Startup handshake timeout used by [`crate::FlagKitClient::start`].
    /// Zero means do not wait.
    pub start_wait: Duration,
    /// Threshold for escalating a sustained data source outage to error
    /// logging.
    pub log_outage_as_error_after: Duration,
    pub data_source: DataSourceConfig,
    /// Flag/segment storage; defaults to the in-memory store.
    pub data_store: Option<Arc<dyn WritableDataStore>>,
    /// Event pipeline; when absent (or events are disabled) no events
    /// are produced at all.
    pub event_processor: Option<Arc<dyn EventProcessor>>,
    /// Flag data preloaded into the store before the data source starts,
    /// e.g. values persisted from a prior run.
    pub bootstrap: Option<FullDataSet>,
}

impl fmt::Debug for FlagKitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagKitOptions")
            .field("offline", &self.offline)
            .field("events_enabled", &self.events_enabled)
            .field("start_wait", &self.start_wait)
            .field("log_outage_as_error_after", &self.log_outage_as_error_after)
            .field("data_source", &self.data_source)
            .field("has_data_store", &self.data_store.is_some())
            .field("has_event_processor", &self.event_processor.is_some())
            .field("has_bootstrap", &self.bootstrap.is_some())
            .finish()
    }
}

impl FlagKitOptions {
    pub fn new(sdk_key: impl Into<String>) -> Self {
        Self {
            sdk_key: sdk_key.into(),
            offline: false,
            events_enabled: true,
            start_wait: DEFAULT_START_WAIT,
            log_outage_as_error_after: DEFAULT_LOG_OUTAGE_AS_ERROR_AFTER,
            data_source: DataSourceConfig::Null,
            data_store: None,
            event_processor: None,
            bootstrap: None,
        }
    }

    pub fn builder(sdk_key: impl Into<String>) -> FlagKitOptionsBuilder {
        FlagKitOptionsBuilder::new(sdk_key)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sdk_key.is_empty() {
            return Err(FlagKitError::config_error(
                ErrorCode::ConfigMissingSdkKey,
                "SDK key is required",
            ));
        }
        if !self.offline && !self.sdk_key.starts_with(SERVER_KEY_PREFIX) {
            return Err(FlagKitError::config_error(
                ErrorCode::ConfigInvalidSdkKey,
                "server-side SDK keys start with \"srv_\"",
            ));
        }
        if let DataSourceConfig::Polling { config, .. } = &self.data_source {
            if config.interval.is_zero() {
                return Err(FlagKitError::config_error(
                    ErrorCode::ConfigInvalidPollingInterval,
                    "polling interval must be positive",
                ));
            }
        }
        Ok(())
    }
}

/// Builder for [`FlagKitOptions`].
pub struct FlagKitOptionsBuilder {
    options: FlagKitOptions,
}

impl FlagKitOptionsBuilder {
    pub fn new(sdk_key: impl Into<String>) -> Self {
        Self {
            options: FlagKitOptions::new(sdk_key),
        }
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.options.offline = offline;
        self
    }

    pub fn events_enabled(mut self, enabled: bool) -> Self {
        self.options.events_enabled = enabled;
        self
    }

    pub fn start_wait(mut self, wait: Duration) -> Self {
        self.options.start_wait = wait;
        self
    }

    pub fn log_outage_as_error_after(mut self, threshold: Duration) -> Self {
        self.options.log_outage_as_error_after = threshold;
        self
    }

    pub fn data_source(mut self, data_source: DataSourceConfig) -> Self {
        self.options.data_source = data_source;
        self
    }

    pub fn polling(self, requestor: FlagRequestor, config: PollingConfig) -> Self {
        self.data_source(DataSourceConfig::Polling { requestor, config })
    }

    pub fn data_store(mut self, store: Arc<dyn WritableDataStore>) -> Self {
        self.options.data_store = Some(store);
        self
    }

    pub fn event_processor(mut self, processor: Arc<dyn EventProcessor>) -> Self {
        self.options.event_processor = Some(processor);
        self
    }

    pub fn bootstrap(mut self, data: FullDataSet) -> Self {
        self.options.bootstrap = Some(data);
        self
    }

    pub fn build(self) -> FlagKitOptions {
        self.options
    }
}
