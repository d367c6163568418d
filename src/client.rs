//! The FlagKit server-side client.

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::broadcast::{EventBroadcaster, TaskRunner};
use crate::config::{DataSourceConfig, FlagKitOptions};
use crate::context::Context;
use crate::datasource::{DataSource, DataSourceUpdateSink, NullDataSource, PollingDataSource};
use crate::error::Result;
use crate::evaluator::{Detail, ErrorKind, EvalDetail, Evaluator};
use crate::events::{Event, EventFactory, EventProcessor, NullEventProcessor};
use crate::flag_tracker::FlagTracker;
use crate::flags_state::{FeatureFlagsState, FeatureFlagsStateBuilder, FlagsStateOptions};
use crate::model::{DataKind, FlagValue, StoreItem};
use crate::status::{DataSourceState, DataSourceStatusProvider, DataStoreStatusProvider};
use crate::store::{self, DataStore, InMemoryDataStore, WritableDataStore};

type HmacSha256 = Hmac<Sha256>;

/// A client for the FlagKit evaluation API. Client instances are
/// thread-safe; applications should create one for the lifetime of the
/// process and share it.
///
/// Evaluation is synchronous and runs on the calling thread. Background
/// work — data source syncing, listener notifications, outage checks —
/// runs on tokio tasks owned by the client, so the client must be
/// created from within a tokio runtime.
pub struct FlagKitClient {
    sdk_key: String,
    offline: bool,
    null_data_source: bool,
    closed: AtomicBool,
    start_handle: Mutex<Option<oneshot::Receiver<bool>>>,
    store: Arc<dyn WritableDataStore>,
    data_source: Arc<dyn DataSource>,
    event_processor: Arc<dyn EventProcessor>,
    evaluator: Evaluator,
    event_factory_default: EventFactory,
    event_factory_with_reasons: EventFactory,
    flag_tracker: FlagTracker,
    data_source_status: Arc<DataSourceStatusProvider>,
    data_store_status: Arc<DataStoreStatusProvider>,
    task_runner: Arc<TaskRunner>,
}

impl FlagKitClient {
    /// Create a client and begin connecting in the background.
    ///
    /// Returns as soon as the collaborators are wired up; use
    /// [`wait_for_initialization`](Self::wait_for_initialization) (or
    /// [`start`](Self::start), which combines both) to wait for the first
    /// successful data sync.
    pub fn new(options: FlagKitOptions) -> Result<Arc<Self>> {
        options.validate()?;

        let task_runner = Arc::new(TaskRunner::new());

        let events_active =
            options.events_enabled && !options.offline && options.event_processor.is_some();
        let (event_processor, event_factory_default, event_factory_with_reasons) = if events_active
        {
            match options.event_processor.clone() {
                Some(processor) => (
                    processor,
                    EventFactory::new_default(),
                    EventFactory::new_with_reasons(),
                ),
                None => (
                    Arc::new(NullEventProcessor) as Arc<dyn EventProcessor>,
                    EventFactory::new_disabled(),
                    EventFactory::new_disabled(),
                ),
            }
        } else {
            (
                Arc::new(NullEventProcessor) as Arc<dyn EventProcessor>,
                EventFactory::new_disabled(),
                EventFactory::new_disabled(),
            )
        };

        let data_store_status = Arc::new(DataStoreStatusProvider::new(Arc::clone(&task_runner)));

        let store: Arc<dyn WritableDataStore> = options
            .data_store
            .clone()
            .unwrap_or_else(|| Arc::new(InMemoryDataStore::new()));
        if let Some(bootstrap) = options.bootstrap.clone() {
            store.init(bootstrap.into_store_data());
        }

        let evaluator = {
            let flag_store = Arc::clone(&store);
            let segment_store = Arc::clone(&store);
            Evaluator::new(
                Arc::new(move |key: &str| store::get_flag(flag_store.as_ref(), key)),
                Arc::new(move |key: &str| store::get_segment(segment_store.as_ref(), key)),
            )
        };

        let flag_change_broadcaster = Arc::new(EventBroadcaster::new(Arc::clone(&task_runner)));

        let data_source_status = Arc::new(DataSourceStatusProvider::new(
            Arc::clone(&task_runner),
            options.log_outage_as_error_after,
        ));

        let update_sink = Arc::new(DataSourceUpdateSink::new(
            Arc::clone(&store),
            Arc::clone(&flag_change_broadcaster),
            Arc::clone(&data_source_status),
        ));

        let (data_source, null_data_source): (Arc<dyn DataSource>, bool) = if options.offline {
            (Arc::new(NullDataSource), true)
        } else {
            match options.data_source.clone() {
                DataSourceConfig::Null => (Arc::new(NullDataSource), true),
                DataSourceConfig::Polling { requestor, config } => (
                    Arc::new(PollingDataSource::new(
                        requestor,
                        config,
                        Arc::clone(&update_sink),
                    )),
                    false,
                ),
                DataSourceConfig::Custom(factory) => (factory(Arc::clone(&update_sink)), false),
            }
        };

        let client = Arc::new_cyclic(|weak: &Weak<FlagKitClient>| {
            let tracker_client = weak.clone();
            let flag_tracker = FlagTracker::new(
                Arc::clone(&flag_change_broadcaster),
                Arc::new(move |key: &str, context: &Context| match tracker_client.upgrade() {
                    Some(client) => client.json_variation(key, Some(context), FlagValue::Null),
                    None => FlagValue::Null,
                }),
            );

            FlagKitClient {
                sdk_key: options.sdk_key.clone(),
                offline: options.offline,
                null_data_source,
                closed: AtomicBool::new(false),
                start_handle: Mutex::new(None),
                store: Arc::clone(&store),
                data_source: Arc::clone(&data_source),
                event_processor,
                evaluator,
                event_factory_default,
                event_factory_with_reasons,
                flag_tracker,
                data_source_status,
                data_store_status,
                task_runner,
            }
        });

        let start_handle = client.data_source.start();
        *client.start_handle.lock() = Some(start_handle);

        Ok(client)
    }

    /// Create a client and wait up to `options.start_wait` for its first
    /// successful data sync.
    ///
    /// Timing out is not an error: the client is returned in an
    /// uninitialized state where evaluations fall back to defaults (or
    /// bootstrap data) while the data source keeps trying in the
    /// background.
    pub async fn start(options: FlagKitOptions) -> Result<Arc<Self>> {
        let start_wait = options.start_wait;
        let client = Self::new(options)?;
        client.wait_for_initialization(start_wait).await;
        Ok(client)
    }

    /// Wait up to `timeout` for the data source to finish initializing.
    ///
    /// A zero timeout returns immediately; poll
    /// [`is_initialized`](Self::is_initialized) or the status provider
    /// instead. Timing out does not cancel the underlying connection
    /// attempt. Returns whether the client is initialized.
    pub async fn wait_for_initialization(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.is_initialized();
        }
        let handle = self.start_handle.lock().take();
        if let Some(handle) = handle {
            if !self.null_data_source {
                tracing::info!(
                    "waiting up to {} ms for FlagKit client to start...",
                    timeout.as_millis()
                );
            }
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => {
                    tracing::error!("data source dropped its start handle before completing");
                }
                Err(_) => {
                    tracing::error!("timeout encountered waiting for FlagKit client initialization");
                }
            }
            if !self.is_initialized() {
                tracing::warn!("FlagKit client was not successfully initialized");
            }
        }
        self.is_initialized()
    }

    /// True once the data source has completed its first successful sync
    /// and the client has not been closed.
    pub fn is_initialized(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.data_source.is_initialized()
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// The version of this SDK.
    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Evaluate a boolean flag.
    pub fn bool_variation(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: bool,
    ) -> bool {
        self.evaluate_internal(
            flag_key,
            context,
            FlagValue::Bool(default_value),
            true,
            &self.event_factory_default,
        )
        .value
        .as_bool()
        .unwrap_or(default_value)
    }

    /// Evaluate an integer flag.
    pub fn int_variation(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: i64,
    ) -> i64 {
        self.evaluate_internal(
            flag_key,
            context,
            FlagValue::Number(default_value as f64),
            true,
            &self.event_factory_default,
        )
        .value
        .as_i64()
        .unwrap_or(default_value)
    }

    /// Evaluate a floating-point flag.
    pub fn float_variation(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: f64,
    ) -> f64 {
        self.evaluate_internal(
            flag_key,
            context,
            FlagValue::Number(default_value),
            true,
            &self.event_factory_default,
        )
        .value
        .as_f64()
        .unwrap_or(default_value)
    }

    /// Evaluate a string flag.
    pub fn string_variation(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: &str,
    ) -> String {
        self.evaluate_internal(
            flag_key,
            context,
            FlagValue::String(default_value.to_string()),
            true,
            &self.event_factory_default,
        )
        .value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| default_value.to_string())
    }

    /// Evaluate a flag of any value type. No type checking is applied:
    /// whatever the flag resolves to is returned as-is.
    pub fn json_variation(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: FlagValue,
    ) -> FlagValue {
        self.evaluate_internal(
            flag_key,
            context,
            default_value,
            false,
            &self.event_factory_default,
        )
        .value
    }

    /// [`bool_variation`](Self::bool_variation), plus the variation index
    /// and reason.
    pub fn bool_variation_detail(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: bool,
    ) -> Detail<bool> {
        let detail = self.evaluate_internal(
            flag_key,
            context,
            FlagValue::Bool(default_value),
            true,
            &self.event_factory_with_reasons,
        );
        Detail {
            value: detail.value.as_bool().unwrap_or(default_value),
            variation_index: detail.variation_index,
            reason: detail.reason,
        }
    }

    /// [`int_variation`](Self::int_variation), plus the variation index
    /// and reason.
    pub fn int_variation_detail(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: i64,
    ) -> Detail<i64> {
        let detail = self.evaluate_internal(
            flag_key,
            context,
            FlagValue::Number(default_value as f64),
            true,
            &self.event_factory_with_reasons,
        );
        Detail {
            value: detail.value.as_i64().unwrap_or(default_value),
            variation_index: detail.variation_index,
            reason: detail.reason,
        }
    }

    /// [`float_variation`](Self::float_variation), plus the variation
    /// index and reason.
    pub fn float_variation_detail(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: f64,
    ) -> Detail<f64> {
        let detail = self.evaluate_internal(
            flag_key,
            context,
            FlagValue::Number(default_value),
            true,
            &self.event_factory_with_reasons,
        );
        Detail {
            value: detail.value.as_f64().unwrap_or(default_value),
            variation_index: detail.variation_index,
            reason: detail.reason,
        }
    }

    /// [`string_variation`](Self::string_variation), plus the variation
    /// index and reason.
    pub fn string_variation_detail(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: &str,
    ) -> Detail<String> {
        let detail = self.evaluate_internal(
            flag_key,
            context,
            FlagValue::String(default_value.to_string()),
            true,
            &self.event_factory_with_reasons,
        );
        Detail {
            value: detail
                .value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| default_value.to_string()),
            variation_index: detail.variation_index,
            reason: detail.reason,
        }
    }

    /// [`json_variation`](Self::json_variation), plus the variation index
    /// and reason.
    pub fn json_variation_detail(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: FlagValue,
    ) -> Detail<FlagValue> {
        self.evaluate_internal(
            flag_key,
            context,
            default_value,
            false,
            &self.event_factory_with_reasons,
        )
    }

    /// Evaluate every flag for the given context.
    ///
    /// No analytics events are produced. A snapshot that could not be
    /// populated (no context, client not ready and store empty, store
    /// failure) is marked invalid and contains no flags.
    pub fn all_flags_state(
        &self,
        context: Option<&Context>,
        options: FlagsStateOptions,
    ) -> FeatureFlagsState {
        let builder = FeatureFlagsStateBuilder::new(options);

        if self.is_offline() {
            tracing::debug!("all_flags_state() was called when client is in offline mode");
        }

        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!("all_flags_state() was called after close; returning no data");
            return builder.valid(false).build();
        }

        if !self.is_initialized() {
            if self.store.is_initialized() {
                tracing::warn!(
                    "all_flags_state() was called before client initialized; using last known values from data store"
                );
            } else {
                tracing::warn!(
                    "all_flags_state() was called before client initialized; data store unavailable, returning no data"
                );
                return builder.valid(false).build();
            }
        }

        let context = match context {
            Some(context) => context,
            None => {
                tracing::warn!("all_flags_state() was called with no context; returning no data");
                return builder.valid(false).build();
            }
        };

        let flags = match catch_unwind(AssertUnwindSafe(|| self.store.get_all(DataKind::Features)))
        {
            Ok(flags) => flags,
            Err(panic) => {
                tracing::error!(
                    "exception from data store when evaluating all flags: {}",
                    panic_message(panic.as_ref())
                );
                return builder.valid(false).build();
            }
        };

        let mut builder = builder;
        for (key, descriptor) in flags {
            let flag = match descriptor.item.and_then(StoreItem::into_flag) {
                Some(flag) => flag,
                None => continue, // deleted flag placeholder
            };
            if options.client_side_only && !flag.client_side {
                continue;
            }
            let disabled_events = EventFactory::new_disabled();
            let detail = match catch_unwind(AssertUnwindSafe(|| {
                self.evaluator.evaluate(&flag, context, &disabled_events)
            })) {
                Ok(result) => result.detail,
                Err(panic) => {
                    tracing::error!(
                        "exception caught for feature flag \"{}\" when evaluating all flags: {}",
                        key,
                        panic_message(panic.as_ref())
                    );
                    EvalDetail::error(ErrorKind::Exception, FlagValue::Null)
                }
            };
            builder.add_flag(&flag, &detail);
        }
        builder.build()
    }

    /// Whether the given flag key exists in the store.
    pub fn is_flag_known(&self, flag_key: &str) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if !self.is_initialized() {
            if self.store.is_initialized() {
                tracing::warn!(
                    "is_flag_known called before client initialized for flag \"{}\"; using last known values from data store",
                    flag_key
                );
            } else {
                tracing::warn!(
                    "is_flag_known called before client initialized for flag \"{}\"; data store unavailable, returning false",
                    flag_key
                );
                return false;
            }
        }
        match catch_unwind(AssertUnwindSafe(|| {
            store::get_flag(self.store.as_ref(), flag_key).is_some()
        })) {
            Ok(known) => known,
            Err(panic) => {
                tracing::error!(
                    "encountered exception while calling is_flag_known for flag \"{}\": {}",
                    flag_key,
                    panic_message(panic.as_ref())
                );
                false
            }
        }
    }

    /// Report a context to the analytics pipeline.
    pub fn identify(&self, context: &Context) {
        if context.key().is_empty() {
            tracing::warn!("identify called with empty context key");
            return;
        }
        if let Some(event) = self.event_factory_default.new_identify(context) {
            self.event_processor.send_event(event);
        }
    }

    /// Record a custom analytics event.
    pub fn track(&self, event_name: impl Into<String>, context: &Context) {
        self.track_internal(event_name.into(), context, None, None);
    }

    /// Record a custom analytics event with attached data.
    pub fn track_data(&self, event_name: impl Into<String>, context: &Context, data: FlagValue) {
        self.track_internal(event_name.into(), context, Some(data), None);
    }

    /// Record a custom analytics event with attached data and a numeric
    /// metric value.
    pub fn track_metric(
        &self,
        event_name: impl Into<String>,
        context: &Context,
        data: FlagValue,
        metric_value: f64,
    ) {
        self.track_internal(event_name.into(), context, Some(data), Some(metric_value));
    }

    fn track_internal(
        &self,
        event_name: String,
        context: &Context,
        data: Option<FlagValue>,
        metric_value: Option<f64>,
    ) {
        if context.key().is_empty() {
            tracing::warn!("track called with empty context key");
            return;
        }
        if let Some(event) =
            self.event_factory_default
                .new_custom(event_name, context, data, metric_value)
        {
            self.event_processor.send_event(event);
        }
    }

    /// Keyed hash of the context key, for passing to client-side SDKs in
    /// secure mode without exposing the raw key. Deterministic for a
    /// given SDK key; `None` when there is no context.
    pub fn secure_mode_hash(&self, context: Option<&Context>) -> Option<String> {
        let context = context?;
        let mut mac = HmacSha256::new_from_slice(self.sdk_key.as_bytes()).ok()?;
        mac.update(context.key().as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn flag_tracker(&self) -> &FlagTracker {
        &self.flag_tracker
    }

    pub fn data_source_status_provider(&self) -> Arc<DataSourceStatusProvider> {
        Arc::clone(&self.data_source_status)
    }

    pub fn data_store_status_provider(&self) -> Arc<DataStoreStatusProvider> {
        Arc::clone(&self.data_store_status)
    }

    /// Ask the event pipeline to deliver buffered events now.
    pub fn flush(&self) {
        self.event_processor.flush();
    }

    /// Shut down the client and its collaborators.
    ///
    /// Runs in a fixed order: data store, event pipeline (flushed first),
    /// data source, terminal Off status, notification worker. Every step
    /// is attempted even if an earlier one fails; the first failure is
    /// returned after all steps have run. After close, evaluations return
    /// defaults with a not-ready reason and queued notifications may
    /// never fire.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("closing FlagKit client");

        let mut first_error = None;
        if let Err(error) = self.store.close() {
            tracing::error!("error closing data store: {}", error);
            first_error = first_error.or(Some(error));
        }
        self.event_processor.flush();
        if let Err(error) = self.event_processor.close() {
            tracing::error!("error closing event processor: {}", error);
            first_error = first_error.or(Some(error));
        }
        if let Err(error) = self.data_source.close() {
            tracing::error!("error closing data source: {}", error);
            first_error = first_error.or(Some(error));
        }
        self.data_source_status
            .update_status(DataSourceState::Off, None);
        self.task_runner.shutdown();

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    fn send_flag_request_event(&self, event: Option<Event>) {
        if let Some(event) = event {
            self.event_processor.send_event(event);
        }
    }

    /// The evaluation pipeline shared by every variation accessor.
    ///
    /// Exactly one primary analytics event leaves this method per call
    /// (none when events are disabled), whichever branch is taken.
    fn evaluate_internal(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: FlagValue,
        check_type: bool,
        factory: &EventFactory,
    ) -> EvalDetail {
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!(
                "evaluation called after close for flag \"{}\"; returning default value",
                flag_key
            );
            self.send_flag_request_event(factory.new_unknown_feature_request(
                flag_key,
                context,
                &default_value,
                ErrorKind::ClientNotReady,
            ));
            return EvalDetail::error(ErrorKind::ClientNotReady, default_value);
        }

        if !self.data_source.is_initialized() {
            if self.store.is_initialized() {
                tracing::warn!(
                    "evaluation called before client initialized for flag \"{}\"; using last known values from data store",
                    flag_key
                );
            } else {
                tracing::warn!(
                    "evaluation called before client initialized for flag \"{}\"; data store unavailable, returning default value",
                    flag_key
                );
                self.send_flag_request_event(factory.new_unknown_feature_request(
                    flag_key,
                    context,
                    &default_value,
                    ErrorKind::ClientNotReady,
                ));
                return EvalDetail::error(ErrorKind::ClientNotReady, default_value);
            }
        }

        // Everything from flag lookup onward is contained: a panic in the
        // store or evaluator becomes an Exception reason, never an unwind
        // into the caller.
        let resolved_flag = RefCell::new(None);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.evaluate_resolved(
                flag_key,
                context,
                &default_value,
                check_type,
                factory,
                &resolved_flag,
            )
        }));
        match outcome {
            Ok(detail) => detail,
            Err(panic) => {
                tracing::error!(
                    "encountered exception while evaluating feature flag \"{}\": {}",
                    flag_key,
                    panic_message(panic.as_ref())
                );
                let event = match resolved_flag.borrow().as_ref() {
                    Some(flag) => factory.new_default_feature_request(
                        flag,
                        context,
                        &default_value,
                        ErrorKind::Exception,
                    ),
                    None => factory.new_unknown_feature_request(
                        flag_key,
                        context,
                        &default_value,
                        ErrorKind::Exception,
                    ),
                };
                self.send_flag_request_event(event);
                EvalDetail::error(ErrorKind::Exception, default_value)
            }
        }
    }

    fn evaluate_resolved(
        &self,
        flag_key: &str,
        context: Option<&Context>,
        default_value: &FlagValue,
        check_type: bool,
        factory: &EventFactory,
        resolved_flag: &RefCell<Option<crate::model::FeatureFlag>>,
    ) -> EvalDetail {
        let flag = match store::get_flag(self.store.as_ref(), flag_key) {
            Some(flag) => {
                *resolved_flag.borrow_mut() = Some(flag.clone());
                flag
            }
            None => {
                tracing::info!("unknown feature flag \"{}\"; returning default value", flag_key);
                self.send_flag_request_event(factory.new_unknown_feature_request(
                    flag_key,
                    context,
                    default_value,
                    ErrorKind::FlagNotFound,
                ));
                return EvalDetail::error(ErrorKind::FlagNotFound, default_value.clone());
            }
        };

        let context = match context {
            Some(context) => context,
            None => {
                tracing::warn!(
                    "no context when evaluating flag \"{}\"; returning default value",
                    flag_key
                );
                self.send_flag_request_event(factory.new_default_feature_request(
                    &flag,
                    None,
                    default_value,
                    ErrorKind::UserNotSpecified,
                ));
                return EvalDetail::error(ErrorKind::UserNotSpecified, default_value.clone());
            }
        };

        if context.key().is_empty() {
            tracing::warn!(
                "context key is blank; flag evaluation will proceed, but the context will not be indexed"
            );
        }

        let result = self.evaluator.evaluate(&flag, context, factory);
        for event in result.prerequisite_events {
            self.event_processor.send_event(event);
        }

        let detail = if result.detail.is_default_result() {
            // Substitute the caller's default; build a fresh result
            // rather than mutating the evaluator's.
            Detail {
                value: default_value.clone(),
                variation_index: None,
                reason: result.detail.reason,
            }
        } else {
            let detail = result.detail;
            if check_type
                && !detail.value.is_null()
                && !default_value.is_null()
                && detail.value.flag_type() != default_value.flag_type()
            {
                tracing::error!(
                    "feature flag evaluation expected result as {:?}, but got {:?}",
                    default_value.flag_type(),
                    detail.value.flag_type()
                );
                self.send_flag_request_event(factory.new_unknown_feature_request(
                    flag_key,
                    Some(context),
                    default_value,
                    ErrorKind::WrongType,
                ));
                return EvalDetail::error(ErrorKind::WrongType, default_value.clone());
            }
            detail
        };

        self.send_flag_request_event(factory.new_feature_request(
            &flag,
            context,
            &detail,
            default_value,
        ));
        detail
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
