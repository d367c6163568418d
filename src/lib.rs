//! FlagKit server-side SDK
//!
//! Evaluation core for FlagKit feature flags in server applications:
//! a long-lived, thread-safe client that coordinates a flag evaluator,
//! a flag/segment store, a background data source, and an analytics
//! event pipeline.
//!
//! # Quick start
//!
//! ```no_run
//! use flagkit_server::{Context, FlagKitClient, FlagKitOptions};
//!
//! #[tokio::main]
//! async fn main() -> flagkit_server::Result<()> {
//!     let options = FlagKitOptions::builder("srv_your_sdk_key")
//!         .offline(true)
//!         .build();
//!     let client = FlagKitClient::start(options).await?;
//!
//!     let context = Context::builder("user-123")
//!         .attribute("plan", "premium")
//!         .build();
//!     let dark_mode = client.bool_variation("dark-mode", Some(&context), false);
//!     println!("dark mode: {dark_mode}");
//!
//!     client.close()?;
//!     Ok(())
//! }
//! ```
//!
//! Evaluation is synchronous and safe to call from any number of
//! threads. Status notifications and flag-change events are delivered on
//! a single background worker in one global order, so listeners never
//! see interleaved or reordered transitions.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod context;
pub mod datasource;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod flag_tracker;
pub mod flags_state;
pub mod model;
pub mod status;
pub mod store;

pub use broadcast::{Listener, ListenerHandle};
pub use client::FlagKitClient;
pub use config::{
    DataSourceConfig, DataSourceFactory, FlagKitOptions, FlagKitOptionsBuilder,
    DEFAULT_LOG_OUTAGE_AS_ERROR_AFTER, DEFAULT_START_WAIT,
};
pub use context::{Context, ContextBuilder};
pub use datasource::{
    DataSource, DataSourceUpdateSink, FlagRequestor, NullDataSource, PollingConfig,
    PollingDataSource,
};
pub use error::{ErrorCode, FlagKitError, Result};
pub use evaluator::{Detail, ErrorKind, EvalDetail, Reason};
pub use events::{
    ChannelEventProcessor, CustomEvent, Event, EventProcessor, FeatureRequestEvent, IdentifyEvent,
    NullEventProcessor,
};
pub use flag_tracker::{
    FlagChangeEvent, FlagTracker, FlagValueChangeEvent, FlagValueChangeListener,
};
pub use flags_state::{FeatureFlagsState, FlagsStateOptions};
pub use model::{
    DataKind, FeatureFlag, FlagType, FlagValue, FullDataSet, ItemDescriptor, Segment, StoreItem,
};
pub use status::{
    DataSourceErrorInfo, DataSourceErrorKind, DataSourceState, DataSourceStatus,
    DataSourceStatusProvider, DataStoreStatus, DataStoreStatusProvider,
};
pub use store::{DataStore, InMemoryDataStore, WritableDataStore};
