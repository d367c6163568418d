//! Analytics events and the event pipeline seam.
//!
//! The client derives exactly one primary event from every evaluation
//! call and hands it to an [`EventProcessor`]. Batching, buffering, and
//! delivery are the processor's concern; this crate ships a no-op
//! processor and a channel-backed one that forwards events to whatever
//! delivery pipeline the application wires up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::Result;
use crate::evaluator::{Detail, ErrorKind, Reason};
use crate::model::{FeatureFlag, FlagValue};

/// A flag evaluation outcome, for analytics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRequestEvent {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    pub value: FlagValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    pub default_value: FlagValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    /// Absent when the flag could not be resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Set when this evaluation happened as a prerequisite of another
    /// flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prereq_of: Option<String>,
    pub track_events: bool,
    pub creation_date: DateTime<Utc>,
}

/// A context identification event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyEvent {
    pub context: Context,
    pub creation_date: DateTime<Utc>,
}

/// An application-defined event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    pub key: String,
    pub context: Context,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<FlagValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<f64>,
    pub creation_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Event {
    FeatureRequest(FeatureRequestEvent),
    Identify(IdentifyEvent),
    Custom(CustomEvent),
}

/// Builds analytics events for the evaluation pipeline.
///
/// The client holds two factories: the default one and a with-reasons
/// one used by the detail accessors. When analytics are disabled both
/// are replaced by the disabled factory, whose constructors return
/// `None` so no event is ever materialized.
#[derive(Debug, Clone, Copy)]
pub struct EventFactory {
    include_reasons: bool,
    disabled: bool,
}

impl EventFactory {
    pub fn new_default() -> Self {
        Self {
            include_reasons: false,
            disabled: false,
        }
    }

    pub fn new_with_reasons() -> Self {
        Self {
            include_reasons: true,
            disabled: false,
        }
    }

    pub fn new_disabled() -> Self {
        Self {
            include_reasons: false,
            disabled: true,
        }
    }

    fn reason_for(&self, reason: &Reason) -> Option<Reason> {
        self.include_reasons.then(|| reason.clone())
    }

    /// Event for a successfully resolved flag.
    pub fn new_feature_request(
        &self,
        flag: &FeatureFlag,
        context: &Context,
        detail: &Detail<FlagValue>,
        default_value: &FlagValue,
    ) -> Option<Event> {
        if self.disabled {
            return None;
        }
        Some(Event::FeatureRequest(FeatureRequestEvent {
            key: flag.key.clone(),
            context: Some(context.clone()),
            value: detail.value.clone(),
            variation: detail.variation_index,
            default_value: default_value.clone(),
            reason: self.reason_for(&detail.reason),
            version: Some(flag.version),
            prereq_of: None,
            track_events: flag.track_events,
            creation_date: Utc::now(),
        }))
    }

    /// Event for a prerequisite flag evaluated on behalf of another flag.
    pub fn new_prerequisite_request(
        &self,
        flag: &FeatureFlag,
        context: &Context,
        detail: &Detail<FlagValue>,
        prereq_of: &FeatureFlag,
    ) -> Option<Event> {
        if self.disabled {
            return None;
        }
        Some(Event::FeatureRequest(FeatureRequestEvent {
            key: flag.key.clone(),
            context: Some(context.clone()),
            value: detail.value.clone(),
            variation: detail.variation_index,
            default_value: FlagValue::Null,
            reason: self.reason_for(&detail.reason),
            version: Some(flag.version),
            prereq_of: Some(prereq_of.key.clone()),
            track_events: flag.track_events,
            creation_date: Utc::now(),
        }))
    }

    /// Event for a flag that could not be resolved at all.
    pub fn new_unknown_feature_request(
        &self,
        key: &str,
        context: Option<&Context>,
        default_value: &FlagValue,
        error_kind: ErrorKind,
    ) -> Option<Event> {
        if self.disabled {
            return None;
        }
        Some(Event::FeatureRequest(FeatureRequestEvent {
            key: key.to_string(),
            context: context.cloned(),
            value: default_value.clone(),
            variation: None,
            default_value: default_value.clone(),
            reason: self.reason_for(&Reason::Error { error_kind }),
            version: None,
            prereq_of: None,
            track_events: false,
            creation_date: Utc::now(),
        }))
    }

    /// Event for a resolved flag whose evaluation still fell back to the
    /// caller's default.
    pub fn new_default_feature_request(
        &self,
        flag: &FeatureFlag,
        context: Option<&Context>,
        default_value: &FlagValue,
        error_kind: ErrorKind,
    ) -> Option<Event> {
        if self.disabled {
            return None;
        }
        Some(Event::FeatureRequest(FeatureRequestEvent {
            key: flag.key.clone(),
            context: context.cloned(),
            value: default_value.clone(),
            variation: None,
            default_value: default_value.clone(),
            reason: self.reason_for(&Reason::Error { error_kind }),
            version: Some(flag.version),
            prereq_of: None,
            track_events: flag.track_events,
            creation_date: Utc::now(),
        }))
    }

    pub fn new_identify(&self, context: &Context) -> Option<Event> {
        if self.disabled {
            return None;
        }
        Some(Event::Identify(IdentifyEvent {
            context: context.clone(),
            creation_date: Utc::now(),
        }))
    }

    pub fn new_custom(
        &self,
        key: impl Into<String>,
        context: &Context,
        data: Option<FlagValue>,
        metric_value: Option<f64>,
    ) -> Option<Event> {
        if self.disabled {
            return None;
        }
        Some(Event::Custom(CustomEvent {
            key: key.into(),
            context: context.clone(),
            data,
            metric_value,
            creation_date: Utc::now(),
        }))
    }
}

/// Consumes analytics events. Must never block the caller.
pub trait EventProcessor: Send + Sync {
    fn send_event(&self, event: Event);

    /// Ask for buffered events to be delivered now.
    fn flush(&self);

    /// Flush and release resources.
    fn close(&self) -> Result<()>;
}

/// Discards all events. Used when analytics are disabled.
pub struct NullEventProcessor;

impl EventProcessor for NullEventProcessor {
    fn send_event(&self, _event: Event) {}

    fn flush(&self) {}

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Forwards events to an unbounded channel for an application-owned
/// delivery pipeline. Sending never blocks; once the receiving side is
/// dropped, events are silently discarded.
pub struct ChannelEventProcessor {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelEventProcessor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventProcessor for ChannelEventProcessor {
    fn send_event(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event receiver dropped; discarding event");
        }
    }

    fn flush(&self) {}

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
