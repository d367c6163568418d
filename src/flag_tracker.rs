//! Flag change subscriptions.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::broadcast::{EventBroadcaster, Listener, ListenerHandle};
use crate::context::Context;
use crate::model::FlagValue;

/// Some flag's configuration changed. Receiving this does not mean the
/// value served to any particular context changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagChangeEvent {
    pub key: String,
}

/// A flag's value changed for a specific context.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagValueChangeEvent {
    pub key: String,
    pub old_value: FlagValue,
    pub new_value: FlagValue,
}

pub type FlagValueChangeListener = Arc<dyn Fn(&FlagValueChangeEvent) + Send + Sync>;

pub(crate) type CurrentValueFn = Arc<dyn Fn(&str, &Context) -> FlagValue + Send + Sync>;

/// Entry point for flag change notifications.
///
/// Raw change listeners hear about every configuration change. The
/// value-change convenience re-evaluates the flag for a fixed context on
/// each change and only fires when the served value actually differs,
/// compared by value.
pub struct FlagTracker {
    broadcaster: Arc<EventBroadcaster<FlagChangeEvent>>,
    current_value: CurrentValueFn,
}

impl FlagTracker {
    pub(crate) fn new(
        broadcaster: Arc<EventBroadcaster<FlagChangeEvent>>,
        current_value: CurrentValueFn,
    ) -> Self {
        Self {
            broadcaster,
            current_value,
        }
    }

    pub fn add_flag_change_listener(
        &self,
        listener: Listener<FlagChangeEvent>,
    ) -> ListenerHandle {
        self.broadcaster.add_listener(listener)
    }

    pub fn remove_flag_change_listener(&self, handle: ListenerHandle) {
        self.broadcaster.remove_listener(handle)
    }

    /// Watch one flag's value for one context.
    ///
    /// The flag is evaluated once now to establish a baseline, then
    /// re-evaluated whenever its configuration changes; `listener` fires
    /// only when the two values differ.
    pub fn add_flag_value_change_listener(
        &self,
        flag_key: impl Into<String>,
        context: Context,
        listener: FlagValueChangeListener,
    ) -> ListenerHandle {
        let flag_key = flag_key.into();
        let current_value = Arc::clone(&self.current_value);
        let last_value = Mutex::new((current_value)(&flag_key, &context));

        self.broadcaster.add_listener(Arc::new(move |event: &FlagChangeEvent| {
            if event.key != flag_key {
                return;
            }
            let new_value = (current_value)(&flag_key, &context);
            let mut last = last_value.lock();
            if *last != new_value {
                let change = FlagValueChangeEvent {
                    key: flag_key.clone(),
                    old_value: last.clone(),
                    new_value: new_value.clone(),
                };
                *last = new_value;
                listener(&change);
            }
        }))
    }
}
