//! Snapshot of all flag values for a context.
//!
//! The serialized form is suitable for bootstrapping client-side SDKs:
//! a flat key-to-value map plus `$flagsState` metadata and a `$valid`
//! marker.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::HashMap;

use crate::evaluator::{EvalDetail, Reason};
use crate::model::{FeatureFlag, FlagValue};

/// Options for [`crate::FlagKitClient::all_flags_state`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FlagsStateOptions {
    /// Only include flags marked visible to client-side SDKs.
    pub client_side_only: bool,
    /// Include evaluation reasons in the metadata.
    pub with_reasons: bool,
    /// Omit version and reason metadata for flags that do not have event
    /// tracking enabled, to shrink the payload.
    pub details_only_for_tracked_flags: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct FlagMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<Reason>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    track_events: bool,
}

/// All flag values for one context, captured at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFlagsState {
    valid: bool,
    values: HashMap<String, FlagValue>,
    metadata: HashMap<String, FlagMetadata>,
}

impl FeatureFlagsState {
    /// False when the snapshot could not be fully populated (client not
    /// ready, no context, store failure); such snapshots contain no
    /// flags.
    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn get_flag_value(&self, key: &str) -> Option<&FlagValue> {
        self.values.get(key)
    }

    pub fn get_flag_reason(&self, key: &str) -> Option<&Reason> {
        self.metadata.get(key).and_then(|m| m.reason.as_ref())
    }

    pub fn values_map(&self) -> &HashMap<String, FlagValue> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for FeatureFlagsState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 2))?;
        for (key, value) in &self.values {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry("$flagsState", &self.metadata)?;
        map.serialize_entry("$valid", &self.valid)?;
        map.end()
    }
}

pub(crate) struct FeatureFlagsStateBuilder {
    options: FlagsStateOptions,
    valid: bool,
    values: HashMap<String, FlagValue>,
    metadata: HashMap<String, FlagMetadata>,
}

impl FeatureFlagsStateBuilder {
    pub(crate) fn new(options: FlagsStateOptions) -> Self {
        Self {
            options,
            valid: true,
            values: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub(crate) fn valid(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub(crate) fn add_flag(&mut self, flag: &FeatureFlag, detail: &EvalDetail) {
        let omit_details = self.options.details_only_for_tracked_flags && !flag.track_events;
        self.values.insert(flag.key.clone(), detail.value.clone());
        self.metadata.insert(
            flag.key.clone(),
            FlagMetadata {
                variation: detail.variation_index,
                version: (!omit_details).then_some(flag.version),
                reason: (self.options.with_reasons && !omit_details)
                    .then(|| detail.reason.clone()),
                track_events: flag.track_events,
            },
        );
    }

    pub(crate) fn build(self) -> FeatureFlagsState {
        FeatureFlagsState {
            valid: self.valid,
            values: self.values,
            metadata: self.metadata,
        }
    }
}
