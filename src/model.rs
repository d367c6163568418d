//! Flag and segment data model.
//!
//! These types mirror the wire representation delivered by FlagKit data
//! sources. The evaluator consumes them read-only; the data store holds
//! them wrapped in versioned [`ItemDescriptor`]s.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The category of data held in a data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Features,
    Segments,
}

/// The underlying type of a flag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Json,
}

/// A flag variation value.
///
/// `Null` is a real value a variation can carry; it is distinct from a
/// flag or variation being absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    String(String),
    Number(f64),
    Json(serde_json::Value),
    Null,
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FlagValue::Number(n) => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            FlagValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FlagValue::Null)
    }

    pub fn flag_type(&self) -> FlagType {
        match self {
            FlagValue::Bool(_) => FlagType::Boolean,
            FlagValue::String(_) => FlagType::String,
            FlagValue::Number(_) => FlagType::Number,
            FlagValue::Json(_) | FlagValue::Null => FlagType::Json,
        }
    }

    /// String form used for rollout bucketing; only strings and integral
    /// numbers participate.
    pub(crate) fn bucketable(&self) -> Option<String> {
        match self {
            FlagValue::String(s) => Some(s.clone()),
            FlagValue::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
            _ => None,
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::String(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        FlagValue::Number(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Number(value as f64)
    }
}

impl From<i32> for FlagValue {
    fn from(value: i32) -> Self {
        FlagValue::Number(value as f64)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => FlagValue::Bool(b),
            serde_json::Value::String(s) => FlagValue::String(s),
            serde_json::Value::Number(n) => FlagValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::Null => FlagValue::Null,
            other => FlagValue::Json(other),
        }
    }
}

/// A percentage rollout across weighted variations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    pub variations: Vec<WeightedVariation>,
    /// Context attribute used for bucketing; defaults to the context key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_by: Option<String>,
}

/// One slice of a rollout. Weights are in units of 0.001%, summing to
/// 100000 across a rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedVariation {
    pub variation: usize,
    pub weight: u32,
}

/// The flag outcome when no target or rule matched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fallthrough {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout: Option<Rollout>,
}

/// Individual context keys pinned to a specific variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub values: Vec<String>,
    pub variation: usize,
}

/// Another flag that must evaluate to a specific variation before this
/// flag's own targeting applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prerequisite {
    pub key: String,
    pub variation: usize,
}

/// Clause matching operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Op {
    In,
    Contains,
    StartsWith,
    EndsWith,
    SegmentMatch,
}

/// A single condition inside a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    pub attribute: String,
    pub op: Op,
    pub values: Vec<FlagValue>,
    #[serde(default)]
    pub negate: bool,
}

/// A targeting rule: all clauses must match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub clauses: Vec<Clause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout: Option<Rollout>,
}

/// A feature flag as delivered by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub key: String,
    #[serde(default)]
    pub version: u64,
    pub on: bool,
    pub variations: Vec<FlagValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_variation: Option<usize>,
    #[serde(default)]
    pub fallthrough: Fallthrough,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<FlagRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    pub track_events: bool,
    #[serde(default)]
    pub client_side: bool,
}

impl FeatureFlag {
    /// Minimal flag that serves `variations[0]` to everyone. Intended for
    /// bootstrap data and programmatic setups; production flags normally
    /// arrive fully formed from a data source.
    pub fn new(key: impl Into<String>, variations: Vec<FlagValue>) -> Self {
        let key = key.into();
        Self {
            salt: key.clone(),
            key,
            version: 1,
            on: true,
            variations,
            off_variation: None,
            fallthrough: Fallthrough {
                variation: Some(0),
                rollout: None,
            },
            targets: Vec::new(),
            rules: Vec::new(),
            prerequisites: Vec::new(),
            track_events: false,
            client_side: false,
        }
    }
}

/// A context segment: a reusable named set of context keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<String>,
    #[serde(default)]
    pub salt: String,
}

/// An item held by a data store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreItem {
    Flag(FeatureFlag),
    Segment(Segment),
}

impl StoreItem {
    pub fn version(&self) -> u64 {
        match self {
            StoreItem::Flag(f) => f.version,
            StoreItem::Segment(s) => s.version,
        }
    }

    pub fn into_flag(self) -> Option<FeatureFlag> {
        match self {
            StoreItem::Flag(f) => Some(f),
            StoreItem::Segment(_) => None,
        }
    }

    pub fn into_segment(self) -> Option<Segment> {
        match self {
            StoreItem::Segment(s) => Some(s),
            StoreItem::Flag(_) => None,
        }
    }
}

/// A versioned store entry. A descriptor with no item is a deletion
/// tombstone; it keeps the version so stale upserts cannot resurrect a
/// deleted item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDescriptor {
    pub version: u64,
    pub item: Option<StoreItem>,
}

impl ItemDescriptor {
    pub fn new(item: StoreItem) -> Self {
        Self {
            version: item.version(),
            item: Some(item),
        }
    }

    pub fn tombstone(version: u64) -> Self {
        Self {
            version,
            item: None,
        }
    }
}

/// A complete flag/segment data set, as produced by one full sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullDataSet {
    #[serde(default)]
    pub flags: HashMap<String, FeatureFlag>,
    #[serde(default)]
    pub segments: HashMap<String, Segment>,
}

impl FullDataSet {
    pub(crate) fn into_store_data(self) -> HashMap<DataKind, HashMap<String, ItemDescriptor>> {
        let mut data = HashMap::new();
        data.insert(
            DataKind::Features,
            self.flags
                .into_iter()
                .map(|(k, f)| (k, ItemDescriptor::new(StoreItem::Flag(f))))
                .collect(),
        );
        data.insert(
            DataKind::Segments,
            self.segments
                .into_iter()
                .map(|(k, s)| (k, ItemDescriptor::new(StoreItem::Segment(s))))
                .collect(),
        );
        data
    }
}
