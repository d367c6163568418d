//! Evaluation context: the identity flags are evaluated against.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::FlagValue;

/// The identity and attributes a flag is evaluated against.
///
/// A context always carries a key. An empty key is representable — flags
/// will still evaluate, with a warning — but such contexts are not useful
/// for targeting or analytics. The "no context at all" case is expressed
/// by passing `None` to the variation methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    anonymous: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, FlagValue>,
}

impl Context {
    /// Create a context with just a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            anonymous: false,
            attributes: HashMap::new(),
        }
    }

    /// Start building a context with the given key.
    pub fn builder(key: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn anonymous(&self) -> bool {
        self.anonymous
    }

    /// Look up an attribute by name. The built-in attributes `key`,
    /// `name`, and `anonymous` resolve ahead of custom attributes.
    pub fn get_value(&self, attribute: &str) -> Option<FlagValue> {
        match attribute {
            "key" => Some(FlagValue::String(self.key.clone())),
            "name" => self.name.clone().map(FlagValue::String),
            "anonymous" => Some(FlagValue::Bool(self.anonymous)),
            _ => self.attributes.get(attribute).cloned(),
        }
    }
}

/// Builder for [`Context`].
pub struct ContextBuilder {
    key: String,
    name: Option<String>,
    anonymous: bool,
    attributes: HashMap<String, FlagValue>,
}

impl ContextBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            anonymous: false,
            attributes: HashMap::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> Context {
        Context {
            key: self.key,
            name: self.name,
            anonymous: self.anonymous,
            attributes: self.attributes,
        }
    }
}
