//! Flag evaluation.
//!
//! The evaluator is pure with respect to external state: it reads flags
//! and segments only through the lookup callbacks supplied at
//! construction, and reports every outcome as a [`Detail`] rather than
//! an error. Prerequisite evaluations generate their own analytics
//! events, returned alongside the result in evaluation order.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::context::Context;
use crate::events::{Event, EventFactory};
use crate::model::{Clause, FeatureFlag, FlagRule, FlagValue, Op, Rollout, Segment};

/// Scale factor for the 15-hex-digit bucketing hash.
const LONG_SCALE: f64 = 0xFFFF_FFFF_FFFF_FFF_u64 as f64;

/// Why an evaluation could not produce an authoritative result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The client has not finished initializing and no stored data is
    /// available.
    ClientNotReady,
    /// The flag key does not exist.
    FlagNotFound,
    /// No evaluation context was supplied.
    UserNotSpecified,
    /// The resolved value's type does not match the default's type.
    WrongType,
    /// Evaluation failed internally (malformed flag data, collaborator
    /// panic).
    Exception,
}

/// Structured explanation of an evaluation outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// The flag was off; the off variation (if any) applied.
    Off,
    /// No target or rule matched; the fallthrough applied.
    Fallthrough,
    /// The context key was individually targeted.
    TargetMatch,
    /// A rule matched.
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        rule_index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        rule_id: Option<String>,
    },
    /// A prerequisite flag was off or served the wrong variation.
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed { prerequisite_key: String },
    /// Evaluation failed; the default value applied.
    #[serde(rename_all = "camelCase")]
    Error { error_kind: ErrorKind },
}

/// An evaluation result: the value plus where it came from.
///
/// `variation_index` of `None` means no variation applied — the result
/// is a default result, and `value` is whatever default governs the
/// call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Detail<T> {
    pub value: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation_index: Option<usize>,
    pub reason: Reason,
}

pub type EvalDetail = Detail<FlagValue>;

impl EvalDetail {
    pub(crate) fn error(error_kind: ErrorKind, value: FlagValue) -> Self {
        Self {
            value,
            variation_index: None,
            reason: Reason::Error { error_kind },
        }
    }

    /// True when no variation applied and the governing default should
    /// be substituted.
    pub(crate) fn is_default_result(&self) -> bool {
        self.variation_index.is_none()
    }
}

/// Everything one evaluation produced.
pub struct EvalResult {
    pub detail: EvalDetail,
    /// One feature-request event per prerequisite evaluated, in
    /// evaluation order.
    pub prerequisite_events: Vec<Event>,
}

pub type FlagGetter = Arc<dyn Fn(&str) -> Option<FeatureFlag> + Send + Sync>;
pub type SegmentGetter = Arc<dyn Fn(&str) -> Option<Segment> + Send + Sync>;

enum PrereqFailure {
    Failed(String),
    Malformed,
}

/// Evaluates flags against contexts.
pub struct Evaluator {
    get_flag: FlagGetter,
    get_segment: SegmentGetter,
}

impl Evaluator {
    pub fn new(get_flag: FlagGetter, get_segment: SegmentGetter) -> Self {
        Self {
            get_flag,
            get_segment,
        }
    }

    pub fn evaluate(
        &self,
        flag: &FeatureFlag,
        context: &Context,
        events: &EventFactory,
    ) -> EvalResult {
        let mut prerequisite_events = Vec::new();
        let mut seen = vec![flag.key.clone()];
        let detail = self.evaluate_inner(flag, context, events, &mut prerequisite_events, &mut seen);
        EvalResult {
            detail,
            prerequisite_events,
        }
    }

    fn evaluate_inner(
        &self,
        flag: &FeatureFlag,
        context: &Context,
        events: &EventFactory,
        prerequisite_events: &mut Vec<Event>,
        seen: &mut Vec<String>,
    ) -> EvalDetail {
        if !flag.on {
            return Self::off_result(flag, Reason::Off);
        }

        match self.check_prerequisites(flag, context, events, prerequisite_events, seen) {
            Ok(()) => {}
            Err(PrereqFailure::Failed(prerequisite_key)) => {
                return Self::off_result(flag, Reason::PrerequisiteFailed { prerequisite_key });
            }
            Err(PrereqFailure::Malformed) => {
                return EvalDetail::error(ErrorKind::Exception, FlagValue::Null);
            }
        }

        for target in &flag.targets {
            if target.values.iter().any(|v| v == context.key()) {
                return Self::variation_result(flag, target.variation, Reason::TargetMatch);
            }
        }

        for (rule_index, rule) in flag.rules.iter().enumerate() {
            if self.rule_matches(rule, context) {
                return Self::resolve(
                    flag,
                    rule.variation,
                    rule.rollout.as_ref(),
                    context,
                    Reason::RuleMatch {
                        rule_index,
                        rule_id: rule.id.clone(),
                    },
                );
            }
        }

        Self::resolve(
            flag,
            flag.fallthrough.variation,
            flag.fallthrough.rollout.as_ref(),
            context,
            Reason::Fallthrough,
        )
    }

    fn check_prerequisites(
        &self,
        flag: &FeatureFlag,
        context: &Context,
        events: &EventFactory,
        prerequisite_events: &mut Vec<Event>,
        seen: &mut Vec<String>,
    ) -> Result<(), PrereqFailure> {
        for prereq in &flag.prerequisites {
            let prereq_flag = match (self.get_flag)(&prereq.key) {
                Some(f) => f,
                None => return Err(PrereqFailure::Failed(prereq.key.clone())),
            };

            if seen.contains(&prereq_flag.key) {
                tracing::warn!(
                    "prerequisite cycle detected involving flag \"{}\"",
                    prereq_flag.key
                );
                return Err(PrereqFailure::Malformed);
            }

            seen.push(prereq_flag.key.clone());
            let detail =
                self.evaluate_inner(&prereq_flag, context, events, prerequisite_events, seen);
            seen.pop();

            if let Some(event) =
                events.new_prerequisite_request(&prereq_flag, context, &detail, flag)
            {
                prerequisite_events.push(event);
            }

            let satisfied = prereq_flag.on
                && detail.variation_index == Some(prereq.variation)
                && !matches!(detail.reason, Reason::Error { .. });
            if !satisfied {
                return Err(PrereqFailure::Failed(prereq.key.clone()));
            }
        }
        Ok(())
    }

    fn rule_matches(&self, rule: &FlagRule, context: &Context) -> bool {
        rule.clauses.iter().all(|c| self.clause_matches(c, context))
    }

    fn clause_matches(&self, clause: &Clause, context: &Context) -> bool {
        if clause.op == Op::SegmentMatch {
            let matched = clause
                .values
                .iter()
                .filter_map(FlagValue::as_str)
                .any(|segment_key| self.segment_contains(segment_key, context));
            return matched != clause.negate;
        }

        // A missing attribute never matches, negated or not.
        let attr_value = match context.get_value(&clause.attribute) {
            Some(v) => v,
            None => return false,
        };

        let matched = match clause.op {
            Op::In => clause.values.iter().any(|v| *v == attr_value),
            Op::Contains | Op::StartsWith | Op::EndsWith => {
                match attr_value.as_str() {
                    Some(attr_str) => clause
                        .values
                        .iter()
                        .filter_map(FlagValue::as_str)
                        .any(|v| match clause.op {
                            Op::Contains => attr_str.contains(v),
                            Op::StartsWith => attr_str.starts_with(v),
                            Op::EndsWith => attr_str.ends_with(v),
                            _ => false,
                        }),
                    None => false,
                }
            }
            Op::SegmentMatch => false,
        };
        matched != clause.negate
    }

    fn segment_contains(&self, segment_key: &str, context: &Context) -> bool {
        match (self.get_segment)(segment_key) {
            Some(segment) => {
                if segment.included.iter().any(|k| k == context.key()) {
                    return true;
                }
                if segment.excluded.iter().any(|k| k == context.key()) {
                    return false;
                }
                false
            }
            None => false,
        }
    }

    fn resolve(
        flag: &FeatureFlag,
        variation: Option<usize>,
        rollout: Option<&Rollout>,
        context: &Context,
        reason: Reason,
    ) -> EvalDetail {
        if let Some(index) = variation {
            return Self::variation_result(flag, index, reason);
        }
        if let Some(rollout) = rollout {
            if !rollout.variations.is_empty() {
                let bucket = Self::bucket_context(
                    context,
                    rollout.bucket_by.as_deref(),
                    &flag.key,
                    &flag.salt,
                );
                let mut sum = 0.0;
                for weighted in &rollout.variations {
                    sum += weighted.weight as f64 / 100_000.0;
                    if bucket < sum {
                        return Self::variation_result(flag, weighted.variation, reason);
                    }
                }
                // Rounding can leave the bucket past the last band.
                let last = rollout.variations[rollout.variations.len() - 1].variation;
                return Self::variation_result(flag, last, reason);
            }
        }
        tracing::warn!(
            "flag \"{}\" has neither a variation nor a rollout for {:?}",
            flag.key,
            reason
        );
        EvalDetail::error(ErrorKind::Exception, FlagValue::Null)
    }

    fn variation_result(flag: &FeatureFlag, index: usize, reason: Reason) -> EvalDetail {
        match flag.variations.get(index) {
            Some(value) => Detail {
                value: value.clone(),
                variation_index: Some(index),
                reason,
            },
            None => {
                tracing::warn!(
                    "flag \"{}\" references nonexistent variation index {}",
                    flag.key,
                    index
                );
                EvalDetail::error(ErrorKind::Exception, FlagValue::Null)
            }
        }
    }

    fn off_result(flag: &FeatureFlag, reason: Reason) -> EvalDetail {
        match flag.off_variation {
            Some(index) => Self::variation_result(flag, index, reason),
            None => Detail {
                value: FlagValue::Null,
                variation_index: None,
                reason,
            },
        }
    }

    /// Deterministic bucket in [0, 1) for percentage rollouts.
    fn bucket_context(
        context: &Context,
        bucket_by: Option<&str>,
        flag_key: &str,
        salt: &str,
    ) -> f64 {
        let attribute = bucket_by.unwrap_or("key");
        let id = match context.get_value(attribute).and_then(|v| v.bucketable()) {
            Some(id) => id,
            None => return 0.0,
        };
        let digest = Sha256::digest(format!("{}.{}.{}", flag_key, salt, id).as_bytes());
        let hexed = hex::encode(digest);
        match u64::from_str_radix(&hexed[..15], 16) {
            Ok(n) => n as f64 / LONG_SCALE,
            Err(_) => 0.0,
        }
    }
}
