mod support;

use std::sync::Arc;

use flagkit_server::{
    Context, ErrorKind, Event, FeatureFlag, FlagKitClient, FlagKitOptions, FlagValue, Reason,
};
use support::*;

async fn ready_client(
    flags: Vec<FeatureFlag>,
) -> (
    Arc<FlagKitClient>,
    Arc<RecordingEventProcessor>,
    TestDataSourceHandle,
) {
    let handle = TestDataSourceHandle::new();
    let processor = RecordingEventProcessor::new();
    let options = FlagKitOptions::builder("srv_test-sdk-key")
        .data_source(handle.config())
        .event_processor(processor.clone())
        .build();
    let client = FlagKitClient::new(options).expect("client");
    handle.init_data(data_set(flags));
    handle.complete_start(true);
    (client, processor, handle)
}

#[tokio::test]
async fn test_missing_flag_returns_default_with_flag_not_found() {
    let (client, processor, _handle) = ready_client(vec![]).await;
    let context = Context::new("u1");

    assert!(!client.bool_variation("missing", Some(&context), false));
    assert!(client.bool_variation("missing", Some(&context), true));

    let detail = client.bool_variation_detail("missing", Some(&context), false);
    assert_eq!(
        detail.reason,
        Reason::Error {
            error_kind: ErrorKind::FlagNotFound
        }
    );
    assert_eq!(detail.variation_index, None);

    // Every call recorded exactly one unknown-flag event, with no
    // flag version attached.
    let events = processor.feature_events();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.version.is_none()));
    assert!(events.iter().all(|e| e.variation.is_none()));
}

#[tokio::test]
async fn test_resolved_flag_returns_variation() {
    let (client, processor, _handle) = ready_client(vec![bool_flag("f1")]).await;
    let context = Context::new("u1");

    assert!(client.bool_variation("f1", Some(&context), false));

    let events = processor.feature_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key, "f1");
    assert_eq!(events[0].value, FlagValue::Bool(true));
    assert_eq!(events[0].variation, Some(1));
    assert_eq!(events[0].version, Some(1));
}

#[tokio::test]
async fn test_not_ready_with_empty_store_returns_client_not_ready() {
    let handle = TestDataSourceHandle::new();
    let processor = RecordingEventProcessor::new();
    let options = FlagKitOptions::builder("srv_test-sdk-key")
        .data_source(handle.config())
        .event_processor(processor.clone())
        .build();
    let client = FlagKitClient::new(options).expect("client");
    let context = Context::new("u1");

    assert!(!client.bool_variation("f1", Some(&context), false));
    let detail = client.bool_variation_detail("f1", Some(&context), false);
    assert_eq!(
        detail.reason,
        Reason::Error {
            error_kind: ErrorKind::ClientNotReady
        }
    );

    let events = processor.feature_events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.version.is_none()));
}

#[tokio::test]
async fn test_not_ready_with_bootstrap_store_serves_stale_values() {
    let handle = TestDataSourceHandle::new();
    let options = FlagKitOptions::builder("srv_test-sdk-key")
        .data_source(handle.config())
        .bootstrap(data_set(vec![bool_flag("f1")]))
        .build();
    let client = FlagKitClient::new(options).expect("client");
    let context = Context::new("u1");

    // Data source never initialized, but the store has prior-session
    // data, so evaluation proceeds against it.
    assert!(!client.is_initialized());
    assert!(client.bool_variation("f1", Some(&context), false));

    let detail = client.bool_variation_detail("f1", Some(&context), false);
    assert_eq!(detail.reason, Reason::Fallthrough);
}

#[tokio::test]
async fn test_no_context_returns_default_with_user_not_specified() {
    let (client, processor, _handle) = ready_client(vec![bool_flag("f1")]).await;

    assert!(!client.bool_variation("f1", None, false));

    let detail = client.bool_variation_detail("f1", None, false);
    assert_eq!(
        detail.reason,
        Reason::Error {
            error_kind: ErrorKind::UserNotSpecified
        }
    );

    // The flag itself was resolved, so the events carry its version.
    let events = processor.feature_events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.version == Some(1)));
}

#[tokio::test]
async fn test_empty_context_key_still_evaluates() {
    let (client, _processor, _handle) = ready_client(vec![bool_flag("f1")]).await;
    let context = Context::new("");

    let detail = client.bool_variation_detail("f1", Some(&context), false);
    assert!(detail.value);
    assert_eq!(detail.reason, Reason::Fallthrough);
    assert_eq!(detail.variation_index, Some(1));
}

#[tokio::test]
async fn test_wrong_type_applies_to_typed_accessors_only() {
    let flag = FeatureFlag::new("text", vec![FlagValue::String("on".into())]);
    let (client, _processor, _handle) = ready_client(vec![flag]).await;
    let context = Context::new("u1");

    assert!(!client.bool_variation("text", Some(&context), false));
    let detail = client.bool_variation_detail("text", Some(&context), false);
    assert_eq!(
        detail.reason,
        Reason::Error {
            error_kind: ErrorKind::WrongType
        }
    );

    // The structured-value accessor skips the type check entirely.
    let value = client.json_variation("text", Some(&context), FlagValue::Bool(false));
    assert_eq!(value, FlagValue::String("on".into()));
}

#[tokio::test]
async fn test_int_and_float_share_the_number_type() {
    let flag = FeatureFlag::new("limit", vec![FlagValue::Number(42.0)]);
    let (client, _processor, _handle) = ready_client(vec![flag]).await;
    let context = Context::new("u1");

    assert_eq!(client.int_variation("limit", Some(&context), 7), 42);
    assert_eq!(client.float_variation("limit", Some(&context), 0.5), 42.0);
    assert_eq!(
        client.string_variation("limit", Some(&context), "fallback"),
        "fallback"
    );
}

#[tokio::test]
async fn test_store_panic_is_contained_as_exception() {
    let handle = TestDataSourceHandle::new();
    let processor = RecordingEventProcessor::new();
    let options = FlagKitOptions::builder("srv_test-sdk-key")
        .data_source(handle.config())
        .data_store(Arc::new(PanickyStore))
        .event_processor(processor.clone())
        .build();
    let client = FlagKitClient::new(options).expect("client");
    handle.complete_start(true);
    let context = Context::new("u1");

    // The panic must not escape; the caller just gets the default.
    assert!(client.bool_variation("f1", Some(&context), true));
    let detail = client.bool_variation_detail("f1", Some(&context), false);
    assert_eq!(
        detail.reason,
        Reason::Error {
            error_kind: ErrorKind::Exception
        }
    );

    let events = processor.feature_events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.version.is_none()));
}

#[tokio::test]
async fn test_prerequisite_events_precede_primary_event() {
    let dep = bool_flag("dep");
    let mut top = bool_flag("top");
    top.prerequisites = vec![flagkit_server::model::Prerequisite {
        key: "dep".into(),
        variation: 1,
    }];
    let (client, processor, _handle) = ready_client(vec![dep, top]).await;
    let context = Context::new("u1");

    assert!(client.bool_variation("top", Some(&context), false));

    let events = processor.feature_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].key, "dep");
    assert_eq!(events[0].prereq_of.as_deref(), Some("top"));
    assert_eq!(events[1].key, "top");
    assert!(events[1].prereq_of.is_none());
}

#[tokio::test]
async fn test_default_substitution_preserves_reason() {
    let mut flag = bool_flag("f1");
    flag.on = false;
    flag.off_variation = None;
    let (client, processor, _handle) = ready_client(vec![flag]).await;
    let context = Context::new("u1");

    // The evaluator produced no variation; the caller's default wins,
    // but the reason stays Off rather than becoming an error.
    assert!(client.bool_variation("f1", Some(&context), true));
    let detail = client.bool_variation_detail("f1", Some(&context), true);
    assert!(detail.value);
    assert_eq!(detail.variation_index, None);
    assert_eq!(detail.reason, Reason::Off);

    let events = processor.feature_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].value, FlagValue::Bool(true));
}

#[tokio::test]
async fn test_exactly_one_primary_event_per_call() {
    let string_flag = FeatureFlag::new("text", vec![FlagValue::String("on".into())]);
    let (client, processor, _handle) = ready_client(vec![bool_flag("f1"), string_flag]).await;
    let context = Context::new("u1");

    processor.clear();
    client.bool_variation("f1", Some(&context), false);
    assert_eq!(processor.feature_events().len(), 1, "branch: success");

    processor.clear();
    client.bool_variation("nope", Some(&context), false);
    assert_eq!(processor.feature_events().len(), 1, "branch: not found");

    processor.clear();
    client.bool_variation("text", Some(&context), false);
    assert_eq!(processor.feature_events().len(), 1, "branch: wrong type");

    processor.clear();
    client.bool_variation("f1", None, false);
    assert_eq!(processor.feature_events().len(), 1, "branch: no context");
}

#[tokio::test]
async fn test_detail_accessors_for_each_type() {
    let flags = vec![
        FeatureFlag::new("b", vec![FlagValue::Bool(true)]),
        FeatureFlag::new("n", vec![FlagValue::Number(3.5)]),
        FeatureFlag::new("s", vec![FlagValue::String("hi".into())]),
        FeatureFlag::new("j", vec![FlagValue::Json(serde_json::json!({"a": 1}))]),
    ];
    let (client, _processor, _handle) = ready_client(flags).await;
    let context = Context::new("u1");

    let b = client.bool_variation_detail("b", Some(&context), false);
    assert!(b.value);
    assert_eq!(b.variation_index, Some(0));
    assert_eq!(b.reason, Reason::Fallthrough);

    assert_eq!(client.int_variation_detail("n", Some(&context), 0).value, 3);
    assert_eq!(client.float_variation_detail("n", Some(&context), 0.0).value, 3.5);
    assert_eq!(client.string_variation_detail("s", Some(&context), "").value, "hi");

    let j = client.json_variation_detail("j", Some(&context), FlagValue::Null);
    assert_eq!(j.value, FlagValue::Json(serde_json::json!({"a": 1})));
}

#[tokio::test]
async fn test_flag_updates_change_subsequent_evaluations() {
    let (client, _processor, handle) = ready_client(vec![bool_flag("f1")]).await;
    let context = Context::new("u1");

    assert!(client.bool_variation("f1", Some(&context), false));

    let mut updated = bool_flag("f1");
    updated.version = 2;
    updated.fallthrough.variation = Some(0);
    handle.push_flag(updated);

    assert!(!client.bool_variation("f1", Some(&context), true));
}

#[tokio::test]
async fn test_events_match_wire_shape() {
    let (client, processor, _handle) = ready_client(vec![bool_flag("f1")]).await;
    let context = Context::new("u1");
    client.bool_variation("f1", Some(&context), false);

    let events = processor.events();
    assert_eq!(events.len(), 1);
    let json = serde_json::to_value(&events[0]).expect("serializable");
    assert_eq!(json["kind"], "featureRequest");
    assert_eq!(json["key"], "f1");
    assert_eq!(json["value"], true);
    assert_eq!(json["defaultValue"], false);
    assert_eq!(json["context"]["key"], "u1");
    // The default factory attaches no reason.
    assert!(matches!(events[0], Event::FeatureRequest(ref e) if e.reason.is_none()));
}
