// Property tests: classification accepts anything and never panics

use proptest::prelude::*;
use serde_json::{json, Value};

use warden_core::analytics::normalize_message;
use warden_core::classifier::{ErrorClassifier, ErrorContext, ErrorType, RawError};
use warden_core::config::ClassifierConfig;

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        any::<f64>().prop_filter("finite", |f| f.is_finite()).prop_map(|f| json!(f)),
        ".{0,40}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map(
                prop_oneof![
                    Just("code".to_string()),
                    Just("message".to_string()),
                    Just("reason".to_string()),
                    Just("status".to_string()),
                    Just("error".to_string()),
                    Just("response".to_string()),
                    "[a-z]{1,8}",
                ],
                inner,
                0..5
            )
            .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn classify_never_panics_on_arbitrary_json(value in arb_json()) {
        let classifier = ErrorClassifier::new(ClassifierConfig::default());
        let report = classifier.handle_error(RawError::from_value(&value), ErrorContext::new(), true);

        prop_assert!(!report.message.is_empty());
        prop_assert!(!report.user_friendly_message.is_empty());
        prop_assert!(ErrorType::ALL.contains(&report.error_type));
        prop_assert_eq!(classifier.reports().len(), 1);
    }

    #[test]
    fn classify_never_panics_on_arbitrary_fields(
        message in ".{0,120}",
        code in proptest::option::of(any::<i32>()),
        status in proptest::option::of(any::<u16>()),
    ) {
        let mut raw = RawError::new(message);
        if let Some(code) = code {
            raw = raw.with_code(code);
        }
        if let Some(status) = status {
            raw = raw.with_status(status);
        }
        let classifier = ErrorClassifier::new(ClassifierConfig::default());
        let report = classifier.classify(&raw, &ErrorContext::new().user("prop"));

        // User rejections are terminal
        if report.error_type == ErrorType::Wallet && code == Some(4001) {
            prop_assert!(!report.retryable);
        }
        prop_assert!(classifier.reports().is_empty());
    }

    #[test]
    fn normalization_is_idempotent(message in ".{0,200}") {
        let once = normalize_message(&message);
        prop_assert_eq!(normalize_message(&once), once.clone());
        prop_assert!(once.len() <= 200);
    }
}
