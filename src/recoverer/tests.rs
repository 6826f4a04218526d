use super::*;
use crate::bus::{Headers, MockPublisher};
use crate::clock::ManualClock;
use crate::config::{HopRetryMode, RetryTopicConfig};
use crate::orchestrator::build_chain;
use crate::resolver::DefaultDestinationTopicResolver;

const T0: i64 = 1_700_000_000_000;

struct Fixture {
    recoverer: DeadLetterPublishingRecoverer,
    publisher: Arc<MockPublisher>,
    clock: Arc<ManualClock>,
}

fn fixture(config: RetryTopicConfig) -> Fixture {
    let resolver = DefaultDestinationTopicResolver::from_chains([build_chain(&config).unwrap()]).unwrap();
    let publisher = Arc::new(MockPublisher::new());
    let clock = Arc::new(ManualClock::new(T0));
    let recoverer = DeadLetterPublishingRecoverer::new(Arc::new(resolver), publisher.clone(), clock.clone())
        .with_publish_retry(PublishRetryConfig {
            max_retries: 2,
            min_delay_ms: 1,
            max_delay_ms: 2,
        });
    Fixture {
        recoverer,
        publisher,
        clock,
    }
}

fn record(topic: &str, offset: i64, headers: Headers) -> ConsumerRecord {
    ConsumerRecord {
        topic: topic.to_string(),
        partition: 2,
        offset,
        key: Some(b"customer-7".to_vec()),
        headers,
        payload: b"order-body".to_vec(),
        timestamp: T0 - 10,
    }
}

fn failure() -> FailureContext {
    FailureContext::new(ListenerError::new("PaymentDeclined", "card expired"))
}

/// Feed each published record back in as the next delivery.
fn as_delivery(published: &ProducerRecord, offset: i64) -> ConsumerRecord {
    ConsumerRecord {
        topic: published.topic.clone(),
        partition: 0,
        offset,
        key: published.key.clone(),
        headers: published.headers.clone(),
        payload: published.payload.clone(),
        timestamp: T0,
    }
}

#[tokio::test]
async fn test_main_failure_goes_to_first_retry_with_due_time() {
    let f = fixture(RetryTopicConfig::fixed("orders", 3, 1000));

    let outcome = f
        .recoverer
        .recover(&record("orders", 41, Headers::new()), &failure())
        .await
        .unwrap();

    let (destination, due_timestamp) = match outcome {
        RecoveryOutcome::Republished {
            destination,
            due_timestamp,
            ..
        } => (destination, due_timestamp),
        other => panic!("expected republish, got {:?}", other),
    };
    assert_eq!(destination.topic, "orders-retry-0");
    assert_eq!(due_timestamp, T0 + 1000);

    let published = f.publisher.take_published().await;
    let headers = &published[0].headers;
    assert_eq!(published[0].key.as_deref(), Some(&b"customer-7"[..]));
    assert_eq!(published[0].payload, b"order-body".to_vec());
    assert_eq!(published[0].partition, None);
    assert_eq!(headers.get_u32(ATTEMPTS), Some(1));
    assert_eq!(headers.get_u32(HOP_ATTEMPTS), Some(0));
    assert_eq!(headers.get_i64(BACKOFF_DUE), Some(T0 + 1000));
    assert_eq!(headers.get_str(ORIGIN_TOPIC), Some("orders"));
    assert_eq!(headers.get_i64(ORIGINAL_PARTITION), Some(2));
    assert_eq!(headers.get_i64(ORIGINAL_OFFSET), Some(41));
    assert_eq!(headers.get_i64(ORIGINAL_TIMESTAMP), Some(T0 - 10));
    assert_eq!(headers.get_str(EXCEPTION_TYPE), Some("PaymentDeclined"));
    assert_eq!(headers.get_str(EXCEPTION_MESSAGE), Some("card expired"));
    assert!(!headers.contains(DEAD_LETTER));
}

#[tokio::test]
async fn test_four_failures_end_on_dlt_with_four_attempts() {
    let f = fixture(RetryTopicConfig::fixed("orders", 3, 1000));
    let mut current = record("orders", 0, Headers::new());
    let mut path = Vec::new();

    for offset in 1..=4 {
        let outcome = f.recoverer.recover(&current, &failure()).await.unwrap();
        path.push(outcome.destination().topic.clone());
        let published = f.publisher.take_published().await;
        current = as_delivery(&published[0], offset);
    }

    assert_eq!(
        path,
        vec!["orders-retry-0", "orders-retry-1", "orders-retry-2", "orders-dlt"]
    );
    assert_eq!(current.headers.get_u32(ATTEMPTS), Some(4));
    assert_eq!(current.headers.get_str(DEAD_LETTER), Some("true"));
    assert!(!current.headers.contains(BACKOFF_DUE));
    // Provenance still points at the first delivery.
    assert_eq!(current.headers.get_str(ORIGIN_TOPIC), Some("orders"));
    assert_eq!(current.headers.get_i64(ORIGINAL_PARTITION), Some(2));
}

#[tokio::test]
async fn test_failure_on_dlt_is_exhausted_and_not_republished() {
    let f = fixture(RetryTopicConfig::fixed("orders", 1, 1000));
    let mut headers = Headers::new();
    headers.insert_i64(ATTEMPTS, 2);

    let result = f
        .recoverer
        .recover(&record("orders-dlt", 7, headers), &failure())
        .await;

    assert!(matches!(
        result,
        Err(RecoveryError::ExhaustedChain { ref origin, attempts: 3, .. }) if origin == "orders"
    ));
    assert_eq!(f.publisher.attempt_count().await, 0);
}

#[tokio::test]
async fn test_attempts_stay_on_hop_until_max_then_advance() {
    let config = RetryTopicConfig::fixed("orders", 2, 1000).with_hop_attempts(3, HopRetryMode::Republish);
    let f = fixture(config);
    let mut current = record("orders-retry-0", 0, Headers::new());
    let mut seen = Vec::new();

    for offset in 1..=3 {
        f.recoverer.recover(&current, &failure()).await.unwrap();
        let published = f.publisher.take_published().await;
        seen.push((
            published[0].topic.clone(),
            published[0].headers.get_u32(HOP_ATTEMPTS),
        ));
        current = as_delivery(&published[0], offset);
    }

    assert_eq!(
        seen,
        vec![
            ("orders-retry-0".to_string(), Some(1)),
            ("orders-retry-0".to_string(), Some(2)),
            ("orders-retry-1".to_string(), Some(0)),
        ]
    );
}

#[tokio::test]
async fn test_not_retryable_kind_skips_to_dlt() {
    let config = RetryTopicConfig::fixed("orders", 3, 1000).with_not_retryable("DeserializationError");
    let f = fixture(config);
    let failure = FailureContext::new(ListenerError::new("DeserializationError", "bad json"));

    let outcome = f
        .recoverer
        .recover(&record("orders", 0, Headers::new()), &failure)
        .await
        .unwrap();

    assert!(matches!(outcome, RecoveryOutcome::DeadLettered { ref destination, .. } if destination.topic == "orders-dlt"));
}

#[tokio::test]
async fn test_fatal_error_skips_to_dlt() {
    let f = fixture(RetryTopicConfig::fixed("orders", 3, 1000));
    let failure = FailureContext::new(ListenerError::fatal("Validation", "missing id"));

    let outcome = f
        .recoverer
        .recover(&record("orders-retry-0", 0, Headers::new()), &failure)
        .await
        .unwrap();

    assert_eq!(outcome.destination().topic, "orders-dlt");
}

#[tokio::test]
async fn test_timeout_routes_to_dlt() {
    let config = RetryTopicConfig::fixed("orders", 3, 1000).with_timeout_ms(5000);
    let f = fixture(config);
    let mut headers = Headers::new();
    headers.insert_i64(ORIGINAL_TIMESTAMP, T0 - 10);
    headers.insert_i64(ATTEMPTS, 1);

    f.clock.advance(Duration::from_millis(5000));
    let outcome = f
        .recoverer
        .recover(&record("orders-retry-0", 0, headers), &failure())
        .await
        .unwrap();

    assert_eq!(outcome.destination().topic, "orders-dlt");
}

#[tokio::test]
async fn test_longest_delay_saturates_due_time() {
    let config = RetryTopicConfig::fixed("orders", 1, crate::config::MAX_DURATION_MS)
        .with_timeout_ms(crate::config::MAX_DURATION_MS);
    let f = fixture(config);

    let outcome = f
        .recoverer
        .recover(&record("orders", 3, Headers::new()), &failure())
        .await
        .unwrap();

    match outcome {
        RecoveryOutcome::Republished {
            destination,
            due_timestamp,
            ..
        } => {
            assert_eq!(destination.topic, "orders-retry-0");
            assert_eq!(due_timestamp, i64::MAX);
        }
        other => panic!("expected republish, got {:?}", other),
    }
    let published = f.publisher.take_published().await;
    assert_eq!(published[0].headers.get_i64(BACKOFF_DUE), Some(i64::MAX));
}

#[tokio::test]
async fn test_same_as_source_pins_partition() {
    let config = RetryTopicConfig::fixed("orders", 1, 1000)
        .with_partition_assignment(PartitionAssignment::SameAsSource);
    let f = fixture(config);

    f.recoverer
        .recover(&record("orders", 0, Headers::new()), &failure())
        .await
        .unwrap();

    assert_eq!(f.publisher.take_published().await[0].partition, Some(2));
}

#[tokio::test]
async fn test_transient_publish_failure_is_retried() {
    let f = fixture(RetryTopicConfig::fixed("orders", 1, 1000));
    f.publisher.fail_next(2).await;

    let outcome = f
        .recoverer
        .recover(&record("orders", 0, Headers::new()), &failure())
        .await;

    assert!(outcome.is_ok());
    assert_eq!(f.publisher.attempt_count().await, 3);
    assert_eq!(f.publisher.published_count().await, 1);
}

#[tokio::test]
async fn test_persistent_publish_failure_is_recovery_failed() {
    let f = fixture(RetryTopicConfig::fixed("orders", 1, 1000));
    f.publisher.set_fail_on_publish(true).await;

    let result = f
        .recoverer
        .recover(&record("orders", 0, Headers::new()), &failure())
        .await;

    assert!(matches!(
        result,
        Err(RecoveryError::RecoveryFailed { ref topic, .. }) if topic == "orders-retry-0"
    ));
    assert_eq!(f.publisher.attempt_count().await, 3);
}

#[tokio::test]
async fn test_unknown_topic_is_resolve_error() {
    let f = fixture(RetryTopicConfig::fixed("orders", 1, 1000));

    let result = f
        .recoverer
        .recover(&record("payments", 0, Headers::new()), &failure())
        .await;

    assert!(matches!(
        result,
        Err(RecoveryError::Resolve(ResolverError::UnknownTopic(_)))
    ));
}
