use super::*;
use rdkafka::message::Headers as _;

#[test]
fn test_publisher_config() {
    let config = KafkaClientConfig::publisher("localhost:9092");
    assert_eq!(config.bootstrap_servers, "localhost:9092");
    assert!(config.group_id.is_none());
    assert_eq!(config.message_timeout, Duration::from_secs(5));
}

#[test]
fn test_subscriber_config() {
    let config = KafkaClientConfig::subscriber("localhost:9092", "orders-listener");
    assert_eq!(config.group_id, Some("orders-listener".to_string()));

    let client = config.build_consumer_config();
    assert_eq!(client.get("group.id"), Some("orders-listener"));
    assert_eq!(client.get("enable.auto.commit"), Some("false"));
    assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
}

#[test]
fn test_sasl_config() {
    let config = KafkaClientConfig::publisher("localhost:9092").with_sasl("user", "pass", "SCRAM-SHA-256");

    assert_eq!(config.sasl_username, Some("user".to_string()));
    assert_eq!(config.sasl_password, Some("pass".to_string()));
    assert_eq!(config.sasl_mechanism, Some("SCRAM-SHA-256".to_string()));
    assert_eq!(config.security_protocol, Some("SASL_SSL".to_string()));

    let client = config.build_producer_config();
    assert_eq!(client.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
    assert_eq!(client.get("security.protocol"), Some("SASL_SSL"));
}

#[test]
fn test_producer_config_uses_message_timeout() {
    let config = KafkaClientConfig::publisher("localhost:9092").with_message_timeout(Duration::from_millis(1500));
    let client = config.build_producer_config();

    assert_eq!(client.get("message.timeout.ms"), Some("1500"));
    assert_eq!(client.get("acks"), Some("all"));
    assert_eq!(client.get("group.id"), None);
}

#[test]
fn test_ssl_ca_and_protocol() {
    let config = KafkaClientConfig::publisher("localhost:9092")
        .with_security_protocol("SSL")
        .with_ssl_ca("/etc/ssl/ca.pem");
    let client = config.build_consumer_config();

    assert_eq!(client.get("security.protocol"), Some("SSL"));
    assert_eq!(client.get("ssl.ca.location"), Some("/etc/ssl/ca.pem"));
}

#[test]
fn test_from_kafka_config() {
    let kafka = KafkaConfig {
        bootstrap_servers: "broker:9092".to_string(),
        group_id: Some("billing".to_string()),
        message_timeout_ms: 2000,
        ..Default::default()
    };

    let config = KafkaClientConfig::from(&kafka);

    assert_eq!(config.bootstrap_servers, "broker:9092");
    assert_eq!(config.group_id, Some("billing".to_string()));
    assert_eq!(config.message_timeout, Duration::from_millis(2000));
}

#[test]
fn test_headers_convert_in_order() {
    let mut headers = Headers::new();
    headers.insert_str("retry-topic-attempts", "2");
    headers.insert("trace", vec![0xde, 0xad]);

    let kafka = to_kafka_headers(&headers);

    assert_eq!(kafka.count(), 2);
    let first = kafka.get(0);
    assert_eq!(first.key, "retry-topic-attempts");
    assert_eq!(first.value, Some(b"2".as_slice()));
    let second = kafka.get(1);
    assert_eq!(second.key, "trace");
    assert_eq!(second.value, Some([0xde, 0xad].as_slice()));
}

#[test]
fn test_source_requires_group_id() {
    let manager = ConsumerBackoffManager::new(
        std::sync::Arc::new(crate::clock::SystemClock),
        &crate::config::BackoffManagerConfig::default(),
    );
    let config = KafkaClientConfig::publisher("localhost:9092");

    let result = KafkaRecordSource::new(&config, &["orders".to_string()], manager);

    assert!(matches!(result, Err(BusError::Consumer(_))));
}
