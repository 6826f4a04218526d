use super::*;
use crate::clock::ManualClock;

fn keyed(topic: &str, key: &str, body: &str) -> ProducerRecord {
    ProducerRecord::new(topic, body.as_bytes().to_vec()).with_key(key.as_bytes().to_vec())
}

#[tokio::test]
async fn test_same_key_lands_on_same_partition() {
    let broker = InMemoryBroker::new().with_default_partitions(4);

    let first = broker.publish(keyed("orders", "customer-7", "a")).await.unwrap();
    let second = broker.publish(keyed("orders", "customer-7", "b")).await.unwrap();

    assert_eq!(first.partition, second.partition);
    assert_eq!(second.offset, first.offset + 1);
}

#[tokio::test]
async fn test_pinned_partition_out_of_range_is_rejected() {
    let broker = InMemoryBroker::new();
    broker.create_topic("orders-dlt", 1);

    let result = broker
        .publish(ProducerRecord::new("orders-dlt", vec![]).with_partition(3))
        .await;

    assert!(matches!(result, Err(BusError::UnknownPartition(_))));
}

#[tokio::test]
async fn test_record_timestamp_comes_from_clock() {
    let clock = Arc::new(ManualClock::new(5_000));
    let broker = InMemoryBroker::with_clock(clock.clone());

    broker.publish(keyed("orders", "k", "a")).await.unwrap();

    assert_eq!(broker.records("orders")[0].timestamp, 5_000);
}

#[tokio::test]
async fn test_consumer_delivers_in_offset_order() {
    let broker = InMemoryBroker::new();
    for body in ["a", "b", "c"] {
        broker.publish(keyed("orders", "k", body)).await.unwrap();
    }
    let consumer = broker.consumer(&["orders".to_string()]);

    let offsets: Vec<i64> = std::iter::from_fn(|| consumer.next_record())
        .map(|r| r.offset)
        .collect();

    assert_eq!(offsets, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_paused_partition_is_skipped_until_resumed() {
    let broker = InMemoryBroker::new();
    broker.publish(keyed("orders", "k", "a")).await.unwrap();
    let consumer = broker.consumer(&["orders".to_string()]);
    let tp = TopicPartition::new("orders", 0);

    consumer.pause(&tp).unwrap();
    assert!(consumer.next_record().is_none());

    consumer.resume(&tp).unwrap();
    assert_eq!(consumer.next_record().map(|r| r.offset), Some(0));
}

#[tokio::test]
async fn test_seek_rewinds_to_same_offset() {
    let broker = InMemoryBroker::new();
    broker.publish(keyed("orders", "k", "a")).await.unwrap();
    broker.publish(keyed("orders", "k", "b")).await.unwrap();
    let consumer = broker.consumer(&["orders".to_string()]);
    let tp = TopicPartition::new("orders", 0);

    let first = consumer.next_record().unwrap();
    consumer.seek(&tp, first.offset).unwrap();

    assert_eq!(consumer.next_record().unwrap(), first);
}

#[tokio::test]
async fn test_commit_tracks_next_offset() {
    let broker = InMemoryBroker::new();
    broker.publish(keyed("orders", "k", "a")).await.unwrap();
    let consumer = broker.consumer(&["orders".to_string()]);

    let record = consumer.poll().await.unwrap().unwrap();
    consumer.commit(&record).await.unwrap();

    assert_eq!(consumer.committed(&record.topic_partition()), Some(1));
}

#[tokio::test]
async fn test_revoke_drops_pause_state() {
    let broker = InMemoryBroker::new();
    let consumer = broker.consumer(&["orders".to_string()]);
    let tp = TopicPartition::new("orders", 0);

    consumer.pause(&tp).unwrap();
    consumer.revoke(std::slice::from_ref(&tp));

    assert!(!consumer.is_paused(&tp));
    assert!(consumer.assignment().is_empty());
    assert!(consumer.seek(&tp, 0).is_err());
}
