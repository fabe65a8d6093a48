//! Bridge tests against the in-process broker: publish pacing and
//! ordering, partial-failure reporting, at-least-once relay, and the
//! no-op sink configuration.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{sleep, timeout, Instant};

use sluice_core::application::{
    BackoffPolicy, ConsumerConfig, ConsumerSystem, ProducerConfig, ProducerSystem, PublishRequest,
};
use sluice_core::application::mailbox::mailbox;
use sluice_core::error::EngineError;
use sluice_core::application::PublishError;
use sluice_core::port::broker::mocks::{MockBroker, MockSendBehavior};
use sluice_core::port::time_provider::SystemTimeProvider;
use sluice_core::port::MessageBroker;
use sluice_infra_broker::ChannelBroker;

fn producer_config(name: &str) -> ProducerConfig {
    ProducerConfig {
        broker_url: "local:".to_string(),
        producer_name: name.to_string(),
    }
}

fn consumer_config(
    target: Option<sluice_core::application::Address<sluice_core::domain::WorkItem>>,
) -> ConsumerConfig {
    ConsumerConfig {
        group_id: "bridgeGroup".to_string(),
        broker_url: "local:".to_string(),
        topics: vec!["events".to_string()],
        relay_target: target,
    }
}

#[tokio::test(start_paused = true)]
async fn publish_is_paced_and_ordered_end_to_end() {
    let broker = Arc::new(ChannelBroker::new());
    let mut sub = broker
        .subscribe("receiver", &["events".to_string()])
        .await
        .unwrap();

    let broker_dyn: Arc<dyn MessageBroker> = broker.clone();
    let producers = ProducerSystem::new(broker_dyn);
    producers.start(producer_config("producer1")).unwrap();

    // 25 messages at 10 msgs/s: the batch cannot finish before 2.4s
    let started = Instant::now();
    let receipt = producers
        .publish(
            "producer1",
            PublishRequest {
                topic: "events".to_string(),
                messages: (0..25u8).map(|n| Bytes::from(vec![n])).collect(),
                throughput: 10,
            },
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(receipt.sent, 25);
    assert!(
        elapsed >= Duration::from_millis(2400),
        "batch finished too fast: {:?}",
        elapsed
    );

    // Broker receipt order equals input order
    for n in 0..25u8 {
        let delivery = timeout(Duration::from_millis(50), sub.next())
            .await
            .expect("timed out")
            .expect("subscription closed");
        assert_eq!(delivery.payload, Bytes::from(vec![n]));
        delivery.ack.ack();
    }
}

#[tokio::test(start_paused = true)]
async fn failed_publish_reports_messages_already_sent() {
    let broker = Arc::new(MockBroker::with_behavior(MockSendBehavior::FailAfter(7)));
    let broker_dyn: Arc<dyn MessageBroker> = broker.clone();
    let producers = ProducerSystem::new(broker_dyn)
        .with_backoff(BackoffPolicy::new(Duration::from_millis(1), 2.0, 2));
    producers.start(producer_config("producer1")).unwrap();

    let err = producers
        .publish(
            "producer1",
            PublishRequest {
                topic: "events".to_string(),
                messages: (0..10u8).map(|n| Bytes::from(vec![n])).collect(),
                throughput: 100,
            },
        )
        .await
        .unwrap_err();

    match err {
        EngineError::Publish(PublishError::BrokerUnavailable { sent, total, .. }) => {
            assert_eq!(sent, 7);
            assert_eq!(total, 10);
        }
        other => panic!("expected BrokerUnavailable, got {:?}", other),
    }
    assert_eq!(broker.sent_count(), 7);
}

#[tokio::test]
async fn every_message_is_relayed_despite_transient_congestion() {
    let broker = Arc::new(ChannelBroker::new());
    let broker_dyn: Arc<dyn MessageBroker> = broker.clone();
    let consumers = ConsumerSystem::new(broker_dyn, Arc::new(SystemTimeProvider)).with_backoff(
        BackoffPolicy::new(Duration::from_millis(5), 2.0, 5),
        Duration::from_millis(25),
    );

    // Destination with a single slot: most relays hit congestion first
    let (addr, mut mb) = mailbox(1);
    let consumer = consumers
        .start(consumer_config(Some(addr)))
        .await
        .unwrap();

    for n in 0..8u8 {
        broker.send("events", Bytes::from(vec![n])).await.unwrap();
    }

    // Slowly drain the destination; retries must land every message
    let mut received = Vec::new();
    for _ in 0..8 {
        let item = timeout(Duration::from_secs(2), mb.recv())
            .await
            .expect("relay stalled")
            .expect("destination closed");
        received.push(item.payload[0]);
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received, (0..8).collect::<Vec<u8>>());

    let report = consumer.stop(Duration::from_millis(500)).await;
    assert_eq!(report.relayed, 8);
    assert_eq!(report.relay_failures, 0);
    assert_eq!(broker.acked_count(), 8);
}

#[tokio::test]
async fn unset_destination_consumes_and_acks_without_relaying() {
    let broker = Arc::new(ChannelBroker::new());
    let broker_dyn: Arc<dyn MessageBroker> = broker.clone();
    let consumers = ConsumerSystem::new(broker_dyn, Arc::new(SystemTimeProvider));

    let consumer = consumers.start(consumer_config(None)).await.unwrap();

    for n in 0..5u8 {
        broker.send("events", Bytes::from(vec![n])).await.unwrap();
    }
    sleep(Duration::from_millis(100)).await;

    // All acknowledged, nothing relayed, nothing failed
    assert_eq!(broker.acked_count(), 5);
    let report = consumer.stop(Duration::from_millis(500)).await;
    assert_eq!(report.acked, 5);
    assert_eq!(report.relayed, 0);
    assert_eq!(report.relay_failures, 0);
}

#[tokio::test]
async fn independent_consumers_do_not_interfere() {
    let broker = Arc::new(ChannelBroker::new());
    let broker_dyn: Arc<dyn MessageBroker> = broker.clone();
    let consumers = ConsumerSystem::new(broker_dyn, Arc::new(SystemTimeProvider));

    let (first_addr, mut first_mb) = mailbox(16);
    let (second_addr, mut second_mb) = mailbox(16);

    let first = consumers
        .start(ConsumerConfig {
            group_id: "g1".to_string(),
            broker_url: "local:".to_string(),
            topics: vec!["events".to_string()],
            relay_target: Some(first_addr),
        })
        .await
        .unwrap();
    let second = consumers
        .start(ConsumerConfig {
            group_id: "g2".to_string(),
            broker_url: "local:".to_string(),
            topics: vec!["events".to_string()],
            relay_target: Some(second_addr),
        })
        .await
        .unwrap();

    broker.send("events", Bytes::from_static(b"x")).await.unwrap();

    let a = timeout(Duration::from_millis(200), first_mb.recv())
        .await
        .unwrap()
        .unwrap();
    let b = timeout(Duration::from_millis(200), second_mb.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a.payload, b.payload);

    first.stop(Duration::from_millis(200)).await;
    second.stop(Duration::from_millis(200)).await;
}
