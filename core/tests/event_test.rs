use std::time::Duration;

use cortex_core::event::{Event, EventBus};
use cortex_core::Result;

// Helper to create a distinguishable test event
fn make_event(tag: &str) -> Event {
    Event::RoundCompleted {
        gm: tag.to_string(),
    }
}

fn tag_of(event: &Event) -> String {
    match event {
        Event::RoundCompleted { gm } => gm.clone(),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn subscribe_and_publish_basic() -> Result<()> {
    let bus = EventBus::new().await?;
    let (_sub_id, mut rx) = bus.subscribe("topic.test".to_string()).await?;

    bus.publish("topic.test", make_event("e1")).await?;

    let received = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("timeout")
        .expect("channel closed");
    assert_eq!(tag_of(&received), "e1");
    Ok(())
}

#[tokio::test]
async fn delivery_preserves_publication_order() -> Result<()> {
    let bus = EventBus::new().await?;
    let (_sub_id, mut rx) = bus.subscribe("topic.order".to_string()).await?;

    for i in 0..20 {
        bus.publish("topic.order", make_event(&format!("e{}", i)))
            .await?;
    }
    for i in 0..20 {
        let received = rx.recv().await.expect("channel closed");
        assert_eq!(tag_of(&received), format!("e{}", i));
    }
    Ok(())
}

#[tokio::test]
async fn unsubscribe_stops_receiving_events() -> Result<()> {
    let bus = EventBus::new().await?;
    let (sub_id, mut rx) = bus.subscribe("topic.unsub".to_string()).await?;

    bus.publish("topic.unsub", make_event("before")).await?;
    bus.unsubscribe(&sub_id).await?;
    bus.publish("topic.unsub", make_event("after")).await?;

    let first = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("timeout")
        .expect("channel closed");
    assert_eq!(tag_of(&first), "before");

    // Should NOT receive the second event (channel should close or timeout)
    let second = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(
        second.is_err() || second.unwrap().is_none(),
        "should not receive after unsubscribe"
    );
    Ok(())
}

#[tokio::test]
async fn publish_to_empty_topic_returns_zero() -> Result<()> {
    let bus = EventBus::new().await?;
    let delivered = bus.publish("topic.empty", make_event("orphan")).await?;
    assert_eq!(delivered, 0, "no subscribers should mean zero delivery");
    Ok(())
}

#[tokio::test]
async fn multiple_subscribers_on_same_topic() -> Result<()> {
    let bus = EventBus::new().await?;
    let (_sub1, mut rx1) = bus.subscribe("topic.multi".to_string()).await?;
    let (_sub2, mut rx2) = bus.subscribe("topic.multi".to_string()).await?;

    let delivered = bus.publish("topic.multi", make_event("multi")).await?;
    assert_eq!(delivered, 2, "both subscribers should receive");

    assert_eq!(tag_of(&rx1.recv().await.expect("rx1 closed")), "multi");
    assert_eq!(tag_of(&rx2.recv().await.expect("rx2 closed")), "multi");
    Ok(())
}

#[tokio::test]
async fn stats_track_published_and_delivered() -> Result<()> {
    let bus = EventBus::new().await?;
    let (_sub_id, mut rx) = bus.subscribe("topic.stats".to_string()).await?;

    for i in 0..10 {
        bus.publish("topic.stats", make_event(&format!("s{}", i)))
            .await?;
    }

    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }

    let stats = bus.get_stats("topic.stats").expect("stats");
    assert_eq!(stats.total_published, 10);
    assert_eq!(stats.total_delivered, 10);
    assert_eq!(stats.active_subscriptions, 1);
    assert_eq!(count, 10);
    Ok(())
}

#[tokio::test]
async fn notify_after_defers_delivery() -> Result<()> {
    let bus = std::sync::Arc::new(EventBus::new().await?);
    let (_sub_id, mut rx) = bus.subscribe("topic.timer".to_string()).await?;

    bus.notify_after(
        "topic.timer".to_string(),
        Event::RoundTimedOut {
            gm: "gm".to_string(),
            round_id: 7,
        },
        Duration::from_millis(100),
    );

    // Nothing arrives before the delay elapses.
    let early = tokio::time::timeout(Duration::from_millis(30), rx.recv()).await;
    assert!(early.is_err(), "timer event must not fire early");

    let received = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("timeout")
        .expect("channel closed");
    match received {
        Event::RoundTimedOut { gm, round_id } => {
            assert_eq!(gm, "gm");
            assert_eq!(round_id, 7);
        }
        other => panic!("unexpected event {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn shutdown_clears_subscriptions() -> Result<()> {
    let bus = EventBus::new().await?;
    let (_sub_id, mut rx) = bus.subscribe("topic.shut".to_string()).await?;

    bus.shutdown().await?;

    // After shutdown, publish should not crash but also no delivery
    let delivered = bus.publish("topic.shut", make_event("post_shut")).await?;
    assert_eq!(delivered, 0, "subscriptions cleared after shutdown");

    let r = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(r.is_err() || r.unwrap().is_none());
    Ok(())
}
