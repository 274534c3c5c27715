//! End-to-end fan-out behaviour through the facade.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fabric_core::{
    CancellationToken, ChannelSubscriber, DeliveryOutcome, DeterministicSynthesizer,
    DispatchFailure, DispatchOptions, Fabric, MemorySink, NoopSubscriber, NotifyError,
    Operation, OperationOutcome, RecordHealth, Subscriber, SubscriberName, SyncNotice,
};
use serde_json::json;

enum Behaviour {
    Ack(f64),
    Fail,
    Stall,
    Panic,
}

struct TestSubscriber {
    name: SubscriberName,
    behaviour: Behaviour,
}

impl TestSubscriber {
    fn arc(name: &str, behaviour: Behaviour) -> Arc<dyn Subscriber> {
        Arc::new(Self {
            name: SubscriberName::parse(name).unwrap(),
            behaviour,
        })
    }
}

#[async_trait]
impl Subscriber for TestSubscriber {
    fn name(&self) -> &SubscriberName {
        &self.name
    }

    async fn notify(&self, _notice: &SyncNotice) -> Result<f64, NotifyError> {
        match self.behaviour {
            Behaviour::Ack(strength) => Ok(strength),
            Behaviour::Fail => Err(NotifyError::Rejected("module offline".into())),
            Behaviour::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(1.0)
            }
            Behaviour::Panic => panic!("bridge exploded"),
        }
    }
}

fn fabric(sink: Arc<MemorySink>) -> Fabric {
    Fabric::builder()
        .synthesizer(Arc::new(DeterministicSynthesizer::default()))
        .sink(sink)
        .build()
        .unwrap()
}

#[tokio::test]
async fn register_amplify_synchronize_example() {
    let sink = Arc::new(MemorySink::new());
    let fabric = Fabric::builder().sink(sink.clone()).build().unwrap();
    fabric.subscribe("entity", TestSubscriber::arc("moduleA.componentB", Behaviour::Ack(0.9))).unwrap();
    fabric.subscribe("entity", TestSubscriber::arc("moduleA.componentC", Behaviour::Fail)).unwrap();
    fabric.subscribe("entity", TestSubscriber::arc("moduleD.bridge", Behaviour::Ack(0.4))).unwrap();

    fabric.register("a1", json!({"x": 1}), "primary").unwrap();
    let registered = fabric.get_state("a1").unwrap();
    assert_eq!(registered.context, "primary");
    let coherence = registered.metrics["coherence"];
    assert!((0.85..=1.0).contains(&coherence));

    let amplified = fabric.amplify("a1", json!({"x": 2}), "secondary").unwrap();
    assert_eq!(amplified.context, "secondary");
    let drifted = amplified.metrics["coherence"];
    assert!(drifted >= (coherence * 0.9).clamp(0.0, 1.0) - 1e-12);
    assert!(drifted <= (coherence * 1.1).clamp(0.0, 1.0) + 1e-12);

    let synced = fabric.synchronize("a1", json!({"x": 3}), "secondary").await.unwrap();
    let dispatch = &synced.dispatch;
    assert_eq!(dispatch.reports.len(), 3);
    assert_eq!(dispatch.failed_count(), 1);
    assert_eq!(dispatch.delivered_count(), 2);
    for report in dispatch.delivered() {
        let strength = report.outcome.strength();
        assert!((0.0..=1.0).contains(&strength));
    }

    let ops: Vec<Operation> = sink.records().iter().map(|r| r.operation).collect();
    assert_eq!(
        ops,
        vec![
            Operation::Register,
            Operation::Amplify,
            Operation::Amplify,
            Operation::Synchronize
        ]
    );
}

#[tokio::test]
async fn one_failing_subscriber_is_isolated() {
    let fabric = fabric(Arc::new(MemorySink::new()));
    for (name, behaviour) in [
        ("peer.one", Behaviour::Ack(1.0)),
        ("peer.two", Behaviour::Fail),
        ("peer.three", Behaviour::Ack(0.7)),
    ] {
        fabric.subscribe("entity", TestSubscriber::arc(name, behaviour)).unwrap();
    }

    let before = fabric.register("a1", json!({"x": 1}), "primary").unwrap();
    let synced = fabric.synchronize("a1", json!({"x": 2}), "secondary").await.unwrap();

    let targets: Vec<&str> = synced.dispatch.reports.iter().map(|r| r.target.as_str()).collect();
    assert_eq!(targets, vec!["peer.one", "peer.two", "peer.three"]);
    assert_eq!(
        synced.dispatch.report_for("peer.two").unwrap().outcome,
        DeliveryOutcome::Failed {
            failure: DispatchFailure::Rejected("module offline".into())
        }
    );

    let stored = fabric.get_state("a1").unwrap();
    assert_eq!(stored.payload["x"], 2);
    assert_eq!(stored.context, "secondary");
    assert!(stored.updated_at > before.updated_at);
    assert_eq!(stored.health, RecordHealth::Nominal);
    assert_eq!(fabric.events().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn stalled_subscriber_times_out() {
    let fabric = fabric(Arc::new(MemorySink::new()));
    fabric.subscribe("entity", TestSubscriber::arc("slow.peer", Behaviour::Stall)).unwrap();
    fabric.subscribe("entity", TestSubscriber::arc("fast.peer", Behaviour::Ack(1.0))).unwrap();
    fabric.register("a1", json!({}), "").unwrap();

    let result = fabric.broadcast("a1").await.unwrap();
    let failure = result.report_for("slow.peer").unwrap().outcome.failure().cloned();
    assert_eq!(failure, Some(DispatchFailure::Timeout));
    assert_eq!(failure.unwrap().to_string(), "timeout");
    assert!(result.report_for("fast.peer").unwrap().outcome.is_delivered());
    assert_eq!(fabric.stats().dispatch.timeouts, 1);
}

#[tokio::test]
async fn panicking_subscriber_triggers_recovery() {
    let sink = Arc::new(MemorySink::new());
    let fabric = fabric(sink.clone());
    fabric.subscribe("entity", TestSubscriber::arc("fragile.bridge", Behaviour::Panic)).unwrap();
    fabric.subscribe("entity", TestSubscriber::arc("steady.peer", Behaviour::Ack(1.0))).unwrap();
    fabric.register("a1", json!({"x": 1}), "primary").unwrap();

    let synced = fabric.synchronize("a1", json!({"x": 2}), "primary").await.unwrap();
    assert!(synced.dispatch.faulted());
    assert!(synced.dispatch.report_for("steady.peer").unwrap().outcome.is_delivered());
    assert!(synced.record.is_degraded());
    assert_eq!(synced.record.payload["x"], 2);
    assert_eq!(fabric.get_state("a1").unwrap(), synced.record);

    let last = sink.records().pop().unwrap();
    assert_eq!(last.operation, Operation::Synchronize);
    assert_eq!(last.outcome, OperationOutcome::Recovered);
    assert_eq!(fabric.stats().records.degraded, 1);
}

#[tokio::test]
async fn cancellation_never_rolls_back_the_update() {
    let fabric = fabric(Arc::new(MemorySink::new()));
    fabric.subscribe("entity", TestSubscriber::arc("slow.peer", Behaviour::Stall)).unwrap();
    fabric.register("a1", json!({"x": 1}), "primary").unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let options = DispatchOptions::new().with_cancel(token);
    let synced = fabric
        .synchronize_with("a1", json!({"x": 2}), "secondary", &options)
        .await
        .unwrap();

    assert_eq!(
        synced.dispatch.reports[0].outcome.failure(),
        Some(&DispatchFailure::Cancelled)
    );
    assert_eq!(fabric.get_state("a1").unwrap().payload["x"], 2);
}

#[tokio::test]
async fn channel_subscriber_sees_the_committed_snapshot() {
    let fabric = fabric(Arc::new(MemorySink::new()));
    let (subscriber, mut rx) =
        ChannelSubscriber::new(SubscriberName::parse("mirror.feed").unwrap(), 8);
    fabric.subscribe("entity", Arc::new(subscriber)).unwrap();
    fabric.register("a1", json!({"x": 1}), "primary").unwrap();

    let synced = fabric.synchronize("a1", json!({"x": 2}), "secondary").await.unwrap();
    let notice = rx.recv().await.unwrap();
    assert_eq!(notice.snapshot.revision, synced.record.revision);
    assert_eq!(notice.snapshot.context, "secondary");
    assert_eq!(notice.snapshot.signature, synced.record.signature);
    notice.snapshot.verify().unwrap();
}

#[tokio::test]
async fn kinds_only_reach_their_own_subscribers() {
    let fabric = fabric(Arc::new(MemorySink::new()));
    let sensor_peer = Arc::new(NoopSubscriber::new(SubscriberName::parse("sensor.peer").unwrap()));
    fabric.subscribe("sensor", sensor_peer).unwrap();
    fabric.register_as("sensor", "s1", json!({}), "").unwrap();
    fabric.register("e1", json!({}), "").unwrap();

    assert_eq!(fabric.broadcast("s1").await.unwrap().reports.len(), 1);
    assert!(fabric.broadcast("e1").await.unwrap().reports.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_amplifies_serialize() {
    const N: i64 = 32;
    let fabric = Arc::new(fabric(Arc::new(MemorySink::new())));
    let initial = fabric.register("a1", json!({"writer": -1}), "primary").unwrap();

    let handles: Vec<_> = (0..N)
        .map(|i| {
            let fabric = Arc::clone(&fabric);
            tokio::spawn(async move {
                fabric
                    .synchronize("a1", json!({"writer": i}), "primary")
                    .await
                    .map(|s| s.record)
            })
        })
        .collect();

    let mut accepted = Vec::new();
    for handle in handles {
        accepted.push(handle.await.unwrap().unwrap());
    }
    accepted.sort_by_key(|r| r.revision);

    // Every call committed exactly once, in one total order
    let revisions: HashSet<u64> = accepted.iter().map(|r| r.revision).collect();
    assert_eq!(revisions.len(), N as usize);
    assert!(accepted
        .windows(2)
        .all(|w| w[0].updated_at < w[1].updated_at));
    assert!(accepted[0].updated_at > initial.updated_at);

    let last = accepted.last().unwrap();
    let stored = fabric.get_state("a1").unwrap();
    assert_eq!(stored.revision, initial.revision + N as u64);
    assert_eq!(stored.payload, last.payload);
    let writer = stored.payload["writer"].as_i64().unwrap();
    assert!((0..N).contains(&writer));
}
