use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use super::*;
use crate::error::WatchError;
use crate::fixtures::{self, MockTransport, TransportOp};
use crate::identity::ConsumerIdentity;
use crate::projection::{project, NodeStatusEntry};
use crate::store::ClusterStore;

fn setup() -> (MockTransport, ClusterStore, WatchManager, TerminationRx) {
    let transport = MockTransport::new();
    let store = ClusterStore::new();
    let (manager, terminations) = WatchManager::new(Arc::new(transport.clone()), store.clone());
    (transport, store, manager, terminations)
}

async fn next_termination(terminations: &mut TerminationRx) -> Result<WatchError> {
    tokio::time::timeout(Duration::from_secs(5), terminations.recv())
        .await
        .context("timeout waiting for termination")?
        .context("termination channel closed")
}

#[tokio::test]
async fn watch_with_empty_identity_is_a_noop() -> Result<()> {
    let (transport, store, mut manager, _terminations) = setup();

    let handle = manager.watch(&ConsumerIdentity::default()).await?;

    assert!(handle.is_noop(), "expected a no-op handle for an empty identity");
    assert!(!handle.cancel(), "expected cancelling a no-op handle to do nothing");
    assert!(matches!(manager.state(), WatchState::Idle), "expected manager to remain idle");
    assert_eq!(transport.subscribe_count(), 0);
    assert!(store.current().is_none(), "expected store to remain absent");
    Ok(())
}

#[tokio::test]
async fn start_with_empty_identity_reports_identity_missing() {
    let (_transport, _store, mut manager, _terminations) = setup();
    let res = manager.start(&"  ".into()).await;
    assert!(matches!(res, Err(WatchError::IdentityMissing)), "expected IdentityMissing");
}

#[tokio::test]
async fn start_with_same_identity_is_idempotent() -> Result<()> {
    let (transport, _store, mut manager, _terminations) = setup();

    for _ in 0..3 {
        manager.start(&"c1".into()).await?;
        assert_eq!(transport.live_count(), 1, "expected exactly one live subscription");
    }

    assert_eq!(transport.subscribe_count(), 1);
    assert_eq!(manager.active_consumer(), Some(&ConsumerIdentity::from("c1")));
    Ok(())
}

#[tokio::test]
async fn identity_change_cancels_before_subscribing() -> Result<()> {
    let (transport, _store, mut manager, _terminations) = setup();

    let old = manager.watch(&"c1".into()).await?;
    manager.watch(&"c2".into()).await?;

    assert_eq!(
        transport.ops(),
        vec![
            TransportOp::Subscribe("c1".into()),
            TransportOp::Cancel("c1".into()),
            TransportOp::Subscribe("c2".into()),
        ]
    );
    assert!(!old.is_live(), "expected superseded handle to be released");
    assert_eq!(transport.live_count(), 1);
    Ok(())
}

#[tokio::test]
async fn cancelling_twice_is_a_noop() -> Result<()> {
    let (transport, store, mut manager, _terminations) = setup();
    let handle = manager.watch(&"c1".into()).await?;
    transport.emit("c1", fixtures::cluster("qa-de-1", vec![]));
    fixtures::wait_for_revision(&store, 1).await?;

    assert!(handle.cancel(), "expected first cancel to release the subscription");
    assert!(!handle.cancel(), "expected second cancel to be a no-op");
    assert!(!manager.stop(), "expected stop after cancel to be a no-op");

    assert_eq!(transport.cancel_count(), 1);
    assert_eq!(store.revision(), 1, "expected no store write from cancellation");
    Ok(())
}

#[tokio::test]
async fn event_is_applied_and_projected() -> Result<()> {
    let (transport, store, mut manager, _terminations) = setup();
    let expected = fixtures::cluster("qa-de-1", vec![("n1", Some(vec![]))]);

    manager.watch(&"c1".into()).await?;
    transport.emit("c1", expected.clone());
    fixtures::wait_for_revision(&store, 1).await?;

    let current = store.current().context("expected a cluster after the first event")?;
    assert_eq!(*current, expected);
    assert_eq!(
        project(&current),
        vec![NodeStatusEntry {
            node_name: "n1".into(),
            conditions: vec![],
        }]
    );
    Ok(())
}

#[tokio::test]
async fn events_are_applied_in_arrival_order() -> Result<()> {
    let (transport, store, mut manager, _terminations) = setup();

    manager.watch(&"c1".into()).await?;
    for idx in 0..10 {
        transport.emit("c1", fixtures::cluster(&format!("rev-{}", idx), vec![]));
    }
    fixtures::wait_for_revision(&store, 10).await?;

    let name = store.current().and_then(|cluster| cluster.metadata.name.clone());
    assert_eq!(name.as_deref(), Some("rev-9"), "expected the last event to win");
    Ok(())
}

#[tokio::test]
async fn stale_event_after_identity_switch_is_dropped() -> Result<()> {
    let (transport, store, mut manager, _terminations) = setup();

    manager.watch(&"c1".into()).await?;
    let c1_events = transport.sender("c1");
    manager.watch(&"c2".into()).await?;

    let _res = c1_events.send(Ok(fixtures::cluster("from-c1", vec![])));
    fixtures::settle().await;
    assert!(store.current().is_none(), "expected in-flight event of c1 to be dropped");

    transport.emit("c2", fixtures::cluster("from-c2", vec![]));
    fixtures::wait_for_revision(&store, 1).await?;

    let name = store.current().and_then(|cluster| cluster.metadata.name.clone());
    assert_eq!(name.as_deref(), Some("from-c2"));
    assert_eq!(store.revision(), 1, "expected exactly one applied write");
    Ok(())
}

#[tokio::test]
async fn identity_switch_clears_previous_consumer_state() -> Result<()> {
    let (transport, store, mut manager, _terminations) = setup();

    manager.watch(&"c1".into()).await?;
    transport.emit("c1", fixtures::cluster("from-c1", vec![]));
    fixtures::wait_for_revision(&store, 1).await?;

    manager.watch(&"c2".into()).await?;

    assert!(store.current().is_none(), "expected c2 to start from an absent cluster");
    Ok(())
}

#[tokio::test]
async fn drop_while_active_cancels_exactly_once() -> Result<()> {
    let (transport, store, mut manager, _terminations) = setup();
    let handle = manager.watch(&"c1".into()).await?;
    transport.emit("c1", fixtures::cluster("qa-de-1", vec![]));
    fixtures::wait_for_revision(&store, 1).await?;
    let events = transport.sender("c1");

    drop(manager);

    assert_eq!(transport.cancel_count(), 1);
    assert!(!handle.cancel(), "expected defensive cancel after drop to be a no-op");
    let _res = events.send(Ok(fixtures::cluster("buffered", vec![])));
    fixtures::settle().await;
    assert_eq!(store.revision(), 1, "expected no store write after the owning context ended");
    assert_eq!(transport.cancel_count(), 1);
    Ok(())
}

#[tokio::test]
async fn subscribe_failure_is_surfaced() -> Result<()> {
    let (transport, _store, mut manager, _terminations) = setup();
    transport.fail_next_subscribe();

    let res = manager.watch(&"c1".into()).await;

    match res {
        Err(WatchError::SubscribeFailed { consumer, .. }) => assert_eq!(consumer.as_str(), "c1"),
        Err(err) => panic!("expected SubscribeFailed, got {:?}", err),
        Ok(_) => panic!("expected SubscribeFailed, got a handle"),
    }
    assert!(matches!(manager.state(), WatchState::Idle), "expected manager to be idle after failure");
    assert_eq!(transport.subscribe_count(), 0, "expected no automatic retry");
    Ok(())
}

#[tokio::test]
async fn remote_close_is_reported_as_termination() -> Result<()> {
    let (transport, store, mut manager, mut terminations) = setup();
    let handle = manager.watch(&"c1".into()).await?;
    transport.emit("c1", fixtures::cluster("qa-de-1", vec![]));
    fixtures::wait_for_revision(&store, 1).await?;

    transport.close("c1");
    let err = next_termination(&mut terminations).await?;

    match err {
        WatchError::StreamTerminated { consumer, .. } => assert_eq!(consumer.as_str(), "c1"),
        other => panic!("expected StreamTerminated, got {:?}", other),
    }
    assert!(handle.is_terminated(), "expected handle to report remote termination");
    assert!(!handle.is_live());
    assert!(manager.active_consumer().is_none(), "expected no live consumer after termination");
    assert_eq!(transport.cancel_count(), 1, "expected terminated subscription to be released");
    assert!(!handle.cancel(), "expected cancel after termination to be a no-op");
    assert!(store.current().is_some(), "expected last snapshot to be retained");

    // Restarting is left to the owner, and keeps the consumer's last known state.
    manager.start(&"c1".into()).await?;
    assert_eq!(transport.subscribe_count(), 2);
    assert!(store.current().is_some(), "expected same consumer to keep its last snapshot");
    Ok(())
}

#[tokio::test]
async fn stream_error_is_reported_as_termination() -> Result<()> {
    let (transport, _store, mut manager, mut terminations) = setup();
    manager.watch(&"c1".into()).await?;

    let _res = transport.sender("c1").send(Err(anyhow::anyhow!("connection reset by peer")));
    let err = next_termination(&mut terminations).await?;

    match err {
        WatchError::StreamTerminated { reason, .. } => assert!(reason.contains("connection reset by peer"), "unexpected reason {}", reason),
        other => panic!("expected StreamTerminated, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn caller_stop_is_not_reported_as_termination() -> Result<()> {
    let (transport, _store, mut manager, mut terminations) = setup();
    manager.watch(&"c1".into()).await?;

    assert!(manager.stop(), "expected stop to release the subscription");
    transport.close("c1");
    fixtures::settle().await;

    assert!(terminations.try_recv().is_err(), "expected no termination for a caller initiated stop");
    Ok(())
}

#[tokio::test]
async fn start_after_external_cancel_resubscribes() -> Result<()> {
    let (transport, _store, mut manager, _terminations) = setup();
    let handle = manager.watch(&"c1".into()).await?;

    handle.cancel();
    let next = manager.start(&"c1".into()).await?;

    assert!(next.is_live(), "expected a new live subscription");
    assert_eq!(transport.subscribe_count(), 2);
    assert_eq!(transport.live_count(), 1);
    Ok(())
}

#[tokio::test]
async fn subscription_records_owner_and_creation_time() -> Result<()> {
    let (_transport, _store, mut manager, _terminations) = setup();
    let before = time::OffsetDateTime::now_utc();

    manager.watch(&"c1".into()).await?;

    match manager.state() {
        WatchState::Active(sub) => {
            assert_eq!(sub.consumer().as_str(), "c1");
            assert_eq!(sub.handle().consumer().map(ConsumerIdentity::as_str), Some("c1"));
            assert!(sub.created_at() >= before, "expected creation time to be recorded at start");
        }
        WatchState::Idle => panic!("expected manager to be active"),
    }
    Ok(())
}
