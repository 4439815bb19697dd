mod fixtures;

use std::time::Duration;

use bonus_hunt_engine::broadcast::{Change, HuntEvent};
use futures::{Stream, StreamExt};
use tokio::time::timeout;

use crate::fixtures::{hunt_with_outcomes, setup, setup_shared};

async fn next_events<S>(stream: &mut S, count: usize) -> Vec<HuntEvent>
where
    S: Stream<Item = HuntEvent> + Unpin,
{
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let event = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("event within timeout")
            .expect("stream open");
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_events_arrive_in_commit_order() {
    let controller = setup().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[Some(10), Some(10)]).await;
    let mut events = Box::pin(controller.subscribe(hunt.id));

    controller.record_win(hunt.id, outcomes[0].id, 25).await.unwrap();
    controller.record_win(hunt.id, outcomes[1].id, 5).await.unwrap();

    // outcome + hunt, then outcome + hunt + settlement
    let received = next_events(&mut events, 5).await;
    let kinds: Vec<_> = received.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["outcome", "hunt", "outcome", "hunt", "settlement"]);

    let revisions: Vec<_> = received.iter().map(|e| e.revision).collect();
    assert!(revisions.windows(2).all(|w| w[0] <= w[1]));
    assert!(revisions[2] > revisions[0]);

    match &received[3].change {
        Change::HuntUpdated { hunt, stats } => {
            assert_eq!(hunt.ending_balance, Some(30));
            assert_eq!(stats.ending_balance_so_far, 30);
        }
        other => panic!("unexpected change {other:?}"),
    }
    match &received[4].change {
        Change::Settled { settlement } => assert_eq!(settlement.ending_balance, 30),
        other => panic!("unexpected change {other:?}"),
    }
}

#[tokio::test]
async fn test_events_of_one_commit_share_its_revision() {
    let controller = setup().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[Some(10), Some(10)]).await;
    let mut events = Box::pin(controller.subscribe(hunt.id));

    controller.record_win(hunt.id, outcomes[0].id, 25).await.unwrap();
    controller.record_win(hunt.id, outcomes[1].id, 5).await.unwrap();

    let received = next_events(&mut events, 5).await;
    let first_commit = &received[..2];
    let second_commit = &received[2..];
    assert!(first_commit.iter().all(|e| e.revision == first_commit[0].revision));
    assert!(second_commit.iter().all(|e| e.revision == second_commit[0].revision));
    assert!(second_commit[0].revision > first_commit[0].revision);

    // a client keeping every event not older than the last applied one
    // ends up with all of them
    let mut applied = 0;
    let mut last = i64::MIN;
    for event in &received {
        if event.revision >= last {
            last = event.revision;
            applied += 1;
        }
    }
    assert_eq!(applied, received.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_publish_monotonic_revisions() {
    let (controller, _database) = setup_shared().await;
    let bets = vec![Some(10); 8];
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &bets).await;
    let mut events = Box::pin(controller.subscribe(hunt.id));

    let handles: Vec<_> = outcomes
        .iter()
        .map(|outcome| {
            let controller = controller.clone();
            let (hunt_id, outcome_id) = (hunt.id, outcome.id);
            tokio::spawn(async move { controller.record_win(hunt_id, outcome_id, 10).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // two events per win plus one settlement
    let received = next_events(&mut events, 8 * 2 + 1).await;
    let revisions: Vec<_> = received.iter().map(|e| e.revision).collect();
    assert!(revisions.windows(2).all(|w| w[0] <= w[1]), "{revisions:?}");
    assert_eq!(received.last().map(|e| e.kind()), Some("settlement"));
}

#[tokio::test]
async fn test_failed_write_publishes_nothing() {
    let controller = setup().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[Some(10), Some(10)]).await;
    let mut events = Box::pin(controller.subscribe(hunt.id));

    assert!(controller.record_win(hunt.id, outcomes[0].id, -5).await.is_err());
    controller.record_win(hunt.id, outcomes[0].id, 5).await.unwrap();

    let received = next_events(&mut events, 2).await;
    match &received[0].change {
        Change::OutcomeUpdated { outcome } => assert_eq!(outcome.win_amount, Some(5)),
        other => panic!("unexpected change {other:?}"),
    }
}

#[tokio::test]
async fn test_lagging_subscriber_is_told_to_resync() {
    let controller = setup().await;
    let bets = vec![Some(10); 70];
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &bets).await;
    let mut events = Box::pin(controller.subscribe(hunt.id));

    // more events than the channel holds, none consumed yet
    for outcome in &outcomes[..40] {
        controller.record_win(hunt.id, outcome.id, 1).await.unwrap();
    }

    let first = next_events(&mut events, 1).await;
    assert_eq!(first[0].kind(), "resync");
    assert_eq!(first[0].hunt_id, hunt.id);

    let mut retained = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), events.next()).await {
        retained.push(event);
    }
    assert!(retained.iter().all(|e| e.kind() != "resync"));

    controller.record_win(hunt.id, outcomes[40].id, 1).await.unwrap();
    let live = next_events(&mut events, 2).await;
    assert!(matches!(
        &live[0].change,
        Change::OutcomeUpdated { outcome } if outcome.id == outcomes[40].id
    ));
}

#[tokio::test]
async fn test_snapshot_matches_stream_state() {
    let controller = setup().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[Some(20), Some(5)]).await;
    let mut events = Box::pin(controller.subscribe(hunt.id));

    controller.record_win(hunt.id, outcomes[1].id, 50).await.unwrap();
    let received = next_events(&mut events, 2).await;
    let snapshot = controller.snapshot(hunt.id).await.unwrap();

    assert_eq!(received[1].revision, snapshot.hunt.revision);
    match &received[1].change {
        Change::HuntUpdated { stats, .. } => assert_eq!(*stats, snapshot.stats),
        other => panic!("unexpected change {other:?}"),
    }
}
