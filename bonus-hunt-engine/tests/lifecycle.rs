mod fixtures;

use bonus_hunt_engine::{error::Error, state::HuntStatus};
use futures::future::join_all;

use crate::fixtures::{
    hunt_with_outcomes, new_hunt, outcome_spec, setup, setup_shared, TEST_WINNER_POINTS,
};

#[tokio::test]
async fn test_worked_example_stats() {
    let controller = setup().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[Some(10), Some(10)]).await;

    controller.record_win(hunt.id, outcomes[0].id, 50).await.unwrap();
    let last = controller.record_win(hunt.id, outcomes[1].id, 0).await.unwrap();

    let stats = last.stats;
    assert_eq!(stats.ending_balance_so_far, 50);
    assert_eq!(stats.total_bets, 20);
    assert_eq!(stats.average_bet, 10.0);
    assert_eq!(stats.highest_win, 50);
    assert_eq!(stats.highest_multiplier, 5.0);
    assert_eq!(stats.played_count, 2);
    assert_eq!(stats.remaining_count, 0);
    assert_eq!(stats.break_even_multiplier, 0.0);
    assert!(last.completed);
}

#[tokio::test]
async fn test_start_hunt_only_from_to_be_played() {
    let controller = setup().await;
    let hunt = controller.create_hunt(new_hunt("Start")).await.unwrap();
    assert_eq!(hunt.status, HuntStatus::ToBePlayed);

    let started = controller.start_hunt(hunt.id).await.unwrap();
    assert_eq!(started.status, HuntStatus::Ongoing);
    assert!(started.revision > hunt.revision);

    let again = controller.start_hunt(hunt.id).await;
    assert!(matches!(again, Err(Error::State(_))));
}

#[tokio::test]
async fn test_first_win_moves_hunt_to_ongoing() {
    let controller = setup().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[Some(10), Some(20)]).await;
    assert_eq!(hunt.status, HuntStatus::ToBePlayed);

    controller.record_win(hunt.id, outcomes[0].id, 15).await.unwrap();
    let snapshot = controller.snapshot(hunt.id).await.unwrap();
    assert_eq!(snapshot.hunt.status, HuntStatus::Ongoing);
    assert_eq!(snapshot.hunt.ending_balance, None);
    assert_eq!(snapshot.stats.remaining_count, 1);
}

#[tokio::test]
async fn test_duplicate_sort_order_rejected() {
    let controller = setup().await;
    let hunt = controller.create_hunt(new_hunt("Dupes")).await.unwrap();

    let colliding = vec![outcome_spec(1, Some(10)), outcome_spec(1, Some(20))];
    let result = controller.create_outcomes(hunt.id, &colliding).await;
    assert!(matches!(result, Err(Error::Validation(_))));

    controller
        .create_outcomes(hunt.id, &[outcome_spec(1, Some(10))])
        .await
        .unwrap();
    let result = controller
        .create_outcomes(hunt.id, &[outcome_spec(1, Some(30))])
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
    assert_eq!(controller.snapshot(hunt.id).await.unwrap().outcomes.len(), 1);
}

#[tokio::test]
async fn test_record_win_unknown_outcome() {
    let controller = setup().await;
    let (hunt, _) = hunt_with_outcomes(&controller, &[Some(10)]).await;

    let result = controller.record_win(hunt.id, 9_999, 10).await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    let result = controller.record_win(9_999, 1, 10).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_outcome_of_other_hunt_is_not_found() {
    let controller = setup().await;
    let (first, _) = hunt_with_outcomes(&controller, &[Some(10)]).await;
    let (_, other_outcomes) = hunt_with_outcomes(&controller, &[Some(10)]).await;

    let result = controller.record_win(first.id, other_outcomes[0].id, 10).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_record_win_on_complete_hunt_conflicts() {
    let controller = setup().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[Some(10), Some(10)]).await;
    controller.record_win(hunt.id, outcomes[0].id, 40).await.unwrap();
    controller.complete_hunt(hunt.id, None).await.unwrap();

    let result = controller.record_win(hunt.id, outcomes[1].id, 500).await;
    assert!(matches!(result, Err(Error::Conflict(_))));

    let snapshot = controller.snapshot(hunt.id).await.unwrap();
    let untouched = &snapshot.outcomes[1];
    assert!(!untouched.is_played);
    assert_eq!(untouched.win_amount, None);
    assert_eq!(untouched.multiplier, None);
    assert_eq!(snapshot.hunt.ending_balance, Some(40));

    let result = controller.set_bet(hunt.id, outcomes[1].id, 20).await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completes_exactly_once_in_any_order() {
    let wins = [30i64, 0, 70];
    let orders = [
        [0usize, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for order in orders {
        let (controller, _database) = setup_shared().await;
        let (hunt, outcomes) =
            hunt_with_outcomes(&controller, &[Some(10), Some(10), Some(10)]).await;
        let hunt_id = hunt.id;

        let handles: Vec<_> = order
            .iter()
            .map(|&i| {
                let controller = controller.clone();
                let outcome_id = outcomes[i].id;
                let win = wins[i];
                tokio::spawn(async move { controller.record_win(hunt_id, outcome_id, win).await })
            })
            .collect();
        let results: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let completions = results.iter().filter(|r| r.completed).count();
        assert_eq!(completions, 1, "order {order:?}");

        let snapshot = controller.snapshot(hunt.id).await.unwrap();
        assert_eq!(snapshot.hunt.status, HuntStatus::Complete);
        assert_eq!(snapshot.hunt.ending_balance, Some(100), "order {order:?}");
        assert_eq!(snapshot.hunt.highest_win, Some(70));
        assert_eq!(snapshot.hunt.highest_multiplier, Some(7.0));
        assert!(snapshot.hunt.completed_at.is_some());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manual_override_racing_auto_completion_settles_once() {
    let (controller, _database) = setup_shared().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[Some(10), Some(10)]).await;
    controller.submit_guess(hunt.id, "alice", 45).await.unwrap();
    controller.submit_guess(hunt.id, "bob", 80).await.unwrap();
    controller.record_win(hunt.id, outcomes[0].id, 20).await.unwrap();
    let hunt_id = hunt.id;

    let manual = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.complete_hunt(hunt_id, None).await })
    };
    let auto = {
        let controller = controller.clone();
        let outcome_id = outcomes[1].id;
        tokio::spawn(async move { controller.record_win(hunt_id, outcome_id, 30).await })
    };
    let manual = manual.await.unwrap();
    let auto = auto.await.unwrap();

    let settled_by_manual = manual.is_ok();
    let settled_by_auto = auto.as_ref().is_ok_and(|r| r.completed);
    assert!(settled_by_manual ^ settled_by_auto);
    if settled_by_auto {
        assert!(matches!(manual, Err(Error::Conflict(_))));
    } else {
        assert!(matches!(auto, Err(Error::Conflict(_))));
    }

    let guesses = controller.list_guesses(hunt.id).await.unwrap();
    let awarded: Vec<_> = guesses.iter().filter(|g| g.points_earned.is_some()).collect();
    assert_eq!(awarded.len(), 1);
    assert_eq!(awarded[0].points_earned, Some(TEST_WINNER_POINTS));
}

#[tokio::test]
async fn test_shared_store_runs_in_wal_mode() {
    let (controller, _database) = setup_shared().await;
    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(controller.store().pool())
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[tokio::test]
async fn test_manual_complete_with_explicit_ending_balance() {
    let controller = setup().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[Some(10), Some(10)]).await;
    controller.record_win(hunt.id, outcomes[0].id, 25).await.unwrap();
    controller.submit_guess(hunt.id, "alice", 300).await.unwrap();
    controller.submit_guess(hunt.id, "bob", 25).await.unwrap();

    let settlement = controller.complete_hunt(hunt.id, Some(310)).await.unwrap();
    assert_eq!(settlement.ending_balance, 310);
    assert_eq!(settlement.winner_user_id.as_deref(), Some("alice"));

    let hunt = controller.snapshot(hunt.id).await.unwrap().hunt;
    assert_eq!(hunt.ending_balance, Some(310));
    assert_eq!(hunt.highest_win, Some(25));

    let again = controller.complete_hunt(hunt.id, None).await;
    assert!(matches!(again, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_manual_complete_rejects_negative_balance() {
    let controller = setup().await;
    let (hunt, _) = hunt_with_outcomes(&controller, &[Some(10)]).await;
    let result = controller.complete_hunt(hunt.id, Some(-1)).await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn test_correction_resettles() {
    let controller = setup().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[Some(10), Some(10)]).await;
    controller.submit_guess(hunt.id, "alice", 50).await.unwrap();
    controller.submit_guess(hunt.id, "bob", 100).await.unwrap();

    let early = controller.correct_win(hunt.id, outcomes[0].id, 30).await;
    assert!(matches!(early, Err(Error::State(_))));

    controller.record_win(hunt.id, outcomes[0].id, 30).await.unwrap();
    let done = controller.record_win(hunt.id, outcomes[1].id, 20).await.unwrap();
    let first = done.settlement.unwrap();
    assert_eq!(first.ending_balance, 50);
    assert_eq!(first.winner_user_id.as_deref(), Some("alice"));

    let corrected = controller.correct_win(hunt.id, outcomes[1].id, 70).await.unwrap();
    assert_eq!(corrected.stats.ending_balance_so_far, 100);
    assert_eq!(corrected.settlement.ending_balance, 100);
    assert_eq!(corrected.settlement.winner_user_id.as_deref(), Some("bob"));
    assert_eq!(corrected.outcome.multiplier, Some(7.0));

    let alice = controller.get_guess(hunt.id, "alice").await.unwrap();
    let bob = controller.get_guess(hunt.id, "bob").await.unwrap();
    assert_eq!(alice.points_earned, None);
    assert_eq!(bob.points_earned, Some(TEST_WINNER_POINTS));

    let hunt = controller.snapshot(hunt.id).await.unwrap().hunt;
    assert_eq!(hunt.ending_balance, Some(100));
    assert_eq!(hunt.winner_user_id.as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_reconcile_completes_out_of_band_rows() {
    let controller = setup().await;
    let (hunt, _) = hunt_with_outcomes(&controller, &[Some(10), Some(20)]).await;

    sqlx::query("UPDATE outcomes SET win_amount = 15, is_played = 1 WHERE hunt_id = ?")
        .bind(hunt.id)
        .execute(controller.store().pool())
        .await
        .unwrap();

    assert_eq!(controller.reconcile().await.unwrap(), 1);
    assert_eq!(controller.reconcile().await.unwrap(), 0);

    let hunt = controller.snapshot(hunt.id).await.unwrap().hunt;
    assert_eq!(hunt.status, HuntStatus::Complete);
    assert_eq!(hunt.ending_balance, Some(30));
    assert_eq!(controller.complete_if_eligible(hunt.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_hunt_without_outcomes_is_not_eligible() {
    let controller = setup().await;
    let hunt = controller.create_hunt(new_hunt("Empty")).await.unwrap();
    assert_eq!(controller.complete_if_eligible(hunt.id).await.unwrap(), None);
    assert_eq!(controller.reconcile().await.unwrap(), 0);
    let hunt = controller.snapshot(hunt.id).await.unwrap().hunt;
    assert_eq!(hunt.status, HuntStatus::ToBePlayed);
}

#[tokio::test]
async fn test_bet_entered_after_win_updates_multiplier() {
    let controller = setup().await;
    let (hunt, outcomes) = hunt_with_outcomes(&controller, &[None, Some(10)]).await;

    let recorded = controller.record_win(hunt.id, outcomes[0].id, 80).await.unwrap();
    assert_eq!(recorded.outcome.multiplier, None);

    let change = controller.set_bet(hunt.id, outcomes[0].id, 20).await.unwrap();
    assert_eq!(change.outcome.multiplier, Some(4.0));
    assert_eq!(change.stats.total_bets, 30);
    assert_eq!(change.stats.highest_multiplier, 4.0);
}

#[tokio::test]
async fn test_create_hunt_validation() {
    let controller = setup().await;

    let mut blank = new_hunt("  ");
    assert!(matches!(controller.create_hunt(blank.clone()).await, Err(Error::Validation(_))));

    blank.title = "Currency".to_string();
    blank.currency = "euro".to_string();
    assert!(matches!(controller.create_hunt(blank.clone()).await, Err(Error::Validation(_))));

    blank.currency = "usd".to_string();
    blank.starting_balance = Some(-5);
    assert!(matches!(controller.create_hunt(blank).await, Err(Error::Validation(_))));

    let hunt = controller.create_hunt(new_hunt("Fine")).await.unwrap();
    assert_eq!(hunt.currency, "EUR");
    assert_eq!(hunt.winner_points, TEST_WINNER_POINTS);
}
