//! Gameweek results processing: eliminations, winner/draw resolution, and
//! idempotent re-runs.

mod common;

use anyhow::Result;
use common::*;
use lms_server::domain::{ContestStatus, MemberStatus, PickResult};
use lms_server::results::RoundOutcome;

#[tokio::test]
async fn losers_are_eliminated_and_survivors_stay_alive() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 8).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;

    let (contest_id, member_ids) =
        start_contest(&app, "alice", &["bob", "carol", "dave", "erin"], 1).await?;

    // Fixtures: (t0 v t1), (t2 v t3), (t4 v t5), (t6 v t7).
    app.picks.submit_pick(&identity("bob"), contest_id, Some(1), teams[0]).await?;
    app.picks.submit_pick(&identity("carol"), contest_id, Some(1), teams[3]).await?;
    app.picks.submit_pick(&identity("dave"), contest_id, Some(1), teams[1]).await?;
    app.picks.submit_pick(&identity("erin"), contest_id, Some(1), teams[2]).await?;

    // t0 beats t1, t3 beats t2; the later fixtures draw.
    finish_gameweek(app.storage.as_ref(), 1, &[(2, 0), (0, 1), (1, 1), (0, 0)]).await?;

    let outcome = app.processor.process_round(contest_id, 1).await?;
    let processed = match outcome {
        RoundOutcome::Processed(p) => p,
        other => panic!("expected processed round, got {other:?}"),
    };
    assert_eq!(processed.eliminated, 2);
    assert_eq!(processed.alive_remaining, 2);
    assert!(!processed.completed);

    let members = app.storage.get_members_for_contest(contest_id).await?;
    let by_id = |id| members.iter().find(|m| m.id == Some(id)).unwrap();

    assert_eq!(by_id(member_ids[0]).status, MemberStatus::Alive);
    assert_eq!(by_id(member_ids[1]).status, MemberStatus::Alive);
    for loser in [member_ids[2], member_ids[3]] {
        let member = by_id(loser);
        assert_eq!(member.status, MemberStatus::Eliminated);
        assert_eq!(member.eliminated_gameweek, Some(1));
        assert!(member.eliminated_pick_id.is_some());
    }

    // Pick results were written from the outcome map.
    let picks = app.storage.get_picks_for_round(contest_id, 1).await?;
    for pick in &picks {
        let expected = if pick.team_id == teams[0] || pick.team_id == teams[3] {
            PickResult::Win
        } else {
            PickResult::Loss
        };
        assert_eq!(pick.result, Some(expected));
    }

    let contest = app.storage.get_contest(contest_id).await?.unwrap();
    assert_eq!(contest.status, ContestStatus::Active);
    assert_member_accounting(app.storage.as_ref(), contest_id).await?;
    Ok(())
}

#[tokio::test]
async fn last_survivor_is_promoted_to_winner() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 8).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;

    let (contest_id, member_ids) =
        start_contest(&app, "alice", &["bob", "carol", "dave"], 1).await?;

    app.picks.submit_pick(&identity("bob"), contest_id, Some(1), teams[0]).await?;
    app.picks.submit_pick(&identity("carol"), contest_id, Some(1), teams[1]).await?;
    app.picks.submit_pick(&identity("dave"), contest_id, Some(1), teams[2]).await?;

    // Only t0 wins; t1 loses with it, t2 loses to t3.
    finish_gameweek(app.storage.as_ref(), 1, &[(3, 1), (0, 2), (1, 1), (0, 0)]).await?;

    let outcome = app.processor.process_round(contest_id, 1).await?;
    let processed = match outcome {
        RoundOutcome::Processed(p) => p,
        other => panic!("expected processed round, got {other:?}"),
    };
    assert_eq!(processed.alive_remaining, 1);
    assert!(processed.completed);
    assert_eq!(processed.winner_member_id, Some(member_ids[0]));

    let members = app.storage.get_members_for_contest(contest_id).await?;
    let bob = members.iter().find(|m| m.id == Some(member_ids[0])).unwrap();
    assert_eq!(bob.status, MemberStatus::Winner);

    let contest = app.storage.get_contest(contest_id).await?.unwrap();
    assert_eq!(contest.status, ContestStatus::Completed);
    assert_eq!(contest.winner_member_id, Some(member_ids[0]));
    assert!(!contest.drawn);
    assert_member_accounting(app.storage.as_ref(), contest_id).await?;
    Ok(())
}

#[tokio::test]
async fn contest_is_drawn_when_nobody_survives_the_round() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 8).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;
    seed_gameweek(app.storage.as_ref(), 2, &teams, future_kickoff()).await?;

    let (contest_id, member_ids) =
        start_contest(&app, "alice", &["bob", "carol", "dave"], 1).await?;

    // Gameweek 1: dave goes out, bob and carol survive.
    app.picks.submit_pick(&identity("bob"), contest_id, Some(1), teams[0]).await?;
    app.picks.submit_pick(&identity("carol"), contest_id, Some(1), teams[2]).await?;
    app.picks.submit_pick(&identity("dave"), contest_id, Some(1), teams[1]).await?;
    finish_gameweek(app.storage.as_ref(), 1, &[(1, 0), (2, 0), (0, 0), (0, 0)]).await?;
    app.processor.process_round(contest_id, 1).await?;

    // Gameweek 2: the two survivors both pick sides of a draw.
    app.picks.submit_pick(&identity("bob"), contest_id, Some(2), teams[4]).await?;
    app.picks.submit_pick(&identity("carol"), contest_id, Some(2), teams[5]).await?;
    finish_gameweek(app.storage.as_ref(), 2, &[(1, 0), (1, 0), (2, 2), (1, 0)]).await?;

    let outcome = app.processor.process_round(contest_id, 2).await?;
    let processed = match outcome {
        RoundOutcome::Processed(p) => p,
        other => panic!("expected processed round, got {other:?}"),
    };
    assert_eq!(processed.alive_remaining, 0);
    assert!(processed.completed);
    assert!(processed.drawn);
    assert_eq!(processed.winner_member_id, None);

    let members = app.storage.get_members_for_contest(contest_id).await?;
    let by_id = |id| members.iter().find(|m| m.id == Some(id)).unwrap();

    // Only this pass's casualties are promoted to drawn; dave keeps his
    // gameweek 1 elimination.
    assert_eq!(by_id(member_ids[0]).status, MemberStatus::Drawn);
    assert_eq!(by_id(member_ids[1]).status, MemberStatus::Drawn);
    assert_eq!(by_id(member_ids[2]).status, MemberStatus::Eliminated);
    assert_eq!(by_id(member_ids[2]).eliminated_gameweek, Some(1));

    let contest = app.storage.get_contest(contest_id).await?.unwrap();
    assert_eq!(contest.status, ContestStatus::Completed);
    assert!(contest.drawn);
    assert_eq!(contest.winner_member_id, None);
    assert_member_accounting(app.storage.as_ref(), contest_id).await?;
    Ok(())
}

#[tokio::test]
async fn member_without_a_pick_is_eliminated_with_no_pick_reference() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 8).await?;
    seed_gameweek(app.storage.as_ref(), 7, &teams, future_kickoff()).await?;

    let (contest_id, member_ids) =
        start_contest(&app, "alice", &["bob", "carol", "dave"], 7).await?;

    app.picks.submit_pick(&identity("bob"), contest_id, Some(7), teams[0]).await?;
    app.picks.submit_pick(&identity("carol"), contest_id, Some(7), teams[2]).await?;
    // dave never picks.
    finish_gameweek(app.storage.as_ref(), 7, &[(1, 0), (2, 1), (0, 0), (0, 0)]).await?;

    app.processor.process_round(contest_id, 7).await?;

    let members = app.storage.get_members_for_contest(contest_id).await?;
    let dave = members.iter().find(|m| m.id == Some(member_ids[2])).unwrap();
    assert_eq!(dave.status, MemberStatus::Eliminated);
    assert_eq!(dave.eliminated_gameweek, Some(7));
    assert_eq!(dave.eliminated_pick_id, None);
    Ok(())
}

#[tokio::test]
async fn round_with_no_picks_still_processes_and_draws_everyone() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;
    finish_gameweek(app.storage.as_ref(), 1, &[(1, 0), (2, 0)]).await?;

    let outcome = app.processor.process_round(contest_id, 1).await?;
    let processed = match outcome {
        RoundOutcome::Processed(p) => p,
        other => panic!("expected processed round, got {other:?}"),
    };
    assert_eq!(processed.eliminated, 2);
    assert_eq!(processed.alive_remaining, 0);
    assert!(processed.drawn);

    let members = app.storage.get_members_for_contest(contest_id).await?;
    for member in &members {
        assert_eq!(member.status, MemberStatus::Drawn);
        assert_eq!(member.eliminated_pick_id, None);
    }
    assert_member_accounting(app.storage.as_ref(), contest_id).await?;
    Ok(())
}

#[tokio::test]
async fn reprocessing_a_round_is_a_no_op() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 8).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;

    let (contest_id, _) =
        start_contest(&app, "alice", &["bob", "carol", "dave", "erin"], 1).await?;

    app.picks.submit_pick(&identity("bob"), contest_id, Some(1), teams[0]).await?;
    app.picks.submit_pick(&identity("carol"), contest_id, Some(1), teams[3]).await?;
    app.picks.submit_pick(&identity("dave"), contest_id, Some(1), teams[1]).await?;
    finish_gameweek(app.storage.as_ref(), 1, &[(2, 0), (0, 1), (1, 1), (0, 0)]).await?;

    let first = app.processor.process_round(contest_id, 1).await?;
    assert!(matches!(first, RoundOutcome::Processed(_)));

    let members_after = app.storage.get_members_for_contest(contest_id).await?;
    let picks_after = app.storage.get_picks_for_round(contest_id, 1).await?;

    let second = app.processor.process_round(contest_id, 1).await?;
    assert_eq!(second, RoundOutcome::AlreadyProcessed);

    // Stored state is byte-for-byte what the first pass left behind.
    assert_eq!(
        serde_json::to_value(&members_after)?,
        serde_json::to_value(app.storage.get_members_for_contest(contest_id).await?)?,
    );
    assert_eq!(
        serde_json::to_value(&picks_after)?,
        serde_json::to_value(app.storage.get_picks_for_round(contest_id, 1).await?)?,
    );
    Ok(())
}

#[tokio::test]
async fn round_with_unfinished_fixtures_is_not_ready() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;
    app.picks.submit_pick(&identity("bob"), contest_id, Some(1), teams[0]).await?;

    // Finish only the first of two fixtures.
    finish_gameweek(app.storage.as_ref(), 1, &[(1, 0)]).await?;

    let outcome = app.processor.process_round(contest_id, 1).await?;
    assert_eq!(outcome, RoundOutcome::NotReady { unfinished: 1 });

    // No writes happened.
    let picks = app.storage.get_picks_for_round(contest_id, 1).await?;
    assert!(picks.iter().all(|p| p.result.is_none()));
    let members = app.storage.get_members_for_contest(contest_id).await?;
    assert!(members.iter().all(|m| m.status == MemberStatus::Alive));
    Ok(())
}

#[tokio::test]
async fn round_without_fixtures_is_not_ready() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;

    let outcome = app.processor.process_round(contest_id, 9).await?;
    assert_eq!(outcome, RoundOutcome::NotReady { unfinished: 0 });
    Ok(())
}

#[tokio::test]
async fn only_active_contests_are_processed() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;

    let admin = identity("alice");
    let contest = app
        .contests
        .create_contest(&admin, "Unstarted", Some(SEASON.to_string()), Some(1))
        .await?;
    finish_gameweek(app.storage.as_ref(), 1, &[(1, 0), (2, 0)]).await?;

    let outcome = app
        .processor
        .process_round(contest.id.unwrap(), 1)
        .await?;
    assert_eq!(outcome, RoundOutcome::NotActive);
    Ok(())
}
