//! Pick validation: precondition ordering, team-usage rules, and the
//! upsert guarantee.

mod common;

use anyhow::Result;
use common::*;
use lms_server::domain::{ContestStatus, MemberStatus};
use lms_server::error::LmsError;

#[tokio::test]
async fn pick_rejected_when_contest_not_active() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;

    let admin = identity("alice");
    let contest = app
        .contests
        .create_contest(&admin, "Open Contest", Some(SEASON.to_string()), Some(1))
        .await?;
    app.contests
        .join_contest(&identity("bob"), &contest.invite_token)
        .await?;

    // Still open: nominations are not accepted yet.
    let err = app
        .picks
        .submit_pick(&identity("bob"), contest.id.unwrap(), Some(1), teams[0])
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::Rejected(_)));
    Ok(())
}

#[tokio::test]
async fn pick_rejected_before_contest_start_gameweek() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;
    seed_gameweek(app.storage.as_ref(), 5, &teams, future_kickoff()).await?;

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol"], 5).await?;

    let err = app
        .picks
        .submit_pick(&identity("bob"), contest_id, Some(1), teams[0])
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::Rejected(_)));
    Ok(())
}

#[tokio::test]
async fn pick_rejected_for_eliminated_member() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;
    seed_gameweek(app.storage.as_ref(), 2, &teams, future_kickoff()).await?;

    let (contest_id, member_ids) = start_contest(&app, "alice", &["bob", "carol", "dave"], 1).await?;

    // Eliminate bob by hand through the admin override.
    app.contests
        .admin_override_member_status(
            &identity("alice"),
            contest_id,
            member_ids[0],
            MemberStatus::Eliminated,
            Some(1),
        )
        .await?;

    let err = app
        .picks
        .submit_pick(&identity("bob"), contest_id, Some(2), teams[0])
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::Rejected(_)));
    Ok(())
}

#[tokio::test]
async fn pick_rejected_after_deadline_unless_bypassed() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, past_kickoff()).await?;

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;

    let err = app
        .picks
        .submit_pick(&identity("bob"), contest_id, Some(1), teams[0])
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::Rejected(_)));

    app.settings.set_deadline_bypass(true).await?;
    let pick = app
        .picks
        .submit_pick(&identity("bob"), contest_id, Some(1), teams[0])
        .await?;
    assert_eq!(pick.team_id, teams[0]);
    Ok(())
}

#[tokio::test]
async fn pick_rejected_when_team_has_no_fixture() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 6).await?;
    // Only the first four teams play in gameweek 1.
    seed_gameweek(app.storage.as_ref(), 1, &teams[..4], future_kickoff()).await?;

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;

    let err = app
        .picks
        .submit_pick(&identity("bob"), contest_id, Some(1), teams[5])
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::Rejected(_)));

    // And nothing was stored.
    let picks = app.storage.get_picks_for_round(contest_id, 1).await?;
    assert!(picks.is_empty());
    Ok(())
}

#[tokio::test]
async fn team_cannot_be_reused_until_pool_exhausted() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 2).await?;
    for gw in 1..=3 {
        seed_gameweek(app.storage.as_ref(), gw, &teams, future_kickoff()).await?;
    }

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;
    let bob = identity("bob");

    app.picks
        .submit_pick(&bob, contest_id, Some(1), teams[0])
        .await?;

    // Gameweek 2: team 0 is burned.
    let err = app
        .picks
        .submit_pick(&bob, contest_id, Some(2), teams[0])
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::Rejected(_)));

    app.picks
        .submit_pick(&bob, contest_id, Some(2), teams[1])
        .await?;

    // Both teams used: the pool resets and repeats are allowed.
    let pick = app
        .picks
        .submit_pick(&bob, contest_id, Some(3), teams[0])
        .await?;
    assert_eq!(pick.team_id, teams[0]);
    Ok(())
}

#[tokio::test]
async fn repicking_the_same_team_for_the_same_round_is_idempotent() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;

    let (contest_id, member_ids) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;
    let bob = identity("bob");

    let first = app
        .picks
        .submit_pick(&bob, contest_id, Some(1), teams[0])
        .await?;
    let second = app
        .picks
        .submit_pick(&bob, contest_id, Some(1), teams[0])
        .await?;
    assert_eq!(first.id, second.id);

    let stored = app
        .storage
        .get_pick(contest_id, member_ids[0], 1)
        .await?
        .unwrap();
    assert_eq!(stored.team_id, teams[0]);

    let picks = app
        .storage
        .get_picks_for_member(contest_id, member_ids[0])
        .await?;
    assert_eq!(picks.len(), 1);
    Ok(())
}

#[tokio::test]
async fn changing_a_pick_replaces_only_that_round() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;
    seed_gameweek(app.storage.as_ref(), 2, &teams, future_kickoff()).await?;

    let (contest_id, member_ids) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;
    let bob = identity("bob");

    app.picks
        .submit_pick(&bob, contest_id, Some(1), teams[0])
        .await?;
    app.picks
        .submit_pick(&bob, contest_id, Some(2), teams[2])
        .await?;

    // Change the gameweek 2 pick; last write wins and the row keeps its key.
    app.picks
        .submit_pick(&bob, contest_id, Some(2), teams[1])
        .await?;

    let picks = app
        .storage
        .get_picks_for_member(contest_id, member_ids[0])
        .await?;
    assert_eq!(picks.len(), 2);
    assert_eq!(picks[0].gameweek, 1);
    assert_eq!(picks[0].team_id, teams[0]);
    assert_eq!(picks[1].gameweek, 2);
    assert_eq!(picks[1].team_id, teams[1]);
    Ok(())
}

#[tokio::test]
async fn changing_a_pick_frees_the_replaced_team() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;
    seed_gameweek(app.storage.as_ref(), 2, &teams, future_kickoff()).await?;

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;
    let bob = identity("bob");

    app.picks
        .submit_pick(&bob, contest_id, Some(1), teams[0])
        .await?;
    app.picks
        .submit_pick(&bob, contest_id, Some(1), teams[1])
        .await?;

    // Team 0 was released by the replacement, so gameweek 2 may use it.
    let pick = app
        .picks
        .submit_pick(&bob, contest_id, Some(2), teams[0])
        .await?;
    assert_eq!(pick.team_id, teams[0]);
    Ok(())
}

#[tokio::test]
async fn contest_status_is_checked_first() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, past_kickoff()).await?;

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;

    // Complete the contest by hand, then submit a pick that would also
    // fail the deadline check: the status rejection must come first.
    let mut contest = app.storage.get_contest(contest_id).await?.unwrap();
    contest.status = ContestStatus::Completed;
    app.storage.update_contest(&contest).await?;

    let err = app
        .picks
        .submit_pick(&identity("bob"), contest_id, Some(1), teams[0])
        .await
        .unwrap_err();
    match err {
        LmsError::Rejected(msg) => assert!(msg.contains("not active")),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}
