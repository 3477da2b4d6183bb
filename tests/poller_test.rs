//! Poller behavior: outcome refresh, trailing-window processing, and
//! failure isolation.

mod common;

use anyhow::Result;
use common::*;
use lms_server::catalog::Catalog;
use lms_server::domain::{ContestStatus, FixtureStatus, MemberStatus};
use lms_server::error::{LmsError, Result as LmsResult};
use lms_server::feed::{FeedFixture, FeedTeam, FixtureFeed};
use lms_server::poller::Poller;
use std::sync::Mutex;
use std::time::Duration;

struct StubFeed {
    teams: Vec<FeedTeam>,
    fixtures: Mutex<Vec<FeedFixture>>,
}

impl StubFeed {
    fn new(team_count: i64) -> Self {
        let teams = (1..=team_count)
            .map(|i| FeedTeam {
                provider_team_id: i,
                name: format!("Team {i}"),
                short_name: format!("T{i}"),
            })
            .collect();
        Self {
            teams,
            fixtures: Mutex::new(Vec::new()),
        }
    }

    fn set_fixtures(&self, fixtures: Vec<FeedFixture>) {
        *self.fixtures.lock().unwrap() = fixtures;
    }

    fn finish(&self, provider_match_id: i64, home: i64, away: i64) {
        let mut fixtures = self.fixtures.lock().unwrap();
        if let Some(fixture) = fixtures
            .iter_mut()
            .find(|f| f.provider_match_id == provider_match_id)
        {
            fixture.status = FixtureStatus::Finished;
            fixture.home_score = Some(home);
            fixture.away_score = Some(away);
        }
    }
}

#[async_trait::async_trait]
impl FixtureFeed for StubFeed {
    fn feed_name(&self) -> &'static str {
        "stub"
    }

    async fn get_teams(&self, _season: &str) -> LmsResult<Vec<FeedTeam>> {
        Ok(self.teams.clone())
    }

    async fn get_fixtures(&self, _season: &str) -> LmsResult<Vec<FeedFixture>> {
        Ok(self.fixtures.lock().unwrap().clone())
    }
}

/// A feed that is always down.
struct FailingFeed;

#[async_trait::async_trait]
impl FixtureFeed for FailingFeed {
    fn feed_name(&self) -> &'static str {
        "failing"
    }

    async fn get_teams(&self, _season: &str) -> LmsResult<Vec<FeedTeam>> {
        Err(LmsError::Feed {
            message: "connection refused".into(),
        })
    }

    async fn get_fixtures(&self, _season: &str) -> LmsResult<Vec<FeedFixture>> {
        Err(LmsError::Feed {
            message: "connection refused".into(),
        })
    }
}

fn feed_fixture(
    provider_match_id: i64,
    gameweek: u32,
    home: i64,
    away: i64,
) -> FeedFixture {
    FeedFixture {
        provider_match_id,
        gameweek,
        home_provider_team_id: home,
        away_provider_team_id: away,
        kickoff: future_kickoff(),
        status: FixtureStatus::Scheduled,
        home_score: None,
        away_score: None,
    }
}

#[tokio::test]
async fn poller_pulls_results_and_processes_the_trailing_window() -> Result<()> {
    let app = TestApp::new();
    let feed = std::sync::Arc::new(StubFeed::new(4));
    feed.set_fixtures(vec![
        feed_fixture(101, 1, 1, 2),
        feed_fixture(102, 1, 3, 4),
        feed_fixture(201, 2, 1, 3),
        feed_fixture(202, 2, 2, 4),
    ]);

    let catalog = Catalog::new(app.storage.clone());
    let summary = catalog.import_season(feed.as_ref(), SEASON).await?;
    assert_eq!(summary.teams, 4);
    assert_eq!(summary.fixtures, 4);

    let teams = app.storage.get_teams_for_season(SEASON).await?;
    let team_id = |provider: i64| {
        teams
            .iter()
            .find(|t| t.provider_team_id == provider)
            .and_then(|t| t.id)
            .unwrap()
    };

    let (contest_id, member_ids) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;
    app.picks
        .submit_pick(&identity("bob"), contest_id, Some(1), team_id(1))
        .await?;
    app.picks
        .submit_pick(&identity("carol"), contest_id, Some(1), team_id(4))
        .await?;

    // Gameweek 1 finishes upstream: team 1 wins, team 4 loses.
    feed.finish(101, 2, 0);
    feed.finish(102, 1, 0);

    let poller = Poller::new(
        app.storage.clone(),
        app.settings.clone(),
        feed.clone(),
        Duration::from_secs(300),
    );

    let summary = poller.tick().await?;
    assert_eq!(summary.contests, 1);
    assert_eq!(summary.rounds_processed, 1);
    assert_eq!(summary.failures, 0);

    let members = app.storage.get_members_for_contest(contest_id).await?;
    let carol = members.iter().find(|m| m.id == Some(member_ids[1])).unwrap();
    assert_eq!(carol.status, MemberStatus::Eliminated);

    // The contest completed with bob as winner, so the second tick has
    // nothing left to do.
    let contest = app.storage.get_contest(contest_id).await?.unwrap();
    assert_eq!(contest.status, ContestStatus::Completed);
    assert_eq!(contest.winner_member_id, Some(member_ids[0]));

    let second = poller.tick().await?;
    assert_eq!(second.rounds_processed, 0);
    assert_eq!(second.failures, 0);
    Ok(())
}

#[tokio::test]
async fn a_missed_tick_is_self_healed_by_the_window() -> Result<()> {
    let app = TestApp::new();
    let feed = std::sync::Arc::new(StubFeed::new(8));
    feed.set_fixtures(vec![
        feed_fixture(101, 1, 1, 2),
        feed_fixture(102, 1, 3, 4),
        feed_fixture(201, 2, 1, 3),
        feed_fixture(202, 2, 2, 4),
        feed_fixture(301, 3, 1, 4),
        feed_fixture(302, 3, 2, 3),
    ]);

    let catalog = Catalog::new(app.storage.clone());
    catalog.import_season(feed.as_ref(), SEASON).await?;
    let teams = app.storage.get_teams_for_season(SEASON).await?;
    let team_id = |provider: i64| {
        teams
            .iter()
            .find(|t| t.provider_team_id == provider)
            .and_then(|t| t.id)
            .unwrap()
    };

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol", "dave"], 1).await?;
    for (who, team) in [("bob", 1), ("carol", 3), ("dave", 2)] {
        app.picks
            .submit_pick(&identity(who), contest_id, Some(1), team_id(team))
            .await?;
    }

    // Both gameweeks 1 and 2 finish upstream before any tick ran: the
    // trailing window catches up on both in one pass.
    feed.finish(101, 2, 0); // team 1 wins, dave's team 2 loses
    feed.finish(102, 2, 0); // carol's team 3 wins
    feed.finish(201, 1, 1); // gameweek 2 draws with no picks submitted
    feed.finish(202, 0, 0);

    let poller = Poller::new(
        app.storage.clone(),
        app.settings.clone(),
        feed.clone(),
        Duration::from_secs(300),
    );
    let summary = poller.tick().await?;
    assert_eq!(summary.rounds_processed, 2);

    // Gameweek 1 eliminated dave; gameweek 2 eliminated the two
    // survivors for not picking, drawing the contest between them.
    let contest = app.storage.get_contest(contest_id).await?.unwrap();
    assert_eq!(contest.status, ContestStatus::Completed);
    assert!(contest.drawn);
    assert_member_accounting(app.storage.as_ref(), contest_id).await?;
    Ok(())
}

#[tokio::test]
async fn a_dead_feed_does_not_stop_processing_of_stored_results() -> Result<()> {
    let app = TestApp::new();
    let teams = seed_teams(app.storage.as_ref(), 4).await?;
    seed_gameweek(app.storage.as_ref(), 1, &teams, future_kickoff()).await?;

    let (contest_id, _) = start_contest(&app, "alice", &["bob", "carol"], 1).await?;
    app.picks
        .submit_pick(&identity("bob"), contest_id, Some(1), teams[0])
        .await?;

    // Results already landed in the catalog before the feed went down.
    finish_gameweek(app.storage.as_ref(), 1, &[(1, 0), (0, 0)]).await?;

    let poller = Poller::new(
        app.storage.clone(),
        app.settings.clone(),
        std::sync::Arc::new(FailingFeed),
        Duration::from_secs(300),
    );

    let summary = poller.tick().await?;
    assert_eq!(summary.rounds_processed, 1);
    assert_eq!(summary.failures, 0);
    Ok(())
}
