//! Shared test harness: an in-memory store with seeded seasons and
//! contests ready to play rounds against.

#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use lms_server::contests::ContestService;
use lms_server::domain::{Fixture, FixtureStatus, Identity, MemberStatus, Role, Team};
use lms_server::picks::PickService;
use lms_server::results::RoundProcessor;
use lms_server::settings::Settings;
use lms_server::storage::{InMemoryStorage, Storage};
use std::sync::Arc;
use uuid::Uuid;

pub const SEASON: &str = "2025-26";

pub struct TestApp {
    pub storage: Arc<dyn Storage>,
    pub settings: Arc<Settings>,
    pub contests: ContestService,
    pub picks: PickService,
    pub processor: RoundProcessor,
}

impl TestApp {
    pub fn new() -> Self {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let settings = Arc::new(Settings::new(storage.clone()));
        Self {
            contests: ContestService::new(storage.clone(), settings.clone()),
            picks: PickService::new(storage.clone(), settings.clone()),
            processor: RoundProcessor::new(storage.clone()),
            storage,
            settings,
        }
    }
}

pub fn identity(user_key: &str) -> Identity {
    Identity {
        user_key: user_key.to_string(),
        display_name: user_key.to_string(),
        role: Role::User,
    }
}

pub fn site_admin(user_key: &str) -> Identity {
    Identity {
        user_key: user_key.to_string(),
        display_name: user_key.to_string(),
        role: Role::Admin,
    }
}

/// Seed `count` teams for the season and return their ids.
pub async fn seed_teams(storage: &dyn Storage, count: usize) -> Result<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let mut team = Team::new(
            SEASON.to_string(),
            i as i64 + 1,
            format!("Team {}", i + 1),
            format!("T{}", i + 1),
        );
        storage.upsert_team(&mut team).await?;
        ids.push(team.id.unwrap());
    }
    Ok(ids)
}

/// Seed one gameweek of scheduled fixtures, pairing the given teams in
/// order: (0 vs 1), (2 vs 3), ...
pub async fn seed_gameweek(
    storage: &dyn Storage,
    gameweek: u32,
    teams: &[Uuid],
    kickoff: DateTime<Utc>,
) -> Result<()> {
    for (i, pair) in teams.chunks(2).enumerate() {
        if pair.len() < 2 {
            break;
        }
        let mut fixture = Fixture {
            id: None,
            season: SEASON.to_string(),
            gameweek,
            provider_match_id: gameweek as i64 * 100 + i as i64,
            home_team_id: pair[0],
            away_team_id: pair[1],
            kickoff,
            status: FixtureStatus::Scheduled,
            home_score: None,
            away_score: None,
        };
        storage.upsert_fixture(&mut fixture).await?;
    }
    Ok(())
}

pub fn future_kickoff() -> DateTime<Utc> {
    Utc::now() + Duration::days(2)
}

pub fn past_kickoff() -> DateTime<Utc> {
    Utc::now() - Duration::days(2)
}

/// Mark every fixture of a gameweek finished with the given scores, in
/// the seeded fixture order.
pub async fn finish_gameweek(
    storage: &dyn Storage,
    gameweek: u32,
    scores: &[(i64, i64)],
) -> Result<()> {
    let fixtures = storage.get_fixtures_for_gameweek(SEASON, gameweek).await?;
    for (fixture, (home, away)) in fixtures.into_iter().zip(scores) {
        let mut finished = fixture;
        finished.status = FixtureStatus::Finished;
        finished.home_score = Some(*home);
        finished.away_score = Some(*away);
        storage.upsert_fixture(&mut finished).await?;
    }
    Ok(())
}

/// Create a contest, join `member_keys`, and start it. Returns the
/// contest id and the member ids in join order.
pub async fn start_contest(
    app: &TestApp,
    admin_key: &str,
    member_keys: &[&str],
    start_gameweek: u32,
) -> Result<(Uuid, Vec<Uuid>)> {
    let admin = identity(admin_key);
    let contest = app
        .contests
        .create_contest(
            &admin,
            "Test Contest",
            Some(SEASON.to_string()),
            Some(start_gameweek),
        )
        .await?;
    let contest_id = contest.id.unwrap();

    let mut member_ids = Vec::with_capacity(member_keys.len());
    for key in member_keys {
        let member = app
            .contests
            .join_contest(&identity(key), &contest.invite_token)
            .await?;
        member_ids.push(member.id.unwrap());
    }

    app.contests.start_contest(&admin, contest_id).await?;
    Ok((contest_id, member_ids))
}

/// Every member is in exactly one status bucket at all times.
pub async fn assert_member_accounting(storage: &dyn Storage, contest_id: Uuid) -> Result<()> {
    let members = storage.get_members_for_contest(contest_id).await?;
    let alive = members
        .iter()
        .filter(|m| m.status == MemberStatus::Alive)
        .count();
    let eliminated = members
        .iter()
        .filter(|m| m.status == MemberStatus::Eliminated)
        .count();
    let winner = members
        .iter()
        .filter(|m| m.status == MemberStatus::Winner)
        .count();
    let drawn = members
        .iter()
        .filter(|m| m.status == MemberStatus::Drawn)
        .count();
    assert_eq!(alive + eliminated + winner + drawn, members.len());
    Ok(())
}
