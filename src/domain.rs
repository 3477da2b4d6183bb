use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Site-wide role supplied by the identity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// An authenticated caller. The identity collaborator vouches for this;
/// the core trusts it as given and never authenticates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_key: String,
    pub display_name: String,
    pub role: Role,
}

impl Identity {
    pub fn is_site_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

/// A competing team, scoped to one season
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Option<Uuid>,
    pub season: String,
    pub provider_team_id: i64,
    pub name: String,
    pub short_name: String,
    pub created_at: DateTime<Utc>,
}

impl Team {
    pub fn new(season: String, provider_team_id: i64, name: String, short_name: String) -> Self {
        Self {
            id: None,
            season,
            provider_team_id,
            name,
            short_name,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureStatus {
    Scheduled,
    InPlay,
    Postponed,
    Finished,
}

impl FixtureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixtureStatus::Scheduled => "scheduled",
            FixtureStatus::InPlay => "in_play",
            FixtureStatus::Postponed => "postponed",
            FixtureStatus::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(FixtureStatus::Scheduled),
            "in_play" => Some(FixtureStatus::InPlay),
            "postponed" => Some(FixtureStatus::Postponed),
            "finished" => Some(FixtureStatus::Finished),
            _ => None,
        }
    }
}

/// One scheduled match in a season/gameweek. Owned by the catalog;
/// written only by the fixture import path, never by the contest core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub id: Option<Uuid>,
    pub season: String,
    pub gameweek: u32,
    pub provider_match_id: i64,
    pub home_team_id: Uuid,
    pub away_team_id: Uuid,
    pub kickoff: DateTime<Utc>,
    pub status: FixtureStatus,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
}

impl Fixture {
    pub fn is_finished(&self) -> bool {
        self.status == FixtureStatus::Finished
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestStatus {
    Open,
    Active,
    Completed,
}

impl ContestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContestStatus::Open => "open",
            ContestStatus::Active => "active",
            ContestStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ContestStatus::Open),
            "active" => Some(ContestStatus::Active),
            "completed" => Some(ContestStatus::Completed),
            _ => None,
        }
    }
}

/// One run of the Last Man Standing competition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contest {
    pub id: Option<Uuid>,
    pub name: String,
    pub season: String,
    pub admin_user_key: String,
    pub invite_token: String,
    /// Gameweek at which picks first become mandatory
    pub start_gameweek: u32,
    pub status: ContestStatus,
    pub winner_member_id: Option<Uuid>,
    pub drawn: bool,
    pub created_at: DateTime<Utc>,
}

impl Contest {
    pub fn new(
        name: String,
        season: String,
        admin_user_key: String,
        invite_token: String,
        start_gameweek: u32,
    ) -> Self {
        Self {
            id: None,
            name,
            season,
            admin_user_key,
            invite_token,
            start_gameweek,
            status: ContestStatus::Open,
            winner_member_id: None,
            drawn: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Alive,
    Eliminated,
    Winner,
    Drawn,
}

impl MemberStatus {
    /// Terminal states have no outbound transitions except admin override.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MemberStatus::Alive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Alive => "alive",
            MemberStatus::Eliminated => "eliminated",
            MemberStatus::Winner => "winner",
            MemberStatus::Drawn => "drawn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "alive" => Some(MemberStatus::Alive),
            "eliminated" => Some(MemberStatus::Eliminated),
            "winner" => Some(MemberStatus::Winner),
            "drawn" => Some(MemberStatus::Drawn),
            _ => None,
        }
    }
}

/// One participant's seat within one contest. Unique per (contest, user key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: Option<Uuid>,
    pub contest_id: Uuid,
    pub user_key: String,
    pub display_name: String,
    pub status: MemberStatus,
    pub eliminated_gameweek: Option<u32>,
    /// The disqualifying pick; null when eliminated for not picking at all.
    pub eliminated_pick_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Member {
    pub fn new(contest_id: Uuid, user_key: String, display_name: String) -> Self {
        Self {
            id: None,
            contest_id,
            user_key,
            display_name,
            status: MemberStatus::Alive,
            eliminated_gameweek: None,
            eliminated_pick_id: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickResult {
    Win,
    Draw,
    Loss,
}

impl PickResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickResult::Win => "win",
            PickResult::Draw => "draw",
            PickResult::Loss => "loss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "win" => Some(PickResult::Win),
            "draw" => Some(PickResult::Draw),
            "loss" => Some(PickResult::Loss),
            _ => None,
        }
    }
}

/// A member's chosen team for one gameweek. Unique per
/// (contest, member, gameweek); the result is filled in only by the
/// results processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pick {
    pub id: Option<Uuid>,
    pub contest_id: Uuid,
    pub member_id: Uuid,
    pub gameweek: u32,
    pub team_id: Uuid,
    pub result: Option<PickResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pick {
    pub fn new(contest_id: Uuid, member_id: Uuid, gameweek: u32, team_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            contest_id,
            member_id,
            gameweek,
            team_id,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}
