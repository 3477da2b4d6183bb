pub mod local;
pub mod provider;

use crate::domain::FixtureStatus;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A team as supplied by the match feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedTeam {
    pub provider_team_id: i64,
    pub name: String,
    pub short_name: String,
}

/// A fixture as supplied by the match feed, keyed by the provider's stable
/// match id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedFixture {
    pub provider_match_id: i64,
    pub gameweek: u32,
    pub home_provider_team_id: i64,
    pub away_provider_team_id: i64,
    pub kickoff: DateTime<Utc>,
    pub status: FixtureStatus,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
}

/// Core trait that all match-schedule/result sources must implement
#[async_trait::async_trait]
pub trait FixtureFeed: Send + Sync {
    /// Unique identifier for this feed
    fn feed_name(&self) -> &'static str;

    /// Fetch the full team list for a season
    async fn get_teams(&self, season: &str) -> Result<Vec<FeedTeam>>;

    /// Fetch the full fixture list for a season
    async fn get_fixtures(&self, season: &str) -> Result<Vec<FeedFixture>>;
}
