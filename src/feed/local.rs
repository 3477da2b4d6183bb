use crate::error::Result;
use crate::feed::{FeedFixture, FeedTeam, FixtureFeed};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Deserialize)]
struct LocalSeason {
    teams: Vec<FeedTeam>,
    fixtures: Vec<FeedFixture>,
}

/// File-backed feed for development environments without provider access.
/// The file maps season names to their team and fixture lists.
pub struct LocalFeed {
    path: PathBuf,
}

impl LocalFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load_season(&self, season: &str) -> Result<LocalSeason> {
        let content = fs::read_to_string(&self.path)?;
        let mut seasons: HashMap<String, LocalSeason> = serde_json::from_str(&content)?;
        Ok(seasons.remove(season).unwrap_or(LocalSeason {
            teams: Vec::new(),
            fixtures: Vec::new(),
        }))
    }
}

#[async_trait::async_trait]
impl FixtureFeed for LocalFeed {
    fn feed_name(&self) -> &'static str {
        "local"
    }

    async fn get_teams(&self, season: &str) -> Result<Vec<FeedTeam>> {
        let data = self.load_season(season)?;
        info!(
            "Loaded {} teams for season {} from {}",
            data.teams.len(),
            season,
            self.path.display()
        );
        Ok(data.teams)
    }

    async fn get_fixtures(&self, season: &str) -> Result<Vec<FeedFixture>> {
        let data = self.load_season(season)?;
        info!(
            "Loaded {} fixtures for season {} from {}",
            data.fixtures.len(),
            season,
            self.path.display()
        );
        Ok(data.fixtures)
    }
}
