//! Read-only per-season registry of teams and fixtures.
//!
//! The catalog is populated exclusively from the match feed, upserting by
//! provider id; the contest core only ever reads it.

use crate::domain::{Fixture, Team};
use crate::error::Result;
use crate::feed::{FeedFixture, FixtureFeed};
use crate::storage::Storage;
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ImportSummary {
    pub teams: usize,
    pub fixtures: usize,
    pub skipped: usize,
}

pub struct Catalog {
    storage: Arc<dyn Storage>,
}

impl Catalog {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Pull the full team and fixture lists for a season and upsert them
    /// by provider id.
    #[instrument(skip(self, feed))]
    pub async fn import_season(&self, feed: &dyn FixtureFeed, season: &str) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();

        let mut team_ids: HashMap<i64, Uuid> = HashMap::new();
        for feed_team in feed.get_teams(season).await? {
            let mut team = Team::new(
                season.to_string(),
                feed_team.provider_team_id,
                feed_team.name,
                feed_team.short_name,
            );
            self.storage.upsert_team(&mut team).await?;
            team_ids.insert(team.provider_team_id, team.id.unwrap());
            summary.teams += 1;
        }

        for feed_fixture in feed.get_fixtures(season).await? {
            match self.to_fixture(season, &feed_fixture, &team_ids) {
                Some(mut fixture) => {
                    self.storage.upsert_fixture(&mut fixture).await?;
                    summary.fixtures += 1;
                }
                None => summary.skipped += 1,
            }
        }

        counter!("lms_feed_imports_total").increment(1);
        info!(
            season,
            teams = summary.teams,
            fixtures = summary.fixtures,
            skipped = summary.skipped,
            "imported season from feed {}",
            feed.feed_name()
        );
        Ok(summary)
    }

    /// Pull outcome updates for the season's not-yet-finished fixtures.
    /// Already-finished fixtures are left untouched.
    #[instrument(skip(self, feed))]
    pub async fn refresh_results(
        &self,
        feed: &dyn FixtureFeed,
        season: &str,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();

        let stored = self.storage.get_fixtures_for_season(season).await?;
        let unfinished: HashSet<i64> = stored
            .iter()
            .filter(|f| !f.is_finished())
            .map(|f| f.provider_match_id)
            .collect();
        if unfinished.is_empty() {
            return Ok(summary);
        }

        let team_ids: HashMap<i64, Uuid> = self
            .storage
            .get_teams_for_season(season)
            .await?
            .into_iter()
            .filter_map(|t| t.id.map(|id| (t.provider_team_id, id)))
            .collect();

        for feed_fixture in feed.get_fixtures(season).await? {
            if !unfinished.contains(&feed_fixture.provider_match_id) {
                continue;
            }
            match self.to_fixture(season, &feed_fixture, &team_ids) {
                Some(mut fixture) => {
                    self.storage.upsert_fixture(&mut fixture).await?;
                    summary.fixtures += 1;
                }
                None => summary.skipped += 1,
            }
        }

        counter!("lms_feed_refreshes_total").increment(1);
        info!(
            season,
            updated = summary.fixtures,
            skipped = summary.skipped,
            "refreshed fixture results from feed {}",
            feed.feed_name()
        );
        Ok(summary)
    }

    fn to_fixture(
        &self,
        season: &str,
        feed_fixture: &FeedFixture,
        team_ids: &HashMap<i64, Uuid>,
    ) -> Option<Fixture> {
        let home_team_id = team_ids.get(&feed_fixture.home_provider_team_id);
        let away_team_id = team_ids.get(&feed_fixture.away_provider_team_id);
        let (home_team_id, away_team_id) = match (home_team_id, away_team_id) {
            (Some(h), Some(a)) => (*h, *a),
            _ => {
                warn!(
                    "Skipping fixture {} referencing unknown team ({} vs {})",
                    feed_fixture.provider_match_id,
                    feed_fixture.home_provider_team_id,
                    feed_fixture.away_provider_team_id
                );
                return None;
            }
        };

        Some(Fixture {
            id: None,
            season: season.to_string(),
            gameweek: feed_fixture.gameweek,
            provider_match_id: feed_fixture.provider_match_id,
            home_team_id,
            away_team_id,
            kickoff: feed_fixture.kickoff,
            status: feed_fixture.status,
            home_score: feed_fixture.home_score,
            away_score: feed_fixture.away_score,
        })
    }
}
