use crate::domain::FixtureStatus;
use crate::error::{LmsError, Result};
use crate::feed::{FeedFixture, FeedTeam, FixtureFeed};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// HTTP client for the hosted match-schedule/result provider.
pub struct ProviderFeed {
    client: reqwest::Client,
    base_url: String,
}

impl ProviderFeed {
    pub fn new(base_url: String, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self { client, base_url })
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        debug!("Fetching {}", url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(LmsError::Feed {
                message: format!("provider returned {} for {}", response.status(), url),
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

fn parse_status(raw: &str) -> FixtureStatus {
    match raw {
        "SCHEDULED" | "TIMED" => FixtureStatus::Scheduled,
        "IN_PLAY" | "LIVE" | "PAUSED" => FixtureStatus::InPlay,
        "POSTPONED" | "SUSPENDED" | "CANCELLED" => FixtureStatus::Postponed,
        "FINISHED" | "AWARDED" => FixtureStatus::Finished,
        other => {
            warn!("Unknown fixture status '{}', treating as scheduled", other);
            FixtureStatus::Scheduled
        }
    }
}

fn required_i64(value: &Value, field: &str) -> Result<i64> {
    value[field].as_i64().ok_or_else(|| LmsError::Feed {
        message: format!("{field} not found in provider response"),
    })
}

fn required_str<'a>(value: &'a Value, field: &str) -> Result<&'a str> {
    value[field].as_str().ok_or_else(|| LmsError::Feed {
        message: format!("{field} not found in provider response"),
    })
}

#[async_trait::async_trait]
impl FixtureFeed for ProviderFeed {
    fn feed_name(&self) -> &'static str {
        "provider"
    }

    #[instrument(skip(self))]
    async fn get_teams(&self, season: &str) -> Result<Vec<FeedTeam>> {
        let data = self.get_json(&format!("seasons/{season}/teams")).await?;
        let entries = data["teams"]
            .as_array()
            .ok_or_else(|| LmsError::Feed {
                message: "teams not found in provider response".to_string(),
            })?;

        let mut teams = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = required_str(entry, "name")?;
            teams.push(FeedTeam {
                provider_team_id: required_i64(entry, "id")?,
                name: name.to_string(),
                short_name: entry["shortName"].as_str().unwrap_or(name).to_string(),
            });
        }
        info!("Fetched {} teams for season {}", teams.len(), season);
        Ok(teams)
    }

    #[instrument(skip(self))]
    async fn get_fixtures(&self, season: &str) -> Result<Vec<FeedFixture>> {
        let data = self.get_json(&format!("seasons/{season}/fixtures")).await?;
        let entries = data["fixtures"]
            .as_array()
            .ok_or_else(|| LmsError::Feed {
                message: "fixtures not found in provider response".to_string(),
            })?;

        let mut fixtures = Vec::with_capacity(entries.len());
        for entry in entries {
            let kickoff_raw = required_str(entry, "kickoffUtc")?;
            let kickoff = kickoff_raw
                .parse::<DateTime<Utc>>()
                .map_err(|e| LmsError::Feed {
                    message: format!("failed to parse kickoff '{kickoff_raw}': {e}"),
                })?;
            let status = parse_status(required_str(entry, "status")?);

            fixtures.push(FeedFixture {
                provider_match_id: required_i64(entry, "id")?,
                gameweek: required_i64(entry, "matchday")? as u32,
                home_provider_team_id: required_i64(entry, "homeTeamId")?,
                away_provider_team_id: required_i64(entry, "awayTeamId")?,
                kickoff,
                status,
                home_score: entry["score"]["home"].as_i64(),
                away_score: entry["score"]["away"].as_i64(),
            });
        }
        info!("Fetched {} fixtures for season {}", fixtures.len(), season);
        Ok(fixtures)
    }
}
