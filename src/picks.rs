//! Pick validation and the read-time visibility gate.

use crate::domain::{ContestStatus, Identity, MemberStatus, Pick, PickResult};
use crate::error::{LmsError, Result};
use crate::rounds;
use crate::settings::Settings;
use crate::storage::Storage;
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PickTeam {
    pub id: Uuid,
    pub name: String,
    pub short_name: String,
}

/// One member's pick as projected through the visibility gate. The team is
/// None when redacted; the nominator is always visible.
#[derive(Debug, Clone, Serialize)]
pub struct RoundPick {
    pub member_id: Uuid,
    pub display_name: String,
    pub member_status: MemberStatus,
    pub team: Option<PickTeam>,
    pub result: Option<PickResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundPicks {
    pub gameweek: u32,
    /// True once the deadline has passed (or bypass is on): every team is
    /// fully visible.
    pub revealed: bool,
    pub picks: Vec<RoundPick>,
}

pub struct PickService {
    storage: Arc<dyn Storage>,
    settings: Arc<Settings>,
}

impl PickService {
    pub fn new(storage: Arc<dyn Storage>, settings: Arc<Settings>) -> Self {
        Self { storage, settings }
    }

    /// Submit or change the caller's pick for a gameweek.
    ///
    /// Preconditions are checked in a fixed order, each its own rejection:
    /// contest active, gameweek not before the contest start, member alive,
    /// deadline not passed (unless bypass), team has a fixture this
    /// gameweek, team not already used this season (unless the pool is
    /// exhausted or this is an idempotent re-pick of the same gameweek).
    #[instrument(skip(self, identity))]
    pub async fn submit_pick(
        &self,
        identity: &Identity,
        contest_id: Uuid,
        gameweek: Option<u32>,
        team_id: Uuid,
    ) -> Result<Pick> {
        let contest = self
            .storage
            .get_contest(contest_id)
            .await?
            .ok_or_else(|| LmsError::NotFound(format!("contest {contest_id}")))?;

        if contest.status != ContestStatus::Active {
            return Err(LmsError::Rejected("contest is not active".into()));
        }

        let gameweek = match gameweek {
            Some(gw) => gw,
            None => {
                rounds::active_gameweek(self.storage.as_ref(), &self.settings, &contest.season)
                    .await?
            }
        };
        if gameweek < contest.start_gameweek {
            return Err(LmsError::Rejected(format!(
                "contest does not start until gameweek {}",
                contest.start_gameweek
            )));
        }

        let member = self
            .storage
            .get_member_by_user(contest_id, &identity.user_key)
            .await?
            .ok_or_else(|| LmsError::NotFound("you are not a member of this contest".into()))?;
        if member.status != MemberStatus::Alive {
            return Err(LmsError::Rejected("you have been eliminated".into()));
        }
        let member_id = member.id.unwrap();

        let fixtures = self
            .storage
            .get_fixtures_for_gameweek(&contest.season, gameweek)
            .await?;
        let bypass = self.settings.deadline_bypass().await?;
        if !bypass && rounds::deadline_passed(&fixtures, gameweek, Utc::now()) {
            return Err(LmsError::Rejected(format!(
                "the deadline for gameweek {gameweek} has passed"
            )));
        }

        let has_fixture = fixtures
            .iter()
            .any(|f| f.home_team_id == team_id || f.away_team_id == team_id);
        if !has_fixture {
            return Err(LmsError::Rejected(format!(
                "team has no fixture in gameweek {gameweek}"
            )));
        }

        // Teams picked in other gameweeks are burned until the member has
        // used every team in the season; the current gameweek's own pick is
        // exempt so re-picking the same team is idempotent.
        let picks = self.storage.get_picks_for_member(contest_id, member_id).await?;
        let used: HashSet<Uuid> = picks
            .iter()
            .filter(|p| p.gameweek != gameweek)
            .map(|p| p.team_id)
            .collect();
        if used.contains(&team_id) {
            let total_teams = self
                .storage
                .get_teams_for_season(&contest.season)
                .await?
                .len();
            let pool_exhausted = total_teams > 0 && used.len() >= total_teams;
            if !pool_exhausted {
                return Err(LmsError::Rejected(
                    "team already used this season".into(),
                ));
            }
        }

        let mut pick = Pick::new(contest_id, member_id, gameweek, team_id);
        self.storage.upsert_pick(&mut pick).await?;
        counter!("lms_picks_submitted_total").increment(1);
        info!(contest = %contest_id, member = %member_id, gameweek, team = %team_id, "pick stored");
        Ok(pick)
    }

    /// List a round's picks through the visibility gate: before the
    /// deadline (bypass off) every other member's team is redacted, while
    /// presence and identity of each nominator stay visible. This is a
    /// read-time projection; nothing is written.
    pub async fn list_round_picks(
        &self,
        identity: &Identity,
        contest_id: Uuid,
        gameweek: Option<u32>,
    ) -> Result<RoundPicks> {
        let contest = self
            .storage
            .get_contest(contest_id)
            .await?
            .ok_or_else(|| LmsError::NotFound(format!("contest {contest_id}")))?;

        let gameweek = match gameweek {
            Some(gw) => gw,
            None => {
                rounds::active_gameweek(self.storage.as_ref(), &self.settings, &contest.season)
                    .await?
            }
        };

        let fixtures = self
            .storage
            .get_fixtures_for_gameweek(&contest.season, gameweek)
            .await?;
        let bypass = self.settings.deadline_bypass().await?;
        let revealed = bypass || rounds::deadline_passed(&fixtures, gameweek, Utc::now());

        let members: HashMap<Uuid, _> = self
            .storage
            .get_members_for_contest(contest_id)
            .await?
            .into_iter()
            .filter_map(|m| m.id.map(|id| (id, m)))
            .collect();
        let viewer_member_id = members
            .values()
            .find(|m| m.user_key == identity.user_key)
            .and_then(|m| m.id);
        let teams: HashMap<Uuid, PickTeam> = self
            .storage
            .get_teams_for_season(&contest.season)
            .await?
            .into_iter()
            .filter_map(|t| {
                t.id.map(|id| {
                    (
                        id,
                        PickTeam {
                            id,
                            name: t.name,
                            short_name: t.short_name,
                        },
                    )
                })
            })
            .collect();

        let mut rows = Vec::new();
        for pick in self.storage.get_picks_for_round(contest_id, gameweek).await? {
            let Some(member) = members.get(&pick.member_id) else {
                continue;
            };
            let own = viewer_member_id == Some(pick.member_id);
            let team = if revealed || own {
                teams.get(&pick.team_id).cloned()
            } else {
                None
            };
            rows.push(RoundPick {
                member_id: pick.member_id,
                display_name: member.display_name.clone(),
                member_status: member.status,
                team,
                result: pick.result,
            });
        }

        Ok(RoundPicks {
            gameweek,
            revealed,
            picks: rows,
        })
    }
}
