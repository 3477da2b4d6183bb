use crate::domain::*;
use crate::error::{LmsError, Result};
use crate::results::{RoundApply, RoundCommit};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Storage trait for the contest engine's transactional store.
///
/// Every method is atomic with respect to every other; `apply_round_commit`
/// re-checks its preconditions inside the same boundary that performs the
/// writes, which is what makes round processing safe to trigger twice.
#[async_trait]
pub trait Storage: Send + Sync {
    // Catalog: teams
    async fn upsert_team(&self, team: &mut Team) -> Result<()>;
    async fn get_team(&self, id: Uuid) -> Result<Option<Team>>;
    async fn get_teams_for_season(&self, season: &str) -> Result<Vec<Team>>;

    // Catalog: fixtures
    async fn upsert_fixture(&self, fixture: &mut Fixture) -> Result<()>;
    async fn get_fixtures_for_season(&self, season: &str) -> Result<Vec<Fixture>>;
    async fn get_fixtures_for_gameweek(&self, season: &str, gameweek: u32)
        -> Result<Vec<Fixture>>;

    // Settings
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
    async fn clear_setting(&self, key: &str) -> Result<()>;

    // Contests
    async fn create_contest(&self, contest: &mut Contest) -> Result<()>;
    async fn get_contest(&self, id: Uuid) -> Result<Option<Contest>>;
    async fn get_contest_by_invite_token(&self, token: &str) -> Result<Option<Contest>>;
    async fn list_contests(&self) -> Result<Vec<Contest>>;
    async fn list_active_contests(&self) -> Result<Vec<Contest>>;
    async fn update_contest(&self, contest: &Contest) -> Result<()>;
    /// Deletes the contest and cascades its members and picks.
    async fn delete_contest(&self, id: Uuid) -> Result<()>;

    // Members
    async fn create_member(&self, member: &mut Member) -> Result<()>;
    async fn get_member(&self, id: Uuid) -> Result<Option<Member>>;
    async fn get_member_by_user(&self, contest_id: Uuid, user_key: &str)
        -> Result<Option<Member>>;
    async fn get_members_for_contest(&self, contest_id: Uuid) -> Result<Vec<Member>>;
    async fn update_member(&self, member: &Member) -> Result<()>;

    // Picks
    /// Upserts on the (contest, member, gameweek) uniqueness key.
    /// Last-committed write wins; a replaced row keeps its id and created_at.
    async fn upsert_pick(&self, pick: &mut Pick) -> Result<()>;
    async fn get_pick(
        &self,
        contest_id: Uuid,
        member_id: Uuid,
        gameweek: u32,
    ) -> Result<Option<Pick>>;
    async fn get_picks_for_member(&self, contest_id: Uuid, member_id: Uuid) -> Result<Vec<Pick>>;
    async fn get_picks_for_round(&self, contest_id: Uuid, gameweek: u32) -> Result<Vec<Pick>>;

    // Round processing
    async fn apply_round_commit(&self, commit: &RoundCommit) -> Result<RoundApply>;
}

#[derive(Default)]
struct StoreState {
    teams: HashMap<Uuid, Team>,
    fixtures: HashMap<Uuid, Fixture>,
    settings: HashMap<String, String>,
    contests: HashMap<Uuid, Contest>,
    members: HashMap<Uuid, Member>,
    picks: HashMap<Uuid, Pick>,
}

/// In-memory storage implementation for development/testing.
///
/// One mutex guards the whole state, so each trait method is one
/// transaction and `apply_round_commit` can never interleave with a
/// concurrent processing attempt.
pub struct InMemoryStorage {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn upsert_team(&self, team: &mut Team) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .teams
            .values()
            .find(|t| t.season == team.season && t.provider_team_id == team.provider_team_id)
            .and_then(|t| t.id);

        match existing {
            Some(id) => {
                team.id = Some(id);
                let stored = state.teams.get_mut(&id).unwrap();
                stored.name = team.name.clone();
                stored.short_name = team.short_name.clone();
            }
            None => {
                let id = Uuid::new_v4();
                team.id = Some(id);
                state.teams.insert(id, team.clone());
                debug!("Created team: {} with id {}", team.name, id);
            }
        }
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>> {
        let state = self.state.lock().unwrap();
        Ok(state.teams.get(&id).cloned())
    }

    async fn get_teams_for_season(&self, season: &str) -> Result<Vec<Team>> {
        let state = self.state.lock().unwrap();
        let mut teams: Vec<Team> = state
            .teams
            .values()
            .filter(|t| t.season == season)
            .cloned()
            .collect();
        teams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(teams)
    }

    async fn upsert_fixture(&self, fixture: &mut Fixture) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .fixtures
            .values()
            .find(|f| {
                f.season == fixture.season && f.provider_match_id == fixture.provider_match_id
            })
            .and_then(|f| f.id);

        match existing {
            Some(id) => {
                fixture.id = Some(id);
                state.fixtures.insert(id, fixture.clone());
            }
            None => {
                let id = Uuid::new_v4();
                fixture.id = Some(id);
                state.fixtures.insert(id, fixture.clone());
                debug!(
                    "Created fixture: provider match {} with id {}",
                    fixture.provider_match_id, id
                );
            }
        }
        Ok(())
    }

    async fn get_fixtures_for_season(&self, season: &str) -> Result<Vec<Fixture>> {
        let state = self.state.lock().unwrap();
        let mut fixtures: Vec<Fixture> = state
            .fixtures
            .values()
            .filter(|f| f.season == season)
            .cloned()
            .collect();
        fixtures.sort_by(|a, b| (a.gameweek, a.kickoff).cmp(&(b.gameweek, b.kickoff)));
        Ok(fixtures)
    }

    async fn get_fixtures_for_gameweek(
        &self,
        season: &str,
        gameweek: u32,
    ) -> Result<Vec<Fixture>> {
        let state = self.state.lock().unwrap();
        let mut fixtures: Vec<Fixture> = state
            .fixtures
            .values()
            .filter(|f| f.season == season && f.gameweek == gameweek)
            .cloned()
            .collect();
        fixtures.sort_by_key(|f| f.kickoff);
        Ok(fixtures)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear_setting(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.settings.remove(key);
        Ok(())
    }

    async fn create_contest(&self, contest: &mut Contest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state
            .contests
            .values()
            .any(|c| c.invite_token == contest.invite_token)
        {
            return Err(LmsError::Conflict(format!(
                "invite token '{}' already in use",
                contest.invite_token
            )));
        }

        let id = Uuid::new_v4();
        contest.id = Some(id);
        state.contests.insert(id, contest.clone());
        debug!("Created contest: {} with id {}", contest.name, id);
        Ok(())
    }

    async fn get_contest(&self, id: Uuid) -> Result<Option<Contest>> {
        let state = self.state.lock().unwrap();
        Ok(state.contests.get(&id).cloned())
    }

    async fn get_contest_by_invite_token(&self, token: &str) -> Result<Option<Contest>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .contests
            .values()
            .find(|c| c.invite_token == token)
            .cloned())
    }

    async fn list_contests(&self) -> Result<Vec<Contest>> {
        let state = self.state.lock().unwrap();
        let mut contests: Vec<Contest> = state.contests.values().cloned().collect();
        contests.sort_by_key(|c| c.created_at);
        Ok(contests)
    }

    async fn list_active_contests(&self) -> Result<Vec<Contest>> {
        let state = self.state.lock().unwrap();
        let mut contests: Vec<Contest> = state
            .contests
            .values()
            .filter(|c| c.status == ContestStatus::Active)
            .cloned()
            .collect();
        contests.sort_by_key(|c| c.created_at);
        Ok(contests)
    }

    async fn update_contest(&self, contest: &Contest) -> Result<()> {
        let id = contest
            .id
            .ok_or_else(|| LmsError::Validation("contest has no id".into()))?;
        let mut state = self.state.lock().unwrap();
        if !state.contests.contains_key(&id) {
            return Err(LmsError::NotFound(format!("contest {id}")));
        }
        state.contests.insert(id, contest.clone());
        Ok(())
    }

    async fn delete_contest(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.contests.remove(&id).is_none() {
            return Err(LmsError::NotFound(format!("contest {id}")));
        }
        state.members.retain(|_, m| m.contest_id != id);
        state.picks.retain(|_, p| p.contest_id != id);
        debug!("Deleted contest {} with members and picks", id);
        Ok(())
    }

    async fn create_member(&self, member: &mut Member) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state
            .members
            .values()
            .any(|m| m.contest_id == member.contest_id && m.user_key == member.user_key)
        {
            return Err(LmsError::Conflict(format!(
                "user '{}' is already a member of contest {}",
                member.user_key, member.contest_id
            )));
        }

        let id = Uuid::new_v4();
        member.id = Some(id);
        state.members.insert(id, member.clone());
        debug!("Created member: {} with id {}", member.display_name, id);
        Ok(())
    }

    async fn get_member(&self, id: Uuid) -> Result<Option<Member>> {
        let state = self.state.lock().unwrap();
        Ok(state.members.get(&id).cloned())
    }

    async fn get_member_by_user(
        &self,
        contest_id: Uuid,
        user_key: &str,
    ) -> Result<Option<Member>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .members
            .values()
            .find(|m| m.contest_id == contest_id && m.user_key == user_key)
            .cloned())
    }

    async fn get_members_for_contest(&self, contest_id: Uuid) -> Result<Vec<Member>> {
        let state = self.state.lock().unwrap();
        let mut members: Vec<Member> = state
            .members
            .values()
            .filter(|m| m.contest_id == contest_id)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.created_at);
        Ok(members)
    }

    async fn update_member(&self, member: &Member) -> Result<()> {
        let id = member
            .id
            .ok_or_else(|| LmsError::Validation("member has no id".into()))?;
        let mut state = self.state.lock().unwrap();
        if !state.members.contains_key(&id) {
            return Err(LmsError::NotFound(format!("member {id}")));
        }
        state.members.insert(id, member.clone());
        Ok(())
    }

    async fn upsert_pick(&self, pick: &mut Pick) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .picks
            .values()
            .find(|p| {
                p.contest_id == pick.contest_id
                    && p.member_id == pick.member_id
                    && p.gameweek == pick.gameweek
            })
            .map(|p| (p.id, p.created_at));

        match existing {
            Some((id, created_at)) => {
                pick.id = id;
                pick.created_at = created_at;
                pick.updated_at = Utc::now();
                state.picks.insert(id.unwrap(), pick.clone());
            }
            None => {
                let id = Uuid::new_v4();
                pick.id = Some(id);
                state.picks.insert(id, pick.clone());
                debug!(
                    "Created pick for member {} gameweek {}",
                    pick.member_id, pick.gameweek
                );
            }
        }
        Ok(())
    }

    async fn get_pick(
        &self,
        contest_id: Uuid,
        member_id: Uuid,
        gameweek: u32,
    ) -> Result<Option<Pick>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .picks
            .values()
            .find(|p| {
                p.contest_id == contest_id && p.member_id == member_id && p.gameweek == gameweek
            })
            .cloned())
    }

    async fn get_picks_for_member(&self, contest_id: Uuid, member_id: Uuid) -> Result<Vec<Pick>> {
        let state = self.state.lock().unwrap();
        let mut picks: Vec<Pick> = state
            .picks
            .values()
            .filter(|p| p.contest_id == contest_id && p.member_id == member_id)
            .cloned()
            .collect();
        picks.sort_by_key(|p| p.gameweek);
        Ok(picks)
    }

    async fn get_picks_for_round(&self, contest_id: Uuid, gameweek: u32) -> Result<Vec<Pick>> {
        let state = self.state.lock().unwrap();
        let mut picks: Vec<Pick> = state
            .picks
            .values()
            .filter(|p| p.contest_id == contest_id && p.gameweek == gameweek)
            .cloned()
            .collect();
        picks.sort_by_key(|p| p.created_at);
        Ok(picks)
    }

    async fn apply_round_commit(&self, commit: &RoundCommit) -> Result<RoundApply> {
        let mut state = self.state.lock().unwrap();

        // Re-check preconditions under the same lock that applies the
        // writes: of two racing triggers, one applies everything and the
        // other observes a no-op.
        let status = state
            .contests
            .get(&commit.contest_id)
            .map(|c| c.status)
            .ok_or_else(|| LmsError::NotFound(format!("contest {}", commit.contest_id)))?;
        if status != ContestStatus::Active {
            return Ok(RoundApply::ContestNotActive);
        }
        let already_processed = state.picks.values().any(|p| {
            p.contest_id == commit.contest_id
                && p.gameweek == commit.gameweek
                && p.result.is_some()
        });
        if already_processed {
            return Ok(RoundApply::AlreadyProcessed);
        }

        let now = Utc::now();

        for (pick_id, result) in &commit.pick_results {
            if let Some(pick) = state.picks.get_mut(pick_id) {
                pick.result = Some(*result);
                pick.updated_at = now;
            }
        }

        for elimination in &commit.eliminations {
            if let Some(member) = state.members.get_mut(&elimination.member_id) {
                // Monotone: only alive members go out.
                if member.status == MemberStatus::Alive {
                    member.status = MemberStatus::Eliminated;
                    member.eliminated_gameweek = Some(commit.gameweek);
                    member.eliminated_pick_id = elimination.pick_id;
                }
            }
        }

        if let Some(winner_id) = commit.winner_member_id {
            if let Some(member) = state.members.get_mut(&winner_id) {
                if member.status == MemberStatus::Alive {
                    member.status = MemberStatus::Winner;
                }
            }
        }

        for drawn_id in &commit.drawn_member_ids {
            if let Some(member) = state.members.get_mut(drawn_id) {
                // Only members eliminated in this very pass are promoted.
                if member.status == MemberStatus::Eliminated
                    && member.eliminated_gameweek == Some(commit.gameweek)
                {
                    member.status = MemberStatus::Drawn;
                }
            }
        }

        if commit.completes_contest() {
            if let Some(contest) = state.contests.get_mut(&commit.contest_id) {
                contest.status = ContestStatus::Completed;
                contest.winner_member_id = commit.winner_member_id;
                contest.drawn = !commit.drawn_member_ids.is_empty();
            }
        }

        Ok(RoundApply::Applied)
    }
}
