//! Contest registry: games, their membership roster, and survival status.

use crate::constants::{INVITE_TOKEN_LEN, INVITE_TOKEN_RETRIES};
use crate::domain::{Contest, ContestStatus, Identity, Member, MemberStatus, Pick};
use crate::error::{LmsError, Result};
use crate::rounds;
use crate::settings::Settings;
use crate::storage::Storage;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

fn new_invite_token() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INVITE_TOKEN_LEN)
        .map(char::from)
        .collect();
    token.to_lowercase()
}

/// Listing row with per-viewer membership annotation
#[derive(Debug, Clone, Serialize)]
pub struct ContestSummary {
    pub id: Uuid,
    pub name: String,
    pub season: String,
    pub status: ContestStatus,
    pub start_gameweek: u32,
    pub member_count: usize,
    pub alive_count: usize,
    pub drawn: bool,
    pub viewer_status: Option<MemberStatus>,
}

/// Full contest view; the invite token is present only for the contest
/// admin and site admins.
#[derive(Debug, Clone, Serialize)]
pub struct ContestDetail {
    pub id: Uuid,
    pub name: String,
    pub season: String,
    pub status: ContestStatus,
    pub start_gameweek: u32,
    pub invite_token: Option<String>,
    pub winner_member_id: Option<Uuid>,
    pub drawn: bool,
    pub members: Vec<Member>,
    pub viewer_status: Option<MemberStatus>,
}

pub struct ContestService {
    storage: Arc<dyn Storage>,
    settings: Arc<Settings>,
}

impl ContestService {
    pub fn new(storage: Arc<dyn Storage>, settings: Arc<Settings>) -> Self {
        Self { storage, settings }
    }

    /// Create a contest; the caller becomes its administrator. The creator
    /// does not join automatically; they join with the invite token like
    /// everyone else.
    #[instrument(skip(self, identity))]
    pub async fn create_contest(
        &self,
        identity: &Identity,
        name: &str,
        season: Option<String>,
        start_gameweek: Option<u32>,
    ) -> Result<Contest> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LmsError::Validation("contest name must not be empty".into()));
        }

        let season = match season {
            Some(s) => s,
            None => self.settings.current_season().await?,
        };
        let start_gameweek = match start_gameweek {
            Some(gw) => gw,
            None => rounds::active_gameweek(self.storage.as_ref(), &self.settings, &season).await?,
        };

        // Token collisions are rare; retry a few times before giving up.
        let mut last_err = None;
        for _ in 0..INVITE_TOKEN_RETRIES {
            let mut contest = Contest::new(
                name.to_string(),
                season.clone(),
                identity.user_key.clone(),
                new_invite_token(),
                start_gameweek,
            );
            match self.storage.create_contest(&mut contest).await {
                Ok(()) => {
                    info!(contest = %contest.id.unwrap(), name, "created contest");
                    return Ok(contest);
                }
                Err(e @ LmsError::Conflict(_)) => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| LmsError::Conflict("invite token collision".into())))
    }

    /// Join a contest by invite token. Only open contests accept joiners.
    #[instrument(skip(self, identity, invite_token))]
    pub async fn join_contest(&self, identity: &Identity, invite_token: &str) -> Result<Member> {
        let contest = self
            .storage
            .get_contest_by_invite_token(invite_token)
            .await?
            .ok_or_else(|| LmsError::NotFound("no contest for that invite token".into()))?;

        if contest.status != ContestStatus::Open {
            return Err(LmsError::Rejected(
                "contest has already started and cannot be joined".into(),
            ));
        }

        let mut member = Member::new(
            contest.id.unwrap(),
            identity.user_key.clone(),
            identity.display_name.clone(),
        );
        self.storage.create_member(&mut member).await?;
        info!(contest = %contest.id.unwrap(), member = %member.id.unwrap(), "member joined");
        Ok(member)
    }

    /// Start a contest. Contest admin only; needs at least two members.
    #[instrument(skip(self, identity))]
    pub async fn start_contest(&self, identity: &Identity, contest_id: Uuid) -> Result<Contest> {
        let mut contest = self.require_contest(contest_id).await?;
        self.require_contest_admin(identity, &contest)?;

        if contest.status != ContestStatus::Open {
            return Err(LmsError::Rejected("contest is not open".into()));
        }
        let members = self.storage.get_members_for_contest(contest_id).await?;
        if members.len() < 2 {
            return Err(LmsError::Rejected(
                "contest needs at least 2 members to start".into(),
            ));
        }

        contest.status = ContestStatus::Active;
        self.storage.update_contest(&contest).await?;
        info!(contest = %contest_id, members = members.len(), "contest started");
        Ok(contest)
    }

    /// All contests, annotated with the viewer's membership where present.
    pub async fn list_contests(&self, identity: &Identity) -> Result<Vec<ContestSummary>> {
        let contests = self.storage.list_contests().await?;
        let mut summaries = Vec::with_capacity(contests.len());
        for contest in contests {
            let contest_id = contest.id.unwrap();
            let members = self.storage.get_members_for_contest(contest_id).await?;
            let viewer_status = members
                .iter()
                .find(|m| m.user_key == identity.user_key)
                .map(|m| m.status);
            summaries.push(ContestSummary {
                id: contest_id,
                name: contest.name,
                season: contest.season,
                status: contest.status,
                start_gameweek: contest.start_gameweek,
                member_count: members.len(),
                alive_count: members
                    .iter()
                    .filter(|m| m.status == MemberStatus::Alive)
                    .count(),
                drawn: contest.drawn,
                viewer_status,
            });
        }
        Ok(summaries)
    }

    pub async fn get_contest_detail(
        &self,
        identity: &Identity,
        contest_id: Uuid,
    ) -> Result<ContestDetail> {
        let contest = self.require_contest(contest_id).await?;
        let members = self.storage.get_members_for_contest(contest_id).await?;

        let is_admin =
            identity.is_site_admin() || contest.admin_user_key == identity.user_key;
        let viewer_status = members
            .iter()
            .find(|m| m.user_key == identity.user_key)
            .map(|m| m.status);

        Ok(ContestDetail {
            id: contest_id,
            name: contest.name,
            season: contest.season,
            status: contest.status,
            start_gameweek: contest.start_gameweek,
            invite_token: is_admin.then_some(contest.invite_token),
            winner_member_id: contest.winner_member_id,
            drawn: contest.drawn,
            members,
            viewer_status,
        })
    }

    /// Delete a contest, cascading its members and picks.
    #[instrument(skip(self, identity))]
    pub async fn delete_contest(&self, identity: &Identity, contest_id: Uuid) -> Result<()> {
        let contest = self.require_contest(contest_id).await?;
        self.require_contest_admin(identity, &contest)?;
        self.storage.delete_contest(contest_id).await?;
        info!(contest = %contest_id, "contest deleted");
        Ok(())
    }

    /// Administrative member-add, bypassing the invite token.
    #[instrument(skip(self, identity))]
    pub async fn admin_add_member(
        &self,
        identity: &Identity,
        contest_id: Uuid,
        user_key: &str,
        display_name: &str,
    ) -> Result<Member> {
        let contest = self.require_contest(contest_id).await?;
        self.require_contest_admin(identity, &contest)?;

        let user_key = user_key.trim();
        if user_key.is_empty() {
            return Err(LmsError::Validation("user key must not be empty".into()));
        }
        let display_name = if display_name.trim().is_empty() {
            user_key
        } else {
            display_name.trim()
        };

        let mut member = Member::new(contest_id, user_key.to_string(), display_name.to_string());
        self.storage.create_member(&mut member).await?;
        info!(contest = %contest_id, member = %member.id.unwrap(), "member added by admin");
        Ok(member)
    }

    /// Administrative status override: the only legal exit from a terminal
    /// member status. Setting a member back to alive clears the elimination
    /// record.
    #[instrument(skip(self, identity))]
    pub async fn admin_override_member_status(
        &self,
        identity: &Identity,
        contest_id: Uuid,
        member_id: Uuid,
        status: MemberStatus,
        eliminated_gameweek: Option<u32>,
    ) -> Result<Member> {
        let contest = self.require_contest(contest_id).await?;
        self.require_contest_admin(identity, &contest)?;

        let mut member = self.require_member(contest_id, member_id).await?;
        member.status = status;
        match status {
            MemberStatus::Alive => {
                member.eliminated_gameweek = None;
                member.eliminated_pick_id = None;
            }
            MemberStatus::Eliminated | MemberStatus::Drawn => {
                if eliminated_gameweek.is_some() {
                    member.eliminated_gameweek = eliminated_gameweek;
                    member.eliminated_pick_id = None;
                }
            }
            MemberStatus::Winner => {}
        }
        self.storage.update_member(&member).await?;
        info!(contest = %contest_id, member = %member_id, status = status.as_str(), "member status overridden");
        Ok(member)
    }

    /// Administrative retroactive pick import. Bypasses deadline and
    /// team-usage policy but not referential integrity: the team must have
    /// a fixture in that gameweek.
    #[instrument(skip(self, identity))]
    pub async fn admin_import_pick(
        &self,
        identity: &Identity,
        contest_id: Uuid,
        member_id: Uuid,
        gameweek: u32,
        team_id: Uuid,
    ) -> Result<Pick> {
        let contest = self.require_contest(contest_id).await?;
        self.require_contest_admin(identity, &contest)?;
        let member = self.require_member(contest_id, member_id).await?;

        self.storage
            .get_team(team_id)
            .await?
            .ok_or_else(|| LmsError::NotFound(format!("team {team_id}")))?;

        let fixtures = self
            .storage
            .get_fixtures_for_gameweek(&contest.season, gameweek)
            .await?;
        let has_fixture = fixtures
            .iter()
            .any(|f| f.home_team_id == team_id || f.away_team_id == team_id);
        if !has_fixture {
            return Err(LmsError::Rejected(format!(
                "team has no fixture in gameweek {gameweek}"
            )));
        }

        let mut pick = Pick::new(contest_id, member.id.unwrap(), gameweek, team_id);
        self.storage.upsert_pick(&mut pick).await?;
        info!(contest = %contest_id, member = %member_id, gameweek, "pick imported by admin");
        Ok(pick)
    }

    async fn require_contest(&self, contest_id: Uuid) -> Result<Contest> {
        self.storage
            .get_contest(contest_id)
            .await?
            .ok_or_else(|| LmsError::NotFound(format!("contest {contest_id}")))
    }

    async fn require_member(&self, contest_id: Uuid, member_id: Uuid) -> Result<Member> {
        let member = self
            .storage
            .get_member(member_id)
            .await?
            .filter(|m| m.contest_id == contest_id)
            .ok_or_else(|| LmsError::NotFound(format!("member {member_id}")))?;
        Ok(member)
    }

    fn require_contest_admin(&self, identity: &Identity, contest: &Contest) -> Result<()> {
        if identity.is_site_admin() || contest.admin_user_key == identity.user_key {
            Ok(())
        } else {
            Err(LmsError::Rejected(
                "only the contest admin may do that".into(),
            ))
        }
    }
}
