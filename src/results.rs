//! Gameweek results processing: the elimination state machine.
//!
//! One (contest, gameweek) unit of work moves pending -> processed in a
//! single atomic step. The processor plans the full write set up front and
//! hands it to the store, which re-checks the preconditions and applies
//! everything inside one transaction boundary.

use crate::domain::{Contest, ContestStatus, Fixture, Member, MemberStatus, Pick, PickResult};
use crate::error::{LmsError, Result};
use crate::storage::Storage;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One member scheduled for elimination in a processing pass.
#[derive(Debug, Clone)]
pub struct Elimination {
    pub member_id: Uuid,
    /// The disqualifying pick; None when the member never submitted one.
    pub pick_id: Option<Uuid>,
}

/// The complete write set of one (contest, gameweek) processing pass.
/// The store applies this as a single transaction: pick results,
/// eliminations, promotions, and contest completion commit together or
/// not at all.
#[derive(Debug, Clone)]
pub struct RoundCommit {
    pub contest_id: Uuid,
    pub gameweek: u32,
    pub pick_results: Vec<(Uuid, PickResult)>,
    pub eliminations: Vec<Elimination>,
    pub winner_member_id: Option<Uuid>,
    /// Members eliminated in this pass that are promoted to drawn because
    /// nobody survived the round. Never contains previously-eliminated members.
    pub drawn_member_ids: Vec<Uuid>,
}

impl RoundCommit {
    pub fn completes_contest(&self) -> bool {
        self.winner_member_id.is_some() || !self.drawn_member_ids.is_empty()
    }
}

/// What the store did with a [`RoundCommit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundApply {
    Applied,
    AlreadyProcessed,
    ContestNotActive,
}

/// Outcome of a processing attempt, reported to the trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Processed(ProcessedRound),
    AlreadyProcessed,
    NotReady { unfinished: usize },
    NotActive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRound {
    pub eliminated: usize,
    pub alive_remaining: usize,
    pub winner_member_id: Option<Uuid>,
    pub drawn: bool,
    pub completed: bool,
}

/// Derive the per-team outcome map for a round from its finished fixtures:
/// higher score wins, lower loses, equal scores draw both sides.
pub fn outcome_map(fixtures: &[Fixture]) -> HashMap<Uuid, PickResult> {
    let mut map = HashMap::new();
    for fixture in fixtures {
        if !fixture.is_finished() {
            continue;
        }
        let (home, away) = match (fixture.home_score, fixture.away_score) {
            (Some(h), Some(a)) => (h, a),
            _ => continue,
        };
        let (home_result, away_result) = if home > away {
            (PickResult::Win, PickResult::Loss)
        } else if home < away {
            (PickResult::Loss, PickResult::Win)
        } else {
            (PickResult::Draw, PickResult::Draw)
        };
        map.insert(fixture.home_team_id, home_result);
        map.insert(fixture.away_team_id, away_result);
    }
    map
}

/// Plan the write set for one round. Pure; looks at nothing but its inputs.
pub fn plan_round(
    contest: &Contest,
    gameweek: u32,
    members: &[Member],
    picks: &[Pick],
    outcomes: &HashMap<Uuid, PickResult>,
) -> RoundCommit {
    let contest_id = contest.id.expect("stored contest has an id");

    // A team absent from the map should not occur given the
    // fixture-existence precondition on picks; it defaults to a loss.
    let mut pick_results: Vec<(Uuid, PickResult)> = Vec::new();
    let mut result_by_member: HashMap<Uuid, (Uuid, PickResult)> = HashMap::new();
    for pick in picks {
        let result = outcomes
            .get(&pick.team_id)
            .copied()
            .unwrap_or(PickResult::Loss);
        let pick_id = pick.id.expect("stored pick has an id");
        pick_results.push((pick_id, result));
        result_by_member.insert(pick.member_id, (pick_id, result));
    }

    // A member goes out this round on a non-win, or on no pick at all
    // while still alive (no-pick default loss).
    let mut eliminations: Vec<Elimination> = Vec::new();
    let mut survivors: Vec<Uuid> = Vec::new();
    for member in members {
        if member.status != MemberStatus::Alive {
            continue;
        }
        let member_id = member.id.expect("stored member has an id");
        match result_by_member.get(&member_id) {
            Some((_, PickResult::Win)) => survivors.push(member_id),
            Some((pick_id, _)) => eliminations.push(Elimination {
                member_id,
                pick_id: Some(*pick_id),
            }),
            None => eliminations.push(Elimination {
                member_id,
                pick_id: None,
            }),
        }
    }

    // Exactly one survivor wins the contest outright. Zero survivors draw
    // the contest between the members who went out in this pass only,
    // never those eliminated in earlier rounds.
    let mut winner_member_id = None;
    let mut drawn_member_ids = Vec::new();
    match survivors.len() {
        1 => winner_member_id = Some(survivors[0]),
        0 => drawn_member_ids = eliminations.iter().map(|e| e.member_id).collect(),
        _ => {}
    }

    RoundCommit {
        contest_id,
        gameweek,
        pick_results,
        eliminations,
        winner_member_id,
        drawn_member_ids,
    }
}

/// Consumes finished-match outcomes and advances every member's survival
/// state for one round of one contest.
pub struct RoundProcessor {
    storage: Arc<dyn Storage>,
}

impl RoundProcessor {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Process one gameweek of one contest. Re-entrant: a round that was
    /// already processed (or a contest no longer active) is a no-op, so the
    /// administrator trigger and the poller may race freely.
    #[instrument(skip(self))]
    pub async fn process_round(&self, contest_id: Uuid, gameweek: u32) -> Result<RoundOutcome> {
        let contest = self
            .storage
            .get_contest(contest_id)
            .await?
            .ok_or_else(|| LmsError::NotFound(format!("contest {contest_id}")))?;

        if contest.status != ContestStatus::Active {
            return Ok(RoundOutcome::NotActive);
        }

        let fixtures = self
            .storage
            .get_fixtures_for_gameweek(&contest.season, gameweek)
            .await?;
        // A round with no fixtures at all has nothing to score yet.
        if fixtures.is_empty() {
            return Ok(RoundOutcome::NotReady { unfinished: 0 });
        }
        let unfinished = fixtures.iter().filter(|f| !f.is_finished()).count();
        if unfinished > 0 {
            counter!("lms_rounds_not_ready_total").increment(1);
            return Ok(RoundOutcome::NotReady { unfinished });
        }

        let picks = self
            .storage
            .get_picks_for_round(contest_id, gameweek)
            .await?;
        if picks.iter().any(|p| p.result.is_some()) {
            return Ok(RoundOutcome::AlreadyProcessed);
        }

        let members = self.storage.get_members_for_contest(contest_id).await?;
        let outcomes = outcome_map(&fixtures);
        let commit = plan_round(&contest, gameweek, &members, &picks, &outcomes);

        let eliminated = commit.eliminations.len();
        let alive_before = members
            .iter()
            .filter(|m| m.status == MemberStatus::Alive)
            .count();
        let alive_remaining = alive_before - eliminated;
        let winner_member_id = commit.winner_member_id;
        let drawn = !commit.drawn_member_ids.is_empty();
        let completed = commit.completes_contest();

        // The store re-checks "still active" and "not already processed"
        // inside the same transaction that applies the writes, so two racing
        // triggers serialize: one applies, the other observes a no-op.
        match self.storage.apply_round_commit(&commit).await? {
            RoundApply::AlreadyProcessed => return Ok(RoundOutcome::AlreadyProcessed),
            RoundApply::ContestNotActive => return Ok(RoundOutcome::NotActive),
            RoundApply::Applied => {}
        }

        counter!("lms_rounds_processed_total").increment(1);
        counter!("lms_members_eliminated_total").increment(eliminated as u64);
        info!(
            contest = %contest_id,
            gameweek,
            eliminated,
            alive_remaining,
            completed,
            "processed gameweek"
        );
        if completed {
            if let Some(winner) = winner_member_id {
                info!(contest = %contest_id, member = %winner, "contest won");
            } else {
                warn!(contest = %contest_id, gameweek, "contest drawn, nobody survived");
            }
        }

        Ok(RoundOutcome::Processed(ProcessedRound {
            eliminated,
            alive_remaining,
            winner_member_id,
            drawn,
            completed,
        }))
    }
}
