//! Turso/libSQL-backed storage. Enabled with the `db` cargo feature; the
//! default build uses the in-memory store instead.

use crate::domain::*;
use crate::error::{LmsError, Result};
use crate::results::{RoundApply, RoundCommit};
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database};
use std::env;
use tracing::info;
use uuid::Uuid;

fn db_err(context: &str, e: impl std::fmt::Display) -> LmsError {
    LmsError::Database {
        message: format!("{context}: {e}"),
    }
}

fn parse_uuid(raw: &str, context: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| db_err(context, e))
}

fn parse_timestamp(raw: &str, context: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().map_err(|e| db_err(context, e))
}

pub struct DatabaseManager {
    db: Database,
}

impl DatabaseManager {
    /// Create a new database manager with connection to Turso
    pub async fn new() -> Result<Self> {
        let url = env::var("LIBSQL_URL")
            .map_err(|_| db_err("configuration", "LIBSQL_URL environment variable not set"))?;
        let auth_token = env::var("LIBSQL_AUTH_TOKEN").map_err(|_| {
            db_err("configuration", "LIBSQL_AUTH_TOKEN environment variable not set")
        })?;

        info!("Connecting to Turso database at {}", url);

        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(|e| db_err("failed to connect to database", e))?;

        Ok(Self { db })
    }

    pub async fn get_connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| db_err("failed to get database connection", e))
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        let conn = self.get_connection().await?;
        let migration_sql = include_str!("../migrations/001_create_contest_schema.sql");

        conn.execute_batch(migration_sql)
            .await
            .map_err(|e| db_err("failed to run migrations", e))?;

        info!("Database migrations completed successfully");
        Ok(())
    }
}

/// Relational storage implementation over libSQL.
pub struct DatabaseStorage {
    db: DatabaseManager,
}

impl DatabaseStorage {
    pub async fn new() -> Result<Self> {
        let db = DatabaseManager::new().await?;
        db.run_migrations().await?;
        Ok(Self { db })
    }

    async fn conn(&self) -> Result<Connection> {
        self.db.get_connection().await
    }
}

fn row_to_team(row: &libsql::Row) -> Result<Team> {
    let id: String = row.get(0).map_err(|e| db_err("read team id", e))?;
    let created_at: String = row.get(5).map_err(|e| db_err("read team created_at", e))?;
    Ok(Team {
        id: Some(parse_uuid(&id, "team id")?),
        season: row.get(1).map_err(|e| db_err("read team season", e))?,
        provider_team_id: row.get(2).map_err(|e| db_err("read team provider id", e))?,
        name: row.get(3).map_err(|e| db_err("read team name", e))?,
        short_name: row.get(4).map_err(|e| db_err("read team short name", e))?,
        created_at: parse_timestamp(&created_at, "team created_at")?,
    })
}

fn row_to_fixture(row: &libsql::Row) -> Result<Fixture> {
    let id: String = row.get(0).map_err(|e| db_err("read fixture id", e))?;
    let home: String = row.get(4).map_err(|e| db_err("read fixture home team", e))?;
    let away: String = row.get(5).map_err(|e| db_err("read fixture away team", e))?;
    let kickoff: String = row.get(6).map_err(|e| db_err("read fixture kickoff", e))?;
    let status: String = row.get(7).map_err(|e| db_err("read fixture status", e))?;
    let gameweek: i64 = row.get(2).map_err(|e| db_err("read fixture gameweek", e))?;
    Ok(Fixture {
        id: Some(parse_uuid(&id, "fixture id")?),
        season: row.get(1).map_err(|e| db_err("read fixture season", e))?,
        gameweek: gameweek as u32,
        provider_match_id: row.get(3).map_err(|e| db_err("read fixture match id", e))?,
        home_team_id: parse_uuid(&home, "fixture home team id")?,
        away_team_id: parse_uuid(&away, "fixture away team id")?,
        kickoff: parse_timestamp(&kickoff, "fixture kickoff")?,
        status: FixtureStatus::parse(&status)
            .ok_or_else(|| db_err("fixture status", format!("unknown value '{status}'")))?,
        home_score: row.get(8).map_err(|e| db_err("read fixture home score", e))?,
        away_score: row.get(9).map_err(|e| db_err("read fixture away score", e))?,
    })
}

fn row_to_contest(row: &libsql::Row) -> Result<Contest> {
    let id: String = row.get(0).map_err(|e| db_err("read contest id", e))?;
    let start_gameweek: i64 = row.get(5).map_err(|e| db_err("read contest start", e))?;
    let status: String = row.get(6).map_err(|e| db_err("read contest status", e))?;
    let winner: Option<String> = row.get(7).map_err(|e| db_err("read contest winner", e))?;
    let drawn: i64 = row.get(8).map_err(|e| db_err("read contest drawn", e))?;
    let created_at: String = row.get(9).map_err(|e| db_err("read contest created_at", e))?;
    Ok(Contest {
        id: Some(parse_uuid(&id, "contest id")?),
        name: row.get(1).map_err(|e| db_err("read contest name", e))?,
        season: row.get(2).map_err(|e| db_err("read contest season", e))?,
        admin_user_key: row.get(3).map_err(|e| db_err("read contest admin", e))?,
        invite_token: row.get(4).map_err(|e| db_err("read contest token", e))?,
        start_gameweek: start_gameweek as u32,
        status: ContestStatus::parse(&status)
            .ok_or_else(|| db_err("contest status", format!("unknown value '{status}'")))?,
        winner_member_id: winner
            .map(|w| parse_uuid(&w, "contest winner id"))
            .transpose()?,
        drawn: drawn != 0,
        created_at: parse_timestamp(&created_at, "contest created_at")?,
    })
}

fn row_to_member(row: &libsql::Row) -> Result<Member> {
    let id: String = row.get(0).map_err(|e| db_err("read member id", e))?;
    let contest_id: String = row.get(1).map_err(|e| db_err("read member contest", e))?;
    let status: String = row.get(4).map_err(|e| db_err("read member status", e))?;
    let eliminated_gameweek: Option<i64> =
        row.get(5).map_err(|e| db_err("read member elim gw", e))?;
    let eliminated_pick_id: Option<String> =
        row.get(6).map_err(|e| db_err("read member elim pick", e))?;
    let created_at: String = row.get(7).map_err(|e| db_err("read member created_at", e))?;
    Ok(Member {
        id: Some(parse_uuid(&id, "member id")?),
        contest_id: parse_uuid(&contest_id, "member contest id")?,
        user_key: row.get(2).map_err(|e| db_err("read member user key", e))?,
        display_name: row.get(3).map_err(|e| db_err("read member name", e))?,
        status: MemberStatus::parse(&status)
            .ok_or_else(|| db_err("member status", format!("unknown value '{status}'")))?,
        eliminated_gameweek: eliminated_gameweek.map(|g| g as u32),
        eliminated_pick_id: eliminated_pick_id
            .map(|p| parse_uuid(&p, "member pick id"))
            .transpose()?,
        created_at: parse_timestamp(&created_at, "member created_at")?,
    })
}

fn row_to_pick(row: &libsql::Row) -> Result<Pick> {
    let id: String = row.get(0).map_err(|e| db_err("read pick id", e))?;
    let contest_id: String = row.get(1).map_err(|e| db_err("read pick contest", e))?;
    let member_id: String = row.get(2).map_err(|e| db_err("read pick member", e))?;
    let gameweek: i64 = row.get(3).map_err(|e| db_err("read pick gameweek", e))?;
    let team_id: String = row.get(4).map_err(|e| db_err("read pick team", e))?;
    let result: Option<String> = row.get(5).map_err(|e| db_err("read pick result", e))?;
    let created_at: String = row.get(6).map_err(|e| db_err("read pick created_at", e))?;
    let updated_at: String = row.get(7).map_err(|e| db_err("read pick updated_at", e))?;
    Ok(Pick {
        id: Some(parse_uuid(&id, "pick id")?),
        contest_id: parse_uuid(&contest_id, "pick contest id")?,
        member_id: parse_uuid(&member_id, "pick member id")?,
        gameweek: gameweek as u32,
        team_id: parse_uuid(&team_id, "pick team id")?,
        result: result
            .map(|r| {
                PickResult::parse(&r)
                    .ok_or_else(|| db_err("pick result", format!("unknown value '{r}'")))
            })
            .transpose()?,
        created_at: parse_timestamp(&created_at, "pick created_at")?,
        updated_at: parse_timestamp(&updated_at, "pick updated_at")?,
    })
}

const TEAM_COLUMNS: &str = "id, season, provider_team_id, name, short_name, created_at";
const FIXTURE_COLUMNS: &str = "id, season, gameweek, provider_match_id, home_team_id, \
     away_team_id, kickoff, status, home_score, away_score";
const CONTEST_COLUMNS: &str = "id, name, season, admin_user_key, invite_token, \
     start_gameweek, status, winner_member_id, drawn, created_at";
const MEMBER_COLUMNS: &str = "id, contest_id, user_key, display_name, status, \
     eliminated_gameweek, eliminated_pick_id, created_at";
const PICK_COLUMNS: &str =
    "id, contest_id, member_id, gameweek, team_id, result, created_at, updated_at";

impl DatabaseStorage {
    async fn query_one<T>(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        map: fn(&libsql::Row) -> Result<T>,
    ) -> Result<Option<T>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| db_err("query failed", e))?;
        match rows.next().await.map_err(|e| db_err("read row", e))? {
            Some(row) => Ok(Some(map(&row)?)),
            None => Ok(None),
        }
    }

    async fn query_all<T>(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        map: fn(&libsql::Row) -> Result<T>,
    ) -> Result<Vec<T>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| db_err("query failed", e))?;
        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| db_err("read row", e))? {
            results.push(map(&row)?);
        }
        Ok(results)
    }
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn upsert_team(&self, team: &mut Team) -> Result<()> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id FROM teams WHERE season = ? AND provider_team_id = ?",
                libsql::params![team.season.clone(), team.provider_team_id],
            )
            .await
            .map_err(|e| db_err("query team", e))?;

        if let Some(row) = rows.next().await.map_err(|e| db_err("read row", e))? {
            let id: String = row.get(0).map_err(|e| db_err("read team id", e))?;
            team.id = Some(parse_uuid(&id, "team id")?);
            conn.execute(
                "UPDATE teams SET name = ?, short_name = ? WHERE id = ?",
                libsql::params![team.name.clone(), team.short_name.clone(), id],
            )
            .await
            .map_err(|e| db_err("update team", e))?;
        } else {
            let id = Uuid::new_v4();
            team.id = Some(id);
            conn.execute(
                "INSERT INTO teams (id, season, provider_team_id, name, short_name, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                libsql::params![
                    id.to_string(),
                    team.season.clone(),
                    team.provider_team_id,
                    team.name.clone(),
                    team.short_name.clone(),
                    team.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| db_err("insert team", e))?;
        }
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>> {
        self.query_one(
            &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?"),
            libsql::params![id.to_string()],
            row_to_team,
        )
        .await
    }

    async fn get_teams_for_season(&self, season: &str) -> Result<Vec<Team>> {
        self.query_all(
            &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE season = ? ORDER BY name"),
            libsql::params![season],
            row_to_team,
        )
        .await
    }

    async fn upsert_fixture(&self, fixture: &mut Fixture) -> Result<()> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id FROM fixtures WHERE season = ? AND provider_match_id = ?",
                libsql::params![fixture.season.clone(), fixture.provider_match_id],
            )
            .await
            .map_err(|e| db_err("query fixture", e))?;

        if let Some(row) = rows.next().await.map_err(|e| db_err("read row", e))? {
            let id: String = row.get(0).map_err(|e| db_err("read fixture id", e))?;
            fixture.id = Some(parse_uuid(&id, "fixture id")?);
            conn.execute(
                "UPDATE fixtures SET gameweek = ?, home_team_id = ?, away_team_id = ?, \
                 kickoff = ?, status = ?, home_score = ?, away_score = ? WHERE id = ?",
                libsql::params![
                    fixture.gameweek as i64,
                    fixture.home_team_id.to_string(),
                    fixture.away_team_id.to_string(),
                    fixture.kickoff.to_rfc3339(),
                    fixture.status.as_str(),
                    fixture.home_score,
                    fixture.away_score,
                    id
                ],
            )
            .await
            .map_err(|e| db_err("update fixture", e))?;
        } else {
            let id = Uuid::new_v4();
            fixture.id = Some(id);
            conn.execute(
                "INSERT INTO fixtures (id, season, gameweek, provider_match_id, home_team_id, \
                 away_team_id, kickoff, status, home_score, away_score) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    id.to_string(),
                    fixture.season.clone(),
                    fixture.gameweek as i64,
                    fixture.provider_match_id,
                    fixture.home_team_id.to_string(),
                    fixture.away_team_id.to_string(),
                    fixture.kickoff.to_rfc3339(),
                    fixture.status.as_str(),
                    fixture.home_score,
                    fixture.away_score
                ],
            )
            .await
            .map_err(|e| db_err("insert fixture", e))?;
        }
        Ok(())
    }

    async fn get_fixtures_for_season(&self, season: &str) -> Result<Vec<Fixture>> {
        self.query_all(
            &format!(
                "SELECT {FIXTURE_COLUMNS} FROM fixtures WHERE season = ? \
                 ORDER BY gameweek, kickoff"
            ),
            libsql::params![season],
            row_to_fixture,
        )
        .await
    }

    async fn get_fixtures_for_gameweek(
        &self,
        season: &str,
        gameweek: u32,
    ) -> Result<Vec<Fixture>> {
        self.query_all(
            &format!(
                "SELECT {FIXTURE_COLUMNS} FROM fixtures WHERE season = ? AND gameweek = ? \
                 ORDER BY kickoff"
            ),
            libsql::params![season, gameweek as i64],
            row_to_fixture,
        )
        .await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT value FROM settings WHERE key = ?",
                libsql::params![key],
            )
            .await
            .map_err(|e| db_err("query setting", e))?;
        match rows.next().await.map_err(|e| db_err("read row", e))? {
            Some(row) => Ok(Some(row.get(0).map_err(|e| db_err("read setting", e))?)),
            None => Ok(None),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            libsql::params![key, value],
        )
        .await
        .map_err(|e| db_err("set setting", e))?;
        Ok(())
    }

    async fn clear_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM settings WHERE key = ?",
            libsql::params![key],
        )
        .await
        .map_err(|e| db_err("clear setting", e))?;
        Ok(())
    }

    async fn create_contest(&self, contest: &mut Contest) -> Result<()> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id FROM contests WHERE invite_token = ?",
                libsql::params![contest.invite_token.clone()],
            )
            .await
            .map_err(|e| db_err("query contest", e))?;
        if rows
            .next()
            .await
            .map_err(|e| db_err("read row", e))?
            .is_some()
        {
            return Err(LmsError::Conflict(format!(
                "invite token '{}' already in use",
                contest.invite_token
            )));
        }

        let id = Uuid::new_v4();
        contest.id = Some(id);
        conn.execute(
            "INSERT INTO contests (id, name, season, admin_user_key, invite_token, \
             start_gameweek, status, winner_member_id, drawn, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            libsql::params![
                id.to_string(),
                contest.name.clone(),
                contest.season.clone(),
                contest.admin_user_key.clone(),
                contest.invite_token.clone(),
                contest.start_gameweek as i64,
                contest.status.as_str(),
                contest.winner_member_id.map(|w| w.to_string()),
                contest.drawn as i64,
                contest.created_at.to_rfc3339()
            ],
        )
        .await
        .map_err(|e| db_err("insert contest", e))?;
        Ok(())
    }

    async fn get_contest(&self, id: Uuid) -> Result<Option<Contest>> {
        self.query_one(
            &format!("SELECT {CONTEST_COLUMNS} FROM contests WHERE id = ?"),
            libsql::params![id.to_string()],
            row_to_contest,
        )
        .await
    }

    async fn get_contest_by_invite_token(&self, token: &str) -> Result<Option<Contest>> {
        self.query_one(
            &format!("SELECT {CONTEST_COLUMNS} FROM contests WHERE invite_token = ?"),
            libsql::params![token],
            row_to_contest,
        )
        .await
    }

    async fn list_contests(&self) -> Result<Vec<Contest>> {
        self.query_all(
            &format!("SELECT {CONTEST_COLUMNS} FROM contests ORDER BY created_at"),
            libsql::params![],
            row_to_contest,
        )
        .await
    }

    async fn list_active_contests(&self) -> Result<Vec<Contest>> {
        self.query_all(
            &format!(
                "SELECT {CONTEST_COLUMNS} FROM contests WHERE status = 'active' \
                 ORDER BY created_at"
            ),
            libsql::params![],
            row_to_contest,
        )
        .await
    }

    async fn update_contest(&self, contest: &Contest) -> Result<()> {
        let id = contest
            .id
            .ok_or_else(|| LmsError::Validation("contest has no id".into()))?;
        let conn = self.conn().await?;
        let changed = conn
            .execute(
                "UPDATE contests SET name = ?, status = ?, winner_member_id = ?, drawn = ? \
                 WHERE id = ?",
                libsql::params![
                    contest.name.clone(),
                    contest.status.as_str(),
                    contest.winner_member_id.map(|w| w.to_string()),
                    contest.drawn as i64,
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| db_err("update contest", e))?;
        if changed == 0 {
            return Err(LmsError::NotFound(format!("contest {id}")));
        }
        Ok(())
    }

    async fn delete_contest(&self, id: Uuid) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM picks WHERE contest_id = ?",
            libsql::params![id.to_string()],
        )
        .await
        .map_err(|e| db_err("delete picks", e))?;
        conn.execute(
            "DELETE FROM members WHERE contest_id = ?",
            libsql::params![id.to_string()],
        )
        .await
        .map_err(|e| db_err("delete members", e))?;
        let changed = conn
            .execute(
                "DELETE FROM contests WHERE id = ?",
                libsql::params![id.to_string()],
            )
            .await
            .map_err(|e| db_err("delete contest", e))?;
        if changed == 0 {
            return Err(LmsError::NotFound(format!("contest {id}")));
        }
        Ok(())
    }

    async fn create_member(&self, member: &mut Member) -> Result<()> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id FROM members WHERE contest_id = ? AND user_key = ?",
                libsql::params![member.contest_id.to_string(), member.user_key.clone()],
            )
            .await
            .map_err(|e| db_err("query member", e))?;
        if rows
            .next()
            .await
            .map_err(|e| db_err("read row", e))?
            .is_some()
        {
            return Err(LmsError::Conflict(format!(
                "user '{}' is already a member of contest {}",
                member.user_key, member.contest_id
            )));
        }

        let id = Uuid::new_v4();
        member.id = Some(id);
        conn.execute(
            "INSERT INTO members (id, contest_id, user_key, display_name, status, \
             eliminated_gameweek, eliminated_pick_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            libsql::params![
                id.to_string(),
                member.contest_id.to_string(),
                member.user_key.clone(),
                member.display_name.clone(),
                member.status.as_str(),
                member.eliminated_gameweek.map(|g| g as i64),
                member.eliminated_pick_id.map(|p| p.to_string()),
                member.created_at.to_rfc3339()
            ],
        )
        .await
        .map_err(|e| db_err("insert member", e))?;
        Ok(())
    }

    async fn get_member(&self, id: Uuid) -> Result<Option<Member>> {
        self.query_one(
            &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?"),
            libsql::params![id.to_string()],
            row_to_member,
        )
        .await
    }

    async fn get_member_by_user(
        &self,
        contest_id: Uuid,
        user_key: &str,
    ) -> Result<Option<Member>> {
        self.query_one(
            &format!(
                "SELECT {MEMBER_COLUMNS} FROM members WHERE contest_id = ? AND user_key = ?"
            ),
            libsql::params![contest_id.to_string(), user_key],
            row_to_member,
        )
        .await
    }

    async fn get_members_for_contest(&self, contest_id: Uuid) -> Result<Vec<Member>> {
        self.query_all(
            &format!(
                "SELECT {MEMBER_COLUMNS} FROM members WHERE contest_id = ? ORDER BY created_at"
            ),
            libsql::params![contest_id.to_string()],
            row_to_member,
        )
        .await
    }

    async fn update_member(&self, member: &Member) -> Result<()> {
        let id = member
            .id
            .ok_or_else(|| LmsError::Validation("member has no id".into()))?;
        let conn = self.conn().await?;
        let changed = conn
            .execute(
                "UPDATE members SET display_name = ?, status = ?, eliminated_gameweek = ?, \
                 eliminated_pick_id = ? WHERE id = ?",
                libsql::params![
                    member.display_name.clone(),
                    member.status.as_str(),
                    member.eliminated_gameweek.map(|g| g as i64),
                    member.eliminated_pick_id.map(|p| p.to_string()),
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| db_err("update member", e))?;
        if changed == 0 {
            return Err(LmsError::NotFound(format!("member {id}")));
        }
        Ok(())
    }

    async fn upsert_pick(&self, pick: &mut Pick) -> Result<()> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, created_at FROM picks \
                 WHERE contest_id = ? AND member_id = ? AND gameweek = ?",
                libsql::params![
                    pick.contest_id.to_string(),
                    pick.member_id.to_string(),
                    pick.gameweek as i64
                ],
            )
            .await
            .map_err(|e| db_err("query pick", e))?;

        if let Some(row) = rows.next().await.map_err(|e| db_err("read row", e))? {
            // Last-committed write wins; the row keeps its identity.
            let id: String = row.get(0).map_err(|e| db_err("read pick id", e))?;
            let created_at: String = row.get(1).map_err(|e| db_err("read pick created_at", e))?;
            pick.id = Some(parse_uuid(&id, "pick id")?);
            pick.created_at = parse_timestamp(&created_at, "pick created_at")?;
            pick.updated_at = Utc::now();
            conn.execute(
                "UPDATE picks SET team_id = ?, result = ?, updated_at = ? WHERE id = ?",
                libsql::params![
                    pick.team_id.to_string(),
                    pick.result.map(|r| r.as_str()),
                    pick.updated_at.to_rfc3339(),
                    id
                ],
            )
            .await
            .map_err(|e| db_err("update pick", e))?;
        } else {
            let id = Uuid::new_v4();
            pick.id = Some(id);
            conn.execute(
                "INSERT INTO picks (id, contest_id, member_id, gameweek, team_id, result, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    id.to_string(),
                    pick.contest_id.to_string(),
                    pick.member_id.to_string(),
                    pick.gameweek as i64,
                    pick.team_id.to_string(),
                    pick.result.map(|r| r.as_str()),
                    pick.created_at.to_rfc3339(),
                    pick.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| db_err("insert pick", e))?;
        }
        Ok(())
    }

    async fn get_pick(
        &self,
        contest_id: Uuid,
        member_id: Uuid,
        gameweek: u32,
    ) -> Result<Option<Pick>> {
        self.query_one(
            &format!(
                "SELECT {PICK_COLUMNS} FROM picks \
                 WHERE contest_id = ? AND member_id = ? AND gameweek = ?"
            ),
            libsql::params![
                contest_id.to_string(),
                member_id.to_string(),
                gameweek as i64
            ],
            row_to_pick,
        )
        .await
    }

    async fn get_picks_for_member(&self, contest_id: Uuid, member_id: Uuid) -> Result<Vec<Pick>> {
        self.query_all(
            &format!(
                "SELECT {PICK_COLUMNS} FROM picks \
                 WHERE contest_id = ? AND member_id = ? ORDER BY gameweek"
            ),
            libsql::params![contest_id.to_string(), member_id.to_string()],
            row_to_pick,
        )
        .await
    }

    async fn get_picks_for_round(&self, contest_id: Uuid, gameweek: u32) -> Result<Vec<Pick>> {
        self.query_all(
            &format!(
                "SELECT {PICK_COLUMNS} FROM picks \
                 WHERE contest_id = ? AND gameweek = ? ORDER BY created_at"
            ),
            libsql::params![contest_id.to_string(), gameweek as i64],
            row_to_pick,
        )
        .await
    }

    async fn apply_round_commit(&self, commit: &RoundCommit) -> Result<RoundApply> {
        let conn = self.conn().await?;
        conn.execute("BEGIN IMMEDIATE", libsql::params![])
            .await
            .map_err(|e| db_err("begin transaction", e))?;

        match apply_round_commit_inner(&conn, commit).await {
            Ok(apply) => {
                if apply == RoundApply::Applied {
                    conn.execute("COMMIT", libsql::params![])
                        .await
                        .map_err(|e| db_err("commit transaction", e))?;
                } else {
                    let _ = conn.execute("ROLLBACK", libsql::params![]).await;
                }
                Ok(apply)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", libsql::params![]).await;
                Err(e)
            }
        }
    }
}

/// The body of the round-processing transaction. Re-checks the
/// preconditions inside the transaction so a racing trigger observes a
/// no-op instead of double-eliminating.
async fn apply_round_commit_inner(conn: &Connection, commit: &RoundCommit) -> Result<RoundApply> {
    let mut rows = conn
        .query(
            "SELECT status FROM contests WHERE id = ?",
            libsql::params![commit.contest_id.to_string()],
        )
        .await
        .map_err(|e| db_err("query contest", e))?;
    let status: String = match rows.next().await.map_err(|e| db_err("read row", e))? {
        Some(row) => row.get(0).map_err(|e| db_err("read contest status", e))?,
        None => return Err(LmsError::NotFound(format!("contest {}", commit.contest_id))),
    };
    if status != ContestStatus::Active.as_str() {
        return Ok(RoundApply::ContestNotActive);
    }

    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM picks \
             WHERE contest_id = ? AND gameweek = ? AND result IS NOT NULL",
            libsql::params![commit.contest_id.to_string(), commit.gameweek as i64],
        )
        .await
        .map_err(|e| db_err("query processed picks", e))?;
    let processed: i64 = match rows.next().await.map_err(|e| db_err("read row", e))? {
        Some(row) => row.get(0).map_err(|e| db_err("read pick count", e))?,
        None => 0,
    };
    if processed > 0 {
        return Ok(RoundApply::AlreadyProcessed);
    }

    let now = Utc::now().to_rfc3339();

    for (pick_id, result) in &commit.pick_results {
        conn.execute(
            "UPDATE picks SET result = ?, updated_at = ? WHERE id = ?",
            libsql::params![result.as_str(), now.clone(), pick_id.to_string()],
        )
        .await
        .map_err(|e| db_err("write pick result", e))?;
    }

    for elimination in &commit.eliminations {
        conn.execute(
            "UPDATE members SET status = 'eliminated', eliminated_gameweek = ?, \
             eliminated_pick_id = ? WHERE id = ? AND status = 'alive'",
            libsql::params![
                commit.gameweek as i64,
                elimination.pick_id.map(|p| p.to_string()),
                elimination.member_id.to_string()
            ],
        )
        .await
        .map_err(|e| db_err("eliminate member", e))?;
    }

    if let Some(winner_id) = commit.winner_member_id {
        conn.execute(
            "UPDATE members SET status = 'winner' WHERE id = ? AND status = 'alive'",
            libsql::params![winner_id.to_string()],
        )
        .await
        .map_err(|e| db_err("promote winner", e))?;
    }

    for drawn_id in &commit.drawn_member_ids {
        conn.execute(
            "UPDATE members SET status = 'drawn' \
             WHERE id = ? AND status = 'eliminated' AND eliminated_gameweek = ?",
            libsql::params![drawn_id.to_string(), commit.gameweek as i64],
        )
        .await
        .map_err(|e| db_err("promote drawn member", e))?;
    }

    if commit.completes_contest() {
        conn.execute(
            "UPDATE contests SET status = 'completed', winner_member_id = ?, drawn = ? \
             WHERE id = ?",
            libsql::params![
                commit.winner_member_id.map(|w| w.to_string()),
                (!commit.drawn_member_ids.is_empty()) as i64,
                commit.contest_id.to_string()
            ],
        )
        .await
        .map_err(|e| db_err("complete contest", e))?;
    }

    Ok(RoundApply::Applied)
}
