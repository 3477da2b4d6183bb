//! Active-gameweek resolution and deadline arithmetic.
//!
//! Every round-sensitive operation resolves the active gameweek through the
//! same pure function over stored data, freshly computed per call. Nothing
//! here is cached across requests.

use crate::domain::{Fixture, FixtureStatus};
use crate::error::Result;
use crate::settings::Settings;
use crate::storage::Storage;
use chrono::{DateTime, Utc};

/// Resolve the active gameweek for a season's fixture list.
///
/// Resolution order: explicit override if set, else the earliest gameweek
/// with any unfinished fixture, else the last gameweek once the whole
/// season is finished, else the stored fallback.
pub fn resolve_active_gameweek(
    fixtures: &[Fixture],
    override_gameweek: Option<u32>,
    fallback: u32,
) -> u32 {
    if let Some(gw) = override_gameweek {
        return gw;
    }

    let mut earliest_unfinished: Option<u32> = None;
    let mut last: Option<u32> = None;
    for fixture in fixtures {
        last = Some(last.map_or(fixture.gameweek, |l: u32| l.max(fixture.gameweek)));
        if fixture.status != FixtureStatus::Finished {
            earliest_unfinished =
                Some(earliest_unfinished.map_or(fixture.gameweek, |e: u32| e.min(fixture.gameweek)));
        }
    }

    earliest_unfinished.or(last).unwrap_or(fallback)
}

/// The deadline of a gameweek is the earliest kickoff among its fixtures.
pub fn gameweek_deadline(fixtures: &[Fixture], gameweek: u32) -> Option<DateTime<Utc>> {
    fixtures
        .iter()
        .filter(|f| f.gameweek == gameweek)
        .map(|f| f.kickoff)
        .min()
}

/// A gameweek with no fixtures has no deadline and never locks.
pub fn deadline_passed(fixtures: &[Fixture], gameweek: u32, now: DateTime<Utc>) -> bool {
    gameweek_deadline(fixtures, gameweek).map_or(false, |deadline| now >= deadline)
}

/// Load fixtures and settings and resolve the active gameweek for a season.
pub async fn active_gameweek(
    storage: &dyn Storage,
    settings: &Settings,
    season: &str,
) -> Result<u32> {
    let fixtures = storage.get_fixtures_for_season(season).await?;
    let override_gameweek = settings.gameweek_override().await?;
    let fallback = settings.fallback_gameweek().await?;
    Ok(resolve_active_gameweek(
        &fixtures,
        override_gameweek,
        fallback,
    ))
}
