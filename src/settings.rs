//! Typed accessors over the string-valued settings store.
//!
//! The round override and the deadline bypass are two explicit settings,
//! not a serialized composite blob; get returns a typed default when unset.

use crate::constants::{
    DEFAULT_GAMEWEEK, DEFAULT_SEASON, SETTING_CURRENT_SEASON, SETTING_DEADLINE_BYPASS,
    SETTING_FALLBACK_GAMEWEEK, SETTING_GAMEWEEK_OVERRIDE,
};
use crate::error::Result;
use crate::storage::Storage;
use std::sync::Arc;
use tracing::warn;

pub struct Settings {
    storage: Arc<dyn Storage>,
}

impl Settings {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn current_season(&self) -> Result<String> {
        Ok(self
            .storage
            .get_setting(SETTING_CURRENT_SEASON)
            .await?
            .unwrap_or_else(|| DEFAULT_SEASON.to_string()))
    }

    pub async fn set_current_season(&self, season: &str) -> Result<()> {
        self.storage.set_setting(SETTING_CURRENT_SEASON, season).await
    }

    /// Stored fallback gameweek, used when the season has no fixtures yet.
    pub async fn fallback_gameweek(&self) -> Result<u32> {
        Ok(self
            .parse_gameweek(SETTING_FALLBACK_GAMEWEEK)
            .await?
            .unwrap_or(DEFAULT_GAMEWEEK))
    }

    pub async fn set_fallback_gameweek(&self, gameweek: u32) -> Result<()> {
        self.storage
            .set_setting(SETTING_FALLBACK_GAMEWEEK, &gameweek.to_string())
            .await
    }

    /// Explicit round override; takes precedence over fixture-derived
    /// resolution when set.
    pub async fn gameweek_override(&self) -> Result<Option<u32>> {
        self.parse_gameweek(SETTING_GAMEWEEK_OVERRIDE).await
    }

    pub async fn set_gameweek_override(&self, gameweek: Option<u32>) -> Result<()> {
        match gameweek {
            Some(gw) => {
                self.storage
                    .set_setting(SETTING_GAMEWEEK_OVERRIDE, &gw.to_string())
                    .await
            }
            None => self.storage.clear_setting(SETTING_GAMEWEEK_OVERRIDE).await,
        }
    }

    pub async fn deadline_bypass(&self) -> Result<bool> {
        Ok(self
            .storage
            .get_setting(SETTING_DEADLINE_BYPASS)
            .await?
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false))
    }

    pub async fn set_deadline_bypass(&self, on: bool) -> Result<()> {
        self.storage
            .set_setting(SETTING_DEADLINE_BYPASS, if on { "true" } else { "false" })
            .await
    }

    async fn parse_gameweek(&self, key: &str) -> Result<Option<u32>> {
        let raw = self.storage.get_setting(key).await?;
        Ok(raw.and_then(|v| match v.parse::<u32>() {
            Ok(gw) => Some(gw),
            Err(_) => {
                warn!("Ignoring malformed value '{}' for setting '{}'", v, key);
                None
            }
        }))
    }
}
