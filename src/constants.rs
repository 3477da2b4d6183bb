//! Setting keys and policy constants shared across the crate.

/// Settings-store keys. All values are stored as strings.
pub const SETTING_CURRENT_SEASON: &str = "current_season";
pub const SETTING_FALLBACK_GAMEWEEK: &str = "current_gameweek";
pub const SETTING_GAMEWEEK_OVERRIDE: &str = "gameweek_override";
pub const SETTING_DEADLINE_BYPASS: &str = "deadline_bypass";

/// Defaults returned when a setting is unset.
pub const DEFAULT_SEASON: &str = "2025-26";
pub const DEFAULT_GAMEWEEK: u32 = 1;

/// How many trailing gameweeks the poller re-processes each tick so a
/// missed tick is self-healing.
pub const PROCESS_WINDOW: u32 = 3;

/// Length of generated contest invite tokens.
pub const INVITE_TOKEN_LEN: usize = 8;

/// How many times contest creation retries on an invite-token collision.
pub const INVITE_TOKEN_RETRIES: usize = 3;
