use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::constants::{
    AGGREGATION_INTERVAL_TICKS, ATTACK_COOLDOWN_TICKS, COUNTER_MULTIPLIER,
    DEAD_UNIT_LINGER_TICKS, EMPTY_ROOM_GRACE_TICKS, MAX_PENDING_TRAINING_PER_PLAYER, MAX_PLAYERS,
    MIN_PLAYERS, PLACEMENT_TURN_TICKS, RAID_PERCENT, RATE_LIMIT_MAX_COMMANDS,
    RATE_LIMIT_WINDOW_TICKS, RESOURCE_CAP, SIEGE_BUILDING_MULTIPLIER, START_COUNTDOWN_TICKS,
    STARTING_FAITH, STARTING_FOOD, STARTING_GOLD, WATCHTOWER_AURA_RADIUS,
    WATCHTOWER_DEFENSE_DIVISOR, WORKERS_PER_PLAYER, WORKER_COOLDOWN_TICKS,
};
use crate::error::ConfigError;
use crate::types::ResourceBundle;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleSet {
    pub resource_cap: i32,
    pub starting_resources: ResourceBundle,
    pub raid_percent: i32,
    pub siege_building_multiplier: f32,
    pub counter_multiplier: f32,
    pub watchtower_aura_radius: i32,
    pub watchtower_defense_divisor: f32,
    pub attack_cooldown_ticks: u64,
    pub aggregation_interval_ticks: u64,
    pub dead_unit_linger_ticks: u64,
    pub workers_per_player: usize,
    pub worker_cooldown_ticks: u64,
    pub max_pending_training: usize,
    pub min_players: usize,
    pub max_players: usize,
    pub start_countdown_ticks: u64,
    pub empty_room_grace_ticks: u64,
    pub placement_turn_ticks: u64,
    pub rate_limit_window_ticks: u64,
    pub rate_limit_max_commands: usize,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            resource_cap: RESOURCE_CAP,
            starting_resources: ResourceBundle::new(STARTING_GOLD, STARTING_FOOD, STARTING_FAITH),
            raid_percent: RAID_PERCENT,
            siege_building_multiplier: SIEGE_BUILDING_MULTIPLIER,
            counter_multiplier: COUNTER_MULTIPLIER,
            watchtower_aura_radius: WATCHTOWER_AURA_RADIUS,
            watchtower_defense_divisor: WATCHTOWER_DEFENSE_DIVISOR,
            attack_cooldown_ticks: ATTACK_COOLDOWN_TICKS,
            aggregation_interval_ticks: AGGREGATION_INTERVAL_TICKS,
            dead_unit_linger_ticks: DEAD_UNIT_LINGER_TICKS,
            workers_per_player: WORKERS_PER_PLAYER,
            worker_cooldown_ticks: WORKER_COOLDOWN_TICKS,
            max_pending_training: MAX_PENDING_TRAINING_PER_PLAYER,
            min_players: MIN_PLAYERS,
            max_players: MAX_PLAYERS,
            start_countdown_ticks: START_COUNTDOWN_TICKS,
            empty_room_grace_ticks: EMPTY_ROOM_GRACE_TICKS,
            placement_turn_ticks: PLACEMENT_TURN_TICKS,
            rate_limit_window_ticks: RATE_LIMIT_WINDOW_TICKS,
            rate_limit_max_commands: RATE_LIMIT_MAX_COMMANDS,
        }
    }
}

impl RuleSet {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let rules: RuleSet = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resource_cap <= 0 {
            return Err(ConfigError::Invalid("resourceCap must be positive".to_string()));
        }
        if !(0..=100).contains(&self.raid_percent) {
            return Err(ConfigError::Invalid(
                "raidPercent must be within 0..=100".to_string(),
            ));
        }
        if self.watchtower_defense_divisor <= 0.0 {
            return Err(ConfigError::Invalid(
                "watchtowerDefenseDivisor must be positive".to_string(),
            ));
        }
        if self.aggregation_interval_ticks == 0 {
            return Err(ConfigError::Invalid(
                "aggregationIntervalTicks must be at least 1".to_string(),
            ));
        }
        if self.min_players < 2
            || self.min_players > self.max_players
            || self.max_players > MAX_PLAYERS
        {
            return Err(ConfigError::Invalid(format!(
                "player bounds must satisfy 2 <= minPlayers <= maxPlayers <= {MAX_PLAYERS}"
            )));
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Authoritative room server")]
pub struct ServerConfig {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,
    #[arg(long = "rules", env = "RULES_PATH")]
    pub rules_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn load_rules(&self) -> Result<RuleSet, ConfigError> {
        match self.rules_path.as_deref() {
            Some(path) => RuleSet::load(path),
            None => Ok(RuleSet::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_rules_fall_back_to_defaults() {
        let rules: RuleSet =
            serde_json::from_str(r#"{"raidPercent":25,"resourceCap":800}"#).expect("parse rules");
        assert_eq!(rules.raid_percent, 25);
        assert_eq!(rules.resource_cap, 800);
        assert_eq!(rules.workers_per_player, WORKERS_PER_PLAYER);
        assert_eq!(rules.siege_building_multiplier, SIEGE_BUILDING_MULTIPLIER);
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn invalid_player_bounds_are_rejected() {
        let rules = RuleSet {
            min_players: 3,
            max_players: 2,
            ..RuleSet::default()
        };
        assert!(matches!(rules.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_rules_file_reports_path() {
        let err = RuleSet::load(Path::new("/nonexistent/rules.json")).expect_err("missing file");
        assert!(err.to_string().contains("/nonexistent/rules.json"));
    }

    #[test]
    fn server_config_reads_flags() {
        let config = ServerConfig::try_parse_from(["server", "--port", "9100"]).expect("parse args");
        assert_eq!(config.port, 9100);
    }
}
