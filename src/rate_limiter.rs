use std::collections::HashMap;

use crate::config::RuleSet;
use crate::error::CommandError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimiterOptions {
    pub window_ticks: u64,
    pub max_per_window: usize,
}

impl RateLimiterOptions {
    pub fn from_rules(rules: &RuleSet) -> Self {
        Self {
            window_ticks: rules.rate_limit_window_ticks,
            max_per_window: rules.rate_limit_max_commands,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimiter {
    options: RateLimiterOptions,
    history_by_player: HashMap<String, Vec<u64>>,
}

impl RateLimiter {
    pub fn new(options: RateLimiterOptions) -> Self {
        Self {
            options,
            history_by_player: HashMap::new(),
        }
    }

    pub fn check(&mut self, player_id: &str, tick: u64) -> Result<(), CommandError> {
        let window = self.options.window_ticks;
        let history = self
            .history_by_player
            .entry(player_id.to_string())
            .or_default();
        history.retain(|at| tick.saturating_sub(*at) < window);
        if history.len() >= self.options.max_per_window {
            return Err(CommandError::RateLimited(format!(
                "at most {} commands per {} ticks",
                self.options.max_per_window, window
            )));
        }
        history.push(tick);
        Ok(())
    }

    pub fn prune(&mut self, tick: u64) {
        let window = self.options.window_ticks;
        for history in self.history_by_player.values_mut() {
            history.retain(|at| tick.saturating_sub(*at) < window);
        }
        self.history_by_player
            .retain(|_, history| !history.is_empty());
    }
}
