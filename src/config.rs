use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::error::{ForecastError, Result};
use crate::models::StatKind;

/// Scaling applied to the relegated-teams baseline of a promoted side,
/// driven by the points per match it earned in the tier it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionScaling {
    pub neutral_ppm: f64,
    /// Half-width of the band around `neutral_ppm` where the ratio stays 1.
    pub dead_zone: f64,
    pub up_slope: f64,
    pub down_slope: f64,
    pub min_ratio: f64,
    pub max_ratio: f64,
}

impl Default for PromotionScaling {
    fn default() -> Self {
        Self {
            neutral_ppm: 2.25,
            dead_zone: 0.15,
            up_slope: 0.25,
            down_slope: 0.5,
            min_ratio: 0.6,
            max_ratio: 1.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// L2 penalty on the non-intercept coefficients.
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            max_iter: 300,
            tol: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub trials: usize,
    pub top_n: usize,
    pub relegation_spots: usize,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trials: 10_000,
            top_n: 5,
            relegation_spots: 3,
            seed: None,
        }
    }
}

/// Which rolling columns feed the model, per attacking perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFeatures {
    /// Own-side rolling stats of the attacking team.
    pub attack_stats: Vec<StatKind>,
    /// Rolling conceded stats of the opponent.
    pub conceded_stats: Vec<StatKind>,
    /// Own-side rolling stats of the opponent (e.g. goals against).
    pub defense_stats: Vec<StatKind>,
    pub season_aggregates: bool,
}

impl Default for ModelFeatures {
    fn default() -> Self {
        Self {
            attack_stats: vec![StatKind::ExpectedGoals, StatKind::GoalsFor],
            conceded_stats: vec![StatKind::ExpectedGoals],
            defense_stats: vec![StatKind::GoalsAgainst],
            season_aggregates: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub rolling_stats: Vec<StatKind>,
    pub conceded_stats: Vec<StatKind>,
    pub windows: Vec<usize>,
    /// Matches after which the current season fully replaces the prior.
    pub agg_window: usize,
    /// Bottom-K teams of the previous season averaged into the promoted baseline.
    pub baseline_bottom_k: usize,
    pub promotion: PromotionScaling,
    pub model_features: ModelFeatures,
    pub regression: RegressionConfig,
    pub max_goals: u32,
    pub simulation: SimulationConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            rolling_stats: vec![
                StatKind::ExpectedGoals,
                StatKind::GoalsFor,
                StatKind::GoalsAgainst,
            ],
            conceded_stats: vec![StatKind::ExpectedGoals],
            windows: vec![5, 10],
            agg_window: 10,
            baseline_bottom_k: 3,
            promotion: PromotionScaling::default(),
            model_features: ModelFeatures::default(),
            regression: RegressionConfig::default(),
            max_goals: 10,
            simulation: SimulationConfig::default(),
        }
    }
}

impl ForecastConfig {
    /// Defaults overridden by environment variables (after `.env` is loaded).
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<usize>("AGG_WINDOW")? {
            cfg.agg_window = v;
        }
        if let Some(v) = env_parse::<usize>("SIM_TRIALS")? {
            cfg.simulation.trials = v;
        }
        if let Some(v) = env_parse::<usize>("RELEGATION_SPOTS")? {
            cfg.simulation.relegation_spots = v;
            cfg.baseline_bottom_k = v;
        }
        if let Some(v) = env_parse::<usize>("TOP_N")? {
            cfg.simulation.top_n = v;
        }
        if let Some(v) = env_parse::<u32>("MAX_GOALS")? {
            cfg.max_goals = v;
        }
        if let Ok(raw) = env::var("STAT_WINDOWS") {
            cfg.windows = raw
                .split(',')
                .map(|w| {
                    w.trim().parse::<usize>().map_err(|_| {
                        ForecastError::InvalidConfig(format!("STAT_WINDOWS entry '{}'", w))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.windows.is_empty() || self.windows.contains(&0) {
            return Err(ForecastError::InvalidConfig(
                "stat windows must be non-empty and positive".into(),
            ));
        }
        if self.agg_window == 0 {
            return Err(ForecastError::InvalidConfig("agg_window must be positive".into()));
        }
        let p = &self.promotion;
        if !(p.min_ratio > 0.0 && p.min_ratio <= 1.0 && p.max_ratio >= 1.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "promotion ratio bounds [{}, {}] must bracket 1 and stay positive",
                p.min_ratio, p.max_ratio
            )));
        }
        if p.dead_zone < 0.0 || p.up_slope < 0.0 || p.down_slope < 0.0 {
            return Err(ForecastError::InvalidConfig(
                "promotion dead zone and slopes must be non-negative".into(),
            ));
        }
        if !(self.regression.alpha > 0.0) {
            return Err(ForecastError::InvalidConfig("regression alpha must be positive".into()));
        }
        for stat in self
            .model_features
            .attack_stats
            .iter()
            .chain(&self.model_features.defense_stats)
        {
            if !self.rolling_stats.contains(stat) {
                return Err(ForecastError::InvalidConfig(format!(
                    "model feature '{}' is not a rolling stat",
                    stat
                )));
            }
        }
        // Attack and defense stats share a normalised slot name once the venue is stripped.
        if let Some(stat) = self
            .model_features
            .attack_stats
            .iter()
            .find(|s| self.model_features.defense_stats.contains(s))
        {
            return Err(ForecastError::InvalidConfig(format!(
                "'{}' cannot be both an attack and a defense feature",
                stat
            )));
        }
        for stat in &self.model_features.conceded_stats {
            if !self.conceded_stats.contains(stat) {
                return Err(ForecastError::InvalidConfig(format!(
                    "model feature '{}_conceded' is not a conceded stat",
                    stat
                )));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ForecastError::InvalidConfig(format!("{}='{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Static per-league settings the engine reads but does not own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeagueConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub team_name_map: HashMap<String, String>,
}

impl LeagueConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            team_name_map: HashMap::new(),
        }
    }

    /// Canonical team name for an alias; unknown names pass through trimmed.
    pub fn canonical_team(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.team_name_map
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }
}

/// Loads one league from a JSON object keyed by league name.
/// A missing file or league is not fatal: the league gets an empty alias map.
pub fn load_league_config(path: &Path, league: &str) -> Result<LeagueConfig> {
    if !path.exists() {
        tracing::warn!("League config {} not found, using no team aliases", path.display());
        return Ok(LeagueConfig::named(league));
    }
    let raw = fs::read_to_string(path)?;
    let mut all: HashMap<String, LeagueConfig> = serde_json::from_str(&raw)?;
    match all.remove(league) {
        Some(mut cfg) => {
            cfg.name = league.to_string();
            Ok(cfg)
        }
        None => {
            tracing::warn!("League '{}' missing from {}, using no team aliases", league, path.display());
            Ok(LeagueConfig::named(league))
        }
    }
}
