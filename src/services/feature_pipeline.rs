use crate::config::{ForecastConfig, ModelFeatures};
use crate::models::{FeatureRow, MatchRecord, Venue};
use crate::services::feature_schema::{strip_venue, FeatureSlot};
use crate::services::form_calculator::{
    conceded_column, rolling_column, ConcededFormCalculator, RollingFormCalculator,
};
use crate::services::season_aggregator::{
    goals_against_column, goals_for_column, PromotedPerformance, SeasonAggregator,
};

/// Full feature pass over a competition's history.
///
/// Everything is recomputed from the records given; nothing is carried
/// between runs.
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    rolling: RollingFormCalculator,
    conceded: ConcededFormCalculator,
    aggregator: SeasonAggregator,
    model_features: ModelFeatures,
    windows: Vec<usize>,
}

impl FeaturePipeline {
    pub fn new(cfg: &ForecastConfig) -> Self {
        Self {
            rolling: RollingFormCalculator::new(cfg.rolling_stats.clone(), cfg.windows.clone()),
            conceded: ConcededFormCalculator::new(cfg.conceded_stats.clone(), cfg.windows.clone()),
            aggregator: SeasonAggregator::from_config(cfg),
            model_features: cfg.model_features.clone(),
            windows: cfg.windows.clone(),
        }
    }

    /// Rolling form, conceded form and season aggregates, in date order.
    pub fn run(&self, mut records: Vec<MatchRecord>, promoted: &PromotedPerformance) -> Vec<FeatureRow> {
        records.sort_by_key(|r| r.date);
        let mut rows: Vec<FeatureRow> = records.into_iter().map(FeatureRow::new).collect();

        self.rolling.apply(&mut rows);
        self.conceded.apply(&mut rows);
        self.aggregator.apply(&mut rows, promoted);

        let upcoming = rows.iter().filter(|r| !r.record.is_played()).count();
        tracing::info!(
            "Featured {} matches ({} played, {} upcoming)",
            rows.len(),
            rows.len() - upcoming,
            upcoming
        );
        rows
    }

    /// Numeric model inputs seen from the attacking side: its own attack
    /// form, what the opponent concedes and allows, and the season priors.
    pub fn model_slots(&self) -> Vec<FeatureSlot> {
        let mut slots = Vec::new();
        let mut push = |column: &dyn Fn(Venue) -> String| {
            let home = column(Venue::Home);
            slots.push(FeatureSlot::numeric(strip_venue(&home), home, column(Venue::Away)));
        };

        for &stat in &self.model_features.attack_stats {
            for &w in &self.windows {
                push(&|s| rolling_column(stat, s, w));
            }
        }
        for &stat in &self.model_features.conceded_stats {
            for &w in &self.windows {
                push(&|s| conceded_column(stat, s.opposite(), w));
            }
        }
        for &stat in &self.model_features.defense_stats {
            for &w in &self.windows {
                push(&|s| rolling_column(stat, s.opposite(), w));
            }
        }
        if self.model_features.season_aggregates {
            push(&goals_for_column);
            push(&|s| goals_against_column(s.opposite()));
        }
        slots
    }
}

/// Unplayed fixtures in the given rounds. An empty round list selects every unplayed fixture.
pub fn upcoming_fixtures<'a>(rows: &'a [FeatureRow], rounds: &[u32]) -> Vec<&'a FeatureRow> {
    rows.iter()
        .filter(|r| !r.record.is_played())
        .filter(|r| rounds.is_empty() || r.record.round.is_some_and(|n| rounds.contains(&n)))
        .collect()
}
