pub mod feature_pipeline;
pub mod feature_schema;
pub mod form_calculator;
pub mod markets;
pub mod match_loader;
pub mod model_trainer;
pub mod poisson_regression;
pub mod predictor;
pub mod season_aggregator;
pub mod season_simulator;

pub use feature_pipeline::{upcoming_fixtures, FeaturePipeline};
pub use feature_schema::{FeatureSchema, FEATURE_SCHEMA_VERSION};
pub use markets::{price_markets, FairOdds, MarketPrices, DEFAULT_GOAL_LINE};
pub use match_loader::MatchLoader;
pub use model_trainer::{train_competitions, ModelArtifact, ModelTrainer, TrainingReport};
pub use predictor::{outcome_probabilities, OutcomePredictor};
pub use season_aggregator::{PromotedPerformance, SeasonAggregator};
pub use season_simulator::SeasonSimulator;
