use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::config::{ForecastConfig, RegressionConfig};
use crate::error::{ForecastError, Result};
use crate::models::{FeatureRow, Venue};
use crate::services::feature_pipeline::FeaturePipeline;
use crate::services::feature_schema::FeatureSchema;
use crate::services::poisson_regression::{fit_poisson, mean_deviance, PoissonFit, StandardScaler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Perspective rows used in the fit (two per played match).
    pub rows: usize,
    /// Perspective rows with at least one numeric slot zero-filled.
    pub zero_filled_rows: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Observed / predicted goals on home-perspective rows.
    pub kappa_home: f64,
    pub kappa_away: f64,
    pub mean_deviance: f64,
}

/// Everything needed to predict for one competition. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub run_id: Uuid,
    pub competition: String,
    pub trained_at: DateTime<Utc>,
    pub schema: FeatureSchema,
    pub scaler: StandardScaler,
    pub model: PoissonFit,
    pub report: TrainingReport,
}

impl ModelArtifact {
    /// Expected goals of the `attacking` side, plus the numeric slots that had to be zero-filled.
    pub fn expected_goals(&self, row: &FeatureRow, attacking: Venue) -> (f64, Vec<String>) {
        let v = self.schema.vectorize(row, attacking);
        let scaled = self.scaler.transform_row(&v.values);
        (self.model.predict(&scaled), v.missing)
    }
}

#[derive(Debug, Clone)]
pub struct ModelTrainer {
    pipeline: FeaturePipeline,
    regression: RegressionConfig,
}

impl ModelTrainer {
    pub fn new(cfg: &ForecastConfig) -> Self {
        Self {
            pipeline: FeaturePipeline::new(cfg),
            regression: cfg.regression,
        }
    }

    /// Fits one goal model over home- and away-perspective rows of every
    /// played match in `rows`.
    pub fn train(&self, competition: &str, rows: &[FeatureRow]) -> Result<ModelArtifact> {
        let played: Vec<&FeatureRow> = rows
            .iter()
            .filter(|r| r.record.home.gf.is_some() && r.record.away.gf.is_some())
            .collect();

        let teams: BTreeSet<String> = played
            .iter()
            .flat_map(|r| [r.record.home_team.clone(), r.record.away_team.clone()])
            .collect();
        let schema = FeatureSchema::build(self.pipeline.model_slots(), &teams);

        let mut data = Vec::new();
        let mut targets = Vec::new();
        let mut is_home = Vec::new();
        let mut zero_filled = 0usize;
        for row in &played {
            for venue in [Venue::Home, Venue::Away] {
                // Missing inputs are zero-filled here exactly as at prediction time.
                let v = schema.vectorize(row, venue);
                if !v.missing.is_empty() {
                    zero_filled += 1;
                }
                data.extend(v.values);
                targets.push(row.record.stats(venue).gf.unwrap_or(0.0));
                is_home.push(venue == Venue::Home);
            }
        }

        let n = targets.len();
        if n <= schema.len() {
            return Err(ForecastError::InsufficientData {
                context: format!("training {}", competition),
                rows: n,
                required: schema.len() + 1,
            });
        }

        let x = DMatrix::from_row_slice(n, schema.len(), &data);
        let y = DVector::from_vec(targets);
        let scaler = StandardScaler::fit(&x);
        let scaled = scaler.transform(&x);
        let model = fit_poisson(&scaled, &y, &self.regression)?;

        let predicted: Vec<f64> = scaled
            .row_iter()
            .map(|r| model.predict(&r.iter().copied().collect::<Vec<_>>()))
            .collect();
        let kappa = |home: bool| {
            let (obs, pred) = y
                .iter()
                .zip(&predicted)
                .zip(&is_home)
                .filter(|(_, h)| **h == home)
                .fold((0.0, 0.0), |(o, p), ((yv, pv), _)| (o + yv, p + pv));
            if pred > 0.0 {
                obs / pred
            } else {
                f64::NAN
            }
        };

        let report = TrainingReport {
            rows: n,
            zero_filled_rows: zero_filled,
            iterations: model.iterations,
            converged: model.converged,
            kappa_home: kappa(true),
            kappa_away: kappa(false),
            mean_deviance: mean_deviance(y.as_slice(), &predicted),
        };

        tracing::info!(
            "Trained {} on {} rows ({} zero-filled), {} features, {} iterations, kappa home {:.3} away {:.3}",
            competition,
            report.rows,
            report.zero_filled_rows,
            schema.len(),
            report.iterations,
            report.kappa_home,
            report.kappa_away
        );

        Ok(ModelArtifact {
            run_id: Uuid::new_v4(),
            competition: competition.to_string(),
            trained_at: Utc::now(),
            schema,
            scaler,
            model,
            report,
        })
    }
}

/// Trains independent competitions in parallel. Each result stands alone.
pub fn train_competitions(
    trainer: &ModelTrainer,
    datasets: &[(String, Vec<FeatureRow>)],
) -> Vec<(String, Result<ModelArtifact>)> {
    datasets
        .par_iter()
        .map(|(competition, rows)| (competition.clone(), trainer.train(competition, rows)))
        .collect()
}
