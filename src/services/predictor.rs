use nalgebra::{DMatrix, DVector};
use statrs::distribution::{Discrete, Poisson};

use crate::error::{ForecastError, Result};
use crate::models::{FeatureRow, MatchPrediction, OutcomeProbabilities, Venue};
use crate::services::model_trainer::ModelArtifact;

/// Largest gap between 1 and the outcome total accepted for `max_goals = 10`
/// with expected goals up to about 1.8 per side. Heavier scoring needs a
/// larger grid for the same bound.
pub const TRUNCATION_EPSILON: f64 = 1e-5;

/// Turns a trained goal model into 1X2 probabilities for upcoming fixtures.
pub struct OutcomePredictor {
    max_goals: u32,
}

impl OutcomePredictor {
    pub fn new(max_goals: u32) -> Self {
        Self { max_goals }
    }

    /// Predictions for every fixture, in input order.
    pub fn generate_predictions(
        &self,
        artifact: &ModelArtifact,
        fixtures: &[&FeatureRow],
    ) -> Result<Vec<MatchPrediction>> {
        artifact.schema.ensure_current()?;
        let mut out = Vec::with_capacity(fixtures.len());
        for fixture in fixtures {
            let prediction = self.predict_match_outcome(artifact, fixture)?;
            tracing::debug!(
                "Predicted {} vs {}: Home {:.2}%, Draw {:.2}%, Away {:.2}%",
                prediction.home_team,
                prediction.away_team,
                prediction.prob_home * 100.0,
                prediction.prob_draw * 100.0,
                prediction.prob_away * 100.0
            );
            out.push(prediction);
        }
        tracing::info!("Generated {} predictions for {}", out.len(), artifact.competition);
        Ok(out)
    }

    pub fn predict_match_outcome(&self, artifact: &ModelArtifact, fixture: &FeatureRow) -> Result<MatchPrediction> {
        let record = &fixture.record;
        let (lambda_home, missing_home) = artifact.expected_goals(fixture, Venue::Home);
        let (lambda_away, missing_away) = artifact.expected_goals(fixture, Venue::Away);

        if !missing_home.is_empty() || !missing_away.is_empty() {
            tracing::debug!(
                "{} vs {}: zero-filled {:?} / {:?}",
                record.home_team,
                record.away_team,
                missing_home,
                missing_away
            );
        }
        for (venue, team) in [(Venue::Home, &record.home_team), (Venue::Away, &record.away_team)] {
            if !artifact.schema.knows_team(team) {
                tracing::debug!("{} has no indicator in the {} model ({})", team, artifact.competition, venue.suffix());
            }
        }

        let probs = outcome_probabilities(lambda_home, lambda_away, self.max_goals)?;
        Ok(MatchPrediction {
            date: record.date,
            time: record.time.clone(),
            home_team: record.home_team.clone(),
            away_team: record.away_team.clone(),
            prob_home: probs.home,
            prob_draw: probs.draw,
            prob_away: probs.away,
            lambda_home,
            lambda_away,
        })
    }
}

/// P(goals = k) for k in 0..=max_goals.
pub fn goal_distribution(lambda: f64, max_goals: u32, side: &'static str) -> Result<DVector<f64>> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(ForecastError::InvalidLambda { side, value: lambda });
    }
    let len = max_goals as usize + 1;
    if lambda == 0.0 {
        let mut point = DVector::zeros(len);
        point[0] = 1.0;
        return Ok(point);
    }
    let dist = Poisson::new(lambda).map_err(|_| ForecastError::InvalidLambda { side, value: lambda })?;
    Ok(DVector::from_fn(len, |k, _| dist.pmf(k as u64)))
}

/// Joint score grid `P[i, j] = P(home = i) · P(away = j)`, truncated at `max_goals`.
pub fn score_matrix(lambda_home: f64, lambda_away: f64, max_goals: u32) -> Result<DMatrix<f64>> {
    let home = goal_distribution(lambda_home, max_goals, "home")?;
    let away = goal_distribution(lambda_away, max_goals, "away")?;
    Ok(&home * away.transpose())
}

/// Home win below the diagonal, draw on it, away win above.
///
/// Not renormalised: the three values sum to slightly less than 1 because of
/// grid truncation (see [`TRUNCATION_EPSILON`]).
pub fn outcome_probabilities(lambda_home: f64, lambda_away: f64, max_goals: u32) -> Result<OutcomeProbabilities> {
    let grid = score_matrix(lambda_home, lambda_away, max_goals)?;
    let mut probs = OutcomeProbabilities {
        home: 0.0,
        draw: 0.0,
        away: 0.0,
    };
    for i in 0..grid.nrows() {
        for j in 0..grid.ncols() {
            let p = grid[(i, j)];
            if i > j {
                probs.home += p;
            } else if i == j {
                probs.draw += p;
            } else {
                probs.away += p;
            }
        }
    }
    Ok(probs)
}
