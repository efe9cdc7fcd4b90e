use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::models::OutcomeProbabilities;
use crate::services::predictor::{outcome_probabilities, score_matrix};

pub const DEFAULT_GOAL_LINE: f64 = 2.5;

/// Break-even decimal price of a probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FairOdds {
    Price(f64),
    /// Zero, negative or non-finite probability.
    Undefined,
}

impl FairOdds {
    pub fn from_probability(p: f64) -> Self {
        if p.is_finite() && p > 0.0 {
            FairOdds::Price(1.0 / p)
        } else {
            FairOdds::Undefined
        }
    }

    pub fn price(&self) -> Option<f64> {
        match self {
            FairOdds::Price(v) => Some(*v),
            FairOdds::Undefined => None,
        }
    }
}

impl fmt::Display for FairOdds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FairOdds::Price(v) => write!(f, "{:.2}", v),
            FairOdds::Undefined => f.write_str("undefined"),
        }
    }
}

/// Probabilities of the common goal markets for one fixture,
/// all read from the same truncated score grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPrices {
    pub outcome: OutcomeProbabilities,
    pub btts_yes: f64,
    pub btts_no: f64,
    pub line: f64,
    pub over: f64,
    pub under: f64,
}

impl MarketPrices {
    pub fn fair_odds(&self) -> [FairOdds; 7] {
        [
            self.outcome.home,
            self.outcome.draw,
            self.outcome.away,
            self.btts_yes,
            self.btts_no,
            self.over,
            self.under,
        ]
        .map(FairOdds::from_probability)
    }
}

pub fn price_markets(lambda_home: f64, lambda_away: f64, max_goals: u32, line: f64) -> Result<MarketPrices> {
    let outcome = outcome_probabilities(lambda_home, lambda_away, max_goals)?;
    let grid = score_matrix(lambda_home, lambda_away, max_goals)?;

    let mut btts_yes = 0.0;
    let mut over = 0.0;
    let mut under = 0.0;
    for i in 0..grid.nrows() {
        for j in 0..grid.ncols() {
            let p = grid[(i, j)];
            if i > 0 && j > 0 {
                btts_yes += p;
            }
            let total = (i + j) as f64;
            if total > line {
                over += p;
            } else if total < line {
                under += p;
            }
        }
    }

    Ok(MarketPrices {
        outcome,
        btts_yes,
        btts_no: grid.sum() - btts_yes,
        line,
        over,
        under,
    })
}
